//! # Cryptographic primitives
//!
//! RSA (PKCS#1 v1.5) for the key-exchange phase and AES-128-CFB8 for the
//! symmetric phase of the control channel.
//!
//! ## Compatibility note
//! The CFB8 stream uses the shared secret as both key and IV. That is weaker
//! than a random IV but every deployed master and node derives the stream
//! this way, so changing it breaks interoperability.
//!
//! Public keys are exchanged as PEM with the `PUBLIC KEY` label wrapping a
//! PKCS#1 body. Parsing also accepts SPKI bodies and the `RSA PUBLIC KEY`
//! label.

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pem_rfc7468::LineEnding;
use rand_core::{OsRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};

/// Length of the shared secret exchanged during the handshake
pub const SHARED_SECRET_LEN: usize = 16;

/// Default RSA modulus size for generated master keys
pub const DEFAULT_RSA_BITS: usize = 2048;

const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";
const RSA_PUBLIC_KEY_LABEL: &str = "RSA PUBLIC KEY";

pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Generate a fresh random shared secret
pub fn generate_shared_secret() -> [u8; SHARED_SECRET_LEN] {
    let mut secret = [0u8; SHARED_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Encrypt one key-exchange frame for the holder of `key`'s private half
pub fn rsa_encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| ProtocolError::Crypto(format!("RSA encryption failed: {e}")))
}

/// Decrypt one key-exchange frame
pub fn rsa_decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| ProtocolError::Crypto(format!("RSA decryption failed: {e}")))
}

/// Both directions of an AES-128-CFB8 stream derived from one shared secret
pub struct StreamCipher {
    pub encryptor: Aes128Cfb8Enc,
    pub decryptor: Aes128Cfb8Dec,
}

impl StreamCipher {
    /// Derive the stream ciphers. Key and IV are both `secret`.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() != SHARED_SECRET_LEN {
            return Err(ProtocolError::Crypto(constants::ERR_INVALID_SECRET.into()));
        }
        let encryptor = Aes128Cfb8Enc::new_from_slices(secret, secret)
            .map_err(|e| ProtocolError::Crypto(format!("cipher init failed: {e}")))?;
        let decryptor = Aes128Cfb8Dec::new_from_slices(secret, secret)
            .map_err(|e| ProtocolError::Crypto(format!("cipher init failed: {e}")))?;
        Ok(Self {
            encryptor,
            decryptor,
        })
    }
}

/// Encrypt `buf` in place, advancing the stream state
pub fn encrypt_in_place(cipher: &mut Aes128Cfb8Enc, buf: &mut [u8]) {
    let (blocks, _) = InOutBuf::from(buf).into_chunks();
    cipher.encrypt_blocks_inout_mut(blocks);
}

/// Decrypt `buf` in place, advancing the stream state
pub fn decrypt_in_place(cipher: &mut Aes128Cfb8Dec, buf: &mut [u8]) {
    let (blocks, _) = InOutBuf::from(buf).into_chunks();
    cipher.decrypt_blocks_inout_mut(blocks);
}

/// Lowercase hex SHA-256 of `data`, the form build hashes are compared in
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Generate a new RSA key pair
pub fn generate_keypair(bits: usize) -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| ProtocolError::Crypto(format!("RSA key generation failed: {e}")))
}

/// Encode a public key the way the bootstrap endpoint serves it
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| ProtocolError::Crypto(format!("public key encoding failed: {e}")))?;
    pem_rfc7468::encode_string(PUBLIC_KEY_LABEL, LineEnding::LF, der.as_bytes())
        .map_err(|e| ProtocolError::Crypto(format!("PEM encoding failed: {e}")))
}

/// Parse a PEM public key as served by the bootstrap endpoint
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    let (label, der) = pem_rfc7468::decode_vec(pem.trim().as_bytes())
        .map_err(|e| ProtocolError::Crypto(format!("invalid PEM: {e}")))?;
    match label {
        PUBLIC_KEY_LABEL => RsaPublicKey::from_pkcs1_der(&der)
            .or_else(|_| RsaPublicKey::from_public_key_der(&der))
            .map_err(|e| ProtocolError::Crypto(format!("invalid public key: {e}"))),
        RSA_PUBLIC_KEY_LABEL => RsaPublicKey::from_pkcs1_der(&der)
            .map_err(|e| ProtocolError::Crypto(format!("invalid public key: {e}"))),
        other => Err(ProtocolError::Crypto(format!(
            "unexpected PEM label: {other}"
        ))),
    }
}

/// Load the master key pair, generating and persisting one when absent.
///
/// The private key is stored as PKCS#1 PEM; the public key next to it in
/// the bootstrap format.
pub fn load_or_generate_keypair(
    key_path: &Path,
    public_key_path: &Path,
    bits: usize,
) -> Result<RsaPrivateKey> {
    if key_path.exists() {
        let mut pem = std::fs::read_to_string(key_path)?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| ProtocolError::Crypto(format!("invalid private key: {e}")));
        pem.zeroize();
        let key = key?;
        info!(path = %key_path.display(), "Loaded master key pair");

        if !public_key_path.exists() {
            warn!(path = %public_key_path.display(), "Public key missing, rewriting it");
            std::fs::write(public_key_path, public_key_to_pem(&key.to_public_key())?)?;
        }
        return Ok(key);
    }

    info!(bits, "No master key pair found, generating one");
    let key = generate_keypair(bits)?;
    let private_pem = key
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .map_err(|e| ProtocolError::Crypto(format!("private key encoding failed: {e}")))?;
    std::fs::write(key_path, private_pem.as_bytes())?;
    std::fs::write(public_key_path, public_key_to_pem(&key.to_public_key())?)?;
    info!(path = %key_path.display(), "Generated master key pair");
    Ok(key)
}
