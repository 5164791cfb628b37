//! Chunked binary distribution over the control channel.
//!
//! A transfer is a run of BinaryData packets sharing a label followed by one
//! BinaryEnd with empty data. Each chunk carries `mtu - label.len()` bytes
//! so a chunk and its label fit one MTU.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{BinaryChunk, ControlPacket};
use crate::service::secure::PacketSender;
use crate::utils::metrics::global_metrics;

/// Label that makes the node replace its own binary
pub const UPGRADE_LABEL: &str = "upgrade";

/// Prefix for transfers written to the download directory
pub const DOWNLOAD_PREFIX: &str = "BD_";

/// Data bytes per chunk for `label` at `mtu`
pub fn chunk_size(mtu: usize, label: &str) -> Result<usize> {
    match mtu.checked_sub(label.len()) {
        Some(size) if size > 0 => Ok(size),
        _ => Err(ProtocolError::Transfer(format!(
            "{} (mtu {mtu}, label {} bytes)",
            constants::ERR_CHUNK_SIZE,
            label.len()
        ))),
    }
}

/// Every packet of one transfer, in send order.
///
/// There is always at least one BinaryData, even for empty data.
pub fn transfer_packets(label: &str, data: &[u8], mtu: usize) -> Result<Vec<ControlPacket>> {
    let size = chunk_size(mtu, label)?;
    let mut packets: Vec<ControlPacket> = Vec::with_capacity(data.len() / size + 2);

    let mut rest = data;
    while rest.len() > size {
        let (chunk, tail) = rest.split_at(size);
        packets.push(ControlPacket::BinaryData(BinaryChunk {
            label: label.to_string(),
            data: chunk.to_vec(),
        }));
        rest = tail;
    }
    packets.push(ControlPacket::BinaryData(BinaryChunk {
        label: label.to_string(),
        data: rest.to_vec(),
    }));
    packets.push(ControlPacket::BinaryEnd(BinaryChunk {
        label: label.to_string(),
        data: Vec::new(),
    }));
    Ok(packets)
}

/// Queue a whole transfer on `sender`. Returns the number of data chunks.
#[instrument(skip(sender, data), fields(bytes = data.len()))]
pub async fn send_binary(sender: &PacketSender, label: &str, data: &[u8], mtu: usize) -> Result<usize> {
    let packets = transfer_packets(label, data, mtu)?;
    let chunks = packets.len() - 1;
    for packet in packets {
        sender.send(packet.encode()?).await?;
    }
    global_metrics().transfer_sent();
    info!(chunks, "Transfer queued");
    Ok(chunks)
}

/// Receive-side reassembly buffers keyed by label
#[derive(Debug, Default)]
pub struct TransferBuffers {
    buffers: Mutex<HashMap<String, Vec<Bytes>>>,
}

impl TransferBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk, creating the buffer on first use
    pub fn append(&self, label: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let chunks = buffers.entry(label.to_string()).or_default();
        chunks.push(data);
        debug!(label, chunks = chunks.len(), "Chunk buffered");
    }

    /// Concatenate and drop the buffer. `None` if the label is unknown.
    pub fn finish(&self, label: &str) -> Option<Vec<u8>> {
        let chunks = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label)?;
        let total = chunks.iter().map(Bytes::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        global_metrics().transfer_received();
        Some(data)
    }

    /// Transfers started but not finished
    pub fn pending(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Refuse labels that are not a plain file name
pub fn validate_label(label: &str) -> Result<()> {
    let unsafe_label = label.is_empty()
        || label == "."
        || label.contains("..")
        || label.contains('/')
        || label.contains('\\')
        || label.contains('\0');
    if unsafe_label {
        return Err(ProtocolError::Transfer(format!(
            "{}: {label:?}",
            constants::ERR_UNSAFE_LABEL
        )));
    }
    Ok(())
}

/// Write a finished transfer as `BD_<label>` under `dir`
pub async fn write_download(dir: &Path, label: &str, data: &[u8]) -> Result<PathBuf> {
    validate_label(label)?;
    let path = dir.join(format!("{DOWNLOAD_PREFIX}{label}"));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}
