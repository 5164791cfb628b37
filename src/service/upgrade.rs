//! Node self-upgrade.
//!
//! The running executable is replaced in place with the received image,
//! keeping its permission bits, and the process restarts into it with the
//! same arguments and environment. On Unix the restart is an `exec`, so the
//! process id survives; elsewhere the new image is spawned and this process
//! exits.

use std::convert::Infallible;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::error::{ProtocolError, Result};
use crate::utils::crypto::sha256_hex;

/// Something that can swap the running program for a new image
pub trait ImageReplacer: Send + Sync {
    /// Replace the image and restart into it. Only returns on failure.
    fn replace_and_restart(&self, image: &[u8]) -> Result<Infallible>;
}

/// Replaces the current executable (or a fixed path) and restarts
#[derive(Debug, Clone)]
pub struct SelfUpgrade {
    /// `None` when the running executable could not be located
    path: Option<PathBuf>,
}

impl SelfUpgrade {
    /// Target the running executable, resolved once. Once the file is
    /// replaced, Linux reports the old path as `<path> (deleted)`.
    pub fn new() -> Self {
        let path = match std::env::current_exe() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Cannot locate running executable, self-upgrade disabled");
                None
            }
        };
        Self { path }
    }

    /// Target a specific file instead of the running executable
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn target(&self) -> Result<PathBuf> {
        self.path
            .clone()
            .ok_or_else(|| ProtocolError::Upgrade("running executable could not be located".into()))
    }

    /// Remove the target and recreate it with `image` and the same
    /// permission bits. Returns the path written.
    pub fn replace_image(&self, image: &[u8]) -> Result<PathBuf> {
        let path = self.target()?;
        let permissions = std::fs::metadata(&path)
            .map_err(|e| ProtocolError::Upgrade(format!("stat {}: {e}", path.display())))?
            .permissions();

        std::fs::remove_file(&path)
            .map_err(|e| ProtocolError::Upgrade(format!("remove {}: {e}", path.display())))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            options.mode(permissions.mode());
        }
        let mut file = options
            .open(&path)
            .map_err(|e| ProtocolError::Upgrade(format!("create {}: {e}", path.display())))?;
        file.write_all(image)?;
        file.sync_all()?;
        drop(file);
        std::fs::set_permissions(&path, permissions)?;

        info!(path = %path.display(), bytes = image.len(), "Executable replaced");
        Ok(path)
    }
}

impl Default for SelfUpgrade {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageReplacer for SelfUpgrade {
    fn replace_and_restart(&self, image: &[u8]) -> Result<Infallible> {
        let path = self.replace_image(image)?;
        info!("Restarting into the new image");
        restart(&path)
    }
}

#[cfg(unix)]
fn restart(path: &Path) -> Result<Infallible> {
    use std::os::unix::process::CommandExt;

    let mut args = std::env::args_os();
    let mut command = Command::new(path);
    if let Some(arg0) = args.next() {
        command.arg0(arg0);
    }
    command.args(args);
    let err = command.exec();
    warn!(error = %err, "exec failed");
    Err(ProtocolError::Upgrade(format!("exec {}: {err}", path.display())))
}

#[cfg(not(unix))]
fn restart(path: &Path) -> Result<Infallible> {
    Command::new(path)
        .args(std::env::args_os().skip(1))
        .spawn()
        .map_err(|e| {
            warn!(error = %e, "spawn failed");
            ProtocolError::Upgrade(format!("spawn {}: {e}", path.display()))
        })?;
    std::process::exit(0)
}

/// Hex SHA-256 of the running executable
pub fn executable_hash() -> Result<String> {
    let path = std::env::current_exe()?;
    file_hash(&path)
}

/// Hex SHA-256 of the file at `path`
pub fn file_hash(path: &Path) -> Result<String> {
    Ok(sha256_hex(&std::fs::read(path)?))
}
