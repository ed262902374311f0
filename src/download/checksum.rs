//! Local checksum computation and the completed-transfer ledger.
//!
//! The ledger is a plain newline-delimited list of destination paths whose
//! contents were already verified against the server's hash. Presence of a
//! path is sufficient to skip re-hashing on a later run. Only paths are
//! recorded, not hashes: a remote file that changed under a previously
//! ledgered path will be skipped on replay. That is a documented limitation,
//! not a bug to fix here.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::DownloadError;

/// Read granularity for hashing local files.
const HASH_CHUNK_SIZE: usize = 8192;

/// Computes the MD5 hex digest of a local file with bounded memory.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the file cannot be opened or read.
pub async fn md5_file(path: &Path) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| DownloadError::io(path, source))?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|source| DownloadError::io(path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex_digest(&hasher.finalize()))
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Returns whether `dest` is already recorded in the ledger.
///
/// A missing ledger file is created empty so later appends always succeed.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the ledger cannot be read or created.
pub async fn ledger_contains(ledger: &Path, dest: &Path) -> Result<bool, DownloadError> {
    if !ledger.exists() {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(ledger)
            .await
            .map_err(|source| DownloadError::io(ledger, source))?;
        return Ok(false);
    }

    let contents = tokio::fs::read_to_string(ledger)
        .await
        .map_err(|source| DownloadError::io(ledger, source))?;

    let dest = dest.to_string_lossy();
    Ok(contents.lines().any(|line| line.trim_end() == dest))
}

/// Appends `dest` to the ledger, creating the file when absent.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the ledger cannot be written.
pub async fn ledger_append(ledger: &Path, dest: &Path) -> Result<(), DownloadError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(ledger)
        .await
        .map_err(|source| DownloadError::io(ledger, source))?;

    file.write_all(format!("{}\n", dest.display()).as_bytes())
        .await
        .map_err(|source| DownloadError::io(ledger, source))?;

    debug!(ledger = %ledger.display(), path = %dest.display(), "recorded in checksum ledger");
    Ok(())
}
