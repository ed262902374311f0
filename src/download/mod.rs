//! Transfer engine: resumable, verified, retrying file downloads.
//!
//! The entry point is [`transfer`], which moves one [`RemoteFile`] to a
//! destination sink through any [`Client`] implementation. The engine
//! handles skip checks (checksum ledger, existing files, hash comparison),
//! byte-range resumption of partial files, bounded-memory body streaming,
//! timestamp preservation, and a fixed-delay retry loop with a decrementing
//! budget. Cancellation is cooperative: the token is observed between
//! chunks and between retries, and partial writes stay on disk so the next
//! run can resume them.

pub mod checksum;
mod error;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, LAST_MODIFIED, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{AuthType, Client, RequestOptions};
use crate::file::RemoteFile;

pub use error::DownloadError;

/// Default retry budget per transfer.
pub const DEFAULT_RETRIES: u32 = 2;

/// Default delay between retries.
pub const DEFAULT_RETRY_SLEEP: Duration = Duration::from_secs(3);

/// Default per-request timeout for file bodies.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(12);

/// Where the transferred bytes go.
pub enum Sink {
    /// Write to the resolved destination path.
    Filesystem,
    /// Stream to standard output.
    Stdout,
    /// Stream into a caller-provided writer.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// Do not consume the body; hand the raw response back.
    Capture,
}

impl Default for Sink {
    fn default() -> Self {
        Self::Filesystem
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => f.write_str("Filesystem"),
            Self::Stdout => f.write_str("Stdout"),
            Self::Writer(_) => f.write_str("Writer(..)"),
            Self::Capture => f.write_str("Capture"),
        }
    }
}

/// Why a transfer was skipped without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Destination path already recorded in the checksum ledger.
    LedgerHit,
    /// Destination exists and `ignore_existing` is set.
    AlreadyExists,
    /// Local content hash matches the server-reported MD5.
    ChecksumMatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LedgerHit => "ledger-hit",
            Self::AlreadyExists => "exists",
            Self::ChecksumMatch => "checksum-match",
        })
    }
}

/// Result of one transfer.
#[derive(Debug)]
pub enum Outcome {
    /// The file was written to `path`.
    Downloaded {
        /// Final destination path.
        path: PathBuf,
        /// Bytes written during this transfer (excludes resumed prefix).
        bytes: u64,
    },
    /// Nothing transferred; the destination was already satisfactory.
    Skipped {
        /// Destination that was left alone.
        path: PathBuf,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// Retry budget exhausted and `ignore_errors` was set; the error is
    /// reported instead of propagated.
    Failed {
        /// The final attempt's error.
        error: DownloadError,
    },
    /// The cancellation token fired; partial writes remain resumable.
    Cancelled,
    /// Capture mode: the unconsumed response.
    Response(Box<reqwest::Response>),
    /// Dry run: the resolved download URL, nothing requested.
    DryRun {
        /// URL that would have been fetched.
        url: String,
    },
}

impl Outcome {
    /// True when bytes landed on disk (or the sink) this run.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }

    /// True when the transfer was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// True when the transfer failed non-fatally.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Options controlling one transfer (and, at item level, file selection).
#[derive(Debug)]
pub struct TransferOptions {
    /// Destination directory; the relative path is joined onto it.
    pub destdir: Option<PathBuf>,
    /// Override for the destination-relative file path.
    pub file_path: Option<String>,
    /// Only transfer files whose source tag is in this list (empty = all).
    pub source: Vec<String>,
    /// Skip files whose source tag is in this list.
    pub exclude_source: Vec<String>,
    /// Mirror progress/skip lines to stderr.
    pub verbose: bool,
    /// Skip any destination that already exists, without hashing.
    pub ignore_existing: bool,
    /// Report exhausted-retry failures as an [`Outcome::Failed`] instead of
    /// propagating them.
    pub ignore_errors: bool,
    /// Verify existing destinations against the remote MD5 before skipping.
    pub checksum: bool,
    /// Checksum ledger path; enables ledger-hit skips and match recording.
    pub checksum_ledger: Option<PathBuf>,
    /// Remaining retry budget; decremented during an attempt sequence.
    pub retries: u32,
    /// Fixed delay between retries. No jitter, no backoff.
    pub retries_sleep: Duration,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
    /// Output sink.
    pub sink: Sink,
    /// Flatten item directories: destination is the bare file name.
    pub no_directory: bool,
    /// Leave the local mtime alone instead of applying `Last-Modified`.
    pub no_change_timestamp: bool,
    /// Resolve and report URLs without any network I/O.
    pub dry_run: bool,
    /// Extra query parameters for the download request.
    pub params: Vec<(String, String)>,
    /// Cooperative cancellation signal.
    pub cancel: CancellationToken,

    // Item-level file selection.
    /// Restrict to these file names.
    pub names: Vec<String>,
    /// Restrict to these format tags.
    pub formats: Vec<String>,
    /// Glob patterns selecting file names.
    pub glob_patterns: Vec<String>,
    /// Glob patterns excluding file names matched by `glob_patterns`.
    pub exclude_patterns: Vec<String>,
    /// Include on-the-fly derived files in selection.
    pub on_the_fly: bool,
    /// Skip files under the item's `history/` directory.
    pub ignore_history_dir: bool,
    /// Position label used in verbose per-item headers.
    pub item_index: Option<usize>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            destdir: None,
            file_path: None,
            source: Vec::new(),
            exclude_source: Vec::new(),
            verbose: false,
            ignore_existing: false,
            ignore_errors: false,
            checksum: false,
            checksum_ledger: None,
            retries: DEFAULT_RETRIES,
            retries_sleep: DEFAULT_RETRY_SLEEP,
            timeout: Some(DEFAULT_TRANSFER_TIMEOUT),
            sink: Sink::Filesystem,
            no_directory: false,
            no_change_timestamp: false,
            dry_run: false,
            params: Vec::new(),
            cancel: CancellationToken::new(),
            names: Vec::new(),
            formats: Vec::new(),
            glob_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            on_the_fly: false,
            ignore_history_dir: false,
            item_index: None,
        }
    }
}

impl TransferOptions {
    /// True when any content verification is requested.
    #[must_use]
    pub fn verification_active(&self) -> bool {
        self.checksum || self.checksum_ledger.is_some()
    }
}

/// Transfers one remote file to the configured sink.
///
/// Skip checks run before any network request; the download itself is
/// retried up to `options.retries` times with a fixed sleep in between.
/// With `ignore_errors` set, an exhausted budget yields
/// [`Outcome::Failed`]; otherwise the final error propagates.
///
/// # Errors
///
/// Returns [`DownloadError`] for fatal failures: configuration errors
/// (destination collides with a non-directory), IO errors on skip-check
/// hashing, and exhausted retries without `ignore_errors`.
pub async fn transfer(
    client: &dyn Client,
    file: &RemoteFile,
    options: &mut TransferOptions,
) -> Result<Outcome, DownloadError> {
    let url = client
        .endpoints()
        .file_download_url(&file.identifier, &file.name);

    if options.dry_run {
        return Ok(Outcome::DryRun { url });
    }

    let capture = matches!(options.sink, Sink::Capture);
    let dest = resolve_destination(file, options).await?;

    if !capture && path_exists(&dest).await {
        if let Some(outcome) = check_skip(file, options, &dest).await? {
            return Ok(outcome);
        }
    }

    let mut attempts: u32 = 0;
    loop {
        if options.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        match attempt(client, file, options, &url, &dest, capture).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                attempts += 1;
                if options.retries > 0 {
                    options.retries -= 1;
                    warn!(
                        path = %dest.display(),
                        remaining = options.retries,
                        %error,
                        "transfer failed, sleeping before retry"
                    );
                    tokio::select! {
                        () = options.cancel.cancelled() => return Ok(Outcome::Cancelled),
                        () = tokio::time::sleep(options.retries_sleep) => {}
                    }
                    continue;
                }

                error!(
                    path = %dest.display(),
                    attempts,
                    %error,
                    "transfer failed, retry budget exhausted"
                );
                if options.ignore_errors {
                    return Ok(Outcome::Failed { error });
                }
                return Err(error);
            }
        }
    }
}

/// Resolves the destination path, rejecting a destdir that is a file.
async fn resolve_destination(
    file: &RemoteFile,
    options: &TransferOptions,
) -> Result<PathBuf, DownloadError> {
    let relative = options
        .file_path
        .clone()
        .unwrap_or_else(|| file.name.clone());

    match &options.destdir {
        Some(dir) => {
            if let Ok(metadata) = tokio::fs::metadata(dir).await
                && !metadata.is_dir()
            {
                return Err(DownloadError::not_a_directory(dir.clone()));
            }
            Ok(dir.join(relative))
        }
        None => Ok(PathBuf::from(relative)),
    }
}

/// Pre-write skip checks, in documented order: ledger hit, ignore-existing,
/// checksum comparison. Only called when the destination exists.
async fn check_skip(
    file: &RemoteFile,
    options: &TransferOptions,
    dest: &Path,
) -> Result<Option<Outcome>, DownloadError> {
    if let Some(ledger) = &options.checksum_ledger
        && checksum::ledger_contains(ledger, dest).await?
    {
        report_skip(options, dest, SkipReason::LedgerHit);
        return Ok(Some(Outcome::Skipped {
            path: dest.to_path_buf(),
            reason: SkipReason::LedgerHit,
        }));
    }

    if options.ignore_existing {
        report_skip(options, dest, SkipReason::AlreadyExists);
        return Ok(Some(Outcome::Skipped {
            path: dest.to_path_buf(),
            reason: SkipReason::AlreadyExists,
        }));
    }

    if options.verification_active() {
        let local_md5 = checksum::md5_file(dest).await?;
        if file.md5.as_deref() == Some(local_md5.as_str()) {
            if let Some(ledger) = &options.checksum_ledger {
                checksum::ledger_append(ledger, dest).await?;
            }
            report_skip(options, dest, SkipReason::ChecksumMatch);
            return Ok(Some(Outcome::Skipped {
                path: dest.to_path_buf(),
                reason: SkipReason::ChecksumMatch,
            }));
        }
    }

    Ok(None)
}

fn report_skip(options: &TransferOptions, dest: &Path, reason: SkipReason) {
    info!(path = %dest.display(), %reason, "skipping download");
    if options.verbose {
        eprintln!(" skipping {}, {reason}", dest.display());
    }
}

/// One download attempt: request, stream, finalize.
async fn attempt(
    client: &dyn Client,
    file: &RemoteFile,
    options: &mut TransferOptions,
    url: &str,
    dest: &Path,
    capture: bool,
) -> Result<Outcome, DownloadError> {
    if !capture
        && let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        if let Ok(metadata) = tokio::fs::metadata(parent).await
            && !metadata.is_dir()
        {
            return Err(DownloadError::not_a_directory(parent));
        }
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DownloadError::io(parent, source))?;
    }

    // Resume only when the local size disagrees with the server and no
    // verification was requested; verification implies a full re-fetch.
    let mut resume_from = None;
    if !capture
        && !options.verification_active()
        && let Ok(metadata) = tokio::fs::metadata(dest).await
        && metadata.len() != file.size
    {
        resume_from = Some(metadata.len());
    }

    let mut headers = HeaderMap::new();
    if let Some(offset) = resume_from
        && let Ok(value) = HeaderValue::from_str(&format!("bytes={offset}-"))
    {
        headers.insert(RANGE, value);
        debug!(path = %dest.display(), offset, "resuming partial download");
    }

    let response = client
        .get(
            url,
            RequestOptions {
                params: options.params.clone(),
                headers,
                auth: AuthType::S3,
                timeout: options.timeout,
                ..RequestOptions::default()
            },
        )
        .await?;

    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok());

    if capture {
        return Ok(Outcome::Response(Box::new(response)));
    }

    let cancel = options.cancel.clone();
    let written = match &mut options.sink {
        Sink::Filesystem => {
            let handle = open_destination(dest, resume_from.is_some()).await?;
            let mut writer = BufWriter::new(handle);
            let written = stream_body(response, &mut writer, url, dest, &cancel).await?;
            writer
                .flush()
                .await
                .map_err(|source| DownloadError::io(dest, source))?;
            written
        }
        Sink::Writer(writer) => stream_body(response, writer, url, dest, &cancel).await?,
        Sink::Stdout => {
            let mut stdout = tokio::io::stdout();
            let written = stream_body(response, &mut stdout, url, dest, &cancel).await?;
            stdout
                .flush()
                .await
                .map_err(|source| DownloadError::io(dest, source))?;
            written
        }
        Sink::Capture => unreachable!("capture handled before streaming"),
    };

    let Some(bytes) = written else {
        info!(path = %dest.display(), "transfer cancelled, partial file left for resume");
        return Ok(Outcome::Cancelled);
    };

    if matches!(options.sink, Sink::Filesystem) && !options.no_change_timestamp {
        apply_mtime(dest, last_modified, file.mtime);
    }

    info!(
        path = %dest.display(),
        bytes,
        resumed = resume_from.is_some(),
        "downloaded {}/{}",
        file.identifier,
        file.name
    );
    if options.verbose {
        eprintln!(" downloaded {}/{} to {}", file.identifier, file.name, dest.display());
    }

    Ok(Outcome::Downloaded {
        path: dest.to_path_buf(),
        bytes,
    })
}

async fn open_destination(dest: &Path, resume: bool) -> Result<File, DownloadError> {
    if resume {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await
            .map_err(|source| DownloadError::io(dest, source))
    } else {
        File::create(dest)
            .await
            .map_err(|source| DownloadError::io(dest, source))
    }
}

/// Streams the response body to `writer` chunk by chunk, preserving order
/// and never buffering the whole body. Returns `None` when cancelled.
async fn stream_body(
    response: reqwest::Response,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<Option<u64>, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let chunk =
            chunk.map_err(|source| DownloadError::Client(crate::client::ClientError::network(url, source)))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|source| DownloadError::io(dest, source))?;
        written += chunk.len() as u64;
    }

    Ok(Some(written))
}

/// Applies the remote mtime, falling back to the server-reported file mtime
/// when the header was absent. Failure only warns; the bytes are already
/// safe on disk.
fn apply_mtime(dest: &Path, last_modified: Option<SystemTime>, fallback_mtime: f64) {
    let target = last_modified.or_else(|| {
        (fallback_mtime > 0.0).then(|| UNIX_EPOCH + Duration::from_secs_f64(fallback_mtime))
    });

    if let Some(time) = target {
        let file_time = FileTime::from_system_time(time);
        if let Err(error) = filetime::set_file_mtime(dest, file_time) {
            warn!(path = %dest.display(), %error, "failed to apply remote mtime");
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::LedgerHit.to_string(), "ledger-hit");
        assert_eq!(SkipReason::AlreadyExists.to_string(), "exists");
        assert_eq!(SkipReason::ChecksumMatch.to_string(), "checksum-match");
    }

    #[test]
    fn test_default_options() {
        let options = TransferOptions::default();
        assert_eq!(options.retries, DEFAULT_RETRIES);
        assert_eq!(options.retries_sleep, DEFAULT_RETRY_SLEEP);
        assert!(!options.verification_active());
        assert!(matches!(options.sink, Sink::Filesystem));
    }

    #[test]
    fn test_verification_active_with_ledger_only() {
        let options = TransferOptions {
            checksum_ledger: Some(PathBuf::from("ledger.txt")),
            ..TransferOptions::default()
        };
        assert!(options.verification_active());
    }

    #[test]
    fn test_outcome_predicates() {
        let downloaded = Outcome::Downloaded {
            path: PathBuf::from("x"),
            bytes: 1,
        };
        assert!(downloaded.is_downloaded());
        assert!(!downloaded.is_skipped());

        let skipped = Outcome::Skipped {
            path: PathBuf::from("x"),
            reason: SkipReason::AlreadyExists,
        };
        assert!(skipped.is_skipped());
        assert!(!skipped.is_failed());
    }
}
