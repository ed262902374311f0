//! Item model and per-item download orchestration.
//!
//! An [`Item`] is a snapshot of one server-hosted collection: its metadata
//! document, its file listing, and the page URLs derived from its
//! identifier. File selection (by name, format tag, or glob pattern) and
//! the download-everything-selected loop live here; moving the actual bytes
//! is delegated to the transfer engine.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::urls::ItemUrls;
use crate::client::Client;
use crate::download::{self, DownloadError, Outcome, Sink, TransferOptions};
use crate::file::{FileMetadata, RemoteFile};

/// Formats synthesized on demand by the server rather than stored.
const ON_THE_FLY_KINDS: [&str; 4] = ["EPUB", "MOBI", "DAISY", "MARCXML"];

/// Item metadata document as the metadata API reports it.
///
/// Known top-level keys get named fields; the rest are preserved in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemSnapshot {
    /// Descriptive metadata map (`identifier`, `title`, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Server-reported file listing.
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    /// Item creation timestamp.
    #[serde(default)]
    pub created: Option<u64>,
    /// Primary datanode.
    #[serde(default)]
    pub d1: Option<String>,
    /// Secondary datanode.
    #[serde(default)]
    pub d2: Option<String>,
    /// Storage directory on the datanode.
    #[serde(default)]
    pub dir: Option<String>,
    /// Number of files in the item.
    #[serde(default)]
    pub files_count: Option<u64>,
    /// Total item size in bytes.
    #[serde(default)]
    pub item_size: Option<u64>,
    /// Serving datanode.
    #[serde(default)]
    pub server: Option<String>,
    /// Whether the item is darkened (inaccessible).
    #[serde(default)]
    pub is_dark: Option<bool>,
    /// Unrecognized top-level keys, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Which files of an item an operation should touch.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    /// Exact file names to include.
    pub names: Vec<String>,
    /// Format tags to include.
    pub formats: Vec<String>,
    /// Glob patterns selecting names.
    pub glob_patterns: Vec<String>,
    /// Glob patterns excluding names otherwise selected by `glob_patterns`.
    pub exclude_patterns: Vec<String>,
    /// Also offer on-the-fly derived files.
    pub on_the_fly: bool,
}

impl FileSelection {
    /// Selects every stored file.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects files by exact name.
    #[must_use]
    pub fn by_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Selects files by format tag.
    #[must_use]
    pub fn by_formats(formats: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            formats: formats.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Selects files by `|`-separated glob patterns, with optional
    /// `|`-separated exclusions.
    #[must_use]
    pub fn by_glob(patterns: &str, exclude: &str) -> Self {
        Self {
            glob_patterns: split_patterns(patterns),
            exclude_patterns: split_patterns(exclude),
            ..Self::default()
        }
    }

    fn is_unrestricted(&self) -> bool {
        self.names.is_empty() && self.formats.is_empty() && self.glob_patterns.is_empty()
    }

    fn matches(&self, name: &str, format: Option<&str>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        if self.names.iter().any(|n| n == name) {
            return true;
        }
        if let Some(format) = format
            && self.formats.iter().any(|f| f == format)
        {
            return true;
        }
        if glob_match_any(&self.glob_patterns, name) {
            return !glob_match_any(&self.exclude_patterns, name);
        }
        false
    }
}

impl From<&TransferOptions> for FileSelection {
    fn from(options: &TransferOptions) -> Self {
        Self {
            names: options.names.clone(),
            formats: options.formats.clone(),
            glob_patterns: options.glob_patterns.clone(),
            exclude_patterns: options.exclude_patterns.clone(),
            on_the_fly: options.on_the_fly,
        }
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn glob_match_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|raw| match glob::Pattern::new(raw) {
        Ok(pattern) => pattern.matches(name),
        Err(error) => {
            warn!(pattern = %raw, %error, "ignoring invalid glob pattern");
            false
        }
    })
}

/// One item, bound to the client that fetched it.
pub struct Item<'a> {
    client: &'a dyn Client,
    /// Item identifier.
    pub identifier: String,
    /// Parsed metadata document.
    pub snapshot: ItemSnapshot,
    /// Whether the server knows this item at all.
    pub exists: bool,
    /// Precomputed page URLs.
    pub urls: ItemUrls,
    /// Wiki-style link line, when the item has a title.
    pub wikilink: Option<String>,
}

impl std::fmt::Debug for Item<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("identifier", &self.identifier)
            .field("exists", &self.exists)
            .field("files", &self.snapshot.files.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Item<'a> {
    /// Binds a fetched metadata document to `client`.
    ///
    /// An empty or unexpectedly shaped document produces a non-existent
    /// item rather than an error, so callers can probe identifiers cheaply.
    #[must_use]
    pub fn new(client: &'a dyn Client, identifier: &str, metadata: &Value) -> Self {
        let snapshot: ItemSnapshot = serde_json::from_value(metadata.clone())
            .map_err(|error| {
                warn!(identifier, %error, "unexpected metadata document shape");
                error
            })
            .unwrap_or_default();

        let exists = metadata.as_object().is_some_and(|map| !map.is_empty());

        let identifier = if identifier.is_empty() {
            snapshot
                .metadata
                .get("identifier")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            identifier.to_string()
        };

        let urls = client.endpoints().item_urls(&identifier);
        let wikilink = snapshot
            .metadata
            .get("title")
            .and_then(Value::as_str)
            .map(|title| format!("* [{} {}] -- {}", urls.details(), identifier, title));

        Self {
            client,
            identifier,
            snapshot,
            exists,
            urls,
            wikilink,
        }
    }

    /// The item's title, when present.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.snapshot.metadata.get("title").and_then(Value::as_str)
    }

    /// Descriptor for one file by name; `None` for names that normalize to
    /// nothing. Unknown names yield a descriptor with `exists == false`.
    #[must_use]
    pub fn get_file(&self, name: &str) -> Option<RemoteFile> {
        RemoteFile::new(&self.identifier, name, None, &self.snapshot.files)
    }

    /// Descriptors for every file matching `selection`, in listing order.
    #[must_use]
    pub fn get_files(&self, selection: &FileSelection) -> Vec<RemoteFile> {
        let mut listing: Vec<FileMetadata> = self.snapshot.files.clone();
        if selection.on_the_fly {
            listing.extend(self.on_the_fly_files());
        }

        listing
            .iter()
            .filter(|f| selection.matches(&f.name, f.format.as_deref()))
            .filter_map(|f| RemoteFile::new(&self.identifier, &f.name, Some(f), &[]))
            .collect()
    }

    fn on_the_fly_files(&self) -> Vec<FileMetadata> {
        ON_THE_FLY_KINDS
            .iter()
            .map(|kind| {
                let name = match *kind {
                    "EPUB" => format!("{}.epub", self.identifier),
                    "MOBI" => format!("{}.mobi", self.identifier),
                    "DAISY" => format!("{}_daisy.zip", self.identifier),
                    _ => format!("{}_archive_marc.xml", self.identifier),
                };
                FileMetadata {
                    name,
                    format: Some((*kind).to_string()),
                    otf: true,
                    ..FileMetadata::default()
                }
            })
            .collect()
    }

    /// Downloads every selected file of this item.
    ///
    /// Selection comes from the options (names, formats, globs, on-the-fly,
    /// history skip); source filters and path flattening are applied per
    /// file. Dry-run reports each resolved URL on stdout without any
    /// network I/O. Each file gets the full retry budget.
    ///
    /// Returns one [`Outcome`] per attempted file, in listing order.
    ///
    /// # Errors
    ///
    /// Propagates fatal [`DownloadError`]s; with `ignore_errors` set those
    /// become [`Outcome::Failed`] entries instead.
    pub async fn download(
        &self,
        options: &mut TransferOptions,
    ) -> Result<Vec<Outcome>, DownloadError> {
        if matches!(options.sink, Sink::Stdout) {
            options.verbose = false;
        }

        if !options.dry_run && options.verbose {
            match options.item_index {
                Some(index) => eprintln!("{} ({index}):", self.identifier),
                None => eprintln!("{}:", self.identifier),
            }
        }

        if !self.exists {
            let msg = format!("skipping {}, item does not exist.", self.identifier);
            warn!("{msg}");
            if options.verbose {
                eprintln!(" {msg}");
            }
            return Ok(Vec::new());
        }

        let selection = FileSelection::from(&*options);
        let files = self.get_files(&selection);
        let budget = options.retries;

        let mut outcomes = Vec::new();
        let mut attempted = 0usize;

        for file in files {
            if options.ignore_history_dir && file.name.starts_with("history/") {
                continue;
            }
            if !options.source.is_empty()
                && !file
                    .source
                    .as_deref()
                    .is_some_and(|s| options.source.iter().any(|want| want == s))
            {
                continue;
            }
            if file
                .source
                .as_deref()
                .is_some_and(|s| options.exclude_source.iter().any(|skip| skip == s))
            {
                continue;
            }

            attempted += 1;

            options.file_path = Some(if options.no_directory {
                file.name.clone()
            } else {
                format!("{}/{}", self.identifier, file.name)
            });
            options.retries = budget;

            let outcome = download::transfer(self.client, &file, options).await?;
            if let Outcome::DryRun { url } = &outcome {
                println!("{url}");
            }
            outcomes.push(outcome);
        }

        options.file_path = None;

        if attempted == 0 {
            let msg = format!("skipping {}, no matching files found.", self.identifier);
            info!("{msg}");
            if options.verbose {
                eprintln!(" {msg}");
            }
        }

        Ok(outcomes)
    }
}
