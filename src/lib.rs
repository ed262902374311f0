//! Async client engine for the Internet Archive.
//!
//! Three pieces carry the real machinery:
//! - [`download`] - resumable, checksum-verified, retrying file transfers
//! - [`search`] - one lazy record stream over three server paging protocols
//! - [`search::query`] - declarative rule sets compiled to query strings
//!
//! Around them sit the collaborators a usable client needs: the [`client`]
//! transport (authenticated HTTP with cookie/session state), the [`item`]
//! and [`file`] metadata models, [`config`] credential handling, and the
//! [`api::Archive`] facade gluing it all together.
//!
//! # Example
//!
//! ```no_run
//! use ia_client::{Archive, SearchOptions, TransferOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let archive = Archive::connect().await?;
//!
//! let mut results = archive
//!     .search_items(SearchOptions::new("collection:nasa"))
//!     .results();
//! while let Some(record) = results.next().await {
//!     println!("{:?}", record.get("identifier"));
//! }
//!
//! let mut options = TransferOptions {
//!     destdir: Some("downloads".into()),
//!     ..TransferOptions::default()
//! };
//! archive.download("nasa", &mut options).await?;
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod client;
pub mod config;
pub mod download;
pub mod file;
pub mod item;
pub mod search;

// Re-export commonly used types
pub use api::Archive;
pub use client::urls::{Endpoints, ItemPage, ItemUrls};
pub use client::{ArchiveClient, AuthType, Client, ClientError, RequestOptions};
pub use config::{Config, ConfigError};
pub use download::{
    transfer, DownloadError, Outcome, Sink, SkipReason, TransferOptions, DEFAULT_RETRIES,
};
pub use file::{FileMetadata, RemoteFile};
pub use item::{FileSelection, Item, ItemSnapshot};
pub use search::query::{DateLogic, DateRange, FieldRule, QueryBuilder, QueryRuleSet, RuleLogic};
pub use search::{ItemResults, Protocol, Record, Search, SearchError, SearchOptions, SearchResults};
