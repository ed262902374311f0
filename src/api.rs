//! Top-level facade tying the client, items, downloads, and search together.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::client::{ArchiveClient, Client, ClientError};
use crate::config::Config;
use crate::download::{DownloadError, Outcome, TransferOptions};
use crate::file::RemoteFile;
use crate::item::{FileSelection, Item};
use crate::search::{Search, SearchOptions};

/// One connected archive session.
///
/// Thin orchestration over [`ArchiveClient`]: fetch items, select and
/// download their files, enumerate search results, manage credentials.
#[derive(Debug)]
pub struct Archive {
    client: ArchiveClient,
}

impl Archive {
    /// Connects using the default config file locations.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when config loading or session construction
    /// fails.
    pub async fn connect() -> Result<Self, ClientError> {
        Ok(Self {
            client: ArchiveClient::connect().await?,
        })
    }

    /// Connects using an explicit config file.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_config_file(path: &Path) -> Result<Self, ClientError> {
        Ok(Self {
            client: ArchiveClient::connect_with_config_file(path).await?,
        })
    }

    /// Builds a session from an already-loaded config.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] when the HTTP session cannot be
    /// constructed.
    pub fn from_config(config: Config) -> Result<Self, ClientError> {
        Ok(Self {
            client: ArchiveClient::from_config(config, None)?,
        })
    }

    /// The underlying client, for operations not wrapped here.
    #[must_use]
    pub fn client(&self) -> &ArchiveClient {
        &self.client
    }

    /// Fetches one item by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn get_item(&self, identifier: &str) -> Result<Item<'_>, ClientError> {
        self.client.get_item(identifier).await
    }

    /// Fetches an item and returns its files matching `selection`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn get_files(
        &self,
        identifier: &str,
        selection: &FileSelection,
    ) -> Result<Vec<RemoteFile>, ClientError> {
        Ok(self.get_item(identifier).await?.get_files(selection))
    }

    /// Downloads every selected file of an item.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for fatal transfer failures; see
    /// [`Item::download`].
    pub async fn download(
        &self,
        identifier: &str,
        options: &mut TransferOptions,
    ) -> Result<Vec<Outcome>, DownloadError> {
        let item = self
            .get_item(identifier)
            .await
            .map_err(DownloadError::Client)?;
        item.download(options).await
    }

    /// Starts a search enumeration.
    #[must_use]
    pub fn search_items(&self, options: SearchOptions) -> Search<'_> {
        self.client.search_items(options)
    }

    /// Authenticates and persists credentials, returning the config path
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Auth`] when the server rejects the login and
    /// [`ClientError::Config`] when persisting fails.
    pub async fn update_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PathBuf, ClientError> {
        self.client.update_credentials(email, password).await
    }

    /// Asks the user service who the configured credentials belong to.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn whoami(&self) -> Result<Value, ClientError> {
        self.client.whoami().await
    }

    /// The account's user name per the S3 auth check, empty when anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn username(&self) -> Result<String, ClientError> {
        let json = self.client.check_auth().await?;
        Ok(json
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Full account info per the S3 auth check.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Auth`] when the server reports an auth error
    /// and [`ClientError`] on transport failure.
    pub async fn get_user_info(&self) -> Result<Value, ClientError> {
        let json = self.client.check_auth().await?;
        if let Some(message) = json.get("error").and_then(Value::as_str) {
            return Err(ClientError::auth(message));
        }
        Ok(json)
    }

    /// Releases the session.
    ///
    /// # Errors
    ///
    /// Currently infallible for the reqwest-backed client.
    pub async fn close(self) -> Result<(), ClientError> {
        self.client.close().await
    }
}
