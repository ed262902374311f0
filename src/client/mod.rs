//! HTTP transport for the archive services.
//!
//! This module provides the [`Client`] capability the engines depend on and
//! its production implementation, [`ArchiveClient`]: a `reqwest`-backed
//! session with cookie jar, S3-style authentication, and the account
//! operations (login, identity checks, congestion probe).
//!
//! The client is constructed fully before first use: [`ArchiveClient::connect`]
//! loads configuration, builds the HTTP session and seeds cookies, and only
//! then hands the value back. There is no lazy initialization to race on.

pub mod urls;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{self, Config, ConfigError};
use crate::item::Item;
use crate::search::{Search, SearchOptions};
use urls::Endpoints;

/// Default whole-request timeout, matching the long tail of bulk requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Connect timeout for establishing a session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for short metadata/identity requests.
const SHORT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// Errors raised by the transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure (DNS, connection, TLS, mid-body disconnect).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that answered.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body was not the JSON shape the caller expected.
    #[error("unexpected response body from {url}: {source}")]
    Json {
        /// The URL that answered.
        url: String,
        /// The decode error.
        #[source]
        source: reqwest::Error,
    },

    /// Authentication was rejected or is missing.
    #[error("authentication failed: {message}")]
    Auth {
        /// Server-reported reason.
        message: String,
    },

    /// Config file handling failed while persisting credentials.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP session could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a JSON decode error with URL context.
    pub fn json(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Json {
            url: url.into(),
            source,
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }
}

/// How a request should be authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthType {
    /// No credentials attached.
    #[default]
    None,
    /// S3-style access/secret credentials.
    S3,
}

/// Per-request options carried through the [`Client`] capability.
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// Extra headers (e.g. `Range`).
    pub headers: HeaderMap,
    /// Authentication mode.
    pub auth: AuthType,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
    /// JSON body for POST requests.
    pub json: Option<Value>,
    /// Form body for POST requests.
    pub form: Option<Vec<(String, String)>>,
}

impl RequestOptions {
    /// Empty options: no params, no auth, default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authentication mode.
    #[must_use]
    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    /// Appends one query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a JSON body (POST only).
    #[must_use]
    pub fn json_body(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// The transport capability the engines depend on.
///
/// The Transfer and Pagination engines only ever see `&dyn Client`; tests
/// and embedders can substitute their own implementation.
#[async_trait]
pub trait Client: Send + Sync {
    /// Issues a GET request, failing on non-success statuses.
    async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, ClientError>;

    /// Issues a POST request, failing on non-success statuses.
    async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, ClientError>;

    /// Fetches an item's metadata and binds it to this client.
    async fn get_item<'a>(&'a self, identifier: &str) -> Result<Item<'a>, ClientError>;

    /// Starts a search enumeration over this client.
    fn search_items<'a>(&'a self, options: SearchOptions) -> Search<'a>;

    /// Authenticates and persists the resulting credentials, returning the
    /// config file path written.
    async fn update_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PathBuf, ClientError>;

    /// Releases the session. Safe to call more than once.
    async fn close(&self) -> Result<(), ClientError>;

    /// The endpoint set this client talks to.
    fn endpoints(&self) -> &Endpoints;
}

#[derive(Debug, Default)]
struct AuthState {
    access: Option<String>,
    secret: Option<String>,
    screenname: Option<String>,
    user_email: Option<String>,
}

/// Production [`Client`] implementation backed by `reqwest`.
///
/// Holds the connection pool, the cookie jar, the endpoint set derived from
/// the configured host, and the S3 credentials. Cheap to share by reference;
/// safe for concurrent use.
pub struct ArchiveClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    endpoints: Endpoints,
    auth: RwLock<AuthState>,
    config_file: Option<PathBuf>,
}

impl std::fmt::Debug for ArchiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveClient")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl ArchiveClient {
    /// Connects using the default config file locations.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when config resolution fails and
    /// [`ClientError::Build`] when the HTTP session cannot be constructed.
    pub async fn connect() -> Result<Self, ClientError> {
        let config = config::load_config(None).await?;
        Self::from_config(config, None)
    }

    /// Connects using an explicit config file.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_config_file(path: &Path) -> Result<Self, ClientError> {
        let config = config::load_config(Some(path)).await?;
        Self::from_config(config, Some(path.to_path_buf()))
    }

    /// Builds a client from an already-loaded config.
    ///
    /// The session is complete when this returns: default headers set,
    /// cookies from the config seeded into the jar, endpoints resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] when the HTTP session cannot be
    /// constructed.
    pub fn from_config(config: Config, config_file: Option<PathBuf>) -> Result<Self, ClientError> {
        let endpoints = Endpoints::new(&config.general.host, config.general.secure);
        let access = config.s3.access.clone();
        let secret = config.s3.secret.clone();

        let jar = Arc::new(Jar::default());
        let base_url = endpoints
            .base()
            .parse::<url::Url>()
            .map_err(|_| ClientError::auth(format!("invalid base URL {}", endpoints.base())))?;
        for (name, raw_value) in &config.cookies {
            jar.add_cookie_str(&cookie_string(name, raw_value), &base_url);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .gzip(true)
            .cookie_provider(Arc::clone(&jar))
            .user_agent(build_user_agent(access.as_deref().unwrap_or_default()))
            .build()
            .map_err(ClientError::Build)?;

        let user_email = config
            .cookies
            .get("logged-in-user")
            .map(|raw| decode_user_email(raw));

        debug!(base = endpoints.base(), "archive client ready");

        Ok(Self {
            http,
            jar,
            endpoints,
            auth: RwLock::new(AuthState {
                access,
                secret,
                screenname: if config.general.screenname.is_empty() {
                    None
                } else {
                    Some(config.general.screenname)
                },
                user_email,
            }),
            config_file,
        })
    }

    /// The configured access key, when present.
    #[must_use]
    pub fn access_key(&self) -> Option<String> {
        self.auth
            .read()
            .ok()
            .and_then(|state| state.access.clone())
    }

    /// The screen name recorded at login, when known.
    #[must_use]
    pub fn screenname(&self) -> Option<String> {
        self.auth
            .read()
            .ok()
            .and_then(|state| state.screenname.clone())
    }

    /// The logged-in user's email, decoded from the session cookie.
    #[must_use]
    pub fn user_email(&self) -> Option<String> {
        self.auth
            .read()
            .ok()
            .and_then(|state| state.user_email.clone())
    }

    fn credentials(&self) -> (Option<String>, Option<String>) {
        match self.auth.read() {
            Ok(state) => (state.access.clone(), state.secret.clone()),
            Err(_) => (None, None),
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::timeout(url)
            } else {
                ClientError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "request failed");
            return Err(ClientError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// GET returning a decoded JSON document.
    async fn get_json(&self, url: &str, options: RequestOptions) -> Result<Value, ClientError> {
        let response = self.get(url, options).await?;
        response
            .json::<Value>()
            .await
            .map_err(|source| ClientError::json(url, source))
    }

    /// Fetches the raw metadata document for an item.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-JSON body.
    pub async fn get_metadata(&self, identifier: &str) -> Result<Value, ClientError> {
        let url = self.endpoints.metadata_url(identifier);
        self.get_json(
            &url,
            RequestOptions::new().timeout(SHORT_REQUEST_TIMEOUT),
        )
        .await
    }

    /// Asks the user service who the configured credentials belong to.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-JSON body.
    pub async fn whoami(&self) -> Result<Value, ClientError> {
        self.get_json(
            self.endpoints.user_service(),
            RequestOptions::new()
                .param("op", "whoami")
                .auth(AuthType::S3)
                .timeout(SHORT_REQUEST_TIMEOUT),
        )
        .await
    }

    /// Verifies the configured credentials against the S3 API.
    ///
    /// A server-reported `error` field is logged but returned as-is so the
    /// caller can inspect the full response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-JSON body.
    pub async fn check_auth(&self) -> Result<Value, ClientError> {
        let json = self
            .get_json(
                self.endpoints.s3(),
                RequestOptions::new()
                    .param("check_auth", "1")
                    .auth(AuthType::S3)
                    .timeout(SHORT_REQUEST_TIMEOUT),
            )
            .await?;
        if json.get("error").is_some_and(|e| !e.is_null()) {
            warn!("auth check reported an error");
        }
        Ok(json)
    }

    /// Probes whether the S3 API is currently overloaded for `bucket`.
    ///
    /// Any failure (transport, non-JSON body, missing field) is treated as
    /// overloaded so callers back off rather than pile on.
    pub async fn s3_is_overloaded(&self, bucket: &str) -> bool {
        let (access, _) = self.credentials();
        if access.is_none() {
            warn!("s3_is_overloaded called without an access key; authentication may fail");
        }

        let result = self
            .get_json(
                self.endpoints.s3(),
                RequestOptions::new()
                    .param("check_limit", "1")
                    .param("accesskey", access.unwrap_or_default())
                    .param("bucket", bucket)
                    .auth(AuthType::S3)
                    .timeout(SHORT_REQUEST_TIMEOUT),
            )
            .await;

        match result {
            Ok(json) => match json.get("over_limit") {
                Some(value) => value.as_i64().unwrap_or(1) != 0,
                None => {
                    warn!("unexpected response shape from overload probe; assuming overloaded");
                    true
                }
            },
            Err(error) => {
                warn!(%error, "overload probe failed; assuming overloaded");
                true
            }
        }
    }

    fn apply_common(
        &self,
        mut request: reqwest::RequestBuilder,
        options: &RequestOptions,
    ) -> reqwest::RequestBuilder {
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        if !options.headers.is_empty() {
            request = request.headers(options.headers.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        request
    }
}

#[async_trait]
impl Client for ArchiveClient {
    async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.apply_common(self.http.get(url), &options);

        if options.auth == AuthType::S3
            && let (Some(access), secret) = self.credentials()
        {
            request = request.basic_auth(access, secret);
        }

        self.execute(request, url).await
    }

    async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.apply_common(self.http.post(url), &options);

        if options.auth == AuthType::S3
            && let (Some(access), Some(secret)) = self.credentials()
        {
            request = request.header(AUTHORIZATION, format!("LOW {access}:{secret}"));
            if options.json.is_none() && options.form.is_none() {
                request = request.header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
            }
        }

        if let Some(json) = &options.json {
            request = request.json(json);
        }
        if let Some(form) = &options.form {
            request = request.form(form);
        }

        self.execute(request, url).await
    }

    async fn get_item<'a>(&'a self, identifier: &str) -> Result<Item<'a>, ClientError> {
        let metadata = self.get_metadata(identifier).await?;
        Ok(Item::new(self, identifier, &metadata))
    }

    fn search_items<'a>(&'a self, options: SearchOptions) -> Search<'a> {
        Search::new(self, options)
    }

    async fn update_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PathBuf, ClientError> {
        let url = self.endpoints.auth_service().to_string();
        info!(%email, "attempting login");

        let response = self
            .post(
                &url,
                RequestOptions {
                    params: vec![("op".to_string(), "login".to_string())],
                    form: Some(vec![
                        ("email".to_string(), email.to_string()),
                        ("password".to_string(), password.to_string()),
                    ]),
                    timeout: Some(SHORT_REQUEST_TIMEOUT),
                    ..RequestOptions::default()
                },
            )
            .await?;

        let json: Value = response
            .json()
            .await
            .map_err(|source| ClientError::json(&url, source))?;

        if !json.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let message = json
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown authentication error")
                .to_string();
            if let Some(reason) = json
                .pointer("/values/reason")
                .and_then(Value::as_str)
            {
                warn!(%email, %reason, "authentication failed: {message}");
            }
            return Err(ClientError::auth(message));
        }

        let access = json
            .pointer("/values/s3/access")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let secret = json
            .pointer("/values/s3/secret")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let screenname = json
            .pointer("/values/screenname")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let mut cookies = std::collections::BTreeMap::new();
        if let Some(raw_cookies) = json.pointer("/values/cookies").and_then(Value::as_object) {
            let base_url = self
                .endpoints
                .base()
                .parse::<url::Url>()
                .map_err(|_| ClientError::auth("invalid base URL for cookie update"))?;
            for (name, value) in raw_cookies {
                if let Some(value) = value.as_str() {
                    self.jar
                        .add_cookie_str(&cookie_string(name, value), &base_url);
                    cookies.insert(name.clone(), value.to_string());
                }
            }
        }

        let user_email = cookies.get("logged-in-user").map(|raw| decode_user_email(raw));

        if let Ok(mut state) = self.auth.write() {
            state.access.clone_from(&access);
            state.secret.clone_from(&secret);
            state.screenname.clone_from(&screenname);
            state.user_email.clone_from(&user_email);
        }

        info!(
            screenname = screenname.as_deref().unwrap_or(""),
            "authenticated successfully"
        );

        let persisted = Config {
            s3: config::S3Credentials { access, secret },
            cookies,
            general: config::GeneralConfig {
                screenname: screenname.unwrap_or_default(),
                ..config::GeneralConfig::default()
            },
            logging_level: None,
        };

        let path = config::write_config_file(&persisted, self.config_file.as_deref()).await?;
        info!(path = %path.display(), "credentials written");
        Ok(path)
    }

    async fn close(&self) -> Result<(), ClientError> {
        // reqwest tears its pool down on drop; nothing to flush here.
        debug!("client session closed");
        Ok(())
    }

    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

/// Builds the session User-Agent, embedding the access key the way the
/// archive's tooling conventionally does.
fn build_user_agent(access_key: &str) -> String {
    let lang = std::env::var("LANG")
        .ok()
        .map(|l| l.chars().take(2).collect::<String>())
        .unwrap_or_default();
    format!(
        "ia-client/{} ({}; N; {lang}; {access_key}) rust",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
    )
}

/// Normalizes a raw config/login cookie into a `Set-Cookie`-style string,
/// filling in `Domain` and `Path` attributes when the raw value lacks them.
fn cookie_string(name: &str, raw_value: &str) -> String {
    let mut out = format!("{name}={raw_value}");
    let lower = raw_value.to_ascii_lowercase();
    if !lower.contains("path=") {
        out.push_str("; Path=/");
    }
    if !lower.contains("domain=") {
        out.push_str("; Domain=.archive.org");
    }
    out
}

fn decode_user_email(raw: &str) -> String {
    let value = raw.split(';').next().unwrap_or_default();
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_string_adds_missing_attributes() {
        let cookie = cookie_string("logged-in-sig", "abc123");
        assert_eq!(cookie, "logged-in-sig=abc123; Path=/; Domain=.archive.org");
    }

    #[test]
    fn test_cookie_string_keeps_existing_attributes() {
        let cookie = cookie_string("sig", "v; path=/x; domain=example.org");
        assert_eq!(cookie, "sig=v; path=/x; domain=example.org");
    }

    #[test]
    fn test_user_agent_embeds_access_key() {
        let ua = build_user_agent("AKEY");
        assert!(ua.starts_with("ia-client/"), "unexpected prefix: {ua}");
        assert!(ua.contains("AKEY"), "access key missing from: {ua}");
    }

    #[test]
    fn test_decode_user_email_strips_attributes_and_decodes() {
        assert_eq!(
            decode_user_email("user%40example.com; expires=tomorrow"),
            "user@example.com"
        );
    }

    #[test]
    fn test_from_config_uses_configured_host() {
        let mut config = Config::with_credentials("a", "s");
        config.general.host = "127.0.0.1:9000".to_string();
        config.general.secure = false;

        let client = ArchiveClient::from_config(config, None).unwrap();
        assert_eq!(client.endpoints().base(), "http://127.0.0.1:9000");
        assert_eq!(client.access_key().as_deref(), Some("a"));
    }
}
