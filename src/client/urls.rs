//! URL construction for the archive's service endpoints.
//!
//! All service URLs derive from one configured host so the whole client can
//! be pointed at a staging host or a local mock server. Item page URLs are a
//! closed set: one constructor method per page kind, precomputed up front.

use std::fmt;

/// Default production host.
pub const DEFAULT_HOST: &str = "archive.org";

/// Full-text-search API host used with the default host.
const DEFAULT_FTS_HOST: &str = "be-api.us.archive.org";

/// S3-compatible API host used with the default host.
const DEFAULT_S3_HOST: &str = "s3.us.archive.org";

/// Service endpoint URLs for one configured host.
///
/// With the default host the well-known service subdomains are used; with a
/// custom host (tests, staging) every service is rooted at that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
    metadata: String,
    advanced_search: String,
    scrape: String,
    fts: String,
    s3: String,
    user_service: String,
    auth_service: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, true)
    }
}

impl Endpoints {
    /// Builds the endpoint set for `host`.
    ///
    /// A bare label (no dot, no port) is treated as a subdomain of the
    /// default host, so `"web"` resolves to `web.archive.org`.
    #[must_use]
    pub fn new(host: &str, secure: bool) -> Self {
        let scheme = if secure { "https" } else { "http" };
        let host = normalize_host(host);
        let base = format!("{scheme}://{host}");

        let (fts, s3) = if host == DEFAULT_HOST || host.ends_with(".archive.org") {
            (
                format!("{scheme}://{DEFAULT_FTS_HOST}/ia-pub-fts-api"),
                format!("{scheme}://{DEFAULT_S3_HOST}/"),
            )
        } else {
            (format!("{base}/ia-pub-fts-api"), format!("{base}/"))
        };

        Self {
            metadata: format!("{base}/metadata/"),
            advanced_search: format!("{base}/advancedsearch.php"),
            scrape: format!("{base}/services/search/v1/scrape"),
            user_service: format!("{base}/services/user.php"),
            auth_service: format!("{base}/services/xauthn/"),
            fts,
            s3,
            base,
        }
    }

    /// Root URL for the configured host.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Metadata API base; append an identifier.
    #[must_use]
    pub fn metadata_api(&self) -> &str {
        &self.metadata
    }

    /// Metadata API URL for one item.
    #[must_use]
    pub fn metadata_url(&self, identifier: &str) -> String {
        format!("{}{identifier}", self.metadata)
    }

    /// Advanced (offset-paged) search endpoint.
    #[must_use]
    pub fn advanced_search(&self) -> &str {
        &self.advanced_search
    }

    /// Bulk scrape endpoint.
    #[must_use]
    pub fn scrape(&self) -> &str {
        &self.scrape
    }

    /// Full-text search endpoint.
    #[must_use]
    pub fn fts(&self) -> &str {
        &self.fts
    }

    /// S3-compatible API root (auth checks, congestion probe).
    #[must_use]
    pub fn s3(&self) -> &str {
        &self.s3
    }

    /// User service endpoint (`op=whoami`).
    #[must_use]
    pub fn user_service(&self) -> &str {
        &self.user_service
    }

    /// Authentication (xauthn) service endpoint.
    #[must_use]
    pub fn auth_service(&self) -> &str {
        &self.auth_service
    }

    /// Precomputes the page URLs for one item.
    #[must_use]
    pub fn item_urls(&self, identifier: &str) -> ItemUrls {
        ItemUrls::new(&self.base, identifier)
    }

    /// Download URL for one file within an item.
    ///
    /// The name is encoded per path segment so nested names keep their
    /// directory separators.
    #[must_use]
    pub fn file_download_url(&self, identifier: &str, name: &str) -> String {
        format!(
            "{}/download/{identifier}/{}",
            self.base,
            encode_path_segments(name)
        )
    }
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_HOST.to_string();
    }
    // Bare labels are subdomains of the production host.
    if !trimmed.contains('.') && !trimmed.contains(':') {
        return format!("{trimmed}.{DEFAULT_HOST}");
    }
    trimmed.to_string()
}

fn encode_path_segments(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// The closed set of per-item page kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPage {
    /// Public landing page.
    Details,
    /// Raw metadata page.
    Metadata,
    /// Download listing.
    Download,
    /// Edit history.
    History,
    /// Metadata editor.
    Edit,
    /// XML metadata editor.
    Editxml,
    /// Collection management page.
    Manage,
}

impl ItemPage {
    /// Path segment for this page kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::Metadata => "metadata",
            Self::Download => "download",
            Self::History => "history",
            Self::Edit => "edit",
            Self::Editxml => "editxml",
            Self::Manage => "manage",
        }
    }
}

impl fmt::Display for ItemPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precomputed page URLs for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUrls {
    details: String,
    metadata: String,
    download: String,
    history: String,
    edit: String,
    editxml: String,
    manage: String,
}

impl ItemUrls {
    fn new(base: &str, identifier: &str) -> Self {
        let page = |kind: ItemPage| format!("{base}/{}/{identifier}", kind.as_str());
        Self {
            details: page(ItemPage::Details),
            metadata: page(ItemPage::Metadata),
            download: page(ItemPage::Download),
            history: page(ItemPage::History),
            edit: page(ItemPage::Edit),
            editxml: page(ItemPage::Editxml),
            manage: page(ItemPage::Manage),
        }
    }

    /// Public landing page URL.
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Raw metadata page URL.
    #[must_use]
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Download listing URL.
    #[must_use]
    pub fn download(&self) -> &str {
        &self.download
    }

    /// Edit history URL.
    #[must_use]
    pub fn history(&self) -> &str {
        &self.history
    }

    /// Metadata editor URL.
    #[must_use]
    pub fn edit(&self) -> &str {
        &self.edit
    }

    /// XML metadata editor URL.
    #[must_use]
    pub fn editxml(&self) -> &str {
        &self.editxml
    }

    /// Collection management URL.
    #[must_use]
    pub fn manage(&self) -> &str {
        &self.manage
    }

    /// Looks a page URL up by kind.
    #[must_use]
    pub fn page(&self, page: ItemPage) -> &str {
        match page {
            ItemPage::Details => self.details(),
            ItemPage::Metadata => self.metadata(),
            ItemPage::Download => self.download(),
            ItemPage::History => self.history(),
            ItemPage::Edit => self.edit(),
            ItemPage::Editxml => self.editxml(),
            ItemPage::Manage => self.manage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints_use_service_hosts() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.base(), "https://archive.org");
        assert_eq!(endpoints.metadata_url("nasa"), "https://archive.org/metadata/nasa");
        assert_eq!(
            endpoints.scrape(),
            "https://archive.org/services/search/v1/scrape"
        );
        assert_eq!(endpoints.fts(), "https://be-api.us.archive.org/ia-pub-fts-api");
        assert_eq!(endpoints.s3(), "https://s3.us.archive.org/");
    }

    #[test]
    fn test_bare_label_becomes_subdomain() {
        let endpoints = Endpoints::new("web", true);
        assert_eq!(endpoints.base(), "https://web.archive.org");
    }

    #[test]
    fn test_custom_host_roots_all_services() {
        let endpoints = Endpoints::new("127.0.0.1:8080", false);
        assert_eq!(endpoints.base(), "http://127.0.0.1:8080");
        assert_eq!(endpoints.s3(), "http://127.0.0.1:8080/");
        assert_eq!(endpoints.fts(), "http://127.0.0.1:8080/ia-pub-fts-api");
        assert_eq!(
            endpoints.advanced_search(),
            "http://127.0.0.1:8080/advancedsearch.php"
        );
    }

    #[test]
    fn test_item_urls_cover_all_seven_pages() {
        let urls = Endpoints::default().item_urls("nasa");
        assert_eq!(urls.details(), "https://archive.org/details/nasa");
        assert_eq!(urls.metadata(), "https://archive.org/metadata/nasa");
        assert_eq!(urls.download(), "https://archive.org/download/nasa");
        assert_eq!(urls.history(), "https://archive.org/history/nasa");
        assert_eq!(urls.edit(), "https://archive.org/edit/nasa");
        assert_eq!(urls.editxml(), "https://archive.org/editxml/nasa");
        assert_eq!(urls.manage(), "https://archive.org/manage/nasa");
        assert_eq!(urls.page(ItemPage::History), urls.history());
    }

    #[test]
    fn test_file_download_url_encodes_segments_not_separators() {
        let endpoints = Endpoints::default();
        let url = endpoints.file_download_url("nasa", "history/files x.xml");
        assert_eq!(
            url,
            "https://archive.org/download/nasa/history/files%20x.xml"
        );
    }
}
