//! Pagination engine: one lazy record stream over three paging protocols.
//!
//! The server exposes three structurally different result-paging protocols
//! (offset-paged advanced search, bulk scrape, full-text scroll) plus an
//! aggregation mode. [`Search`] normalizes a query once, picks the protocol,
//! and [`SearchResults`] drives it as a single pull-based stream of JSON
//! records with uniform termination semantics: the stream ends when the
//! protocol reports no further records, or early on an unrecoverable error.
//! Errors never surface mid-stream; they are logged and recorded on a side
//! channel ([`SearchResults::error`]) so already-yielded partial results
//! stay usable.

pub mod query;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::client::{AuthType, Client, ClientError, RequestOptions};
use crate::item::Item;

/// One search result document.
pub type Record = serde_json::Map<String, Value>;

/// Default page size injected to prefer bulk-scrape semantics.
const DEFAULT_SCRAPE_COUNT: &str = "10000";

/// Default batch size for full-text scroll requests.
const DEFAULT_SCROLL_SIZE: &str = "10000";

/// Default request timeout for search requests.
const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Marker prefixed to non-DSL full-text queries for literal matching.
const LITERAL_MATCH_MARKER: &str = "!L ";

/// Errors recorded on the enumeration side channel.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Transport failure terminating the enumeration.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The response decoded but did not have the protocol's shape.
    #[error("unexpected {context} response: {message}")]
    Protocol {
        /// Which protocol adapter was running.
        context: &'static str,
        /// What was wrong.
        message: String,
    },
}

impl SearchError {
    fn protocol(context: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            context,
            message: message.into(),
        }
    }
}

/// Query and output-shaping options for one search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// The query string.
    pub query: String,
    /// Metadata fields to request.
    pub fields: Vec<String>,
    /// Sort keys to request.
    pub sorts: Vec<String>,
    /// Free-form request parameters.
    pub params: BTreeMap<String, String>,
    /// Route the query to the full-text search API.
    pub full_text_search: bool,
    /// The full-text query is already in DSL form; skip the literal marker.
    pub dsl_fts: bool,
    /// Request timeout override.
    pub timeout: Option<Duration>,
}

impl SearchOptions {
    /// Options for a plain query with defaults everywhere else.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Sets a request parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the requested field list.
    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Which paging protocol an enumeration drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Full-text search with scroll tokens.
    FullTextScroll,
    /// Single aggregation request.
    Aggregate,
    /// Offset-paged advanced search; one request per enumeration.
    OffsetPaged,
    /// Bulk scrape batches.
    BulkScrape,
}

/// Enumeration state. Owned by exactly one [`SearchResults`].
#[derive(Debug)]
struct PageCursor {
    scroll_id: Option<String>,
    accumulated: u64,
    total: Option<u64>,
    terminated: bool,
}

impl PageCursor {
    fn new() -> Self {
        Self {
            scroll_id: None,
            accumulated: 0,
            total: None,
            terminated: false,
        }
    }
}

/// A normalized search, ready to enumerate.
///
/// Construction applies the query normalization exactly once; the chosen
/// protocol is fixed from then on.
pub struct Search<'a> {
    client: &'a dyn Client,
    options: SearchOptions,
    protocol: Protocol,
}

impl std::fmt::Debug for Search<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Search")
            .field("query", &self.options.query)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl<'a> Search<'a> {
    /// Normalizes `options` and binds the search to `client`.
    #[must_use]
    pub fn new(client: &'a dyn Client, mut options: SearchOptions) -> Self {
        let fts = options.full_text_search || options.dsl_fts;
        options.full_text_search = fts;

        if fts && !options.dsl_fts {
            options.query = format!("{LITERAL_MATCH_MARKER}{}", options.query);
        }

        if !options.params.contains_key("q") {
            options.params.insert("q".to_string(), options.query.clone());
        }

        if options.params.contains_key("page") {
            options
                .params
                .entry("output".to_string())
                .or_insert_with(|| "json".to_string());
        } else if options.params.contains_key("rows") {
            options.params.insert("page".to_string(), "1".to_string());
            options
                .params
                .entry("output".to_string())
                .or_insert_with(|| "json".to_string());
        } else {
            options
                .params
                .entry("count".to_string())
                .or_insert_with(|| DEFAULT_SCRAPE_COUNT.to_string());
        }

        if let Some(scope) = options.params.remove("index") {
            options.params.insert("scope".to_string(), scope);
        }

        if options.timeout.is_none() {
            options.timeout = Some(DEFAULT_SEARCH_TIMEOUT);
        }

        let protocol = if fts {
            Protocol::FullTextScroll
        } else if options.params.contains_key("user_aggs") {
            Protocol::Aggregate
        } else if options.params.contains_key("page") {
            Protocol::OffsetPaged
        } else {
            Protocol::BulkScrape
        };

        debug!(query = %options.query, ?protocol, "search normalized");

        Self {
            client,
            options,
            protocol,
        }
    }

    /// The protocol this search will drive.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The normalized query string.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.options.query
    }

    /// The normalized parameter map.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.options.params
    }

    /// Starts the one-shot record enumeration.
    #[must_use]
    pub fn results(self) -> SearchResults<'a> {
        SearchResults {
            client: self.client,
            options: self.options,
            protocol: self.protocol,
            cursor: PageCursor::new(),
            buffer: VecDeque::new(),
            error: None,
        }
    }

    /// Starts a one-shot enumeration that resolves each record to its item.
    #[must_use]
    pub fn iter_as_items(self) -> ItemResults<'a> {
        ItemResults {
            results: self.results(),
        }
    }
}

/// One-shot pull stream of search records.
///
/// Not restartable: once [`next`](Self::next) returns `None` the stream is
/// finished. A `None` may mean natural exhaustion or an early termination;
/// callers needing hard-failure semantics check [`error`](Self::error).
pub struct SearchResults<'a> {
    client: &'a dyn Client,
    options: SearchOptions,
    protocol: Protocol,
    cursor: PageCursor,
    buffer: VecDeque<Record>,
    error: Option<SearchError>,
}

impl std::fmt::Debug for SearchResults<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResults")
            .field("protocol", &self.protocol)
            .field("accumulated", &self.cursor.accumulated)
            .field("total", &self.cursor.total)
            .field("terminated", &self.cursor.terminated)
            .finish_non_exhaustive()
    }
}

impl SearchResults<'_> {
    /// Pulls the next record, issuing protocol requests as needed.
    ///
    /// Returns `None` at end of stream, natural or error-terminated.
    pub async fn next(&mut self) -> Option<Record> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.cursor.accumulated += 1;
                return Some(record);
            }
            if self.cursor.terminated {
                return None;
            }
            match self.protocol {
                Protocol::FullTextScroll => self.fetch_scroll_batch().await,
                Protocol::Aggregate => self.fetch_aggregations().await,
                Protocol::OffsetPaged => self.fetch_offset_page().await,
                Protocol::BulkScrape => self.fetch_scrape_batch().await,
            }
        }
    }

    /// Total matching records, once the protocol has reported it.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.cursor.total
    }

    /// Records yielded so far.
    #[must_use]
    pub fn accumulated(&self) -> u64 {
        self.cursor.accumulated
    }

    /// The error that terminated the stream early, if any.
    #[must_use]
    pub fn error(&self) -> Option<&SearchError> {
        self.error.as_ref()
    }

    /// Drains the stream into a vector. Check [`error`](Self::error) on the
    /// results before trusting completeness.
    pub async fn collect_all(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record);
        }
        records
    }

    fn terminate_with(&mut self, error: SearchError) {
        error!(%error, "search enumeration terminated early");
        self.error = Some(error);
        self.cursor.terminated = true;
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.options.timeout,
            ..RequestOptions::default()
        }
    }

    /// Offset-paged mode: exactly one request per enumeration. Advancing
    /// pages is the caller's responsibility via the `page` parameter.
    async fn fetch_offset_page(&mut self) {
        self.cursor.terminated = true;

        let mut params: Vec<(String, String)> = self
            .options
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut fields = self.options.fields.clone();
        if !fields.iter().any(|f| f == "identifier") {
            fields.push("identifier".to_string());
        }
        for (index, field) in fields.iter().enumerate() {
            params.push((format!("fl[{index}]"), field.clone()));
        }
        for (index, sort) in self.options.sorts.iter().enumerate() {
            params.push((format!("sort[{index}]"), sort.clone()));
        }
        params.retain(|(k, _)| k != "output");
        params.push(("output".to_string(), "json".to_string()));

        let url = self.client.endpoints().advanced_search();
        let request = RequestOptions {
            params,
            ..self.request_options()
        };

        match self.get_json(url, request).await {
            Ok(body) => {
                if let Some(num_found) = body.pointer("/response/numFound").and_then(Value::as_u64)
                    && self.cursor.total.is_none()
                {
                    self.cursor.total = Some(num_found);
                }
                match body.pointer("/response/docs").and_then(Value::as_array) {
                    Some(docs) => {
                        self.buffer
                            .extend(docs.iter().filter_map(Value::as_object).cloned());
                    }
                    None => self.terminate_with(SearchError::protocol(
                        "advanced search",
                        "missing response.docs",
                    )),
                }
            }
            Err(err) => self.terminate_with(err),
        }
    }

    /// Bulk-scrape mode: re-request until an empty/absent items list or the
    /// first transport error. An API-reported `error` is yielded as a
    /// record, not raised, so partial results stay visible.
    async fn fetch_scrape_batch(&mut self) {
        let mut params: Vec<(String, String)> = self
            .options
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.options.fields.is_empty() {
            params.push(("fields".to_string(), self.options.fields.join(",")));
        }
        if !self.options.sorts.is_empty() {
            params.push(("sorts".to_string(), self.options.sorts.join(",")));
        }

        let url = self.client.endpoints().scrape();
        let request = RequestOptions {
            params,
            auth: AuthType::S3,
            ..self.request_options()
        };

        let body = match self.post_json(url, request).await {
            Ok(body) => body,
            Err(err) => {
                self.terminate_with(err);
                return;
            }
        };

        if let Some(message) = body.get("error").and_then(Value::as_str) {
            error!(query = %self.options.query, message, "scrape API reported an error");
            if let Some(record) = body.as_object() {
                self.buffer.push_back(record.clone());
            }
        }

        if let Some(total) = body.get("total").and_then(Value::as_u64) {
            self.cursor.total = Some(total);
        }

        match body.get("items").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => {
                self.buffer
                    .extend(items.iter().filter_map(Value::as_object).cloned());
            }
            _ => {
                // No continuation token exists in this protocol; an empty or
                // absent batch is the end of the stream.
                self.cursor.terminated = true;
            }
        }
    }

    /// Full-text-scroll mode: re-issue with the scroll token until a
    /// response has no hits; never issues a request after that. With a
    /// fixed `size` parameter scrolling is disabled and exactly one request
    /// is made.
    async fn fetch_scroll_batch(&mut self) {
        let scroll = !self.options.params.contains_key("size");
        let size = self
            .options
            .params
            .get("size")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SCROLL_SIZE.to_string());

        let mut body = json!({
            "q": self.options.query,
            "size": size,
            "from": "0",
            "scroll": scroll,
        });
        if let Some(scope) = self.options.params.get("scope") {
            body["scope"] = Value::String(scope.clone());
        }
        if let Some(scroll_id) = &self.cursor.scroll_id {
            body["scroll_id"] = Value::String(scroll_id.clone());
        }

        let url = self.client.endpoints().fts();
        let request = RequestOptions {
            auth: AuthType::S3,
            json: Some(body),
            ..self.request_options()
        };

        let response = match self.post_json(url, request).await {
            Ok(response) => response,
            Err(err) => {
                self.terminate_with(err);
                return;
            }
        };

        if let Some(message) = response.get("error").and_then(Value::as_str) {
            error!(query = %self.options.query, message, "full-text search API reported an error");
        }

        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if hits.is_empty() {
            self.cursor.terminated = true;
            return;
        }

        self.buffer
            .extend(hits.iter().filter_map(Value::as_object).cloned());

        if scroll {
            self.cursor.scroll_id = response
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(ToString::to_string);
        } else {
            self.cursor.terminated = true;
        }
    }

    /// Aggregate mode: one request with `rows=1`, each aggregation bucket
    /// yielded as its own `{name: value}` record.
    async fn fetch_aggregations(&mut self) {
        self.cursor.terminated = true;

        let mut params: Vec<(String, String)> = self
            .options
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "count" && k.as_str() != "output")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.push(("rows".to_string(), "1".to_string()));
        params.push(("output".to_string(), "json".to_string()));

        let url = self.client.endpoints().advanced_search();
        let request = RequestOptions {
            params,
            auth: AuthType::S3,
            ..self.request_options()
        };

        match self.get_json(url, request).await {
            Ok(body) => {
                match body
                    .pointer("/response/aggregations")
                    .and_then(Value::as_object)
                {
                    Some(aggregations) => {
                        for (name, value) in aggregations {
                            let mut record = Record::new();
                            record.insert(name.clone(), value.clone());
                            self.buffer.push_back(record);
                        }
                    }
                    None => self.terminate_with(SearchError::protocol(
                        "aggregations",
                        "missing response.aggregations",
                    )),
                }
            }
            Err(err) => self.terminate_with(err),
        }
    }

    async fn get_json(&self, url: &str, request: RequestOptions) -> Result<Value, SearchError> {
        let response = self.client.get(url, request).await?;
        response
            .json::<Value>()
            .await
            .map_err(|source| SearchError::Client(ClientError::json(url, source)))
    }

    async fn post_json(&self, url: &str, request: RequestOptions) -> Result<Value, SearchError> {
        let response = self.client.post(url, request).await?;
        response
            .json::<Value>()
            .await
            .map_err(|source| SearchError::Client(ClientError::json(url, source)))
    }
}

/// One-shot pull stream resolving each record into its [`Item`].
///
/// Termination semantics match [`SearchResults`]: resolution failures log,
/// set the side-channel error, and end the stream.
pub struct ItemResults<'a> {
    results: SearchResults<'a>,
}

impl<'a> ItemResults<'a> {
    /// Pulls the next record and resolves it to an item.
    pub async fn next(&mut self) -> Option<Item<'a>> {
        loop {
            let record = self.results.next().await?;
            let Some(identifier) = record.get("identifier").and_then(Value::as_str) else {
                warn!("search record without identifier; skipping");
                continue;
            };
            match self.results.client.get_item(identifier).await {
                Ok(item) => return Some(item),
                Err(err) => {
                    self.results.terminate_with(SearchError::Client(err));
                    return None;
                }
            }
        }
    }

    /// Total matching records, once known.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.results.total()
    }

    /// The error that terminated the stream early, if any.
    #[must_use]
    pub fn error(&self) -> Option<&SearchError> {
        self.results.error()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::ArchiveClient;
    use crate::config::Config;

    fn offline_client() -> ArchiveClient {
        ArchiveClient::from_config(Config::default(), None).unwrap()
    }

    #[test]
    fn test_default_query_prefers_bulk_scrape() {
        let client = offline_client();
        let search = Search::new(&client, SearchOptions::new("collection:nasa"));
        assert_eq!(search.protocol(), Protocol::BulkScrape);
        assert_eq!(
            search.params().get("count").map(String::as_str),
            Some(DEFAULT_SCRAPE_COUNT)
        );
    }

    #[test]
    fn test_page_param_selects_offset_paging() {
        let client = offline_client();
        let search = Search::new(
            &client,
            SearchOptions::new("collection:nasa").param("page", "3"),
        );
        assert_eq!(search.protocol(), Protocol::OffsetPaged);
        assert_eq!(search.params().get("output").map(String::as_str), Some("json"));
        assert!(!search.params().contains_key("count"));
    }

    #[test]
    fn test_rows_without_page_injects_first_page() {
        let client = offline_client();
        let search = Search::new(
            &client,
            SearchOptions::new("collection:nasa").param("rows", "50"),
        );
        assert_eq!(search.protocol(), Protocol::OffsetPaged);
        assert_eq!(search.params().get("page").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_fts_flag_wins_over_other_params() {
        let client = offline_client();
        let options = SearchOptions {
            full_text_search: true,
            ..SearchOptions::new("wright brothers")
        };
        let search = Search::new(&client, options.param("page", "2"));
        assert_eq!(search.protocol(), Protocol::FullTextScroll);
    }

    #[test]
    fn test_fts_query_gets_literal_marker() {
        let client = offline_client();
        let options = SearchOptions {
            full_text_search: true,
            ..SearchOptions::new("wright brothers")
        };
        let search = Search::new(&client, options);
        assert_eq!(search.query(), "!L wright brothers");
    }

    #[test]
    fn test_dsl_fts_query_is_left_verbatim() {
        let client = offline_client();
        let options = SearchOptions {
            dsl_fts: true,
            ..SearchOptions::new("title:(wright)")
        };
        let search = Search::new(&client, options);
        assert_eq!(search.query(), "title:(wright)");
        assert_eq!(search.protocol(), Protocol::FullTextScroll);
    }

    #[test]
    fn test_user_aggs_selects_aggregate_mode() {
        let client = offline_client();
        let search = Search::new(
            &client,
            SearchOptions::new("collection:nasa").param("user_aggs", "year"),
        );
        assert_eq!(search.protocol(), Protocol::Aggregate);
    }

    #[test]
    fn test_index_param_is_normalized_to_scope() {
        let client = offline_client();
        let search = Search::new(
            &client,
            SearchOptions::new("q").param("index", "texts"),
        );
        assert!(!search.params().contains_key("index"));
        assert_eq!(search.params().get("scope").map(String::as_str), Some("texts"));
    }

    #[test]
    fn test_default_timeout_applied_once() {
        let client = offline_client();
        let search = Search::new(&client, SearchOptions::new("q"));
        assert_eq!(search.options.timeout, Some(DEFAULT_SEARCH_TIMEOUT));
    }
}
