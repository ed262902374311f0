//! Integration tests for item-level download orchestration.

use std::time::Duration;

use ia_client::{ArchiveClient, Client, Config, Outcome, TransferOptions};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ArchiveClient {
    let mut config = Config::default();
    config.general.host = server
        .uri()
        .trim_start_matches("http://")
        .to_string();
    config.general.secure = false;
    ArchiveClient::from_config(config, None).expect("client should build")
}

async fn mount_metadata(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/metadata/nasa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": {"identifier": "nasa", "title": "NASA Images"},
            "files": [
                {"name": "nasa_meta.xml", "size": "8", "source": "metadata", "format": "Metadata"},
                {"name": "globe.jpg", "size": 8, "source": "original", "format": "JPEG"},
                {"name": "globe_thumb.jpg", "size": 8, "source": "derivative", "format": "JPEG Thumb"},
                {"name": "history/old.xml", "size": 8, "source": "metadata", "format": "Metadata"}
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/download/nasa/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"contents".to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_item_download_writes_identifier_directory_layout() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;
    for name in ["nasa_meta.xml", "globe.jpg", "globe_thumb.jpg", "history/old.xml"] {
        mount_file(&server, name).await;
    }

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        retries: 0,
        retries_sleep: Duration::from_millis(1),
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("download should succeed");

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(Outcome::is_downloaded));
    assert!(temp.path().join("nasa/nasa_meta.xml").is_file());
    assert!(temp.path().join("nasa/globe.jpg").is_file());
    assert!(
        temp.path().join("nasa/history/old.xml").is_file(),
        "nested names keep their directories"
    );
}

#[tokio::test]
async fn test_item_download_applies_source_and_history_filters() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;
    mount_file(&server, "nasa_meta.xml").await;

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        exclude_source: vec!["derivative".to_string(), "original".to_string()],
        ignore_history_dir: true,
        retries: 0,
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("download should succeed");

    assert_eq!(outcomes.len(), 1, "only the metadata file survives the filters");
    assert!(temp.path().join("nasa/nasa_meta.xml").is_file());
    assert!(!temp.path().join("nasa/globe.jpg").exists());
    assert!(!temp.path().join("nasa/history").exists());
}

#[tokio::test]
async fn test_item_download_no_directory_flattens_paths() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;
    mount_file(&server, "globe.jpg").await;

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        names: vec!["globe.jpg".to_string()],
        no_directory: true,
        retries: 0,
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("download should succeed");

    assert_eq!(outcomes.len(), 1);
    assert!(
        temp.path().join("globe.jpg").is_file(),
        "flattened file lands directly in destdir"
    );
    assert!(!temp.path().join("nasa").exists());
}

#[tokio::test]
async fn test_item_dry_run_reports_urls_without_requests() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let before = server.received_requests().await.unwrap_or_default().len();

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        dry_run: true,
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("dry run should succeed");

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Outcome::DryRun { .. })));
    let after = server.received_requests().await.unwrap_or_default().len();
    assert_eq!(after, before, "dry run must not issue download requests");
}

#[tokio::test]
async fn test_item_download_with_no_matching_files_is_empty() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        formats: vec!["No Such Format".to_string()],
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("should succeed");

    assert!(outcomes.is_empty(), "nothing matched, nothing attempted");
}

#[tokio::test]
async fn test_each_file_gets_the_full_retry_budget() {
    let server = MockServer::start().await;
    let temp = TempDir::new().expect("temp dir");
    mount_metadata(&server).await;

    // Both selected files always fail; with ignore_errors each should burn
    // its own budget instead of sharing one.
    Mock::given(method("GET"))
        .and(path("/download/nasa/nasa_meta.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/nasa/globe.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let item = client.get_item("nasa").await.expect("item should load");

    let mut options = TransferOptions {
        destdir: Some(temp.path().to_path_buf()),
        names: vec!["nasa_meta.xml".to_string(), "globe.jpg".to_string()],
        retries: 2,
        retries_sleep: Duration::from_millis(1),
        ignore_errors: true,
        ..TransferOptions::default()
    };
    let outcomes = item.download(&mut options).await.expect("non-fatal failures");

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(Outcome::is_failed));

    let download_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().starts_with("/download/"))
        .count();
    assert_eq!(
        download_requests, 6,
        "two files x (one attempt + two retries) each"
    );
}
