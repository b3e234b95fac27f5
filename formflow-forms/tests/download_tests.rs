//! Download and provenance tests against a mock HTTP server

mod helpers;

use formflow_common::events::{EventBus, EventPhase};
use formflow_forms::models::Provenance;
use formflow_forms::services::{DownloadError, Downloader};
use helpers::catalog_for;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BYTES: &[u8] = b"%PDF-1.7 fake form";

async fn server_with_form() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/f3520.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_download_writes_document_and_sidecar() {
    let server = server_with_form().await;
    let catalog = catalog_for(&server.uri());
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(32);
    let mut events = bus.subscribe("download.*");
    let downloader = Downloader::with_client(reqwest::Client::new(), bus);

    let outcome = downloader
        .download(&catalog, "f3520", dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.path, dir.path().join("f3520.pdf"));
    assert_eq!(std::fs::read(&outcome.path).unwrap(), PDF_BYTES);
    assert_eq!(
        outcome.provenance_path,
        Some(dir.path().join("f3520.pdf.meta.json"))
    );

    let provenance = Provenance::load(&outcome.path).await.unwrap().unwrap();
    assert_eq!(provenance.origin_form_code, "F3520");
    assert_eq!(provenance.origin_region, "QLD");
    assert_eq!(
        provenance.source_url,
        Some(format!("{}/f3520.pdf", server.uri()))
    );

    let received = events.drain();
    assert_eq!(received.first().unwrap().phase(), EventPhase::Started);
    let percents: Vec<u8> = received.iter().filter_map(|e| e.data.percent).collect();
    assert_eq!(percents, vec![20, 40, 80, 100]);
    let last = received.last().unwrap();
    assert_eq!(last.type_name(), "download.completed");
    assert_eq!(
        last.data.detail.as_download().unwrap().path,
        Some(outcome.path.clone())
    );
}

#[tokio::test]
async fn test_unknown_code_reports_resolve_stage() {
    let server = server_with_form().await;
    let catalog = catalog_for(&server.uri());
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(32);
    let mut events = bus.subscribe("download.error");
    let downloader = Downloader::with_client(reqwest::Client::new(), bus);

    let err = downloader
        .download(&catalog, "NOPE", dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::NotFound(_)));

    let event = events.try_recv().unwrap();
    assert_eq!(event.data.stage.as_deref(), Some("resolve_form"));
    assert_eq!(event.error, Some(err.to_string()));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_entry_without_source() {
    let server = server_with_form().await;
    let catalog = catalog_for(&server.uri());
    let dir = TempDir::new().unwrap();
    let downloader = Downloader::with_client(reqwest::Client::new(), EventBus::new(8));

    let err = downloader
        .download(&catalog, "F77", dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::NoSource(code) if code == "F77"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_http_error_is_fetch_failure() {
    let server = server_with_form().await;
    let catalog = catalog_for(&server.uri());
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(32);
    let mut events = bus.subscribe("download.*");
    let downloader = Downloader::with_client(reqwest::Client::new(), bus);

    let err = downloader
        .download(&catalog, "F404", dir.path())
        .await
        .unwrap_err();
    match &err {
        DownloadError::FetchFailed { reason, .. } => assert!(reason.contains("404")),
        other => panic!("expected FetchFailed, got {:?}", other),
    }

    let received = events.drain();
    let last = received.last().unwrap();
    assert_eq!(last.phase(), EventPhase::Error);
    assert_eq!(last.data.stage.as_deref(), Some("fetch"));
    assert!(!dir.path().join("missing.pdf").exists());
}

#[tokio::test]
async fn test_unwritable_sidecar_is_only_a_warning() {
    let server = server_with_form().await;
    let catalog = catalog_for(&server.uri());
    let dir = TempDir::new().unwrap();
    // A directory where the sidecar file should go
    std::fs::create_dir(dir.path().join("f3520.pdf.meta.json")).unwrap();
    let bus = EventBus::new(32);
    let mut events = bus.subscribe("download.*");
    let downloader = Downloader::with_client(reqwest::Client::new(), bus);

    let outcome = downloader
        .download(&catalog, "F3520", dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&outcome.path).unwrap(), PDF_BYTES);
    assert_eq!(outcome.provenance_path, None);

    let received = events.drain();
    let warning = received
        .iter()
        .find(|e| e.phase() == EventPhase::Progress && e.data.percent == Some(80))
        .unwrap();
    assert!(warning
        .data
        .message
        .as_deref()
        .unwrap()
        .starts_with("Metadata write failed"));

    let completed: Vec<_> = received
        .iter()
        .filter(|e| e.type_name() == "download.completed")
        .collect();
    assert_eq!(completed.len(), 1);
    assert!(received.iter().all(|e| e.phase() != EventPhase::Error));
}
