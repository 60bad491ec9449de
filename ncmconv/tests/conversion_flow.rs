//! End-to-end conversion tests against a local mock decoder.

use httpmock::Method::POST;
use httpmock::MockServer;
use ncmconv::prelude::*;
use ncmconv::testing::{sparse_source, write_source, StubConversionClient, TestWorkspace};
use pretty_assertions::assert_eq;
use std::net::TcpListener;
use std::sync::Arc;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn http_workspace(server: &MockServer) -> TestWorkspace {
    TestWorkspace::new().with_config(
        ConverterConfig::new()
            .with_endpoint(server.url("/music/api/convert"))
            .with_timeout(10.0),
    )
}

#[tokio::test]
async fn upload_is_converted_through_http() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let decoded: Vec<u8> = b"ID3".iter().copied().chain((0..4096).map(|i| (i % 7) as u8)).collect();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/music/api/convert")
            .body_contains("filename=\"")
            .body_contains("ncm-container-bytes");
        then.status(200).body(decoded.clone());
    });

    let ws = http_workspace(&server);
    let service = ConversionService::from_config(ws.config()).unwrap();
    let body = b"ncm-container-bytes".to_vec();

    let report = service
        .handle_upload(&mut body.as_slice(), "Artist - Title.ncm", body.len() as u64)
        .await;

    mock.assert();
    assert!(report.success, "{}", report.message);
    assert_eq!(
        report.download_url.as_deref(),
        Some("/uploads/Artist%20-%20Title.mp3")
    );
    assert_eq!(ws.staged_files(), vec!["Artist - Title.mp3".to_string()]);
    assert_eq!(
        std::fs::read(ws.staging_dir().join("Artist - Title.mp3")).unwrap(),
        decoded
    );
}

#[tokio::test]
async fn remote_error_keeps_source_and_writes_nothing() {
    if !can_bind_localhost() {
        return;
    }

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/music/api/convert");
        then.status(500).body("cannot decode");
    });

    let ws = http_workspace(&server);
    let service = ConversionService::from_config(ws.config()).unwrap();

    let report = service.handle_upload(&mut &b"abc"[..], "song.ncm", 3).await;

    mock.assert_hits(1);
    assert!(!report.success);
    assert_eq!(report.kind, Some(ErrorKind::RemoteFailure));
    let staged = ws.staged_files();
    assert_eq!(staged.len(), 1);
    assert!(staged[0].ends_with(".ncm"));
    assert!(!ws.staging_dir().join("song.mp3").exists());
}

#[tokio::test]
async fn concurrent_conversions_pair_sources_with_outputs() {
    let ws = TestWorkspace::new()
        .with_config(ConverterConfig::new().with_destination_naming(DestinationNaming::StagingToken));
    let stub = Arc::new(StubConversionClient::echo());
    let service = Arc::new(ConversionService::new(stub.clone(), ws.config()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let payload = format!("payload-{i}").into_bytes();
                let report = service
                    .handle_upload(&mut payload.as_slice(), "song.ncm", payload.len() as u64)
                    .await;
                (payload, report)
            })
        })
        .collect();

    for handle in handles {
        let (payload, report) = handle.await.unwrap();
        assert!(report.success, "{}", report.message);
        let output = ws.staging_dir().join(report.file_name.unwrap());
        assert_eq!(std::fs::read(output).unwrap(), payload);
    }

    assert_eq!(stub.call_count(), 16);
    assert!(ws.staged_files().iter().all(|name| name.ends_with(".mp3")));
}

#[tokio::test]
async fn empty_upload_never_reaches_staging() {
    let ws = TestWorkspace::new();
    let stub = Arc::new(StubConversionClient::echo());
    let service = ConversionService::new(stub.clone(), ws.config());

    let report = service.handle_upload(&mut &b""[..], "empty.ncm", 0).await;

    assert_eq!(report.kind, Some(ErrorKind::InvalidInput));
    assert_eq!(stub.call_count(), 0);
    assert!(ws.staged_files().is_empty());
}

#[tokio::test]
async fn orchestrator_size_gate_uses_sparse_files() {
    let ws = TestWorkspace::new();
    let stub = Arc::new(StubConversionClient::succeeding(b"mp3".to_vec()));
    let orchestrator = ConversionOrchestrator::new(stub.clone(), ws.config());

    let song = sparse_source(ws.path(), "song.ncm", 80 * 1000 * 1000);
    let huge = sparse_source(ws.path(), "huge.ncm", 200 * 1024 * 1024);

    let rejected = orchestrator.convert(&huge, &ws.path().join("huge.mp3")).await;
    assert!(!rejected.success);
    assert_eq!(rejected.kind, Some(ErrorKind::TooLarge));
    assert!(huge.exists());
    assert_eq!(stub.call_count(), 0);

    let accepted = orchestrator.convert(&song, &ws.path().join("song.mp3")).await;
    assert!(accepted.success);
    assert!(!song.exists());
    assert_eq!(stub.calls(), vec![(song, ws.path().join("song.mp3"))]);
}

#[tokio::test]
async fn sweep_reclaims_failed_attempts() {
    let ws = TestWorkspace::new().with_config(ConverterConfig {
        stale_after_seconds: 0,
        ..ConverterConfig::new()
    });
    let service = ConversionService::new(
        Arc::new(StubConversionClient::failing_with_status(503)),
        ws.config(),
    );

    let report = service.handle_upload(&mut &b"abc"[..], "song.ncm", 3).await;
    assert!(!report.success);
    assert_eq!(ws.staged_files().len(), 1);

    assert_eq!(service.sweep().await.unwrap(), 1);
    assert!(ws.staged_files().is_empty());
}

#[tokio::test]
async fn local_file_conversion_reports_download_link() {
    let ws = TestWorkspace::new();
    let local = write_source(ws.path(), "Live.ncm", b"bytes");
    let service = ConversionService::new(Arc::new(StubConversionClient::echo()), ws.config());

    let report = service.convert_file(&local).await;

    assert!(report.success);
    assert_eq!(report.download_url.as_deref(), Some("/uploads/Live.mp3"));
    let dict = report.to_dict();
    assert_eq!(dict["success"], serde_json::json!(true));
}
