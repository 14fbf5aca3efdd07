use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use log_genie::telemetry::{
    self, Attributes, Endpoint, LogRecord, Severity, Value,
    export::{self, Encoding, Exporter, HttpExporter},
};
use opentelemetry_proto::tonic::{
    collector::logs::v1::ExportLogsServiceRequest, common::v1::any_value,
};
use prost::Message;
use tokio::sync::mpsc;
use warp::{Filter, http::StatusCode};

type Received = (String, Bytes);

/// Start a mock collector on an ephemeral port. Every request to
/// `/v1/logs` is forwarded on the returned channel and answered with
/// `status` and `body`.
fn collector(
    status: StatusCode,
    body: &'static str,
) -> (Endpoint, mpsc::UnboundedReceiver<Received>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let route = warp::post()
        .and(warp::path!("v1" / "logs"))
        .and(warp::header::<String>("content-type"))
        .and(warp::body::bytes())
        .map(move |content_type: String, payload: Bytes| {
            let _ = tx.send((content_type, payload));
            warp::reply::with_status(body, status)
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (Endpoint::resolve(&addr.to_string()), rx)
}

fn record() -> LogRecord {
    let mut attributes = Attributes::new();
    attributes.insert("k".to_string(), Value::from("v"));
    LogRecord {
        timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        ..LogRecord::now(Severity::Info, "test", attributes)
    }
}

#[tokio::test]
async fn collector_receives_otlp_json() {
    let (endpoint, mut rx) = collector(StatusCode::OK, "{}");
    let exporter = HttpExporter::new(&endpoint, &export::Config::default()).unwrap();

    exporter.export(vec![record(), record()]).await.unwrap();

    let (content_type, payload) = rx.recv().await.unwrap();
    assert_eq!(content_type, "application/json");
    let request: ExportLogsServiceRequest = serde_json::from_slice(&payload).unwrap();
    let records = &request.resource_logs[0].scope_logs[0].log_records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].severity_text, "info");
    assert_eq!(records[0].time_unix_nano, 1_700_000_000_000_000_000);
    assert_eq!(
        records[0].body.as_ref().unwrap().value,
        Some(any_value::Value::StringValue("test".to_string()))
    );
    assert_eq!(records[0].attributes[0].key, "k");
}

#[tokio::test]
async fn collector_receives_otlp_protobuf() {
    let (endpoint, mut rx) = collector(StatusCode::OK, "");
    let config = export::Config {
        encoding: Encoding::Protobuf,
        ..export::Config::default()
    };
    let exporter = HttpExporter::new(&endpoint, &config).unwrap();

    exporter.export(vec![record()]).await.unwrap();

    let (content_type, payload) = rx.recv().await.unwrap();
    assert_eq!(content_type, "application/x-protobuf");
    let request = ExportLogsServiceRequest::decode(payload).unwrap();
    assert_eq!(request.resource_logs[0].scope_logs[0].log_records.len(), 1);
}

#[tokio::test]
async fn server_error_is_delivery_failure() {
    let (endpoint, _rx) = collector(StatusCode::INTERNAL_SERVER_ERROR, "collector overloaded");
    let exporter = HttpExporter::new(&endpoint, &export::Config::default()).unwrap();

    let err = exporter.export(vec![record()]).await.unwrap_err();
    match &err {
        export::Error::Status { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "collector overloaded");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let err = telemetry::Error::Delivery(err);
    assert!(err.to_string().starts_with("Delivery failed"));
}

#[tokio::test]
async fn slow_collector_times_out() {
    let route = warp::post().and_then(|| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, warp::Rejection>(warp::reply())
    });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let config = export::Config {
        request_timeout_millis: 100,
        ..export::Config::default()
    };
    let exporter = HttpExporter::new(&Endpoint::resolve(&addr.to_string()), &config).unwrap();

    let err = exporter.export(vec![record()]).await.unwrap_err();
    assert!(matches!(err, export::Error::Timeout(_)));
}

#[tokio::test]
async fn unreachable_collector_fails_without_panic() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let exporter =
        HttpExporter::new(&Endpoint::resolve(&addr.to_string()), &export::Config::default())
            .unwrap();
    let err = exporter.export(vec![record()]).await.unwrap_err();
    assert!(matches!(err, export::Error::RequestFailed { .. }));
}
