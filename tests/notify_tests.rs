//! Webhook delivery against an in-process receiver.

mod common;

use axum::http::StatusCode;

use common::WebhookRecorder;
use tms_deploy::config::WebhookConfig;
use tms_deploy::error::TmsError;
use tms_deploy::notify::{DELIVERY_HEADER, EVENT_HEADER, WebhookClient};
use tms_deploy::report::{ExecutionReport, ResultSummary, ShardInfo, TestCounts};
use tms_deploy::signature::{SIGNATURE_HEADER, verify_signature};

const SECRET: &str = "ci-shared-secret";

fn webhook_config(url: String, secret: Option<&str>) -> WebhookConfig {
    WebhookConfig {
        url: Some(url),
        secret: secret.map(String::from),
        timeout_secs: 5,
        max_retries: 2,
        retry_backoff_ms: 10,
    }
}

fn header<'a>(req: &'a common::RecordedRequest, name: &str) -> Option<&'a str> {
    req.headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn delivers_signed_report() {
    // Given
    let recorder = WebhookRecorder::default();
    let url = common::spawn_webhook_server(recorder.clone()).await;
    let client = WebhookClient::new(&webhook_config(url, Some(SECRET))).unwrap();
    let report = ExecutionReport::started("exec-42");

    // When
    let receipt = client.send(&report).await.expect("delivery should succeed");

    // Then
    assert_eq!(receipt.status, 200);
    assert_eq!(receipt.attempts, 1);

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(header(req, EVENT_HEADER), Some("execution.started"));
    assert_eq!(header(req, DELIVERY_HEADER), Some(receipt.delivery_id.as_str()));
    assert_eq!(header(req, "content-type"), Some("application/json"));

    let signature = header(req, SIGNATURE_HEADER).expect("signature header");
    assert!(verify_signature(SECRET, &req.body, signature));

    let received: ExecutionReport = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(received, report);
}

#[tokio::test]
async fn body_uses_camel_case_fields() {
    let recorder = WebhookRecorder::default();
    let url = common::spawn_webhook_server(recorder.clone()).await;
    let client = WebhookClient::new(&webhook_config(url, None)).unwrap();
    let report = ExecutionReport::shard_complete(
        "exec-7",
        ShardInfo { index: 1, total: 3 },
        ResultSummary {
            counts: TestCounts::new(10, 0, 2),
            failed_tests: Vec::new(),
        },
    );

    client.send(&report).await.unwrap();

    let req = &recorder.requests()[0];
    assert_eq!(header(req, EVENT_HEADER), Some("execution.shard_completed"));
    assert!(header(req, SIGNATURE_HEADER).is_none(), "unsigned without a secret");

    let json: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(json["executionId"], "exec-7");
    assert_eq!(json["status"], "shard-complete");
    assert_eq!(json["shard"]["index"], 1);
    assert_eq!(json["results"]["total"], 12);
}

#[tokio::test]
async fn retries_server_errors_with_one_delivery_id() {
    // Given: the receiver fails twice before accepting
    let recorder = WebhookRecorder::with_responses(&[
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::TOO_MANY_REQUESTS,
    ]);
    let url = common::spawn_webhook_server(recorder.clone()).await;
    let client = WebhookClient::new(&webhook_config(url, Some(SECRET))).unwrap();

    // When
    let receipt = client
        .send(&ExecutionReport::started("exec-retry"))
        .await
        .expect("third attempt should succeed");

    // Then
    assert_eq!(receipt.attempts, 3);
    let requests = recorder.requests();
    assert_eq!(requests.len(), 3);
    for req in &requests {
        assert_eq!(header(req, DELIVERY_HEADER), Some(receipt.delivery_id.as_str()));
    }
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let recorder = WebhookRecorder::with_responses(&[StatusCode::BAD_GATEWAY; 5]);
    let url = common::spawn_webhook_server(recorder.clone()).await;
    let client = WebhookClient::new(&webhook_config(url, None)).unwrap();

    let err = client
        .send(&ExecutionReport::started("exec-down"))
        .await
        .unwrap_err();

    assert!(matches!(err, TmsError::WebhookFailed(_)), "got {:?}", err);
    // One attempt plus two retries
    assert_eq!(recorder.requests().len(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let recorder = WebhookRecorder::with_responses(&[StatusCode::UNAUTHORIZED]);
    let url = common::spawn_webhook_server(recorder.clone()).await;
    let client = WebhookClient::new(&webhook_config(url, Some("wrong"))).unwrap();

    let err = client
        .send(&ExecutionReport::started("exec-denied"))
        .await
        .unwrap_err();

    match &err {
        TmsError::WebhookRejected { status, .. } => assert_eq!(*status, 401),
        other => panic!("expected WebhookRejected, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 5);
    assert_eq!(recorder.requests().len(), 1);
}

#[tokio::test]
async fn unreachable_receiver_fails_after_retries() {
    // Port 9 on loopback refuses connections
    let client = WebhookClient::new(&webhook_config(
        "http://127.0.0.1:9/api/webhooks/github-actions".into(),
        None,
    ))
    .unwrap();

    let err = client
        .send(&ExecutionReport::started("exec-offline"))
        .await
        .unwrap_err();

    assert!(matches!(err, TmsError::WebhookFailed(_)));
}

