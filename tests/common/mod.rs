//! Shared helpers: in-process HTTP servers standing in for the application's
//! health endpoint and the TMS webhook receiver.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};

pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind test listener");
    let addr = listener.local_addr().expect("should have local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    addr
}

/// Health endpoint whose answer can be flipped at runtime.
#[derive(Clone)]
pub struct HealthSwitch(Arc<AtomicBool>);

impl HealthSwitch {
    pub fn set_healthy(&self, healthy: bool) {
        self.0.store(healthy, Ordering::SeqCst);
    }
}

async fn health(State(switch): State<HealthSwitch>) -> (StatusCode, &'static str) {
    if switch.0.load(Ordering::SeqCst) {
        (StatusCode::OK, r#"{"status":"ok"}"#)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, r#"{"status":"down"}"#)
    }
}

/// Serves `GET /api/health`. Returns the bound port and the switch.
pub async fn spawn_health_server(healthy: bool) -> (u16, HealthSwitch) {
    let switch = HealthSwitch(Arc::new(AtomicBool::new(healthy)));
    let app = Router::new()
        .route("/api/health", get(health))
        .with_state(switch.clone());
    let addr = spawn_server(app).await;
    (addr.port(), switch)
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Webhook receiver that records every request and answers with queued
/// statuses, then 200 once the queue is empty.
#[derive(Clone, Default)]
pub struct WebhookRecorder {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<StatusCode>>>,
}

impl WebhookRecorder {
    pub fn with_responses(responses: &[StatusCode]) -> Self {
        let recorder = Self::default();
        recorder
            .responses
            .lock()
            .unwrap()
            .extend(responses.iter().copied());
        recorder
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(recorder): State<WebhookRecorder>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    recorder
        .requests
        .lock()
        .unwrap()
        .push(RecordedRequest { headers, body });
    recorder
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK)
}

/// Serves `POST /api/webhooks/github-actions`. Returns the full URL.
pub async fn spawn_webhook_server(recorder: WebhookRecorder) -> String {
    let app = Router::new()
        .route("/api/webhooks/github-actions", post(record))
        .with_state(recorder);
    let addr = spawn_server(app).await;
    format!("http://{}/api/webhooks/github-actions", addr)
}
