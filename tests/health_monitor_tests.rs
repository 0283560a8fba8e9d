//! Background health monitor against a live endpoint.

mod common;

use std::time::Duration;

use tokio::sync::broadcast;

use tms_deploy::health::{self, HealthProbe, MonitorOutcome};

fn probe_for(port: u16) -> HealthProbe {
    HealthProbe::new(
        format!("http://127.0.0.1:{}/api/health", port),
        Duration::from_secs(1),
    )
    .expect("should build probe")
}

#[tokio::test]
async fn recovery_resets_consecutive_failures() {
    // Given: threshold 3, checks every 200ms
    let (port, switch) = common::spawn_health_server(false).await;
    let (_tx, rx) = broadcast::channel(1);
    let mut handle = health::spawn_monitor(
        probe_for(port),
        Duration::from_millis(200),
        3,
        true,
        rx,
    );

    // When: two failures (200, 400ms), one healthy check (600ms), then
    // failing again from 800ms
    tokio::time::sleep(Duration::from_millis(500)).await;
    switch.set_healthy(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    switch.set_healthy(false);

    // Then: without the reset the third failure at 800ms would trip it
    let early = tokio::time::timeout(Duration::from_millis(300), &mut handle).await;
    assert!(early.is_err(), "monitor tripped before three new failures: {:?}", early);

    let outcome = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("monitor should trip")
        .unwrap();
    assert_eq!(outcome, MonitorOutcome::Unhealthy(3));
}

#[tokio::test]
async fn healthy_endpoint_never_trips() {
    let (port, _switch) = common::spawn_health_server(true).await;
    let (tx, rx) = broadcast::channel(1);
    let mut handle = health::spawn_monitor(probe_for(port), Duration::from_millis(50), 1, true, rx);

    let early = tokio::time::timeout(Duration::from_millis(400), &mut handle).await;
    assert!(early.is_err());

    tx.send(()).unwrap();
    assert_eq!(handle.await.unwrap(), MonitorOutcome::Shutdown);
}
