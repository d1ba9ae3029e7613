// crates/draftflow/tests/api.rs
//
// HTTP surface tests: synchronous and detached runs, snapshots, and
// cancellation status codes.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{raw_http, seed_author, seed_collection, setup_db, start_api, ScriptedGenerator};
use serial_test::serial;
use uuid::Uuid;

fn post_run(body: &str, idempotency_header: Option<&str>) -> String {
    let mut req = format!(
        "POST /run HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(key) = idempotency_header {
        req.push_str(&format!("Idempotency-Key: {key}\r\n"));
    }
    req.push_str("Connection: close\r\n\r\n");
    req.push_str(body);
    req
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

fn delete(path: &str) -> String {
    format!("DELETE {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

fn extract_job_id(response: &str) -> Uuid {
    let marker = "\"job_id\":\"";
    let start = response.find(marker).expect("job_id in response") + marker.len();
    response[start..start + 36].parse().expect("job_id uuid")
}

#[tokio::test]
#[serial]
async fn synchronous_dry_run_returns_result_and_logs() {
    let Some(pool) = setup_db().await else { return };
    seed_author(&pool, "Robin").await;
    seed_collection(&pool, "hiking-gear", 12).await;

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let body = raw_http(
        addr,
        &post_run(r#"{"mode":"dry_run"}"#, None),
        "",
        Duration::from_secs(5),
    )
    .await;

    assert!(body.contains("HTTP/1.1 200"), "unexpected response: {body}");
    assert!(body.contains("\"result\""));
    assert!(body.contains("\"mode\":\"dry_run\""));
    assert!(body.contains("\"logs\""));
    assert!(!body.contains("\"post_id\""));
}

#[tokio::test]
#[serial]
async fn async_run_returns_202_and_leaves_the_job_pending() {
    let Some(pool) = setup_db().await else { return };
    seed_author(&pool, "Robin").await;
    seed_collection(&pool, "hiking-gear", 12).await;

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let body = raw_http(
        addr,
        &post_run(r#"{"mode":"full","async":true}"#, None),
        "",
        Duration::from_secs(5),
    )
    .await;

    assert!(body.contains("HTTP/1.1 202"), "unexpected response: {body}");
    let job_id = extract_job_id(&body);

    let snapshot = raw_http(addr, &get(&format!("/job/{job_id}")), "", Duration::from_secs(2)).await;
    assert!(snapshot.contains("HTTP/1.1 200"));
    assert!(snapshot.contains("\"status\":\"pending\""));
    assert!(snapshot.contains("\"total_steps\":8"));
}

#[tokio::test]
#[serial]
async fn idempotency_key_header_replays_the_same_job() {
    let Some(pool) = setup_db().await else { return };
    seed_author(&pool, "Robin").await;
    seed_collection(&pool, "hiking-gear", 12).await;

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let first = raw_http(
        addr,
        &post_run(r#"{"mode":"dry_run"}"#, Some("k-http-1")),
        "",
        Duration::from_secs(5),
    )
    .await;
    let second = raw_http(
        addr,
        &post_run(r#"{"mode":"dry_run"}"#, Some("k-http-1")),
        "",
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(extract_job_id(&first), extract_job_id(&second));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn cancel_is_200_once_then_400_and_missing_jobs_are_404() {
    let Some(pool) = setup_db().await else { return };
    seed_author(&pool, "Robin").await;
    seed_collection(&pool, "hiking-gear", 12).await;

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let created = raw_http(
        addr,
        &post_run(r#"{"async":true}"#, None),
        "",
        Duration::from_secs(5),
    )
    .await;
    let job_id = extract_job_id(&created);

    let first = raw_http(addr, &delete(&format!("/job/{job_id}")), "", Duration::from_secs(2)).await;
    assert!(first.contains("HTTP/1.1 200"), "unexpected response: {first}");
    assert!(first.contains("\"cancelled\":true"));

    let second = raw_http(addr, &delete(&format!("/job/{job_id}")), "", Duration::from_secs(2)).await;
    assert!(second.contains("HTTP/1.1 400"), "unexpected response: {second}");
    assert!(second.contains("already cancelled"));

    let missing = raw_http(
        addr,
        &delete(&format!("/job/{}", Uuid::new_v4())),
        "",
        Duration::from_secs(2),
    )
    .await;
    assert!(missing.contains("HTTP/1.1 404"), "unexpected response: {missing}");
}

#[tokio::test]
#[serial]
async fn invalid_mode_is_a_400() {
    let Some(pool) = setup_db().await else { return };

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let body = raw_http(
        addr,
        &post_run(r#"{"mode":"turbo"}"#, None),
        "",
        Duration::from_secs(2),
    )
    .await;

    assert!(body.contains("HTTP/1.1 400"), "unexpected response: {body}");
}

#[tokio::test]
#[serial]
async fn metrics_endpoints_respond() {
    let Some(pool) = setup_db().await else { return };

    let addr = start_api(&pool, Arc::new(ScriptedGenerator::default())).await;

    let json = raw_http(addr, &get("/metrics"), "", Duration::from_secs(2)).await;
    assert!(json.contains("HTTP/1.1 200"));
    assert!(json.contains("\"pending\""));

    let prom = raw_http(addr, &get("/metrics/prom"), "", Duration::from_secs(2)).await;
    assert!(prom.contains("draftflow_pending_jobs"));
}
