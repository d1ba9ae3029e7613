//! SSE progress stream for a single job.
//!
//! One long-lived connection per job. The handler polls the store on a
//! fixed interval and translates deltas into typed events: `connected`
//! first, then per-tick `log` entries not yet sent on this connection, one
//! `progress` event, and once the job is terminal exactly one `complete`
//! event before the stream closes. Heartbeats ride the SSE comment channel
//! on their own timer. Dropping the connection drops the stream and both
//! timers with it.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::models::ErrorBody;
use crate::api::ApiState;
use crate::jobs::model::{Job, JobResult};

/// How often the job row is re-read for deltas.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// SSE comment heartbeat, to defeat intermediary buffering and idle
/// timeouts. Independent of the poll timer.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Pause between the `complete` event and EOF so the client can flush it.
pub const COMPLETE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct ConnectedPayload {
    reconnected: bool,
}

#[derive(Debug, Serialize)]
struct ProgressPayload {
    status: String,
    current_step: String,
    completed_steps: i32,
    total_steps: i32,
}

#[derive(Debug, Serialize)]
struct CompleteMeta {
    mode: String,
    duration_ms: i64,
    validation_warnings_count: usize,
}

#[derive(Debug, Serialize)]
struct CompletePayload {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    meta: CompleteMeta,
}

#[derive(Debug, Serialize)]
struct StreamErrorPayload {
    message: String,
}

fn progress_payload(job: &Job) -> ProgressPayload {
    ProgressPayload {
        status: job.status.clone(),
        current_step: job.current_step.clone(),
        completed_steps: job.completed_steps,
        total_steps: job.total_steps,
    }
}

fn duration_ms(job: &Job, now: DateTime<Utc>) -> i64 {
    match job.started_at {
        Some(started) => (job.completed_at.unwrap_or(now) - started)
            .num_milliseconds()
            .max(0),
        None => 0,
    }
}

fn validation_warnings_count(result: Option<&Value>) -> usize {
    result
        .and_then(|v| serde_json::from_value::<JobResult>(v.clone()).ok())
        .map(|r| r.validation_warnings())
        .unwrap_or(0)
}

fn complete_payload(job: &Job, now: DateTime<Utc>) -> CompletePayload {
    CompletePayload {
        status: job.status.clone(),
        result: job.result.clone(),
        error_message: job.error_message.clone(),
        meta: CompleteMeta {
            mode: job.mode.clone(),
            duration_ms: duration_ms(job, now),
            validation_warnings_count: validation_warnings_count(job.result.as_ref()),
        },
    }
}

fn event(id: u64, name: &str, data: &impl Serialize) -> Option<Event> {
    Event::default()
        .id(id.to_string())
        .event(name)
        .json_data(data)
        .ok()
}

pub async fn stream_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorBody>)> {
    let exists = state
        .jobs
        .get_job(id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("internal error: {e}"),
                }),
            )
        })?
        .is_some();
    if !exists {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "job not found".into(),
            }),
        ));
    }

    // Resume the event counter from Last-Event-ID on reconnect.
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let reconnected = last_event_id.is_some();

    let jobs = state.jobs.clone();
    let logs = state.logs.clone();

    let events = stream! {
        let mut next_id = last_event_id.unwrap_or(0);
        let mut last_log_seq: i64 = 0;

        next_id += 1;
        if let Some(ev) = event(next_id, "connected", &ConnectedPayload { reconnected }) {
            yield Ok::<_, Infallible>(ev);
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;

            let job = match jobs.get_job(id).await {
                Ok(job) => job,
                Err(e) => {
                    // A failed poll read is non-fatal; the next tick may
                    // succeed.
                    next_id += 1;
                    if let Some(ev) = event(next_id, "error", &StreamErrorPayload {
                        message: format!("poll failed: {e}"),
                    }) {
                        yield Ok(ev);
                    }
                    continue;
                }
            };

            let Some(job) = job else {
                next_id += 1;
                if let Some(ev) = event(next_id, "error", &StreamErrorPayload {
                    message: "job no longer exists".into(),
                }) {
                    yield Ok(ev);
                }
                break;
            };

            match logs.list_after(id, last_log_seq).await {
                Ok(entries) => {
                    for entry in entries {
                        last_log_seq = entry.seq;
                        next_id += 1;
                        if let Some(ev) = event(next_id, "log", &entry) {
                            yield Ok(ev);
                        }
                    }
                }
                Err(e) => {
                    next_id += 1;
                    if let Some(ev) = event(next_id, "error", &StreamErrorPayload {
                        message: format!("log read failed: {e}"),
                    }) {
                        yield Ok(ev);
                    }
                }
            }

            next_id += 1;
            if let Some(ev) = event(next_id, "progress", &progress_payload(&job)) {
                yield Ok(ev);
            }

            if job.is_terminal() {
                next_id += 1;
                if let Some(ev) = event(next_id, "complete", &complete_payload(&job, Utc::now())) {
                    yield Ok(ev);
                }
                tokio::time::sleep(COMPLETE_GRACE).await;
                break;
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("hb")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{CollectionSummary, JobStep, TopicSummary, ValidationOutcome};
    use chrono::Duration as ChronoDuration;

    fn job(status: &str) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            mode: "full".into(),
            status: status.into(),
            current_step: "complete".into(),
            completed_steps: JobStep::TOTAL_STEPS,
            total_steps: JobStep::TOTAL_STEPS,
            collection_handle: None,
            target_word_count: None,
            triggered_by: None,
            idempotency_key: None,
            request_id: None,
            author_id: None,
            result: None,
            error_message: None,
            locked_until: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn duration_uses_completed_at_when_present() {
        let mut j = job("completed");
        let now = Utc::now();
        j.started_at = Some(now - ChronoDuration::milliseconds(4_000));
        j.completed_at = Some(now - ChronoDuration::milliseconds(1_000));

        assert_eq!(duration_ms(&j, now), 3_000);
    }

    #[test]
    fn duration_falls_back_to_now_for_unfinished_jobs() {
        let mut j = job("cancelled");
        let now = Utc::now();
        j.started_at = Some(now - ChronoDuration::milliseconds(2_500));
        j.completed_at = None;

        assert_eq!(duration_ms(&j, now), 2_500);
    }

    #[test]
    fn duration_is_zero_before_the_job_ever_started() {
        let j = job("cancelled");
        assert_eq!(duration_ms(&j, Utc::now()), 0);
    }

    #[test]
    fn warnings_counted_from_stored_result() {
        let result = JobResult::Full {
            collection: CollectionSummary {
                handle: "tents".into(),
                title: "Tents".into(),
            },
            topic: Some(TopicSummary {
                title: "t".into(),
                angle: None,
                keywords: vec![],
                score: None,
            }),
            post_id: Some(Uuid::new_v4()),
            post_title: Some("t".into()),
            validation: Some(ValidationOutcome {
                passed: true,
                issues: vec![],
                warnings: vec!["short intro".into()],
            }),
        };
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(validation_warnings_count(Some(&value)), 1);
        assert_eq!(validation_warnings_count(None), 0);
    }

    #[test]
    fn complete_payload_carries_mode_and_error() {
        let mut j = job("failed");
        j.error_message = Some("draft generation failed: upstream 500".into());

        let payload = complete_payload(&j, Utc::now());
        assert_eq!(payload.status, "failed");
        assert_eq!(payload.meta.mode, "full");
        assert_eq!(
            payload.error_message.as_deref(),
            Some("draft generation failed: upstream 500")
        );

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["meta"]["validation_warnings_count"], 0);
    }
}
