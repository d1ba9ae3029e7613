// crates/draftflow/src/api/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::logs::JobLogRow;
use crate::jobs::model::{Job, JobResult};

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub mode: Option<String>,
    pub collection_handle: Option<String>,
    pub target_word_count: Option<i32>,
    pub idempotency_key: Option<String>,
    pub triggered_by: Option<String>,
    /// `true` detaches the run: the job is created and `202 {job_id}` is
    /// returned without invoking the pipeline.
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub logs: Vec<JobLogRow>,
}

/// Full job snapshot: the row plus its ordered log entries.
#[derive(Debug, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    pub logs: Vec<JobLogRow>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
