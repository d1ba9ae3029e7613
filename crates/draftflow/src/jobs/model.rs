use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A row from the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Job {
    pub id: Uuid,

    pub mode: String,
    pub status: String,

    pub current_step: String,
    pub completed_steps: i32,
    pub total_steps: i32,

    pub collection_handle: Option<String>,
    pub target_word_count: Option<i32>,
    pub triggered_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,

    pub author_id: Option<Uuid>,
    pub result: Option<Value>,
    pub error_message: Option<String>,

    pub locked_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        JobStatus::is_terminal_str(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub mode: JobMode,
    pub collection_handle: Option<String>,
    pub target_word_count: Option<i32>,
    pub triggered_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal_str(status: &str) -> bool {
        matches!(status, "completed" | "failed" | "cancelled")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobMode {
    DryRun,
    #[default]
    Full,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::DryRun => "dry_run",
            JobMode::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dry_run" => Some(JobMode::DryRun),
            "full" => Some(JobMode::Full),
            _ => None,
        }
    }
}

/// The fixed pipeline step sequence. `TOTAL_STEPS` is recorded on every job
/// at creation; `dry_run` jobs skip the draft steps but still finish on
/// `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    Init,
    FetchAuthor,
    SelectCollection,
    GenerateTopics,
    ScoreTopics,
    GenerateDraft,
    ValidateContent,
    Complete,
}

impl JobStep {
    pub const SEQUENCE: [JobStep; 8] = [
        JobStep::Init,
        JobStep::FetchAuthor,
        JobStep::SelectCollection,
        JobStep::GenerateTopics,
        JobStep::ScoreTopics,
        JobStep::GenerateDraft,
        JobStep::ValidateContent,
        JobStep::Complete,
    ];

    pub const TOTAL_STEPS: i32 = Self::SEQUENCE.len() as i32;

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Init => "init",
            JobStep::FetchAuthor => "fetch_author",
            JobStep::SelectCollection => "select_collection",
            JobStep::GenerateTopics => "generate_topics",
            JobStep::ScoreTopics => "score_topics",
            JobStep::GenerateDraft => "generate_draft",
            JobStep::ValidateContent => "validate_content",
            JobStep::Complete => "complete",
        }
    }

    /// 1-based position in the sequence, used for `completed_steps`.
    pub fn position(&self) -> i32 {
        Self::SEQUENCE.iter().position(|s| s == self).unwrap_or(0) as i32 + 1
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::SEQUENCE.iter().copied().find(|step| step.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        }
    }
}

// ----------------------------
// Result payloads (closed, per-mode variants)
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionSummary {
    pub handle: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub freshness: f64,
    pub coverage: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSummary {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Final job payload. Tagged by mode so a dry-run result structurally cannot
/// carry a post id. `topic` stays `None` when generation or scoring produced
/// no usable candidate, which is still a successful outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobResult {
    DryRun {
        collection: CollectionSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<TopicSummary>,
        candidates: usize,
    },
    Full {
        collection: CollectionSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<TopicSummary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        post_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        post_title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        validation: Option<ValidationOutcome>,
    },
}

impl JobResult {
    pub fn validation_warnings(&self) -> usize {
        match self {
            JobResult::Full {
                validation: Some(v),
                ..
            } => v.warnings.len(),
            _ => 0,
        }
    }
}

// ----------------------------
// Structured log payloads (closed, per-step variants)
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogPayload {
    TopicStats { generated: usize, usable: usize },
    ScoreStats { candidates: usize, top_score: f64 },
    DraftStats { post_id: Uuid, word_count: usize },
    ValidationStats { passed: bool, issues: usize, warnings: usize },
    Cancellation { observed_after: String },
}
