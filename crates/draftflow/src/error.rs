use uuid::Uuid;

/// Error taxonomy for the orchestration engine.
///
/// Creation-time variants (`Disabled`, `RateLimitExceeded`,
/// `ConcurrencyExceeded`) are raised before any row is written.
/// `LockAcquisitionFailure` is a scheduling conflict, not a fault of the job
/// itself. Everything the pipeline raises after the lock is held ends up
/// persisted into the job's `error_message` before being re-thrown.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("autopilot is disabled")]
    Disabled,

    #[error("job creation rate limit exceeded ({limit} per hour)")]
    RateLimitExceeded { limit: i64 },

    #[error("too many jobs running (max {limit})")]
    ConcurrencyExceeded { limit: i64 },

    #[error("job {0} is not lockable (already running or finished)")]
    LockAcquisitionFailure(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("no active author available")]
    NoAuthor,

    #[error("no eligible collection available")]
    NoCollection,

    #[error("draft generation failed: {0}")]
    GenerationFailure(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
