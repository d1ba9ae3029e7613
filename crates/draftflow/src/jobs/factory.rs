use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::jobs::model::{Job, JobMode, NewJob};
use crate::jobs::repo::JobsRepo;

/// Trailing window for the creation rate gate.
const RATE_WINDOW_HOURS: i64 = 1;

#[derive(Clone, Debug)]
pub struct FactoryConfig {
    pub autopilot_enabled: bool,
    pub max_jobs_per_hour: i64,
    pub max_running_jobs: i64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            autopilot_enabled: true,
            max_jobs_per_hour: 10,
            max_running_jobs: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    pub mode: Option<JobMode>,
    pub collection_handle: Option<String>,
    pub target_word_count: Option<i32>,
    pub triggered_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
}

/// Admission gate + insert for new jobs.
///
/// Checks run in a fixed order, each a distinct failure: feature flag,
/// idempotent replay, creation rate window, running-job ceiling. A denied
/// request writes nothing; an idempotent replay returns the existing row
/// untouched. Both ceilings are advisory, checked here and never
/// re-validated mid-flight, so a racing burst can briefly overshoot.
#[derive(Clone)]
pub struct JobFactory {
    jobs: JobsRepo,
    cfg: FactoryConfig,
}

impl JobFactory {
    pub fn new(jobs: JobsRepo, cfg: FactoryConfig) -> Self {
        Self { jobs, cfg }
    }

    pub async fn create_job(&self, req: CreateJobRequest) -> EngineResult<Job> {
        if !self.cfg.autopilot_enabled {
            return Err(EngineError::Disabled);
        }

        if let Some(key) = req.idempotency_key.as_deref() {
            if let Some(existing) = self.jobs.find_by_idempotency_key(key).await? {
                return Ok(existing);
            }
        }

        let window_start = Utc::now() - Duration::hours(RATE_WINDOW_HOURS);
        let created_recently = self
            .jobs
            .count_created_since(req.triggered_by.as_deref(), window_start)
            .await?;
        if created_recently >= self.cfg.max_jobs_per_hour {
            return Err(EngineError::RateLimitExceeded {
                limit: self.cfg.max_jobs_per_hour,
            });
        }

        let running = self.jobs.count_running().await?;
        if running >= self.cfg.max_running_jobs {
            return Err(EngineError::ConcurrencyExceeded {
                limit: self.cfg.max_running_jobs,
            });
        }

        let job = self
            .jobs
            .insert(NewJob {
                mode: req.mode.unwrap_or_default(),
                collection_handle: req.collection_handle,
                target_word_count: req.target_word_count,
                triggered_by: req.triggered_by,
                idempotency_key: req.idempotency_key,
                request_id: req
                    .request_id
                    .or_else(|| Some(Uuid::new_v4().to_string())),
            })
            .await?;

        Ok(job)
    }
}
