use std::sync::Arc;

use uuid::Uuid;

use crate::catalog::{select_collection, CatalogRepo, CollectionPolicy};
use crate::error::{EngineError, EngineResult};
use crate::generator::{AuthorInfo, DraftOptions, Generator, ScoredTopic, TopicOptions};
use crate::jobs::logs::JobLogsRepo;
use crate::jobs::model::{
    CollectionSummary, Job, JobMode, JobResult, JobStep, LogLevel, LogPayload, TopicSummary,
    ValidationOutcome,
};
use crate::jobs::repo::JobsRepo;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub lease_seconds: i64,
    pub topic_count: usize,
    pub default_word_count: i32,
    pub collections: CollectionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 120,
            topic_count: 5,
            default_word_count: 1200,
            collections: CollectionPolicy::default(),
        }
    }
}

/// DB-backed cooperative cancellation token.
///
/// A cancel request only flips the stored status; this token is how the
/// executor notices. There is no preemption: a delegated call already in
/// flight always runs to its end, and cancellation takes effect at the next
/// checkpoint.
pub struct CancelToken {
    jobs: JobsRepo,
    job_id: Uuid,
}

impl CancelToken {
    pub fn new(jobs: JobsRepo, job_id: Uuid) -> Self {
        Self { jobs, job_id }
    }

    pub async fn is_cancelled(&self) -> anyhow::Result<bool> {
        let status = self.jobs.get_status(self.job_id).await?;
        Ok(status.as_deref() == Some("cancelled"))
    }
}

/// How a locked run ended. Cancellation is a first-class outcome, distinct
/// from both success and failure.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(JobResult),
    Cancelled { observed_after: JobStep },
}

enum StepFlow {
    Continue,
    Cancelled(JobStep),
}

/// The step executor. Owns the whole `pending -> running -> terminal` run
/// for a single job: acquires the lease itself, walks the fixed step
/// sequence, and settles the terminal state exactly once.
#[derive(Clone)]
pub struct Pipeline {
    jobs: JobsRepo,
    logs: JobLogsRepo,
    catalog: CatalogRepo,
    generator: Arc<dyn Generator>,
    cfg: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        jobs: JobsRepo,
        logs: JobLogsRepo,
        catalog: CatalogRepo,
        generator: Arc<dyn Generator>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            jobs,
            logs,
            catalog,
            generator,
            cfg,
        }
    }

    /// Execute one job end to end.
    ///
    /// Fails fast with `LockAcquisitionFailure` when the row is not
    /// lockable. Every error past that point is caught here once: logged,
    /// persisted into `error_message`, the job marked `failed`, and the
    /// error re-thrown so a synchronous caller sees the same outcome a
    /// stream watcher does.
    pub async fn process_job(&self, job_id: Uuid) -> EngineResult<PipelineOutcome> {
        let locked = self.jobs.acquire_lock(job_id, self.cfg.lease_seconds).await?;
        if !locked {
            return Err(EngineError::LockAcquisitionFailure(job_id));
        }

        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;

        let cancel = CancelToken::new(self.jobs.clone(), job_id);

        match self.run_steps(&job, &cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let message = err.to_string();
                tracing::error!(%job_id, error = %message, "pipeline run failed");
                let step = self.current_step(job_id).await;
                let _ = self
                    .logs
                    .append(job_id, LogLevel::Error, step, &message, None)
                    .await;
                self.jobs.mark_failed(job_id, &message).await?;
                Err(err)
            }
        }
    }

    async fn run_steps(&self, job: &Job, cancel: &CancelToken) -> EngineResult<PipelineOutcome> {
        let mode = JobMode::parse(&job.mode).unwrap_or_default();

        // -- init
        self.enter_step(
            job.id,
            JobStep::Init,
            &format!("autopilot run started (mode={})", job.mode),
        )
        .await?;

        // -- fetch_author
        self.enter_step(job.id, JobStep::FetchAuthor, "resolving author")
            .await?;
        let author = self
            .catalog
            .first_active_author()
            .await?
            .ok_or(EngineError::NoAuthor)?;
        self.jobs.set_author(job.id, author.id).await?;
        self.logs
            .append(
                job.id,
                LogLevel::Info,
                JobStep::FetchAuthor,
                &format!("writing as {}", author.name),
                None,
            )
            .await?;
        if let StepFlow::Cancelled(step) = self.checkpoint(job.id, cancel, JobStep::FetchAuthor).await? {
            return Ok(PipelineOutcome::Cancelled { observed_after: step });
        }

        // -- select_collection
        self.enter_step(job.id, JobStep::SelectCollection, "selecting collection")
            .await?;
        let collections = self.catalog.list_collections().await?;
        let picked = select_collection(
            &collections,
            job.collection_handle.as_deref(),
            &self.cfg.collections,
        )
        .ok_or(EngineError::NoCollection)?;
        let collection = CollectionSummary {
            handle: picked.handle.clone(),
            title: picked.title.clone(),
        };
        self.logs
            .append(
                job.id,
                LogLevel::Info,
                JobStep::SelectCollection,
                &format!("selected collection {}", collection.handle),
                None,
            )
            .await?;
        if let StepFlow::Cancelled(step) =
            self.checkpoint(job.id, cancel, JobStep::SelectCollection).await?
        {
            return Ok(PipelineOutcome::Cancelled { observed_after: step });
        }

        // -- generate_topics
        self.enter_step(job.id, JobStep::GenerateTopics, "generating topic candidates")
            .await?;
        let topic_opts = TopicOptions {
            target_word_count: job.target_word_count,
        };
        let batch = self
            .generator
            .generate_topics(&collection, self.cfg.topic_count, &topic_opts)
            .await
            .map_err(|e| EngineError::GenerationFailure(e.to_string()))?;
        self.logs
            .append(
                job.id,
                LogLevel::Info,
                JobStep::GenerateTopics,
                &format!("generated {} topic candidate(s)", batch.topics.len()),
                Some(LogPayload::TopicStats {
                    generated: batch.stats.generated,
                    usable: batch.topics.len(),
                }),
            )
            .await?;
        if batch.topics.is_empty() {
            return self
                .complete_without_topic(job.id, mode, collection, JobStep::GenerateTopics)
                .await;
        }
        if let StepFlow::Cancelled(step) =
            self.checkpoint(job.id, cancel, JobStep::GenerateTopics).await?
        {
            return Ok(PipelineOutcome::Cancelled { observed_after: step });
        }

        // -- score_topics
        self.enter_step(job.id, JobStep::ScoreTopics, "scoring topic candidates")
            .await?;
        let ranked = self
            .generator
            .score_topics(batch.topics)
            .await
            .map_err(|e| EngineError::GenerationFailure(e.to_string()))?;
        let top_score = ranked.first().map(|t| t.score.total).unwrap_or(0.0);
        self.logs
            .append(
                job.id,
                LogLevel::Info,
                JobStep::ScoreTopics,
                &format!("scored {} candidate(s)", ranked.len()),
                Some(LogPayload::ScoreStats {
                    candidates: ranked.len(),
                    top_score,
                }),
            )
            .await?;
        let Some(best) = ranked.first().cloned() else {
            return self
                .complete_without_topic(job.id, mode, collection, JobStep::ScoreTopics)
                .await;
        };
        if let StepFlow::Cancelled(step) = self.checkpoint(job.id, cancel, JobStep::ScoreTopics).await?
        {
            return Ok(PipelineOutcome::Cancelled { observed_after: step });
        }

        // Dry runs stop here: topic selection and scoring only, no draft.
        if mode == JobMode::DryRun {
            let result = JobResult::DryRun {
                collection,
                topic: Some(topic_summary(&best)),
                candidates: ranked.len(),
            };
            return self.finish(job.id, result).await;
        }

        // -- generate_draft
        self.enter_step(job.id, JobStep::GenerateDraft, "generating draft")
            .await?;
        let author_info = AuthorInfo {
            id: author.id,
            name: author.name.clone(),
            bio: author.bio.clone(),
        };
        let draft_opts = DraftOptions {
            target_word_count: job.target_word_count.unwrap_or(self.cfg.default_word_count),
        };
        let outcome = self
            .generator
            .generate_draft(&best.topic, &author_info, &draft_opts)
            .await
            .map_err(|e| EngineError::GenerationFailure(e.to_string()))?;
        if !outcome.success {
            let message = if outcome.errors.is_empty() {
                "generator reported failure".to_string()
            } else {
                outcome.errors.join("; ")
            };
            return Err(EngineError::GenerationFailure(message));
        }
        let post = outcome.post.ok_or_else(|| {
            EngineError::GenerationFailure("generator returned success without a post".to_string())
        })?;
        self.logs
            .append(
                job.id,
                LogLevel::Info,
                JobStep::GenerateDraft,
                &format!("draft generated: {}", post.title),
                Some(LogPayload::DraftStats {
                    post_id: post.id,
                    word_count: post.word_count,
                }),
            )
            .await?;
        if let StepFlow::Cancelled(step) =
            self.checkpoint(job.id, cancel, JobStep::GenerateDraft).await?
        {
            return Ok(PipelineOutcome::Cancelled { observed_after: step });
        }

        // -- validate_content
        // Validation failures never fail the job; whether an invalid draft
        // may be published is the validation subsystem's call, not ours.
        self.enter_step(job.id, JobStep::ValidateContent, "recording validation outcome")
            .await?;
        let validation = outcome.validation.map(|v| ValidationOutcome {
            passed: v.passed,
            issues: v.issues,
            warnings: v.warnings,
        });
        match &validation {
            Some(v) => {
                let level = if v.passed { LogLevel::Info } else { LogLevel::Warn };
                self.logs
                    .append(
                        job.id,
                        level,
                        JobStep::ValidateContent,
                        &format!(
                            "validation {} ({} issue(s), {} warning(s))",
                            if v.passed { "passed" } else { "failed" },
                            v.issues.len(),
                            v.warnings.len(),
                        ),
                        Some(LogPayload::ValidationStats {
                            passed: v.passed,
                            issues: v.issues.len(),
                            warnings: v.warnings.len(),
                        }),
                    )
                    .await?;
            }
            None => {
                self.logs
                    .append(
                        job.id,
                        LogLevel::Warn,
                        JobStep::ValidateContent,
                        "generator returned no validation outcome",
                        None,
                    )
                    .await?;
            }
        }

        // -- complete
        let result = JobResult::Full {
            collection,
            topic: Some(topic_summary(&best)),
            post_id: Some(post.id),
            post_title: Some(post.title),
            validation,
        };
        self.finish(job.id, result).await
    }

    // ----------------------------
    // Step plumbing
    // ----------------------------

    async fn enter_step(&self, job_id: Uuid, step: JobStep, message: &str) -> EngineResult<()> {
        self.logs
            .append(job_id, LogLevel::Info, step, message, None)
            .await?;
        self.jobs.set_step(job_id, step).await?;
        Ok(())
    }

    /// Cancellation checkpoint after the given step. Observed cancellation
    /// is logged and unwinds the pipeline without touching the (already
    /// terminal) job row.
    async fn checkpoint(
        &self,
        job_id: Uuid,
        cancel: &CancelToken,
        after: JobStep,
    ) -> EngineResult<StepFlow> {
        if cancel.is_cancelled().await? {
            self.logs
                .append(
                    job_id,
                    LogLevel::Info,
                    after,
                    "cancellation observed, stopping pipeline",
                    Some(LogPayload::Cancellation {
                        observed_after: after.as_str().to_string(),
                    }),
                )
                .await?;
            return Ok(StepFlow::Cancelled(after));
        }
        Ok(StepFlow::Continue)
    }

    /// Zero usable topics is a valid terminal outcome, not an error: the
    /// job completes with a result that simply has no topic.
    async fn complete_without_topic(
        &self,
        job_id: Uuid,
        mode: JobMode,
        collection: CollectionSummary,
        step: JobStep,
    ) -> EngineResult<PipelineOutcome> {
        self.logs
            .append(
                job_id,
                LogLevel::Warn,
                step,
                "no usable topic candidates, completing without a topic",
                None,
            )
            .await?;

        let result = match mode {
            JobMode::DryRun => JobResult::DryRun {
                collection,
                topic: None,
                candidates: 0,
            },
            JobMode::Full => JobResult::Full {
                collection,
                topic: None,
                post_id: None,
                post_title: None,
                validation: None,
            },
        };

        self.finish(job_id, result).await
    }

    async fn finish(&self, job_id: Uuid, result: JobResult) -> EngineResult<PipelineOutcome> {
        self.enter_step(job_id, JobStep::Complete, "autopilot run completed")
            .await?;
        self.jobs.mark_completed(job_id, &result).await?;
        Ok(PipelineOutcome::Completed(result))
    }

    /// Best-effort read of the step the job was on, for error log entries.
    async fn current_step(&self, job_id: Uuid) -> JobStep {
        match self.jobs.get_job(job_id).await {
            Ok(Some(job)) => JobStep::parse(&job.current_step).unwrap_or(JobStep::Init),
            _ => JobStep::Init,
        }
    }
}

fn topic_summary(scored: &ScoredTopic) -> TopicSummary {
    TopicSummary {
        title: scored.topic.title.clone(),
        angle: scored.topic.angle.clone(),
        keywords: scored.topic.keywords.clone(),
        score: Some(scored.score.clone()),
    }
}
