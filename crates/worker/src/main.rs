use std::sync::Arc;
use std::time::{Duration, Instant};

use draftflow::api::{self, ApiState};
use draftflow::catalog::{CatalogRepo, CollectionPolicy};
use draftflow::config::Config;
use draftflow::db;
use draftflow::jobs::pipeline::PipelineOutcome;
use draftflow::jobs::{
    FactoryConfig, JobFactory, JobLogsRepo, JobsRepo, MetricsRepo, Pipeline, PipelineConfig,
};
use draftflow::EngineError;
use rand::Rng;
use tracing::{error, info, warn};

mod generator;
use generator::PlaceholderGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = Config::from_env()?;

    info!(
        worker_id = %cfg.worker_id,
        lease_seconds = cfg.lease_seconds,
        api = %cfg.api_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        autopilot_enabled = cfg.autopilot_enabled,
        max_jobs_per_hour = cfg.max_jobs_per_hour,
        max_running_jobs = cfg.max_running_jobs,
        migrate_on_startup = cfg.migrate_on_startup,
        "draftflow starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let jobs_repo = JobsRepo::new(pool.clone());
    let logs_repo = JobLogsRepo::new(pool.clone());
    let catalog_repo = CatalogRepo::new(pool.clone());
    let metrics_repo = MetricsRepo::new(pool.clone());

    let factory = JobFactory::new(
        jobs_repo.clone(),
        FactoryConfig {
            autopilot_enabled: cfg.autopilot_enabled,
            max_jobs_per_hour: cfg.max_jobs_per_hour,
            max_running_jobs: cfg.max_running_jobs,
        },
    );

    let pipeline = Pipeline::new(
        jobs_repo.clone(),
        logs_repo.clone(),
        catalog_repo.clone(),
        Arc::new(PlaceholderGenerator),
        PipelineConfig {
            lease_seconds: cfg.lease_seconds,
            topic_count: cfg.topic_count,
            default_word_count: cfg.default_word_count,
            collections: CollectionPolicy {
                allowed: cfg.allowed_collections.clone(),
                blocked: cfg.blocked_collections.clone(),
            },
        },
    );

    // ---- API task ----
    let api_state = ApiState {
        jobs: jobs_repo.clone(),
        logs: logs_repo.clone(),
        factory: factory.clone(),
        pipeline: pipeline.clone(),
        metrics: metrics_repo.clone(),
    };
    let app = api::router(api_state);
    let api_addr = cfg.api_addr.clone();

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Worker loop task ----
    let worker_id = cfg.worker_id.clone();
    let poll_interval_ms = cfg.poll_interval_ms.max(1);
    let reap_interval = Duration::from_millis(cfg.reap_interval_ms);

    let worker_handle = tokio::spawn(async move {
        let mut last_reap_at = Instant::now() - reap_interval;

        loop {
            // Reclaim expired leases from dead workers on a fixed interval
            // to avoid hot-loop write load.
            if last_reap_at.elapsed() >= reap_interval {
                match jobs_repo.reap_expired_leases().await {
                    Ok(reaped) if reaped > 0 => {
                        warn!(worker_id = %worker_id, reaped, "reaped expired leases");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "lease reap failed"),
                }
                last_reap_at = Instant::now();
            }

            let claimed = match jobs_repo.next_pending().await {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, "pending poll failed");
                    None
                }
            };

            let Some(job_id) = claimed else {
                // Jittered idle sleep so worker replicas do not poll in
                // lockstep.
                let jitter = rand::thread_rng().gen_range(0..poll_interval_ms);
                tokio::time::sleep(Duration::from_millis(poll_interval_ms + jitter)).await;
                continue;
            };

            match pipeline.process_job(job_id).await {
                Ok(PipelineOutcome::Completed(_)) => {
                    info!(worker_id = %worker_id, %job_id, "job completed");
                }
                Ok(PipelineOutcome::Cancelled { observed_after }) => {
                    info!(
                        worker_id = %worker_id,
                        %job_id,
                        after = observed_after.as_str(),
                        "job cancelled"
                    );
                }
                // Another worker won the row between poll and lock. Routine.
                Err(EngineError::LockAcquisitionFailure(_)) => {}
                Err(e) => {
                    error!(worker_id = %worker_id, %job_id, error = %e, "job failed");
                }
            }
        }

        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res??,
    }

    Ok(())
}
