// Shared across several test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use draftflow::catalog::{CatalogRepo, CollectionPolicy};
use draftflow::generator::{
    AuthorInfo, DraftOptions, DraftOutcome, DraftValidation, GeneratedPost, Generator, ScoredTopic,
    Topic, TopicBatch, TopicOptions, TopicStats,
};
use draftflow::jobs::model::{CollectionSummary, ScoreBreakdown};
use draftflow::jobs::{JobLogsRepo, JobsRepo, Pipeline, PipelineConfig};

/// Connect to TEST_DATABASE_URL, migrate, and truncate everything.
///
/// Returns `None` when the variable is unset so the suite passes on
/// machines without a Postgres; callers skip with an early return.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set; skipping DB test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_logs,
            jobs,
            authors,
            collections
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

pub async fn seed_author(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO authors (name, bio, active)
        VALUES ($1, 'test author', TRUE)
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("failed to seed author")
}

pub async fn seed_collection(pool: &PgPool, handle: &str, product_count: i32) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO collections (handle, title, product_count)
        VALUES ($1, initcap(replace($1, '-', ' ')), $2)
        RETURNING id
        "#,
    )
    .bind(handle)
    .bind(product_count)
    .fetch_one(pool)
    .await
    .expect("failed to seed collection")
}

pub async fn insert_pending_job(pool: &PgPool, mode: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO jobs (mode, status, current_step, completed_steps, total_steps)
        VALUES ($1, 'pending', 'init', 0, 8)
        RETURNING id
        "#,
    )
    .bind(mode)
    .fetch_one(pool)
    .await
    .expect("failed to insert job")
}

pub async fn job_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("job row missing")
}

pub fn pipeline_with(pool: &PgPool, generator: Arc<dyn Generator>) -> Pipeline {
    Pipeline::new(
        JobsRepo::new(pool.clone()),
        JobLogsRepo::new(pool.clone()),
        CatalogRepo::new(pool.clone()),
        generator,
        PipelineConfig {
            lease_seconds: 30,
            topic_count: 3,
            default_word_count: 600,
            collections: CollectionPolicy::default(),
        },
    )
}

// ----------------------------
// HTTP harness
// ----------------------------

/// Serve the full API router on an ephemeral port.
pub async fn start_api(pool: &PgPool, generator: Arc<dyn Generator>) -> std::net::SocketAddr {
    use draftflow::api::{self, ApiState};
    use draftflow::jobs::{FactoryConfig, JobFactory, MetricsRepo};

    let state = ApiState {
        jobs: JobsRepo::new(pool.clone()),
        logs: JobLogsRepo::new(pool.clone()),
        factory: JobFactory::new(
            JobsRepo::new(pool.clone()),
            FactoryConfig {
                max_jobs_per_hour: 1_000,
                ..FactoryConfig::default()
            },
        ),
        pipeline: pipeline_with(pool, generator),
        metrics: MetricsRepo::new(pool.clone()),
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("api serve failed");
    });

    addr
}

/// Fire one raw HTTP/1.1 request and read the response until `until`
/// appears in the body, the server closes, or the timeout lapses.
/// Deliberately low-level so SSE framing stays visible to assertions.
pub async fn raw_http(
    addr: std::net::SocketAddr,
    request: &str,
    until: &str,
    timeout: std::time::Duration,
) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect to test api");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if !until.is_empty() && String::from_utf8_lossy(&buf).contains(until) {
                    break;
                }
            }
            _ => break,
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

// ----------------------------
// Scripted generators
// ----------------------------

/// Configurable fake collaborator. Counters expose which stages ran.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    pub empty_topics: bool,
    pub fail_draft: bool,
    pub validation_fails: bool,
    pub topic_calls: Arc<AtomicUsize>,
    pub draft_calls: Arc<AtomicUsize>,
}

fn scripted_topics(collection: &CollectionSummary) -> Vec<Topic> {
    ["buying guide", "care basics", "top picks"]
        .iter()
        .map(|angle| Topic {
            title: format!("{}: {angle}", collection.title),
            angle: Some(angle.to_string()),
            keywords: vec![collection.handle.clone()],
        })
        .collect()
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_topics(
        &self,
        collection: &CollectionSummary,
        count: usize,
        _opts: &TopicOptions,
    ) -> anyhow::Result<TopicBatch> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);

        let topics = if self.empty_topics {
            vec![]
        } else {
            scripted_topics(collection)
        };

        Ok(TopicBatch {
            stats: TopicStats {
                requested: count,
                generated: topics.len(),
            },
            topics,
        })
    }

    async fn score_topics(&self, topics: Vec<Topic>) -> anyhow::Result<Vec<ScoredTopic>> {
        let total = topics.len();
        Ok(topics
            .into_iter()
            .enumerate()
            .map(|(i, topic)| {
                let rank = (total - i) as f64 / total.max(1) as f64;
                ScoredTopic {
                    topic,
                    score: ScoreBreakdown {
                        relevance: rank,
                        freshness: rank,
                        coverage: rank,
                        total: rank,
                    },
                }
            })
            .collect())
    }

    async fn generate_draft(
        &self,
        topic: &Topic,
        _author: &AuthorInfo,
        opts: &DraftOptions,
    ) -> anyhow::Result<DraftOutcome> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_draft {
            return Ok(DraftOutcome {
                success: false,
                post: None,
                validation: None,
                errors: vec!["model unavailable".into()],
                warnings: vec![],
            });
        }

        let validation = if self.validation_fails {
            DraftValidation {
                passed: false,
                issues: vec!["missing meta description".into()],
                warnings: vec!["short intro".into()],
            }
        } else {
            DraftValidation {
                passed: true,
                issues: vec![],
                warnings: vec![],
            }
        };

        Ok(DraftOutcome {
            success: true,
            post: Some(GeneratedPost {
                id: Uuid::new_v4(),
                title: topic.title.clone(),
                word_count: opts.target_word_count.max(0) as usize,
            }),
            validation: Some(validation),
            errors: vec![],
            warnings: vec![],
        })
    }
}

/// Flips the running job to `cancelled` from inside `generate_topics`,
/// mimicking a cancel request landing while a step is in flight. The
/// executor must notice at the next checkpoint.
#[derive(Clone)]
pub struct CancelDuringTopicsGenerator {
    pub pool: PgPool,
    pub inner: ScriptedGenerator,
}

#[async_trait]
impl Generator for CancelDuringTopicsGenerator {
    async fn generate_topics(
        &self,
        collection: &CollectionSummary,
        count: usize,
        opts: &TopicOptions,
    ) -> anyhow::Result<TopicBatch> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                completed_at = now(),
                locked_until = NULL,
                updated_at = now()
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.inner.generate_topics(collection, count, opts).await
    }

    async fn score_topics(&self, topics: Vec<Topic>) -> anyhow::Result<Vec<ScoredTopic>> {
        self.inner.score_topics(topics).await
    }

    async fn generate_draft(
        &self,
        topic: &Topic,
        author: &AuthorInfo,
        opts: &DraftOptions,
    ) -> anyhow::Result<DraftOutcome> {
        self.inner.generate_draft(topic, author, opts).await
    }
}
