//! Authors and collections: the minimal catalog the pipeline reads while
//! resolving who writes and what to write about.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorRow {
    pub id: Uuid,
    pub name: String,
    pub bio: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionRow {
    pub id: Uuid,
    pub handle: String,
    pub title: String,
    pub product_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Allow/block lists for collection selection. An empty allow list means
/// everything is eligible; the block list always wins.
#[derive(Debug, Clone, Default)]
pub struct CollectionPolicy {
    pub allowed: Vec<String>,
    pub blocked: Vec<String>,
}

impl CollectionPolicy {
    pub fn permits(&self, handle: &str) -> bool {
        if self.blocked.iter().any(|b| b == handle) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.iter().any(|a| a == handle)
    }
}

/// Pick the collection a run should target.
///
/// A caller-requested handle must itself pass the policy; otherwise the
/// largest permitted collection wins, ties broken by handle for
/// deterministic runs.
pub fn select_collection<'a>(
    collections: &'a [CollectionRow],
    requested: Option<&str>,
    policy: &CollectionPolicy,
) -> Option<&'a CollectionRow> {
    if let Some(handle) = requested {
        return collections
            .iter()
            .find(|c| c.handle == handle && policy.permits(&c.handle));
    }

    collections
        .iter()
        .filter(|c| policy.permits(&c.handle))
        .max_by(|a, b| {
            a.product_count
                .cmp(&b.product_count)
                .then_with(|| b.handle.cmp(&a.handle))
        })
}

#[derive(Clone)]
pub struct CatalogRepo {
    pool: PgPool,
}

impl CatalogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Oldest active author. The autopilot writes under one house author;
    /// none available means the run cannot proceed.
    pub async fn first_active_author(&self) -> anyhow::Result<Option<AuthorRow>> {
        let author = sqlx::query_as::<_, AuthorRow>(
            r#"
            SELECT id, name, bio, active, created_at
            FROM authors
            WHERE active = TRUE
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(author)
    }

    pub async fn list_collections(&self) -> anyhow::Result<Vec<CollectionRow>> {
        let rows = sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, handle, title, product_count, created_at
            FROM collections
            ORDER BY handle ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
