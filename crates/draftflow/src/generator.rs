//! Collaborator seam for the actual content generation.
//!
//! The engine orchestrates; topic generation, scoring, and drafting are
//! delegated through this trait. The worker binary ships a deterministic
//! placeholder implementation; the production implementation (LLM-backed)
//! lives outside this crate.

use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::model::{CollectionSummary, ScoreBreakdown};

#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub title: String,
    pub angle: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TopicOptions {
    pub target_word_count: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct TopicStats {
    pub requested: usize,
    pub generated: usize,
}

#[derive(Debug, Clone)]
pub struct TopicBatch {
    pub topics: Vec<Topic>,
    pub stats: TopicStats,
}

#[derive(Debug, Clone)]
pub struct ScoredTopic {
    pub topic: Topic,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct AuthorInfo {
    pub id: Uuid,
    pub name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DraftOptions {
    pub target_word_count: i32,
}

#[derive(Debug, Clone)]
pub struct GeneratedPost {
    pub id: Uuid,
    pub title: String,
    pub word_count: usize,
}

#[derive(Debug, Clone)]
pub struct DraftValidation {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DraftOutcome {
    pub success: bool,
    pub post: Option<GeneratedPost>,
    pub validation: Option<DraftValidation>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_topics(
        &self,
        collection: &CollectionSummary,
        count: usize,
        opts: &TopicOptions,
    ) -> anyhow::Result<TopicBatch>;

    /// Rank topics with a numeric breakdown per candidate, best first.
    async fn score_topics(&self, topics: Vec<Topic>) -> anyhow::Result<Vec<ScoredTopic>>;

    async fn generate_draft(
        &self,
        topic: &Topic,
        author: &AuthorInfo,
        opts: &DraftOptions,
    ) -> anyhow::Result<DraftOutcome>;
}
