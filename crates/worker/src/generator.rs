//! Deterministic placeholder Generator.
//!
//! Stands in for the LLM-backed collaborator so the engine can run end to
//! end locally. Replace with the real topic/scoring/draft implementation.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use draftflow::generator::{
    AuthorInfo, DraftOptions, DraftOutcome, DraftValidation, GeneratedPost, Generator, ScoredTopic,
    Topic, TopicBatch, TopicOptions, TopicStats,
};
use draftflow::jobs::model::{CollectionSummary, ScoreBreakdown};
use uuid::Uuid;

const ANGLES: [&str; 5] = [
    "buying guide",
    "care and maintenance",
    "seasonal picks",
    "common mistakes",
    "how to choose",
];

pub struct PlaceholderGenerator;

/// Stable pseudo-score in [0, 1) derived from the text, so repeated runs
/// rank the same candidates the same way.
fn fraction(text: &str, salt: u64) -> f64 {
    let mut hasher = DefaultHasher::new();
    salt.hash(&mut hasher);
    text.hash(&mut hasher);
    (hasher.finish() % 1_000) as f64 / 1_000.0
}

#[async_trait]
impl Generator for PlaceholderGenerator {
    async fn generate_topics(
        &self,
        collection: &CollectionSummary,
        count: usize,
        _opts: &TopicOptions,
    ) -> anyhow::Result<TopicBatch> {
        let topics: Vec<Topic> = ANGLES
            .iter()
            .take(count)
            .map(|angle| Topic {
                title: format!("{}: {angle}", collection.title),
                angle: Some(angle.to_string()),
                keywords: vec![collection.handle.clone(), angle.replace(' ', "-")],
            })
            .collect();

        Ok(TopicBatch {
            stats: TopicStats {
                requested: count,
                generated: topics.len(),
            },
            topics,
        })
    }

    async fn score_topics(&self, topics: Vec<Topic>) -> anyhow::Result<Vec<ScoredTopic>> {
        let mut ranked: Vec<ScoredTopic> = topics
            .into_iter()
            .map(|topic| {
                let relevance = fraction(&topic.title, 1);
                let freshness = fraction(&topic.title, 2);
                let coverage = fraction(&topic.title, 3);
                let total = relevance * 0.5 + freshness * 0.3 + coverage * 0.2;
                ScoredTopic {
                    topic,
                    score: ScoreBreakdown {
                        relevance,
                        freshness,
                        coverage,
                        total,
                    },
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(Ordering::Equal)
        });

        Ok(ranked)
    }

    async fn generate_draft(
        &self,
        topic: &Topic,
        _author: &AuthorInfo,
        opts: &DraftOptions,
    ) -> anyhow::Result<DraftOutcome> {
        let word_count = opts.target_word_count.max(0) as usize;

        Ok(DraftOutcome {
            success: true,
            post: Some(GeneratedPost {
                id: Uuid::new_v4(),
                title: topic.title.clone(),
                word_count,
            }),
            validation: Some(DraftValidation {
                passed: true,
                issues: vec![],
                warnings: vec![],
            }),
            errors: vec![],
            warnings: vec![],
        })
    }
}
