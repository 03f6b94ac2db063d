//! Provider abstractions for image/text similarity scorers.
//!
//! The tagging core only ever sees [`ImageScorer`]: a batch of images and one
//! subcategory's query list go in, a forced-choice [`ScoreMatrix`] comes out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub mod clip_http;
pub mod noop;

/// Allowed drift of a row sum away from 1.0.
pub const ROW_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid score matrix: {0}")]
    InvalidScores(String),
}

/// An image resident in memory for the duration of one batch.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// `rows[i][j]` is the confidence that image `i` matches query `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMatrix {
    pub rows: Vec<Vec<f32>>,
}

impl ScoreMatrix {
    pub fn new(rows: Vec<Vec<f32>>) -> Self {
        Self { rows }
    }

    /// Checks shape and that every row is a probability distribution.
    pub fn validate(&self, images: usize, queries: usize) -> Result<(), ProviderError> {
        if self.rows.len() != images {
            return Err(ProviderError::InvalidScores(format!(
                "expected {} rows, got {}",
                images,
                self.rows.len()
            )));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != queries {
                return Err(ProviderError::InvalidScores(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    queries
                )));
            }
            if row.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
                return Err(ProviderError::InvalidScores(format!(
                    "row {} has values outside [0, 1]",
                    i
                )));
            }
            let sum: f32 = row.iter().sum();
            if queries > 0 && (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(ProviderError::InvalidScores(format!(
                    "row {} sums to {}",
                    i, sum
                )));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait ImageScorer: Send + Sync {
    /// Recorded as `model_used` on every image this scorer tags.
    fn model_name(&self) -> &str;

    /// Acquire model resources. Called once per run before any scoring.
    async fn load(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Release model resources. Called once per run, even after a failed run.
    async fn unload(&self) {}

    async fn score(
        &self,
        images: &[ImageInput],
        queries: &[String],
    ) -> Result<ScoreMatrix, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    scorers: HashMap<String, Arc<dyn ImageScorer>>,
    pub preferred_scorer: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scorer(mut self, name: &str, provider: Arc<dyn ImageScorer>) -> Self {
        self.scorers.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_scorer(mut self, name: &str) -> Self {
        self.preferred_scorer = Some(name.to_string());
        self
    }

    pub fn scorer(&self, name: Option<&str>) -> Result<Arc<dyn ImageScorer>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_scorer.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no scorer configured".into()))?;
        self.scorers
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownProvider(key))
    }
}
