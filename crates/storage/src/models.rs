use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub model_used: Option<String>,
    pub nsfw_detected: bool,
    pub max_nsfw_confidence: f64,
    pub rounds_processed: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TagRow {
    pub id: i64,
    pub image_ref: i64,
    pub category: String,
    pub subcategory: String,
    pub tag_name: String,
    pub confidence: f64,
    pub is_nsfw: bool,
    pub round: i64,
    pub source: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RoundRow {
    pub round: i64,
    pub source: String,
    pub model_used: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub tag_count: i64,
    pub image_count: i64,
}

/// One row of the consolidated view: an image joined with one of its
/// (category, subcategory, tag_name) groups at max confidence.
#[derive(Debug, Clone, FromRow)]
pub struct ConsolidatedRow {
    pub path: String,
    pub nsfw_detected: bool,
    pub max_nsfw_confidence: f64,
    pub rounds_processed: i64,
    pub category: String,
    pub subcategory: String,
    pub tag_name: String,
    pub confidence: f64,
}
