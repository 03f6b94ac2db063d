use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Subcategory assigned to taxonomy rows that leave the column empty.
pub const DEFAULT_SUBCATEGORY: &str = "general";

pub const NSFW_CATEGORY: &str = "nsfw";
pub const SFW_CATEGORY: &str = "sfw";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    pub category: String,
    pub subcategory: String,
    pub text: String,
}

/// A gated, cleaned tag proposed for one image in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCandidate {
    pub category: String,
    pub subcategory: String,
    pub tag_name: String,
    pub confidence: f32,
    pub is_nsfw: bool,
}

impl TagCandidate {
    /// `Category/Subcategory/TagName`, or `Category/TagName` for the default
    /// subcategory.
    pub fn hierarchical(&self) -> String {
        hierarchical_tag(&self.category, &self.subcategory, &self.tag_name)
    }
}

pub fn hierarchical_tag(category: &str, subcategory: &str, tag_name: &str) -> String {
    if subcategory.is_empty() || subcategory == DEFAULT_SUBCATEGORY {
        format!("{}/{}", category, tag_name)
    } else {
        format!("{}/{}/{}", category, subcategory, tag_name)
    }
}

/// All candidates produced for one image during one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTags {
    pub path: PathBuf,
    pub candidates: Vec<TagCandidate>,
}

impl ImageTags {
    pub fn nsfw_detected(&self) -> bool {
        self.candidates.iter().any(|c| c.is_nsfw)
    }

    pub fn max_nsfw_confidence(&self) -> f32 {
        self.candidates
            .iter()
            .filter(|c| c.is_nsfw)
            .map(|c| c.confidence)
            .fold(0.0, f32::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub model_used: Option<String>,
    pub nsfw_detected: bool,
    pub max_nsfw_confidence: f32,
    pub rounds_processed: i64,
}

impl From<storage::models::ImageRow> for ImageRecord {
    fn from(row: storage::models::ImageRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            name: row.name,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
            model_used: row.model_used,
            nsfw_detected: row.nsfw_detected,
            max_nsfw_confidence: row.max_nsfw_confidence as f32,
            rounds_processed: row.rounds_processed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub image_ref: i64,
    pub category: String,
    pub subcategory: String,
    pub tag_name: String,
    pub confidence: f32,
    pub is_nsfw: bool,
    pub round: i64,
    pub source: String,
}

impl From<storage::models::TagRow> for TagRecord {
    fn from(row: storage::models::TagRow) -> Self {
        Self {
            image_ref: row.image_ref,
            category: row.category,
            subcategory: row.subcategory,
            tag_name: row.tag_name,
            confidence: row.confidence as f32,
            is_nsfw: row.is_nsfw,
            round: row.round,
            source: row.source,
        }
    }
}

/// A round in progress: its index and the taxonomy source that drives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub index: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedTag {
    pub category: String,
    pub subcategory: String,
    pub tag_name: String,
    pub confidence: f32,
}

impl ConsolidatedTag {
    pub fn hierarchical(&self) -> String {
        hierarchical_tag(&self.category, &self.subcategory, &self.tag_name)
    }
}

/// Export-time view of one image: its aggregate state plus its tags collapsed
/// across rounds at max confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedImage {
    pub path: String,
    pub nsfw_detected: bool,
    pub max_nsfw_confidence: f32,
    pub rounds_processed: i64,
    pub tags: Vec<ConsolidatedTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(category: &str, confidence: f32, is_nsfw: bool) -> TagCandidate {
        TagCandidate {
            category: category.into(),
            subcategory: DEFAULT_SUBCATEGORY.into(),
            tag_name: "X".into(),
            confidence,
            is_nsfw,
        }
    }

    #[test]
    fn hierarchical_omits_default_subcategory() {
        assert_eq!(
            hierarchical_tag("Poses", "Standing", "Person Standing"),
            "Poses/Standing/Person Standing"
        );
        assert_eq!(hierarchical_tag("Scene", "general", "Beach"), "Scene/Beach");
        assert_eq!(hierarchical_tag("Scene", "", "Beach"), "Scene/Beach");
    }

    #[test]
    fn round_nsfw_state_comes_from_nsfw_candidates_only() {
        let tags = ImageTags {
            path: "a.jpg".into(),
            candidates: vec![
                candidate("scene", 0.9, false),
                candidate(NSFW_CATEGORY, 0.65, true),
                candidate(NSFW_CATEGORY, 0.7, true),
            ],
        };
        assert!(tags.nsfw_detected());
        assert_eq!(tags.max_nsfw_confidence(), 0.7);

        let clean = ImageTags {
            path: "b.jpg".into(),
            candidates: vec![candidate("scene", 0.9, false)],
        };
        assert!(!clean.nsfw_detected());
        assert_eq!(clean.max_nsfw_confidence(), 0.0);
    }
}
