//! Turns classifier score matrices into per-image tag candidates for a round.

use crate::gate::ConfidenceGate;
use crate::models::{ImageTags, TagCandidate, NSFW_CATEGORY};
use crate::taxonomy::{QueryGroup, Taxonomy};
use providers::{ImageInput, ImageScorer, ScoreMatrix};
use tracing::{debug, warn};

const PREFIXES: &[&str] = &[
    "a close-up photo of",
    "a photograph of",
    "a photo taken",
    "a picture of",
    "an image of",
    "a photo with",
    "a photo of",
    "a close-up of",
    "photo of",
    "image of",
    "a",
    "an",
    "the",
];

const SUFFIXES: &[&str] = &[
    "in the image",
    "in the photo",
    "in the picture",
    "in this photo",
    "in this image",
];

const TRIM_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\''];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// One entry per input image, in input order; candidates may be empty.
    pub images: Vec<ImageTags>,
    pub failed_groups: usize,
}

fn starts_with_words(words: &[&str], phrase: &[&str]) -> bool {
    words.len() > phrase.len()
        && words
            .iter()
            .zip(phrase)
            .all(|(w, p)| w.eq_ignore_ascii_case(p))
}

fn ends_with_words(words: &[&str], phrase: &[&str]) -> bool {
    words.len() > phrase.len()
        && words[words.len() - phrase.len()..]
            .iter()
            .zip(phrase)
            .all(|(w, p)| w.eq_ignore_ascii_case(p))
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut capitalize = true;
    for ch in word.chars() {
        if capitalize {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        capitalize = ch == '-' || ch == '/';
    }
    out
}

/// Cleans a query into a display tag: known lead-in and trailing phrases are
/// dropped, whitespace is collapsed and every word is title-cased.
/// `"a photo of a person standing"` becomes `"Person Standing"`.
pub fn clean_tag_name(query: &str) -> String {
    let trimmed = query.trim().trim_matches(TRIM_PUNCTUATION);
    let mut words: Vec<&str> = trimmed.split_whitespace().collect();

    let prefixes: Vec<Vec<&str>> = PREFIXES
        .iter()
        .map(|p| p.split_whitespace().collect())
        .collect();
    let suffixes: Vec<Vec<&str>> = SUFFIXES
        .iter()
        .map(|s| s.split_whitespace().collect())
        .collect();

    loop {
        let before = words.len();
        if let Some(p) = prefixes.iter().find(|p| starts_with_words(&words, p)) {
            words.drain(..p.len());
        }
        if let Some(s) = suffixes.iter().find(|s| ends_with_words(&words, s)) {
            words.truncate(words.len() - s.len());
        }
        if words.len() == before {
            break;
        }
    }

    words
        .iter()
        .map(|w| w.trim_matches(TRIM_PUNCTUATION))
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index and value of the row maximum; the first maximum wins ties.
pub fn argmax(row: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Winning, gated candidate per matrix row. At most one per row, so one
/// subcategory pass never yields two tags for the same image.
pub fn select_winners(
    matrix: &ScoreMatrix,
    group: &QueryGroup<'_>,
    gate: &ConfidenceGate,
) -> Vec<(usize, TagCandidate)> {
    let mut winners = Vec::new();
    for (row_idx, row) in matrix.rows.iter().enumerate() {
        let Some((q_idx, confidence)) = argmax(row) else {
            continue;
        };
        if !gate.admits(group.category, confidence) {
            continue;
        }
        let Some(query) = group.queries.get(q_idx) else {
            continue;
        };
        let tag_name = clean_tag_name(query);
        if tag_name.is_empty() {
            continue;
        }
        winners.push((
            row_idx,
            TagCandidate {
                category: group.category.to_string(),
                subcategory: group.subcategory.to_string(),
                tag_name,
                confidence,
                is_nsfw: group.category == NSFW_CATEGORY,
            },
        ));
    }
    winners
}

/// Whole-round dedup for one image: among candidates sharing a tag name only
/// the highest confidence survives. First-seen order is kept.
pub fn dedup_by_tag_name(candidates: Vec<TagCandidate>) -> Vec<TagCandidate> {
    let mut kept: Vec<TagCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        match kept.iter_mut().find(|k| k.tag_name == c.tag_name) {
            Some(existing) if c.confidence > existing.confidence => *existing = c,
            Some(_) => {}
            None => kept.push(c),
        }
    }
    kept
}

/// Scores one batch against every (category, subcategory) group of the
/// taxonomy. A failed group is logged and contributes no candidates.
pub async fn classify_batch(
    scorer: &dyn ImageScorer,
    images: &[ImageInput],
    taxonomy: &Taxonomy,
    gate: &ConfidenceGate,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    if images.is_empty() {
        return outcome;
    }

    let mut per_image: Vec<Vec<TagCandidate>> = vec![Vec::new(); images.len()];
    for group in taxonomy.groups() {
        if group.queries.is_empty() {
            continue;
        }
        let scored = scorer
            .score(images, group.queries)
            .await
            .and_then(|m| m.validate(images.len(), group.queries.len()).map(|_| m));
        let matrix = match scored {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    category = group.category,
                    subcategory = group.subcategory,
                    images = images.len(),
                    "classifier call failed: {}",
                    e
                );
                outcome.failed_groups += 1;
                continue;
            }
        };
        for (row_idx, candidate) in select_winners(&matrix, &group, gate) {
            per_image[row_idx].push(candidate);
        }
    }

    outcome.images = images
        .iter()
        .zip(per_image)
        .map(|(image, candidates)| {
            let candidates = dedup_by_tag_name(candidates);
            debug!(path = %image.path.display(), tags = candidates.len(), "image classified");
            ImageTags {
                path: image.path.clone(),
                candidates,
            }
        })
        .collect();
    outcome
}
