//! Tag-query definitions: `category → subcategory → [query]`, one per round.
//!
//! Sources are CSV files with a `category,subcategory,query` header. A source
//! that is missing, unparsable or empty is replaced by [`Taxonomy::builtin`]
//! unless fallback is disabled.

use crate::config::RunMode;
use crate::error::{Result, TaggerError};
use crate::models::{TagQuery, DEFAULT_SUBCATEGORY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const BUILTIN_SOURCE: &str = "builtin";
const COMMENT_MARKER: char = '#';

const BUILTIN_QUERIES: &[(&str, &str, &str)] = &[
    ("Scene", "Setting", "a photo taken indoors"),
    ("Scene", "Setting", "a photo taken outdoors"),
    ("Scene", "Time", "a photo taken during the day"),
    ("Scene", "Time", "a photo taken at night"),
    ("People", "Count", "a photo with no people"),
    ("People", "Count", "a photo of one person"),
    ("People", "Count", "a photo of a group of people"),
    ("Poses", "Standing", "a photo of a person standing"),
    ("Poses", "Standing", "a photo of a person sitting"),
    ("Quality", "", "a sharp photo"),
    ("Quality", "", "a blurry photo"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryGroup {
    pub name: String,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub name: String,
    pub subcategories: Vec<SubcategoryGroup>,
}

/// Immutable once built; category and subcategory order follow first
/// appearance in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    source: String,
    categories: Vec<CategoryGroup>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySummary {
    pub categories: usize,
    pub subcategories: usize,
    pub queries: usize,
}

/// One (category, subcategory) pass: the unit the classifier scores together.
#[derive(Debug, Clone, Copy)]
pub struct QueryGroup<'a> {
    pub category: &'a str,
    pub subcategory: &'a str,
    pub queries: &'a [String],
}

impl Taxonomy {
    pub fn from_queries(source: &str, queries: impl IntoIterator<Item = TagQuery>) -> Self {
        let mut categories: Vec<CategoryGroup> = Vec::new();
        for q in queries {
            let cat_idx = match categories.iter().position(|c| c.name == q.category) {
                Some(i) => i,
                None => {
                    categories.push(CategoryGroup {
                        name: q.category.clone(),
                        subcategories: Vec::new(),
                    });
                    categories.len() - 1
                }
            };
            let subs = &mut categories[cat_idx].subcategories;
            let sub_idx = match subs.iter().position(|s| s.name == q.subcategory) {
                Some(i) => i,
                None => {
                    subs.push(SubcategoryGroup {
                        name: q.subcategory.clone(),
                        queries: Vec::new(),
                    });
                    subs.len() - 1
                }
            };
            let list = &mut subs[sub_idx].queries;
            if !list.contains(&q.text) {
                list.push(q.text);
            }
        }
        Self {
            source: source.to_string(),
            categories,
        }
    }

    pub fn builtin() -> Self {
        Self::from_queries(
            BUILTIN_SOURCE,
            BUILTIN_QUERIES
                .iter()
                .map(|(c, s, q)| normalize_row(c, s, q))
                .collect::<Vec<_>>(),
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn categories(&self) -> &[CategoryGroup] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.summary().queries == 0
    }

    pub fn groups(&self) -> impl Iterator<Item = QueryGroup<'_>> {
        self.categories.iter().flat_map(|c| {
            c.subcategories.iter().map(move |s| QueryGroup {
                category: &c.name,
                subcategory: &s.name,
                queries: &s.queries,
            })
        })
    }

    pub fn summary(&self) -> TaxonomySummary {
        TaxonomySummary {
            categories: self.categories.len(),
            subcategories: self.categories.iter().map(|c| c.subcategories.len()).sum(),
            queries: self
                .categories
                .iter()
                .flat_map(|c| c.subcategories.iter())
                .map(|s| s.queries.len())
                .sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedTaxonomy {
    pub taxonomy: Taxonomy,
    pub summary: TaxonomySummary,
    /// True when the built-in taxonomy stood in for the requested source.
    pub fallback: bool,
}

#[derive(Debug, Deserialize)]
struct TaxonomyRow {
    category: String,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    query: String,
}

fn normalize_row(category: &str, subcategory: &str, query: &str) -> TagQuery {
    let subcategory = subcategory.trim();
    TagQuery {
        category: category.trim().to_string(),
        subcategory: if subcategory.is_empty() {
            DEFAULT_SUBCATEGORY.to_string()
        } else {
            subcategory.to_string()
        },
        text: query.trim().to_string(),
    }
}

pub fn parse_csv<R: Read>(source: &str, reader: R) -> Result<Taxonomy> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    for column in ["category", "query"] {
        if !rdr.headers()?.iter().any(|h| h == column) {
            return Err(TaggerError::Validation(format!(
                "taxonomy {} has no {} column",
                source, column
            )));
        }
    }

    let mut queries = Vec::new();
    for (line, record) in rdr.deserialize::<TaxonomyRow>().enumerate() {
        let row = record?;
        if row.query.is_empty() || row.query.starts_with(COMMENT_MARKER) {
            continue;
        }
        if row.category.is_empty() || row.category.starts_with(COMMENT_MARKER) {
            warn!(source, row = line + 2, "taxonomy row without category skipped");
            continue;
        }
        queries.push(normalize_row(
            &row.category,
            row.subcategory.as_deref().unwrap_or(""),
            &row.query,
        ));
    }
    Ok(Taxonomy::from_queries(source, queries))
}

pub fn source_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

pub fn load(path: &Path) -> Result<Taxonomy> {
    let file = fs::File::open(path).map_err(|e| TaggerError::io(path, e))?;
    parse_csv(&source_label(path), file)
}

/// Loads `path`, falling back to the built-in taxonomy when the source cannot
/// be used and `allow_fallback` is set.
pub fn load_or_default(path: Option<&Path>, allow_fallback: bool) -> Result<LoadedTaxonomy> {
    let attempt = match path {
        Some(p) => match load(p) {
            Ok(t) if t.is_empty() => Err(TaggerError::Taxonomy(format!(
                "{} contains no queries",
                p.display()
            ))),
            other => other,
        },
        None => Err(TaggerError::Taxonomy("no taxonomy source configured".into())),
    };

    let (taxonomy, fallback) = match attempt {
        Ok(t) => (t, false),
        Err(e) if allow_fallback => {
            warn!("taxonomy unavailable ({}); using built-in default", e);
            (Taxonomy::builtin(), true)
        }
        Err(TaggerError::Taxonomy(msg)) => return Err(TaggerError::Taxonomy(msg)),
        Err(e) => return Err(TaggerError::Taxonomy(e.to_string())),
    };

    let summary = taxonomy.summary();
    info!(
        source = taxonomy.source(),
        categories = summary.categories,
        subcategories = summary.subcategories,
        queries = summary.queries,
        "taxonomy loaded"
    );
    Ok(LoadedTaxonomy {
        taxonomy,
        summary,
        fallback,
    })
}

/// Taxonomy files for a run, one per round. Empty means "use the default".
pub fn resolve_sources(mode: RunMode, path: Option<&Path>) -> Vec<PathBuf> {
    let Some(path) = path else {
        return Vec::new();
    };
    match mode {
        RunMode::Single => vec![path.to_path_buf()],
        RunMode::FolderMulti => {
            let entries = match fs::read_dir(path) {
                Ok(e) => e,
                Err(e) => {
                    warn!("cannot read taxonomy folder {}: {}", path.display(), e);
                    return Vec::new();
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .and_then(|e| e.to_str())
                            .map(|e| e.eq_ignore_ascii_case("csv"))
                            .unwrap_or(false)
                })
                .collect();
            files.sort();
            files
        }
    }
}
