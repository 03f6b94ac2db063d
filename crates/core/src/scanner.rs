//! Collects image paths under the configured roots and partitions them by
//! whether a sidecar already exists.

use crate::error::{Result, TaggerError};
use crate::sidecar::sidecar_path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SidecarPartition {
    pub with_sidecar: Vec<PathBuf>,
    pub without_sidecar: Vec<PathBuf>,
}

impl SidecarPartition {
    pub fn total(&self) -> usize {
        self.with_sidecar.len() + self.without_sidecar.len()
    }
}

/// Walks `roots` (files or directories) and returns every image path, sorted
/// and deduplicated.
pub async fn collect_images(roots: &[PathBuf], excludes: &[String]) -> Result<Vec<PathBuf>> {
    let exclude_set = build_globset(excludes)?;
    let roots = roots.to_vec();

    let found = task::spawn_blocking(move || {
        let mut found = BTreeSet::new();
        for root in roots {
            if root.is_file() {
                if is_image(&root) {
                    found.insert(root);
                }
                continue;
            }
            for entry in WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| should_descend(e.path(), &root, &exclude_set))
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        debug!("walk error: {}", e);
                        continue;
                    }
                };
                let path = entry.path();
                if entry.file_type().is_file() && is_image(path) {
                    found.insert(path.to_path_buf());
                }
            }
        }
        found
    })
    .await
    .map_err(|e| TaggerError::Validation(format!("image walk aborted: {}", e)))?;

    info!("Collected {} image(s).", found.len());
    Ok(found.into_iter().collect())
}

/// Splits `paths` by existence of `path + ".xmp"`, preserving order.
pub fn partition_existing(paths: &[PathBuf]) -> SidecarPartition {
    let mut partition = SidecarPartition::default();
    for path in paths {
        if sidecar_path(path).exists() {
            partition.with_sidecar.push(path.clone());
        } else {
            partition.without_sidecar.push(path.clone());
        }
    }
    partition
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| TaggerError::Validation(format!("bad exclude pattern {}: {}", pat, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| TaggerError::Validation(format!("bad exclude patterns: {}", e)))
}

fn should_descend(path: &Path, root: &Path, excludes: &GlobSet) -> bool {
    if excludes.is_match(path) {
        return false;
    }
    // The root itself may live under a dot-directory; only prune below it.
    path == root || !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn collects_images_skipping_hidden_and_excluded() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("album/thumbs")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("album/b.JPG"), "x").unwrap();
        fs::write(root.join("album/a.png"), "x").unwrap();
        fs::write(root.join("album/a.png.xmp"), "x").unwrap();
        fs::write(root.join("album/notes.txt"), "x").unwrap();
        fs::write(root.join("album/thumbs/t.jpg"), "x").unwrap();
        fs::write(root.join(".cache/c.jpg"), "x").unwrap();

        let roots = vec![root.to_path_buf(), root.join("album/a.png")];
        let found = collect_images(&roots, &["**/thumbs".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![root.join("album/a.png"), root.join("album/b.JPG")]);
    }

    #[test]
    fn partition_is_exactly_sidecar_existence() {
        let temp = tempfile::tempdir().unwrap();
        let done = temp.path().join("done.jpg");
        let fresh = temp.path().join("fresh.jpg");
        fs::write(&done, "x").unwrap();
        fs::write(&fresh, "x").unwrap();
        fs::write(temp.path().join("done.jpg.xmp"), "<x/>").unwrap();
        // A sidecar named by stem does not count.
        fs::write(temp.path().join("fresh.xmp"), "<x/>").unwrap();

        let partition = partition_existing(&[done.clone(), fresh.clone()]);
        assert_eq!(partition.with_sidecar, vec![done]);
        assert_eq!(partition.without_sidecar, vec![fresh]);
        assert_eq!(partition.total(), 2);
    }
}
