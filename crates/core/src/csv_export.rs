//! Flat CSV export: one row per image, tags `;`-joined.

use crate::error::{Result, TaggerError};
use crate::models::ConsolidatedImage;
use crate::sidecar::build_tags;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const HEADER: [&str; 2] = ["file_path", "tags"];
pub const TAG_SEPARATOR: &str = ";";

/// Writes the export to any sink. Images are expected pre-filtered for NSFW;
/// `include_nsfw` only controls the `NSFW/Detected` marker tag.
pub fn write_csv<W: Write>(sink: W, images: &[ConsolidatedImage], include_nsfw: bool) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(HEADER)?;
    let mut rows = 0;
    for image in images {
        let tags: Vec<String> = build_tags(image, include_nsfw).into_iter().collect();
        writer.write_record([image.path.as_str(), tags.join(TAG_SEPARATOR).as_str()])?;
        rows += 1;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(rows)
}

pub async fn export_csv(
    path: &Path,
    images: &[ConsolidatedImage],
    include_nsfw: bool,
) -> Result<usize> {
    let mut body = Vec::new();
    let rows = write_csv(&mut body, images, include_nsfw)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TaggerError::io(parent, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| TaggerError::io(path, e))?;
    info!("Wrote {} row(s) to {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConsolidatedTag;

    fn image(path: &str, rounds: i64, names: &[&str]) -> ConsolidatedImage {
        ConsolidatedImage {
            path: path.into(),
            nsfw_detected: false,
            max_nsfw_confidence: 0.0,
            rounds_processed: rounds,
            tags: names
                .iter()
                .map(|n| ConsolidatedTag {
                    category: "Scene".into(),
                    subcategory: "general".into(),
                    tag_name: n.to_string(),
                    confidence: 0.7,
                })
                .collect(),
        }
    }

    #[test]
    fn rows_are_sorted_and_joined() {
        let mut out = Vec::new();
        let rows = write_csv(
            &mut out,
            &[image("/p/a.jpg", 2, &["Sunset", "Beach"])],
            false,
        )
        .unwrap();
        assert_eq!(rows, 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "file_path,tags\n/p/a.jpg,Processing/Batch Count 2;Scene/Beach;Scene/Sunset\n"
        );
    }

    #[test]
    fn awkward_paths_are_quoted() {
        let mut out = Vec::new();
        write_csv(&mut out, &[image("/p/a, \"b\".jpg", 1, &["Beach"])], false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"/p/a, \"\"b\"\".jpg\",Scene/Beach"));
    }

    #[tokio::test]
    async fn export_creates_parent_directories() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("reports/tags.csv");
        let rows = export_csv(&target, &[image("/p/a.jpg", 1, &["Beach"])], true)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let mut reader = csv::Reader::from_path(&target).unwrap();
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&records[0][1], "Scene/Beach");
    }

    #[tokio::test]
    async fn export_replaces_previous_file() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("tags.csv");
        std::fs::write(&target, "stale contents that are longer than the export\n").unwrap();
        export_csv(&target, &[image("/p/a.jpg", 1, &["Beach"])], false)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "file_path,tags\n/p/a.jpg,Scene/Beach\n"
        );
    }
}
