//! Reads one batch of images into memory. Files that cannot be read or are not
//! images are reported and left out of the batch.

use crate::error::{Result, TaggerError};
use providers::ImageInput;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Default)]
pub struct LoadedBatch {
    pub images: Vec<ImageInput>,
    pub failures: Vec<(PathBuf, TaggerError)>,
}

pub async fn load_image(path: &Path) -> Result<ImageInput> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TaggerError::io(path, e))?;
    let is_image = infer::get(&bytes)
        .map(|k| matches!(k.matcher_type(), infer::MatcherType::Image))
        .unwrap_or(false);
    if !is_image {
        return Err(TaggerError::Validation(format!(
            "{} is not a recognised image",
            path.display()
        )));
    }
    decode_check(path, &bytes)?;
    Ok(ImageInput {
        path: path.to_path_buf(),
        bytes,
    })
}

#[cfg(feature = "decode")]
fn decode_check(path: &Path, bytes: &[u8]) -> Result<()> {
    image::load_from_memory(bytes)
        .map(|_| ())
        .map_err(|e| TaggerError::Validation(format!("{}: {}", path.display(), e)))
}

#[cfg(not(feature = "decode"))]
fn decode_check(_path: &Path, _bytes: &[u8]) -> Result<()> {
    Ok(())
}

pub async fn load_batch(paths: &[PathBuf]) -> LoadedBatch {
    let mut batch = LoadedBatch::default();
    for path in paths {
        match load_image(path).await {
            Ok(image) => batch.images.push(image),
            Err(e) => {
                warn!("skipping image {}: {}", path.display(), e);
                batch.failures.push((path.clone(), e));
            }
        }
    }
    batch
}
