use crate::{ImageInput, ImageScorer, ProviderError, ScoreMatrix};

/// Returns a uniform distribution for every image. Useful for dry runs of the
/// pipeline; at any threshold above `1 / queries` it admits nothing.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl ImageScorer for NoopProvider {
    fn model_name(&self) -> &str {
        "noop"
    }

    async fn score(
        &self,
        images: &[ImageInput],
        queries: &[String],
    ) -> Result<ScoreMatrix, ProviderError> {
        if queries.is_empty() {
            return Ok(ScoreMatrix::new(vec![vec![]; images.len()]));
        }
        let p = 1.0 / queries.len() as f32;
        Ok(ScoreMatrix::new(vec![vec![p; queries.len()]; images.len()]))
    }
}
