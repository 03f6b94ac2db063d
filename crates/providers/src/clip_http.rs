use crate::{ImageInput, ImageScorer, ProviderError, ScoreMatrix};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ClipHttpConfig {
    pub base_url: String,
    pub model: String,
}

/// Client for a local CLIP-style scoring server.
///
/// The server owns the model weights; `load`/`unload` ask it to bring the
/// model onto (and off) the accelerator so only one instance is resident.
#[derive(Clone)]
pub struct ClipHttpProvider {
    client: Client,
    cfg: Arc<ClipHttpConfig>,
}

impl ClipHttpProvider {
    pub fn new(cfg: ClipHttpConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), route)
    }

    async fn request_unload(&self) -> Result<(), ProviderError> {
        self.client
            .post(self.url("unload"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ScoreApiResponse {
    scores: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl ImageScorer for ClipHttpProvider {
    fn model_name(&self) -> &str {
        &self.cfg.model
    }

    async fn load(&self) -> Result<(), ProviderError> {
        #[derive(serde::Serialize)]
        struct LoadRequest<'a> {
            model: &'a str,
        }

        self.client
            .post(self.url("load"))
            .json(&LoadRequest {
                model: &self.cfg.model,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        info!(model = %self.cfg.model, "classifier model loaded");
        Ok(())
    }

    async fn unload(&self) {
        match self.request_unload().await {
            Ok(()) => info!(model = %self.cfg.model, "classifier model unloaded"),
            Err(e) => warn!(model = %self.cfg.model, "unload request failed: {}", e),
        }
    }

    async fn score(
        &self,
        images: &[ImageInput],
        queries: &[String],
    ) -> Result<ScoreMatrix, ProviderError> {
        let queries_json = serde_json::to_string(queries)
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let mut form = Form::new()
            .text("model", self.cfg.model.clone())
            .text("queries", queries_json);
        for image in images {
            let name = image
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            form = form.part("images", Part::bytes(image.bytes.clone()).file_name(name));
        }

        let resp = self
            .client
            .post(self.url("score"))
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let parsed: ScoreApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let matrix = ScoreMatrix::new(parsed.scores);
        matrix.validate(images.len(), queries.len())?;
        Ok(matrix)
    }
}
