use clap::Args;
use tagger_core::config::{AppConfig, NsfwPolicy, RunMode};

/// Command-line overrides layered on top of the loaded config file.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOverrides {
    /// Image roots to tag (files or directories); replaces `images.include`
    #[arg(long = "images", value_delimiter = ',', num_args = 1..)]
    pub images: Vec<String>,
    /// Taxonomy CSV (single) or directory of CSVs (folder-multi)
    #[arg(long)]
    pub taxonomy: Option<String>,
    /// Run mode: single|folder-multi
    #[arg(long)]
    pub mode: Option<RunMode>,
    /// Confidence threshold in [0.1, 0.9]
    #[arg(long)]
    pub threshold: Option<f32>,
    /// Images per batch, 1..=30
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Only process images without an existing sidecar
    #[arg(long, default_value_t = false)]
    pub skip_existing: bool,
    /// Replace existing sidecar tags instead of merging with them
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
    /// NSFW policy: include|exclude|detect-only
    #[arg(long)]
    pub nsfw: Option<NsfwPolicy>,
    /// Also write a CSV export to this path
    #[arg(long)]
    pub csv: Option<String>,
    /// Do not write XMP sidecars
    #[arg(long, default_value_t = false)]
    pub no_sidecars: bool,
    /// Database path or sqlite: URL
    #[arg(long)]
    pub database: Option<String>,
}

impl RunOverrides {
    pub fn apply(&self, cfg: &mut AppConfig) {
        if !self.images.is_empty() {
            cfg.images.include = self.images.clone();
        }
        if let Some(t) = &self.taxonomy {
            cfg.taxonomy.path = Some(t.clone());
        }
        if let Some(m) = self.mode {
            cfg.tagging.mode = m;
        }
        if let Some(t) = self.threshold {
            cfg.tagging.confidence_threshold = t;
        }
        if let Some(b) = self.batch_size {
            cfg.tagging.batch_size = b;
        }
        if self.skip_existing {
            cfg.tagging.skip_existing = true;
        }
        if self.overwrite {
            cfg.tagging.merge_existing = false;
        }
        if let Some(p) = self.nsfw {
            cfg.tagging.nsfw_policy = p;
        }
        if let Some(c) = &self.csv {
            cfg.export.csv_path = Some(c.clone());
        }
        if self.no_sidecars {
            cfg.export.sidecars = false;
        }
        if let Some(db) = &self.database {
            cfg.database.path = db.clone();
        }
    }
}
