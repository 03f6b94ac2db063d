use crate::batch::MAX_BATCH_SIZE;
use crate::error::{Result, TaggerError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub images: ImagePaths,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/tags.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePaths {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// A CSV file in `single` mode, a directory of CSV files in `folderMulti`.
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub fallback_to_default: bool,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            path: None,
            fallback_to_default: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub provider: String,
    pub url: Option<String>,
    pub model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            url: None,
            model: "clip-vit-large-patch14".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    /// One taxonomy file, one round.
    #[default]
    Single,
    /// Every taxonomy file in a directory, one round each.
    FolderMulti,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "single" => Ok(RunMode::Single),
            "foldermulti" | "multi" => Ok(RunMode::FolderMulti),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NsfwPolicy {
    #[default]
    Include,
    Exclude,
    /// Tag and store, but export nothing.
    DetectOnly,
}

impl NsfwPolicy {
    /// Whether NSFW-flagged images are read back for export. Only `Exclude`
    /// filters them.
    pub fn include_nsfw(self) -> bool {
        !matches!(self, NsfwPolicy::Exclude)
    }

    pub fn exports(self) -> bool {
        !matches!(self, NsfwPolicy::DetectOnly)
    }
}

impl FromStr for NsfwPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "include" => Ok(NsfwPolicy::Include),
            "exclude" => Ok(NsfwPolicy::Exclude),
            "detectonly" | "detect" => Ok(NsfwPolicy::DetectOnly),
            other => Err(format!("unknown nsfw policy: {}", other)),
        }
    }
}

/// Category floors applied on top of the user threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub nsfw_floor: f32,
    pub sfw_floor: f32,
    pub sfw_offset: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            nsfw_floor: 0.6,
            sfw_floor: 0.5,
            sfw_offset: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub skip_existing: bool,
    #[serde(default = "default_true")]
    pub merge_existing: bool,
    #[serde(default)]
    pub nsfw_policy: NsfwPolicy,
    #[serde(default)]
    pub gate: GateConfig,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            confidence_threshold: default_threshold(),
            batch_size: default_batch_size(),
            skip_existing: false,
            merge_existing: true,
            nsfw_policy: NsfwPolicy::default(),
            gate: GateConfig::default(),
        }
    }
}

impl TaggingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.1..=0.9).contains(&self.confidence_threshold) {
            return Err(TaggerError::Validation(format!(
                "confidence_threshold must be within [0.1, 0.9], got {}",
                self.confidence_threshold
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(TaggerError::Validation(format!(
                "batch_size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        for (name, v) in [
            ("nsfw_floor", self.gate.nsfw_floor),
            ("sfw_floor", self.gate.sfw_floor),
            ("sfw_offset", self.gate.sfw_offset),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(TaggerError::Validation(format!(
                    "gate.{} must be within [0, 1], got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub csv_path: Option<String>,
    #[serde(default = "default_true")]
    pub sidecars: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            csv_path: None,
            sidecars: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.45
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

pub fn load(path: Option<&str>) -> Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_run_configuration() {
        let t = TaggingConfig::default();
        assert_eq!(t.confidence_threshold, 0.45);
        assert_eq!(t.batch_size, 30);
        assert_eq!(t.mode, RunMode::Single);
        assert_eq!(t.nsfw_policy, NsfwPolicy::Include);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut t = TaggingConfig::default();
        t.confidence_threshold = 0.95;
        assert!(matches!(t.validate(), Err(TaggerError::Validation(_))));

        let mut t = TaggingConfig::default();
        t.batch_size = 31;
        assert!(t.validate().is_err());
        t.batch_size = 0;
        assert!(t.validate().is_err());
    }

    #[test]
    fn policy_and_mode_parse_from_cli_spellings() {
        assert_eq!("detect-only".parse::<NsfwPolicy>(), Ok(NsfwPolicy::DetectOnly));
        assert_eq!("detectOnly".parse::<NsfwPolicy>(), Ok(NsfwPolicy::DetectOnly));
        assert_eq!("folder-multi".parse::<RunMode>(), Ok(RunMode::FolderMulti));
        assert!("sometimes".parse::<NsfwPolicy>().is_err());
        assert!(!NsfwPolicy::DetectOnly.exports());
        assert!(!NsfwPolicy::Exclude.include_nsfw());
        assert!(NsfwPolicy::Include.include_nsfw());
    }

    #[test]
    fn load_reads_toml_file_with_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tagger.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            path = "tags.db"

            [tagging]
            confidence_threshold = 0.5
            nsfw_policy = "detectOnly"
            mode = "folderMulti"
            "#,
        )
        .unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.database.path, "tags.db");
        assert_eq!(cfg.tagging.confidence_threshold, 0.5);
        assert_eq!(cfg.tagging.nsfw_policy, NsfwPolicy::DetectOnly);
        assert_eq!(cfg.tagging.mode, RunMode::FolderMulti);
        assert_eq!(cfg.tagging.batch_size, 30);
        assert!(cfg.taxonomy.fallback_to_default);
        assert_eq!(cfg.classifier.provider, "noop");
        assert!(cfg.export.sidecars);
        assert!(cfg.export.csv_path.is_none());
    }

    #[test]
    fn sidecars_are_on_without_export_section() {
        assert!(AppConfig::default().export.sidecars);
        assert!(ExportConfig::default().sidecars);
    }

    #[test]
    fn partial_gate_section_keeps_other_floors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("gate.toml");
        std::fs::write(
            &path,
            r#"
            [tagging.gate]
            nsfw_floor = 0.7
            "#,
        )
        .unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.tagging.gate.nsfw_floor, 0.7);
        assert_eq!(cfg.tagging.gate.sfw_floor, 0.5);
        assert_eq!(cfg.tagging.gate.sfw_offset, 0.05);
        assert!(cfg.tagging.merge_existing);
    }
}
