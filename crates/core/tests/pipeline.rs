use providers::{ImageInput, ImageScorer, ProviderError, ScoreMatrix};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tagger_core::config::{AppConfig, NsfwPolicy, RunMode};
use tagger_core::pipeline::{self, run_with_summary};
use tagger_core::sidecar::{read_sidecar_tags, sidecar_path};
use tagger_core::tag_store::TagStore;
use tempfile::tempdir;

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Puts 0.9 on the first query of every group and spreads the rest evenly.
/// Any group containing a query with "broken" in it fails.
#[derive(Default)]
struct ScriptedScorer {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ImageScorer for ScriptedScorer {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn load(&self) -> Result<(), ProviderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }

    async fn score(
        &self,
        images: &[ImageInput],
        queries: &[String],
    ) -> Result<ScoreMatrix, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if queries.iter().any(|q| q.contains("broken")) {
            return Err(ProviderError::RequestFailed("scripted failure".into()));
        }
        let row = if queries.len() == 1 {
            vec![1.0]
        } else {
            let rest = 0.1 / (queries.len() - 1) as f32;
            let mut row = vec![rest; queries.len()];
            row[0] = 0.9;
            row
        };
        Ok(ScoreMatrix::new(vec![row; images.len()]))
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: PathBuf,
    images: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let images = root.join("images");
        fs::create_dir_all(&images).unwrap();
        fs::write(images.join("a.png"), PNG_HEADER).unwrap();
        fs::write(images.join("b.png"), PNG_HEADER).unwrap();
        fs::write(images.join("notes.png"), "not an image").unwrap();
        Self {
            _temp: temp,
            root,
            images,
        }
    }

    fn taxonomy(&self, name: &str, body: &str) -> PathBuf {
        let dir = self.root.join("taxonomies");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn config(&self, taxonomy: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.path = self.root.join("tags.db").to_string_lossy().into_owned();
        config.images.include = vec![self.images.to_string_lossy().into_owned()];
        config.taxonomy.path = Some(taxonomy.to_string_lossy().into_owned());
        config.taxonomy.fallback_to_default = false;
        config.tagging.batch_size = 1;
        config.export.csv_path = Some(self.root.join("out/tags.csv").to_string_lossy().into_owned());
        config
    }
}

const SCENES: &str = "category,subcategory,query\n\
    Scene,setting,a photo taken outdoors\n\
    Scene,setting,a photo taken indoors\n\
    Poses,standing,a photo of a person standing\n\
    Poses,standing,a photo of a person sitting\n";

#[tokio::test]
async fn single_round_tags_stores_and_exports() {
    let fx = Fixture::new();
    let csv = fx.taxonomy("scenes.csv", SCENES);
    let config = fx.config(&csv);
    let scorer = Arc::new(ScriptedScorer::default());

    let summary = run_with_summary(&config, scorer.clone()).await.unwrap();
    assert_eq!(summary.collected, 3);
    assert_eq!(summary.processed, 3);
    assert!(!summary.taxonomy_fallback);
    assert_eq!(summary.rounds.len(), 1);
    let round = &summary.rounds[0];
    assert_eq!(round.source, "scenes");
    assert_eq!(round.batches, 3);
    assert_eq!(round.images_loaded, 2);
    assert_eq!(round.load_failures, 1);
    assert_eq!(round.images_tagged, 2);
    assert_eq!(round.tags_written, 4);
    assert_eq!(scorer.loads.load(Ordering::SeqCst), 1);
    assert_eq!(scorer.unloads.load(Ordering::SeqCst), 1);

    let tags = read_sidecar_tags(&sidecar_path(&fx.images.join("a.png")))
        .await
        .unwrap();
    let tags: Vec<String> = tags.into_iter().collect();
    assert_eq!(
        tags,
        vec!["Poses/standing/Person Standing", "Scene/setting/Outdoors"]
    );
    assert!(!sidecar_path(&fx.images.join("notes.png")).exists());

    let csv_out = fs::read_to_string(fx.root.join("out/tags.csv")).unwrap();
    let lines: Vec<&str> = csv_out.lines().collect();
    assert_eq!(lines[0], "file_path,tags");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",Poses/standing/Person Standing;Scene/setting/Outdoors"));
}

#[tokio::test]
async fn second_run_counts_rounds_and_export_is_idempotent() {
    let fx = Fixture::new();
    let csv = fx.taxonomy("scenes.csv", SCENES);
    let config = fx.config(&csv);

    run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();

    let sidecar = sidecar_path(&fx.images.join("b.png"));
    let tags = read_sidecar_tags(&sidecar).await.unwrap();
    assert!(tags.contains("Processing/Batch Count 2"));

    let before = fs::read(&sidecar).unwrap();
    let store = TagStore::open(&config.database.path).await.unwrap();
    let report = pipeline::export(&store, NsfwPolicy::Include, true, &config.export)
        .await
        .unwrap();
    assert_eq!(report.images, 2);
    assert_eq!(fs::read(&sidecar).unwrap(), before);

    let ledger = store.rounds().await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.iter().all(|r| r.tag_count == 4));
}

#[tokio::test]
async fn skip_existing_processes_only_images_without_sidecars() {
    let fx = Fixture::new();
    let csv = fx.taxonomy("scenes.csv", SCENES);
    let mut config = fx.config(&csv);
    run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();

    fs::write(fx.images.join("c.png"), PNG_HEADER).unwrap();
    config.tagging.skip_existing = true;
    let summary = run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();

    assert_eq!(summary.collected, 4);
    assert_eq!(summary.skipped_existing, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.rounds[0].images_tagged, 1);

    let store = TagStore::open(&config.database.path).await.unwrap();
    let a = store.image(&fx.images.join("a.png")).await.unwrap().unwrap();
    assert_eq!(a.rounds_processed, 1);
}

#[tokio::test]
async fn folder_mode_runs_one_round_per_file() {
    let fx = Fixture::new();
    fx.taxonomy(
        "01_scenes.csv",
        "category,subcategory,query\nScene,,a photo taken outdoors\nScene,,a photo taken indoors\n",
    );
    fx.taxonomy(
        "02_poses.csv",
        "category,subcategory,query\nPoses,standing,a photo of a person standing\nPoses,standing,a photo of a person sitting\n",
    );
    let mut config = fx.config(&fx.root.join("taxonomies"));
    config.tagging.mode = RunMode::FolderMulti;

    let summary = run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    let sources: Vec<&str> = summary.rounds.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["01_scenes", "02_poses"]);

    let tags = read_sidecar_tags(&sidecar_path(&fx.images.join("a.png")))
        .await
        .unwrap();
    let tags: Vec<String> = tags.into_iter().collect();
    assert_eq!(
        tags,
        vec![
            "Poses/standing/Person Standing",
            "Processing/Batch Count 2",
            "Scene/Outdoors",
        ]
    );
}

#[tokio::test]
async fn failed_classifier_group_is_counted_and_others_still_tag() {
    let fx = Fixture::new();
    let csv = fx.taxonomy(
        "mixed.csv",
        "category,subcategory,query\n\
         Scene,setting,a photo taken outdoors\n\
         Scene,setting,a photo taken indoors\n\
         Broken,general,a broken query\n\
         Broken,general,another query\n",
    );
    let config = fx.config(&csv);
    let summary = run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    let round = &summary.rounds[0];
    assert_eq!(round.classifier_failures, 2);
    assert_eq!(round.images_tagged, 2);
    assert_eq!(round.tags_written, 2);
}

#[tokio::test]
async fn nsfw_policies_filter_and_suppress_exports() {
    let fx = Fixture::new();
    let csv = fx.taxonomy(
        "nsfw.csv",
        "category,subcategory,query\n\
         nsfw,general,explicit content\n\
         nsfw,general,safe content\n\
         Scene,setting,a photo taken outdoors\n\
         Scene,setting,a photo taken indoors\n",
    );

    let mut config = fx.config(&csv);
    config.tagging.nsfw_policy = NsfwPolicy::DetectOnly;
    let summary = run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    assert!(summary.export.is_none());
    assert!(!sidecar_path(&fx.images.join("a.png")).exists());
    assert!(!fx.root.join("out/tags.csv").exists());

    let store = TagStore::open(&config.database.path).await.unwrap();
    let record = store.image(&fx.images.join("a.png")).await.unwrap().unwrap();
    assert!(record.nsfw_detected);
    assert_eq!(record.max_nsfw_confidence, 0.9);
    store.pool().close().await;

    config.tagging.nsfw_policy = NsfwPolicy::Exclude;
    let summary = run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    let export = summary.export.unwrap();
    assert_eq!(export.images, 0);
    assert!(!sidecar_path(&fx.images.join("a.png")).exists());

    config.tagging.nsfw_policy = NsfwPolicy::Include;
    run_with_summary(&config, Arc::new(ScriptedScorer::default()))
        .await
        .unwrap();
    let tags = read_sidecar_tags(&sidecar_path(&fx.images.join("a.png")))
        .await
        .unwrap();
    assert!(tags.contains("NSFW/Detected"));
    assert!(tags.contains("nsfw/Explicit Content"));
    assert!(tags.contains("Processing/Batch Count 3"));
}

#[tokio::test]
async fn missing_taxonomy_without_fallback_aborts() {
    let fx = Fixture::new();
    let config = fx.config(&fx.root.join("nowhere.csv"));
    let scorer = Arc::new(ScriptedScorer::default());
    let err = run_with_summary(&config, scorer.clone()).await.unwrap_err();
    assert!(err.to_string().contains("taxonomy"));
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
}
