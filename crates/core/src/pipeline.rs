use crate::batch::BatchScheduler;
use crate::config::{AppConfig, ExportConfig, NsfwPolicy, RunMode, TaxonomyConfig};
use crate::consolidator::classify_batch;
use crate::gate::ConfidenceGate;
use crate::loader::load_batch;
use crate::sidecar::{export_sidecars, SidecarReport};
use crate::tag_store::TagStore;
use crate::taxonomy::{self, LoadedTaxonomy, Taxonomy};
use crate::{csv_export, scanner};
use anyhow::Context;
use providers::clip_http::{ClipHttpConfig, ClipHttpProvider};
use providers::noop::NoopProvider;
use providers::{ImageScorer, ProviderRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundReport {
    pub round: i64,
    pub source: String,
    pub batches: usize,
    pub images_loaded: usize,
    pub load_failures: usize,
    pub images_tagged: usize,
    pub tags_written: usize,
    pub classifier_failures: usize,
    pub store_failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub images: usize,
    pub sidecars: Option<SidecarReport>,
    pub csv_rows: Option<usize>,
    pub csv_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub collected: usize,
    /// Images left alone because they already had a sidecar.
    pub skipped_existing: usize,
    pub processed: usize,
    pub taxonomy_fallback: bool,
    pub scorer_unavailable: bool,
    pub rounds: Vec<RoundReport>,
    pub export: Option<ExportReport>,
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_scorer("noop", Arc::new(NoopProvider));

    if let Some(url) = &config.classifier.url {
        let provider = ClipHttpProvider::new(ClipHttpConfig {
            base_url: url.clone(),
            model: config.classifier.model.clone(),
        });
        reg = reg.with_scorer("clip-http", Arc::new(provider));
    }

    reg.set_preferred_scorer(&config.classifier.provider)
}

pub fn build_scorer(config: &AppConfig) -> anyhow::Result<Arc<dyn ImageScorer>> {
    build_registry(config)
        .scorer(None)
        .with_context(|| format!("classifier provider {:?}", config.classifier.provider))
}

/// One loaded taxonomy per round. In `folderMulti` mode unusable files are
/// skipped; the built-in taxonomy stands in only when nothing else loads.
pub fn resolve_taxonomies(
    config: &TaxonomyConfig,
    mode: RunMode,
) -> crate::Result<Vec<LoadedTaxonomy>> {
    let path = config.path.as_deref().map(Path::new);
    let sources = taxonomy::resolve_sources(mode, path);
    if sources.len() <= 1 {
        let only = sources.first().map(PathBuf::as_path);
        return Ok(vec![taxonomy::load_or_default(
            only,
            config.fallback_to_default,
        )?]);
    }

    let mut loaded = Vec::with_capacity(sources.len());
    for source in &sources {
        match taxonomy::load_or_default(Some(source), false) {
            Ok(t) => loaded.push(t),
            Err(e) => warn!("skipping taxonomy {}: {}", source.display(), e),
        }
    }
    if loaded.is_empty() {
        return Ok(vec![taxonomy::load_or_default(
            None,
            config.fallback_to_default,
        )?]);
    }
    Ok(loaded)
}

pub async fn run(config: &AppConfig) -> anyhow::Result<RunSummary> {
    let scorer = build_scorer(config)?;
    run_with_summary(config, scorer).await
}

/// Full tagging run: every round in order, then the exports.
pub async fn run_with_summary(
    config: &AppConfig,
    scorer: Arc<dyn ImageScorer>,
) -> anyhow::Result<RunSummary> {
    let tagging = &config.tagging;
    tagging.validate().context("invalid tagging configuration")?;
    let scheduler = BatchScheduler::new(tagging.batch_size)?;
    let gate = ConfidenceGate::new(tagging.confidence_threshold, tagging.gate);

    let taxonomies =
        resolve_taxonomies(&config.taxonomy, tagging.mode).context("resolve taxonomy")?;
    let store = TagStore::open(&config.database.path)
        .await
        .context("open tag store")?;

    let mut summary = RunSummary {
        taxonomy_fallback: taxonomies.iter().any(|t| t.fallback),
        ..RunSummary::default()
    };

    let roots: Vec<PathBuf> = config.images.include.iter().map(PathBuf::from).collect();
    let collected = scanner::collect_images(&roots, &config.images.exclude).await?;
    summary.collected = collected.len();
    let targets = if tagging.skip_existing {
        let partition = scanner::partition_existing(&collected);
        summary.skipped_existing = partition.with_sidecar.len();
        info!(
            "Skipping {} image(s) that already have sidecars.",
            summary.skipped_existing
        );
        partition.without_sidecar
    } else {
        collected
    };
    summary.processed = targets.len();

    if targets.is_empty() {
        info!("No images to tag.");
    } else if let Err(e) = scorer.load().await {
        error!("classifier {} failed to load: {}", scorer.model_name(), e);
        summary.scorer_unavailable = true;
    } else {
        for loaded in &taxonomies {
            let result = process_round(
                &store,
                scorer.as_ref(),
                &loaded.taxonomy,
                &gate,
                scheduler,
                &targets,
            )
            .await;
            match result {
                Ok(report) => summary.rounds.push(report),
                Err(e) => error!("round for {} aborted: {}", loaded.taxonomy.source(), e),
            }
        }
        scorer.unload().await;
    }

    if tagging.nsfw_policy.exports() {
        match export(&store, tagging.nsfw_policy, tagging.merge_existing, &config.export).await {
            Ok(report) => summary.export = Some(report),
            Err(e) => error!("export failed: {}", e),
        }
    } else {
        info!("nsfw_policy is detectOnly; exports skipped.");
    }

    Ok(summary)
}

/// One round over `paths`: batch, load, classify, commit. Batches are
/// processed strictly in order and each commits on its own.
pub async fn process_round(
    store: &TagStore,
    scorer: &dyn ImageScorer,
    taxonomy: &Taxonomy,
    gate: &ConfidenceGate,
    scheduler: BatchScheduler,
    paths: &[PathBuf],
) -> crate::Result<RoundReport> {
    let round = store.begin_round(taxonomy.source(), scorer.model_name()).await?;
    let total = scheduler.batch_count(paths.len());
    info!(
        "Round {} ({}): {} image(s) in {} batch(es).",
        round.index,
        round.source,
        paths.len(),
        total
    );

    let mut report = RoundReport {
        round: round.index,
        source: round.source.clone(),
        ..RoundReport::default()
    };

    for (i, batch) in scheduler.batches(paths).enumerate() {
        report.batches += 1;
        let loaded = load_batch(batch).await;
        report.load_failures += loaded.failures.len();
        report.images_loaded += loaded.images.len();
        if loaded.images.is_empty() {
            continue;
        }

        let outcome = classify_batch(scorer, &loaded.images, taxonomy, gate).await;
        report.classifier_failures += outcome.failed_groups;

        match store
            .commit_batch(&round, scorer.model_name(), &outcome.images)
            .await
        {
            Ok(write) => {
                report.images_tagged += write.images_written;
                report.tags_written += write.tags_written;
                report.store_failures += write.failed.len();
            }
            Err(e) => {
                let attempted = outcome
                    .images
                    .iter()
                    .filter(|i| !i.candidates.is_empty())
                    .count();
                warn!("batch {}/{} not committed: {}", i + 1, total, e);
                report.store_failures += attempted;
            }
        }
        info!("Batch {}/{} done.", i + 1, total);
    }

    store.finish_round(&round).await?;
    info!(
        "Round {} complete: {} image(s) tagged, {} tag(s) written.",
        round.index, report.images_tagged, report.tags_written
    );
    Ok(report)
}

/// Sidecars and CSV from committed store state. Callers decide whether the
/// policy allows exporting at all.
pub async fn export(
    store: &TagStore,
    policy: NsfwPolicy,
    merge: bool,
    config: &ExportConfig,
) -> crate::Result<ExportReport> {
    let include_nsfw = policy.include_nsfw();
    let images = store.query_consolidated(include_nsfw).await?;
    let mut report = ExportReport {
        images: images.len(),
        ..ExportReport::default()
    };

    if config.sidecars {
        report.sidecars = Some(export_sidecars(&images, include_nsfw, merge).await);
    }
    if let Some(csv_path) = &config.csv_path {
        match csv_export::export_csv(Path::new(csv_path), &images, include_nsfw).await {
            Ok(rows) => report.csv_rows = Some(rows),
            Err(e) => {
                warn!("csv export to {} failed: {}", csv_path, e);
                report.csv_error = Some(e.to_string());
            }
        }
    }
    Ok(report)
}
