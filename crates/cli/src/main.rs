use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::overrides::RunOverrides;
use cli::report;
use std::path::{Path, PathBuf};
use tagger_core::config::{self, AppConfig};
use tagger_core::pipeline;
use tagger_core::scanner;
use tagger_core::tag_store::TagStore;
use tagger_core::taxonomy;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref()).context("load config")?;

    match cli.command {
        Commands::Tag { overrides, json } => {
            overrides.apply(&mut cfg);
            run_tag(cfg, json).await
        }
        Commands::Export { overrides, json } => {
            overrides.apply(&mut cfg);
            run_export(cfg, json).await
        }
        Commands::Status { overrides, json } => {
            overrides.apply(&mut cfg);
            run_status(cfg, json).await
        }
        Commands::Show { path, database, json } => {
            if let Some(db) = database {
                cfg.database.path = db;
            }
            run_show(cfg, &path, json).await
        }
        Commands::Rounds { database, json } => {
            if let Some(db) = database {
                cfg.database.path = db;
            }
            run_rounds(cfg, json).await
        }
        Commands::Taxonomy { path, json } => run_taxonomy(&path, json),
    }
}

#[derive(Parser)]
#[command(name = "media-tagger")]
#[command(about = "Multi-round image tagging with XMP sidecar export", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every tagging round, then export
    Tag {
        #[command(flatten)]
        overrides: RunOverrides,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Export sidecars/CSV from the store without classifying
    Export {
        #[command(flatten)]
        overrides: RunOverrides,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Report which images already have sidecars
    Status {
        #[command(flatten)]
        overrides: RunOverrides,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored record and full tag history of one image
    Show {
        path: PathBuf,
        /// Database path or sqlite: URL
        #[arg(long)]
        database: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded rounds
    Rounds {
        /// Database path or sqlite: URL
        #[arg(long)]
        database: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a taxonomy CSV and summarize it
    Taxonomy {
        path: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_tag(cfg: AppConfig, json: bool) -> Result<()> {
    let summary = pipeline::run(&cfg).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", report::run_summary(&summary));
    }
    Ok(())
}

async fn run_export(cfg: AppConfig, json: bool) -> Result<()> {
    let policy = cfg.tagging.nsfw_policy;
    if !policy.exports() {
        warn!("nsfw_policy is detectOnly; nothing to export");
        if json {
            println!("{}", serde_json::json!({ "status": "skipped" }));
        }
        return Ok(());
    }
    let store = TagStore::open(&cfg.database.path)
        .await
        .context("open tag store")?;
    let export = pipeline::export(&store, policy, cfg.tagging.merge_existing, &cfg.export).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&export)?);
    } else {
        print!("{}", report::export_report(&export));
    }
    Ok(())
}

async fn run_status(cfg: AppConfig, json: bool) -> Result<()> {
    let roots: Vec<PathBuf> = cfg.images.include.iter().map(PathBuf::from).collect();
    let images = scanner::collect_images(&roots, &cfg.images.exclude).await?;
    let partition = scanner::partition_existing(&images);
    if json {
        println!("{}", serde_json::to_string_pretty(&partition)?);
    } else {
        print!("{}", report::partition(&partition));
    }
    Ok(())
}

async fn run_show(cfg: AppConfig, path: &Path, json: bool) -> Result<()> {
    let store = TagStore::open(&cfg.database.path)
        .await
        .context("open tag store")?;
    let mut record = store.image(path).await?;
    let mut lookup = path.to_path_buf();
    if record.is_none() {
        if let Ok(abs) = std::fs::canonicalize(path) {
            record = store.image(&abs).await?;
            lookup = abs;
        }
    }
    let Some(record) = record else {
        anyhow::bail!("{} is not in the tag store", path.display());
    };
    let history = store.tag_history(&lookup).await?;
    if json {
        let out = serde_json::json!({ "image": record, "history": history });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", report::image_history(&record, &history));
    }
    Ok(())
}

async fn run_rounds(cfg: AppConfig, json: bool) -> Result<()> {
    let store = TagStore::open(&cfg.database.path)
        .await
        .context("open tag store")?;
    let rows = store.rounds().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", report::rounds(&rows));
    }
    Ok(())
}

fn run_taxonomy(path: &Path, json: bool) -> Result<()> {
    let loaded = taxonomy::load_or_default(Some(path), false)
        .with_context(|| format!("load taxonomy {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&loaded)?);
    } else {
        print!("{}", report::taxonomy(&loaded));
    }
    Ok(())
}
