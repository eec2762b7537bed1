//! Ablage CLI
//!
//! Runs the processing pipeline against a single local file and prints the
//! per-stage report. Useful for checking a configuration before deploying it.

use ablage::core::config::PipelineConfig;
use ablage::core::orchestrator::{Orchestrator, Submission};
use ablage::core::pipeline::Pipeline;
use ablage::plugins::StageRegistry;
use ablage::storage::{BlobStore, LocalBlobStore, MemoryBlobStore, MemoryDocumentStore};
use ablage::types::{BlobRef, Document, ProcessingReport, StageStatus, StorageBackend};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "ablage")]
#[command(version, about = "Run the document processing pipeline", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one file through the configured stages
    Process {
        /// File to process
        file: PathBuf,

        /// Config file (toml, yaml or json). Defaults to ablage.toml discovery.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// MIME type; guessed from the extension when omitted
        #[arg(short, long)]
        mime: Option<String>,

        /// Document title; defaults to the file name
        #[arg(short, long)]
        title: Option<String>,

        /// Recompute outputs even if already present
        #[arg(long)]
        force: bool,

        /// Run through the worker pool instead of inline
        #[arg(long)]
        pooled: bool,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the resolved stage order
    Stages {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "ablage=info",
        1 => "ablage=debug",
        _ => "ablage=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(PipelineConfig::discover()?.unwrap_or_default()),
    }
}

/// Extensions whose registry MIME type differs from what the extraction stage expects.
fn mime_override(extension: &str) -> Option<&'static str> {
    match extension {
        "md" | "markdown" => Some("text/markdown"),
        "yaml" | "yml" => Some("application/yaml"),
        "toml" => Some("application/toml"),
        _ => None,
    }
}

fn guess_mime(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(mime_type) = mime_override(&extension) {
        return mime_type.to_string();
    }

    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn blob_store(config: &PipelineConfig) -> Result<Arc<dyn BlobStore>> {
    match (config.storage.backend, &config.storage.root) {
        (StorageBackend::Local, Some(root)) => Ok(Arc::new(LocalBlobStore::new(root)?)),
        (StorageBackend::Local, None) | (StorageBackend::Memory, _) => Ok(Arc::new(MemoryBlobStore::new())),
        (backend, _) => Ok(Arc::new(MemoryBlobStore::with_backend(
            backend,
            config.storage.bucket.clone().unwrap_or_else(|| "ablage".to_string()),
        ))),
    }
}

fn print_report(report: &ProcessingReport, document: Option<&Document>) {
    println!("document {} ({} ms)", report.document_id, report.elapsed_ms);
    for stage in &report.stages {
        let detail = match &stage.status {
            StageStatus::Applied { fields } => format!("applied   {}", fields.join(", ")),
            StageStatus::Skipped { reason } => format!("skipped   {}", reason),
            StageStatus::Partial { fields, error } => format!("partial   {} ({})", fields.join(", "), error),
            StageStatus::Failed { error } => format!("failed    {}", error),
        };
        println!("  {:<20} {}  [{} ms]", stage.stage, detail, stage.elapsed_ms);
    }

    let Some(document) = document else {
        return;
    };
    println!();
    if let Some(language) = &document.language {
        println!("language:      {}", language);
    }
    if let Some(pages) = document.page_count {
        println!("pages:         {}", pages);
    }
    if let Some(vector) = &document.search_vector {
        println!("search vector: {} lexemes ({})", vector.lexemes.len(), vector.config);
    }
    if let Some(thumbnail) = &document.thumbnail {
        println!("thumbnail:     {}", thumbnail);
    }
    if let Some(text) = &document.text {
        let preview: String = text.chars().take(200).collect();
        println!("text:          {}{}", preview, if text.chars().count() > 200 { "..." } else { "" });
    }
}

#[allow(clippy::too_many_arguments)]
async fn process(
    file: PathBuf,
    config: Option<PathBuf>,
    mime: Option<String>,
    title: Option<String>,
    force: bool,
    pooled: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config.as_deref())?;
    tracing::debug!(stages = ?config.stages, storage = %config.storage.backend, "Configuration loaded");
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();
    let mime_type = mime.unwrap_or_else(|| guess_mime(&file));

    let blobs = blob_store(&config)?;
    let content = BlobRef::new(format!("originals/{}", file_name));
    blobs.write(&content, bytes).await?;

    let documents = Arc::new(MemoryDocumentStore::new());
    let id = documents.insert(Document::new(title.unwrap_or_else(|| file_name.clone()), mime_type, content));

    let pipeline = Pipeline::initialize(config, &StageRegistry::with_builtins(), documents.clone(), blobs)?;
    let orchestrator = if pooled {
        Orchestrator::pooled(pipeline.clone())?
    } else {
        Orchestrator::inline(pipeline.clone())
    };

    let report = match orchestrator.apply_processing(id, force).await? {
        Submission::Completed(report) => report,
        Submission::Queued(handle) => handle.wait().await?,
        Submission::AlreadyInFlight => bail!("document {} is already being processed", id),
    };
    orchestrator.shutdown().await;
    pipeline.shutdown();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, documents.snapshot(id).as_ref()),
    }

    Ok(())
}

fn stages(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config.as_deref())?;
    config.validate()?;
    let set = StageRegistry::with_builtins().resolve(&config)?;
    for (position, name) in set.names().iter().enumerate() {
        println!("{:>2}. {}", position + 1, name);
    }
    set.shutdown_all();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Process {
            file,
            config,
            mime,
            title,
            force,
            pooled,
            format,
        } => process(file, config, mime, title, force, pooled, format).await,
        Commands::Stages { config } => stages(config),
    }
}
