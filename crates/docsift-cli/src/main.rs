use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docsift_core::engine::TextractEngine;
use docsift_core::store::{FsStore, S3Store};
use docsift_core::{BlobStore, Config, Coordinator, DocumentSummary, Persister, config_file};

mod output;

use output::ColorMode;

/// docsift - Extract text from PDF documents with OCR
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use a local directory as the object store instead of S3
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// S3 bucket holding inputs and outputs
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// S3-compatible endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Textract endpoint URL
    #[arg(long, global = true)]
    textract_endpoint: Option<String>,

    /// Path to a TOML config file (replaces the default config lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract text from one or more stored documents
    Process {
        /// Object keys of the documents, e.g. input-articles/report.pdf
        #[arg(required = true)]
        keys: Vec<String>,

        /// Print per-document JSON summaries instead of text
        #[arg(long)]
        json: bool,
    },

    /// Process an S3 event notification read from a file ("-" for stdin)
    Event {
        /// Path to the event JSON
        path: PathBuf,
    },

    /// Upload a local PDF under the input prefix
    Upload {
        /// Path to the PDF to upload
        path: PathBuf,

        /// Object key to store it under (default: input prefix + file name)
        #[arg(long)]
        key: Option<String>,

        /// Process the document right after uploading it
        #[arg(long)]
        process: bool,
    },

    /// List processed documents
    List {
        /// List error records instead
        #[arg(long)]
        errors: bool,
    },

    /// Print the stored text for a document
    Show {
        /// Document name without extension, e.g. "report"
        name: String,

        /// Print the metadata record instead
        #[arg(long, conflicts_with = "error")]
        metadata: bool,

        /// Print the error record instead
        #[arg(long)]
        error: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let color = ColorMode(!cli.no_color);
    let store = open_store(cli.root.as_deref(), &config)?;

    match cli.command {
        Command::Process { keys, json } => process(store, config, keys, json, color).await,
        Command::Event { path } => event(store, config, &path).await,
        Command::Upload { path, key, process } => {
            upload(store, config, &path, key, process, color).await
        }
        Command::List { errors } => list(store, config, errors, color).await,
        Command::Show {
            name,
            metadata,
            error,
        } => show(store, config, &name, metadata, error).await,
    }
}

/// Resolve configuration: CLI flags > env vars > config file > defaults
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let file = match &cli.config {
        Some(path) => config_file::load_from_path(path)?,
        None => config_file::load_config(),
    };

    let mut config = Config::default();
    file.apply_to(&mut config);
    docsift_core::env::apply_env(&mut config);

    if let Some(bucket) = &cli.bucket {
        config.bucket = Some(bucket.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.s3_endpoint = Some(endpoint.clone());
    }
    if let Some(endpoint) = &cli.textract_endpoint {
        config.textract_endpoint = Some(endpoint.clone());
    }
    Ok(config)
}

fn open_store(root: Option<&Path>, config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    if let Some(root) = root {
        if !root.is_dir() {
            anyhow::bail!("Store root not found: {}", root.display());
        }
        return Ok(Arc::new(FsStore::new(root)));
    }
    let Some(bucket) = config.bucket.as_deref() else {
        anyhow::bail!(
            "No bucket configured. Pass --bucket, set S3_BUCKET_NAME, or use --root <DIR> for a local store"
        );
    };
    Ok(Arc::new(S3Store::from_config(bucket, config)))
}

fn coordinator(store: Arc<dyn BlobStore>, config: Config) -> Coordinator {
    let engine = Arc::new(TextractEngine::new(config.textract_endpoint()));
    Coordinator::new(store, engine, config)
}

async fn process(
    store: Arc<dyn BlobStore>,
    config: Config,
    keys: Vec<String>,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let coordinator = coordinator(store, config);

    let summary = if json {
        coordinator.process_batch(keys).await
    } else {
        coordinator
            .process_batch_with_progress(keys, move |event| {
                let mut out = std::io::stdout().lock();
                let _ = output::print_progress(&mut out, &event, color);
            })
            .await
    };

    let mut out = std::io::stdout().lock();
    if json {
        let docs: Vec<DocumentSummary> = summary
            .succeeded
            .iter()
            .chain(summary.failed.iter())
            .map(|r| DocumentSummary::new(r, coordinator.config()))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&docs)?)?;
    } else {
        output::print_batch_summary(&mut out, &summary, color)?;
    }

    if !summary.failed.is_empty() {
        anyhow::bail!("{} document(s) failed", summary.failed.len());
    }
    Ok(())
}

async fn event(store: Arc<dyn BlobStore>, config: Config, path: &Path) -> anyhow::Result<()> {
    let body = if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        body
    } else {
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
        tokio::fs::read_to_string(path).await?
    };

    let report = coordinator(store, config).handle_event(&body).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn upload(
    store: Arc<dyn BlobStore>,
    config: Config,
    path: &Path,
    key: Option<String>,
    process: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let key = match key {
        Some(key) => key,
        None => {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                anyhow::bail!("Cannot derive an object key from {}", path.display());
            };
            config.prefixes.input_key(file_name)
        }
    };

    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len();
    store.put(&key, bytes).await?;
    println!("Uploaded {} ({} bytes) to {}", path.display(), size, key);

    if process {
        let result = coordinator(store, config).process(&key).await;
        let mut out = std::io::stdout().lock();
        output::print_result(&mut out, &result, color)?;
        if result.is_failed() {
            anyhow::bail!("Extraction failed for {}", key);
        }
    }
    Ok(())
}

async fn list(
    store: Arc<dyn BlobStore>,
    config: Config,
    errors: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let persister = Persister::new(store, Arc::new(config));
    let mut out = std::io::stdout().lock();
    if errors {
        let objects = persister.list_errors().await?;
        output::print_error_objects(&mut out, &objects, color)?;
    } else {
        let documents = persister.list_processed().await?;
        output::print_processed(&mut out, &documents, color)?;
    }
    Ok(())
}

async fn show(
    store: Arc<dyn BlobStore>,
    config: Config,
    name: &str,
    metadata: bool,
    error: bool,
) -> anyhow::Result<()> {
    let persister = Persister::new(store, Arc::new(config));
    if metadata {
        let record = persister.load_metadata(name).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if error {
        let record = persister.load_error(name).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print!("{}", persister.load_text(name).await?);
        std::io::stdout().flush()?;
    }
    Ok(())
}
