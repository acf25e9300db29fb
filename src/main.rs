//! `textembed`: documents on stdin (one per line), a JSON array of vectors
//! on stdout.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use textembed::{EmbedConfig, EmbeddingModel, EmbeddingService};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const LOG_JSON_ENV: &str = "TEXTEMBED_LOG_JSON";

#[derive(Debug, Parser)]
#[command(
    name = "textembed",
    version,
    about = "Embed documents read from stdin with a local model"
)]
struct Args {
    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name or repository id, e.g. `BGESmallENV15`.
    #[arg(long)]
    model: Option<String>,

    /// Documents per forward pass; 0 runs everything in one batch.
    #[arg(long, allow_hyphen_values = true)]
    batch_size: Option<i64>,

    /// Directory holding downloaded model files.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Print the known models and exit.
    #[arg(long, default_value_t = false)]
    list_models: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    if args.list_models {
        let mut out = io::stdout().lock();
        for model in EmbeddingModel::ALL {
            let spec = model.spec();
            writeln!(
                out,
                "{:<24} {:<60} dim={:<5} max_length={:<5} {}",
                model.name(),
                spec.id,
                spec.dimension,
                spec.max_length,
                spec.description
            )?;
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => EmbedConfig::from_file(path)?,
        None => EmbedConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(dir) = args.cache_dir {
        config.cache_dir = dir;
    }
    config.validate()?;

    let model = config.embedding_model()?;
    let batch_size = match args.batch_size {
        Some(size) => size,
        None => i64::try_from(config.batch_size)?,
    };

    let documents = io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<String>, _>>()?;

    let service = EmbeddingService::from_model(model, config.to_options())?;
    let vectors = service.embed(&documents, batch_size)?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer(&mut out, &vectors)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Logs go to stderr so stdout stays valid JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if std::env::var_os(LOG_JSON_ENV).is_some() {
        builder.json().init();
    } else {
        builder.init();
    }
}
