//! Trendmap CLI - run the clustering pipeline on a file of texts
//!
//! Usage: trendmap-cli --input texts.json --query "cat videos" [OPTIONS]
//!
//! Input is either a JSON array of strings or one text per line. Prints the
//! same JSON response the server returns.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trendmap_lib::ai_client::{self, DisabledModel, GenerativeModel};
use trendmap_lib::local_embeddings::LocalEmbedder;
use trendmap_lib::settings::Settings;
use trendmap_lib::{ClusterRequest, ClusterResponse, Pipeline, PipelineOptions};

#[derive(Parser)]
#[command(name = "trendmap-cli")]
#[command(version, about = "Cluster short texts and find content gaps", long_about = None)]
struct Cli {
    /// File with texts: a JSON array of strings, or one text per line
    #[arg(long, short)]
    input: PathBuf,

    /// Search query the texts were collected for
    #[arg(long, short)]
    query: String,

    /// Minimum items per cluster
    #[arg(long, default_value_t = 2)]
    min_cluster_size: usize,

    /// Neighbour rank used for density estimates
    #[arg(long, default_value_t = 1)]
    min_samples: usize,

    /// Skip idea generation (no API calls)
    #[arg(long)]
    no_llm: bool,

    /// Settings file (default: <config dir>/trendmap/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Detailed logging
    #[arg(long, short)]
    verbose: bool,
}

/// Parse texts from a JSON array, falling back to non-blank lines.
fn parse_texts(content: &str) -> Vec<String> {
    if let Ok(texts) = serde_json::from_str::<Vec<String>>(content) {
        return texts;
    }
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn read_texts(path: &Path) -> Result<Vec<String>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(parse_texts(&content))
}

fn run_cli(cli: Cli) -> Result<(), String> {
    let settings = Settings::resolve(cli.config.as_deref())?;

    let mut request = ClusterRequest::new(read_texts(&cli.input)?, cli.query);
    request.min_cluster_size = cli.min_cluster_size;
    request.min_samples = cli.min_samples;
    request.validate(settings.max_texts).map_err(|e| e.to_string())?;

    let embedder = LocalEmbedder::new(&settings.embedding_model).map_err(|e| e.to_string())?;
    let model: Arc<dyn GenerativeModel> = if cli.no_llm {
        Arc::new(DisabledModel)
    } else {
        ai_client::from_settings(&settings)
    };

    let pipeline = Pipeline::new(Arc::new(embedder), model, PipelineOptions::from(&settings));
    let response = ClusterResponse::from(pipeline.run(&request).map_err(|e| e.to_string())?);

    let output = if cli.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    }
    .map_err(|e| format!("Failed to serialize response: {}", e))?;

    println!("{}", output);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    trendmap_lib::init_tracing(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
