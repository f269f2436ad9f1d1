//! Trendmap: groups short texts into thematic clusters, labels them, flags
//! content gaps, and asks a generative model for one new idea per cluster.

pub mod ai_client;
pub mod cleaner;
pub mod embeddings;
pub mod error;
pub mod gaps;
pub mod grouping;
pub mod hdbscan;
pub mod keywords;
pub mod local_embeddings;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod preprocess;
pub mod settings;
pub mod similarity;
pub mod summary;
pub mod types;

pub use error::{ClusterError, EmbeddingError, ModelError, PipelineError};
pub use pipeline::{Pipeline, PipelineOptions};
pub use types::{ClusterRequest, ClusterResponse, PipelineResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber; `RUST_LOG` overrides `default_level`.
///
/// Logs go to stderr so stdout stays clean for JSON output.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second call (tests, embedding in another binary) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
