//! Error types for the clustering pipeline and its collaborators.

use thiserror::Error;

/// Errors that fail a whole request.
///
/// LLM failures are deliberately absent: they are absorbed by the pipeline
/// and reported through the idea-analysis fields instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector preprocessing failed: {0}")]
    Preprocess(String),

    #[error("clustering failed: {0}")]
    Clustering(#[from] ClusterError),
}

impl PipelineError {
    /// True when the caller sent a bad request (4xx), false for server faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}

/// Failures raised by an [`crate::embeddings::Embedder`].
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedder returned {found} vectors for {expected} texts")]
    CountMismatch { expected: usize, found: usize },

    #[error("embedder returned inconsistent dimensions: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Errors returned by the density clusterer.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("empty input")]
    EmptyInput,

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: &'static str,
    },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("point {index} contains a non-finite value")]
    NonFinite { index: usize },
}

/// Failures talking to the external generative model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{0} not set")]
    MissingApiKey(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode model response: {0}")]
    Decode(String),

    #[error("generative model is disabled")]
    Disabled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
