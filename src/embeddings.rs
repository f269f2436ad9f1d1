//! Embedding collaborator boundary.

use crate::error::EmbeddingError;

/// Turns texts into fixed-dimension vectors, one per text, in order.
///
/// Implementations are shared across requests and must be safe for
/// concurrent read-only use.
pub trait Embedder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Encode and insist on exactly one vector per text, all of the same dimension.
pub fn encode_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let vectors = embedder.encode(texts)?;

    if vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            found: vectors.len(),
        });
    }

    if let Some(first) = vectors.first() {
        let dim = first.len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim || v.is_empty()) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
    }

    Ok(vectors)
}
