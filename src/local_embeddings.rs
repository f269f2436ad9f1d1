//! Local embedding generation using a sentence-transformer (all-MiniLM-L6-v2
//! by default) via candle.
//!
//! Produces attention-masked mean-pooled vectors. They are returned as-is;
//! normalization happens in preprocessing.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, HiddenAct, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::error::EmbeddingError;

const REVISION: &str = "main";
const MAX_SEQUENCE_LEN: usize = 512;
/// Texts per forward pass; bounds the padded tensor size.
pub const ENCODE_BATCH_SIZE: usize = 64;

/// Local embedding model wrapper
pub struct LocalEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

fn load_err<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> EmbeddingError {
    move |e| EmbeddingError::Load(format!("{}: {}", what, e))
}

fn tensor_err<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> EmbeddingError {
    move |e| EmbeddingError::Inference(format!("{}: {}", what, e))
}

impl LocalEmbedder {
    /// Load a model from Hugging Face Hub (downloads on first use, cached after)
    pub fn new(model_id: &str) -> Result<Self, EmbeddingError> {
        let device = select_device();

        let api = Api::new().map_err(load_err("create HF API"))?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            REVISION.to_string(),
        ));

        let config_path = repo
            .get("config.json")
            .map_err(load_err("download config"))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(load_err("download tokenizer"))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(load_err("download weights"))?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(load_err("read config"))?;
        let mut config: Config = serde_json::from_str(&config_str)
            .map_err(load_err("parse config"))?;

        // MiniLM uses gelu activation
        config.hidden_act = HiddenAct::Gelu;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(load_err("load tokenizer"))?;

        let padding = PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        };
        let truncation = TruncationParams {
            max_length: MAX_SEQUENCE_LEN,
            ..Default::default()
        };
        tokenizer.with_padding(Some(padding));
        tokenizer
            .with_truncation(Some(truncation))
            .map_err(load_err("set truncation"))?;

        // SAFETY: the weights file is owned by the HF cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(load_err("load weights"))?
        };

        let model = BertModel::load(vb, &config).map_err(load_err("build model"))?;

        info!(model = model_id, "embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Generate embeddings for a batch of texts
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenize(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut all_ids = Vec::with_capacity(batch_size * seq_len);
        let mut all_mask = Vec::with_capacity(batch_size * seq_len);
        let mut all_type_ids = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            all_ids.extend(encoding.get_ids().iter().map(|&x| x as i64));
            all_mask.extend(encoding.get_attention_mask().iter().map(|&x| x as i64));
            all_type_ids.extend(encoding.get_type_ids().iter().map(|&x| x as i64));
        }

        let input_ids = Tensor::from_vec(all_ids, (batch_size, seq_len), &self.device)
            .map_err(tensor_err("input_ids tensor"))?;
        let attention_mask = Tensor::from_vec(all_mask, (batch_size, seq_len), &self.device)
            .map_err(tensor_err("attention_mask tensor"))?;
        let token_type_ids = Tensor::from_vec(all_type_ids, (batch_size, seq_len), &self.device)
            .map_err(tensor_err("token_type_ids tensor"))?;

        let hidden_states = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(tensor_err("forward"))?;

        // Mean pooling with attention mask
        let mask_expanded = attention_mask
            .unsqueeze(2)
            .map_err(tensor_err("unsqueeze"))?
            .to_dtype(DTYPE)
            .map_err(tensor_err("dtype"))?
            .broadcast_as(hidden_states.shape())
            .map_err(tensor_err("broadcast"))?;

        let summed = hidden_states
            .mul(&mask_expanded)
            .map_err(tensor_err("mask"))?
            .sum(1)
            .map_err(tensor_err("sum"))?;

        let mask_sum = mask_expanded
            .sum(1)
            .map_err(tensor_err("mask sum"))?
            .clamp(1e-9, f64::MAX)
            .map_err(tensor_err("clamp"))?;

        let pooled = summed.div(&mask_sum).map_err(tensor_err("divide"))?;

        let vectors: Vec<Vec<f32>> = pooled.to_vec2::<f32>().map_err(tensor_err("to_vec2"))?;
        debug!(batch = batch_size, seq_len, "encoded batch");
        Ok(vectors)
    }
}

impl Embedder for LocalEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        encode_in_chunks(texts, ENCODE_BATCH_SIZE, |chunk| self.embed_batch(chunk))
    }
}

/// Run `embed` over fixed-size chunks and concatenate the vectors in order.
fn encode_in_chunks<F>(texts: &[String], chunk_size: usize, mut embed: F) -> Result<Vec<Vec<f32>>, EmbeddingError>
where
    F: FnMut(&[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>,
{
    let refs: Vec<&str> = texts.iter().map(|t| t.as_str()).collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in refs.chunks(chunk_size.max(1)) {
        vectors.extend(embed(chunk)?);
    }
    Ok(vectors)
}

/// Try CUDA if the feature is enabled, otherwise CPU only
fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(dev) => {
                    info!("embedding on CUDA device");
                    return dev;
                }
                Err(e) => tracing::warn!(error = %e, "CUDA device creation failed, falling back to CPU"),
            }
        } else {
            tracing::warn!("CUDA not available, using CPU");
        }
    }

    debug!("embedding on CPU");
    Device::Cpu
}
