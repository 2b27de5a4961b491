use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use lexfuse_core::config::DeviceHint;
use lexfuse_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean;
use crate::tokenize::{encode_texts, with_truncation};

const MAX_TOKENS: usize = 512;

/// BGE-M3 style bi-encoder: XLM-RoBERTa with masked mean pooling.
pub struct BgeEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
    normalize: bool,
}

impl BgeEmbedder {
    pub fn load(model_root: &Path, model_id: &str, device: DeviceHint, normalize: bool) -> Result<Self> {
        let device = select_device(device);
        let model_dir = resolve_model_dir(model_root, model_id)?;
        info!(model = model_id, dir = %model_dir.display(), "loading embedding model");
        let tokenizer = load_tokenizer(&model_dir)?;
        let config: XLMRobertaConfig = read_config(&model_dir)?;
        let vb = load_weights(&model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(model = model_id, dim = config.hidden_size, "embedding model loaded");
        Ok(Self { model, tokenizer, device, model_id: model_id.to_string(), dim: config.hidden_size, normalize })
    }
}

impl Embedder for BgeEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let batch = encode_texts(&self.tokenizer, texts, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids, None, None, None)?;
        let pooled = masked_mean(&hidden, &batch.attention_mask, self.normalize)?;
        let rows: Vec<Vec<f32>> = pooled.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec2()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(rows)
    }
}

/// Look for `<root>/<model_id>` first, then `<root>/<last path segment of model_id>`.
pub(crate) fn resolve_model_dir(model_root: &Path, model_id: &str) -> Result<PathBuf> {
    let mut candidates = vec![model_root.join(model_id)];
    if let Some(name) = model_id.rsplit('/').next() {
        candidates.push(model_root.join(name));
    }
    candidates
        .into_iter()
        .find(|p| p.join("config.json").exists())
        .ok_or_else(|| anyhow!("Could not locate model directory for {} under {}", model_id, model_root.display()))
}

pub(crate) fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
    with_truncation(tokenizer, MAX_TOKENS)
}

pub(crate) fn read_config(model_dir: &Path) -> Result<XLMRobertaConfig> {
    let config_path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Prefer `model.safetensors`, fall back to `pytorch_model.bin`.
pub(crate) fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    let weights: HashMap<String, Tensor> = if safetensors.exists() {
        candle_core::safetensors::load(&safetensors, &Device::Cpu)?
    } else {
        let pickle = model_dir.join("pytorch_model.bin");
        candle_core::pickle::read_all(&pickle)
            .with_context(|| format!("reading weights from {}", pickle.display()))?
            .into_iter()
            .collect()
    };
    Ok(VarBuilder::from_tensors(weights, DType::F32, device))
}
