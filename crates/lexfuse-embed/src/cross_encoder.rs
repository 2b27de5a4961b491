use anyhow::{ensure, Result};
use std::path::Path;
use tracing::info;

use candle_core::Device;
use candle_transformers::models::xlm_roberta::XLMRobertaForSequenceClassification;
use tokenizers::Tokenizer;

use lexfuse_core::config::DeviceHint;
use lexfuse_core::traits::PairScorer;

use crate::device::select_device;
use crate::model::{load_tokenizer, load_weights, read_config, resolve_model_dir};
use crate::tokenize::encode_pairs;

/// Cross-encoder reranker (bge-reranker family). Scores are sigmoid(logit).
pub struct CrossEncoderScorer {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

impl CrossEncoderScorer {
    pub fn load(model_root: &Path, model_id: &str, device: DeviceHint) -> Result<Self> {
        let device = select_device(device);
        let model_dir = resolve_model_dir(model_root, model_id)?;
        info!(model = model_id, dir = %model_dir.display(), "loading reranker model");
        let tokenizer = load_tokenizer(&model_dir)?;
        let config = read_config(&model_dir)?;
        let vb = load_weights(&model_dir, &device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        Ok(Self { model, tokenizer, device, model_id: model_id.to_string() })
    }
}

impl PairScorer for CrossEncoderScorer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let batch = encode_pairs(&self.tokenizer, query, passages, &self.device)?;
        let logits = self.model.forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        let scores: Vec<f32> = probs.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_device(&Device::Cpu)?.to_vec1()?;
        ensure!(scores.len() == passages.len(), "reranker returned {} scores for {} passages", scores.len(), passages.len());
        Ok(scores)
    }
}
