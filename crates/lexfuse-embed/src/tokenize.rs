use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use tokenizers::{EncodeInput, Encoding, Tokenizer, TruncationParams};

/// XLM-RoBERTa pad token id.
const PAD_ID: u32 = 1;

/// A padded batch ready for an XLM-RoBERTa forward pass.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

/// Configure truncation once at load time.
pub fn with_truncation(mut tokenizer: Tokenizer, max_len: usize) -> Result<Tokenizer> {
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    Ok(tokenizer)
}

pub fn encode_texts(tokenizer: &Tokenizer, texts: &[String], device: &Device) -> Result<EncodedBatch> {
    let inputs: Vec<EncodeInput> = texts.iter().map(|t| EncodeInput::from(t.as_str())).collect();
    encode(tokenizer, inputs, device)
}

/// Cross-encoder input: every passage paired with the same query.
pub fn encode_pairs(tokenizer: &Tokenizer, query: &str, passages: &[&str], device: &Device) -> Result<EncodedBatch> {
    let inputs: Vec<EncodeInput> = passages.iter().map(|p| EncodeInput::from((query, *p))).collect();
    encode(tokenizer, inputs, device)
}

fn encode(tokenizer: &Tokenizer, inputs: Vec<EncodeInput>, device: &Device) -> Result<EncodedBatch> {
    let encodings = tokenizer.encode_batch(inputs, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    pad_batch(&encodings, device)
}

/// Right-pad every sequence to the longest one in the batch.
fn pad_batch(encodings: &[Encoding], device: &Device) -> Result<EncodedBatch> {
    let batch = encodings.len();
    let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(batch * max_len);
    let mut mask = Vec::with_capacity(batch * max_len);
    for enc in encodings {
        let len = enc.get_ids().len();
        ids.extend_from_slice(enc.get_ids());
        mask.extend_from_slice(enc.get_attention_mask());
        ids.extend(std::iter::repeat(PAD_ID).take(max_len - len));
        mask.extend(std::iter::repeat(0).take(max_len - len));
    }
    let input_ids = Tensor::from_vec(ids, (batch, max_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (batch, max_len), device)?;
    let token_type_ids = Tensor::zeros((batch, max_len), DType::I64, device)?;
    Ok(EncodedBatch { input_ids, attention_mask, token_type_ids })
}
