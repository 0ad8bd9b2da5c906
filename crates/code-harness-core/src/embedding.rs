//! Embedding provider trait, token-aware batching, and vector utilities.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `code-harness` app crate. This module owns the batching policy shared by
//! all of them:
//!
//! - token counts are estimated as `ceil(chars / chars_per_token)`;
//! - a single text over `max_tokens_per_batch` is skipped, never sent;
//! - batches close when the next text would overflow the token budget or
//!   when they reach `max_items`;
//! - a batch rejected for exceeding the service's token limit is retried
//!   one text at a time, and only the texts that still fail are skipped.
//!
//! Every skip is reported in [`BatchEmbedding::skipped`] so callers can
//! upsert only what was embedded.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::RagError;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed many texts in one service call. The result is parallel to
    /// `texts`.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding service returned no vector"))
    }
}

/// Limits applied by [`plan_batches`] and [`embed_batch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLimits {
    pub max_tokens_per_batch: usize,
    pub max_items: usize,
    pub chars_per_token: f64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_tokens_per_batch: 15_000,
            max_items: 100,
            chars_per_token: 2.0,
        }
    }
}

impl BatchLimits {
    pub fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text, self.chars_per_token)
    }
}

/// Conservative token estimate for code and structured text.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    let chars = text.chars().count() as f64;
    if chars_per_token <= 0.0 {
        return chars as usize;
    }
    (chars / chars_per_token).ceil() as usize
}

/// A text that did not receive a vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedText {
    pub index: usize,
    pub estimated_tokens: usize,
    pub reason: String,
}

/// Result of [`embed_batch`]: one slot per input text.
#[derive(Debug, Clone, Default)]
pub struct BatchEmbedding {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub skipped: Vec<SkippedText>,
}

impl BatchEmbedding {
    pub fn embedded_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }
}

/// Index groups to send together, plus the indices too large to send at
/// all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub batches: Vec<Vec<usize>>,
    pub oversize: Vec<usize>,
}

pub fn plan_batches(texts: &[String], limits: &BatchLimits) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;
    let max_items = limits.max_items.max(1);

    for (i, text) in texts.iter().enumerate() {
        let tokens = limits.estimate_tokens(text);
        if tokens > limits.max_tokens_per_batch {
            plan.oversize.push(i);
            continue;
        }
        if !current.is_empty()
            && (current_tokens + tokens > limits.max_tokens_per_batch
                || current.len() >= max_items)
        {
            plan.batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(i);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        plan.batches.push(current);
    }
    plan
}

/// True when `err` reports that a request exceeded the service's token
/// limit.
pub fn is_token_limit_error(err: &anyhow::Error) -> bool {
    if matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::BatchTokenLimitExceeded { .. })
    ) {
        return true;
    }
    let msg = format!("{:#}", err).to_lowercase();
    msg.contains("token count")
        || msg.contains("maximum context length")
        || msg.contains("too many tokens")
        || (msg.contains("token") && msg.contains("limit"))
}

/// Embed `texts` with `provider`, honouring `limits`.
///
/// Errors other than token-limit rejections abort the whole call.
pub async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    limits: &BatchLimits,
) -> Result<BatchEmbedding> {
    let plan = plan_batches(texts, limits);
    let mut out = BatchEmbedding {
        vectors: vec![None; texts.len()],
        skipped: Vec::new(),
    };

    for &i in &plan.oversize {
        let estimated = limits.estimate_tokens(&texts[i]);
        let err = RagError::BatchTokenLimitExceeded {
            index: i,
            estimated_tokens: estimated,
            limit: limits.max_tokens_per_batch,
        };
        tracing::warn!("{}", err);
        out.skipped.push(SkippedText {
            index: i,
            estimated_tokens: estimated,
            reason: err.to_string(),
        });
    }

    for batch in &plan.batches {
        let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
        match provider.embed_texts(&batch_texts).await {
            Ok(vectors) => {
                if vectors.len() != batch.len() {
                    anyhow::bail!(
                        "embedding service returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    );
                }
                for (&i, v) in batch.iter().zip(vectors) {
                    out.vectors[i] = Some(v);
                }
            }
            Err(e) if is_token_limit_error(&e) => {
                tracing::warn!(
                    "batch of {} texts exceeded the token limit, embedding individually",
                    batch.len()
                );
                for &i in batch {
                    match provider.embed(&texts[i]).await {
                        Ok(v) => out.vectors[i] = Some(v),
                        Err(e) => {
                            let estimated = limits.estimate_tokens(&texts[i]);
                            tracing::warn!("skipping text {} ({} tokens): {:#}", i, estimated, e);
                            out.skipped.push(SkippedText {
                                index: i,
                                estimated_tokens: estimated,
                                reason: format!("{:#}", e),
                            });
                        }
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    out.skipped.sort_by_key(|s| s.index);
    Ok(out)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
