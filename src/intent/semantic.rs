//! Semantic-similarity classifier.
//!
//! Each task is embedded once as `"{description} {primary keywords}"`, lazily
//! on first use, and cached for the process lifetime. The utterance is
//! embedded per query and compared by cosine similarity against every task.
//! The best task wins only when its similarity exceeds the confidence floor.
//!
//! Both the embedder and the task index are created at most once behind
//! `tokio::sync::OnceCell`. A failed initialization is not cached, so the next
//! turn retries it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::classifier::{Classification, IntentClassifier, TaskConfidence};
use super::errors::EmbeddingError;
use super::text::normalize;
use crate::tasks::TaskKind;

/// Similarity a task must exceed to be selected.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.7;

// ─── Embedders ──────────────────────────────────────────────────────────────

/// Turns texts into vectors. Output order matches input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Deserialize)]
struct RawEmbeddingItem {
    index: usize,
    embedding: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<RawEmbeddingItem>,
}

/// Client for an OpenAI-style `/embeddings` endpoint.
pub struct HttpEmbedder {
    http: HttpClient,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "input": texts }))
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed {
                reason: format!("embedding request to {url}: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(EmbeddingError::HttpError { status, body });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::RequestFailed {
                    reason: format!("failed to parse embedding response: {e}"),
                })?;
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::EmptyResponse { count: texts.len() });
        }

        let mut items = result.data;
        items.sort_by_key(|item| item.index);
        items
            .into_iter()
            .map(|item| mean_pool_embedding(&item.embedding))
            .collect()
    }
}

/// Offline embedder: signed feature hashing of whitespace tokens, weighted
/// by token length.
///
/// Deterministic and dependency-free; used when no embedding endpoint is
/// configured and in tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0_f32; self.dims];
        for token in normalize(text).split_whitespace() {
            let hash = stable_hash(token.as_bytes());
            let idx = (hash as usize) % self.dims;
            let sign = if hash & 1 == 0 { 1.0_f32 } else { -1.0_f32 };
            let mag = 1.0_f32 + (token.len() as f32 / 32.0_f32);
            out[idx] += sign * mag;
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3_u64);
    }
    hash
}

// ─── Vector helpers ─────────────────────────────────────────────────────────

/// Mean-pool per-token embeddings (`number[][]`) into one vector; a pooled
/// `number[]` passes through.
fn mean_pool_embedding(embedding: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let serde_json::Value::Array(arr) = embedding else {
        return Err(EmbeddingError::RequestFailed {
            reason: "unexpected embedding format (expected number[] or number[][])".to_string(),
        });
    };
    match arr.first() {
        None => Ok(Vec::new()),
        Some(first) if first.is_number() => {
            Ok(arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
        }
        Some(first) if first.is_array() => {
            let tokens: Vec<Vec<f32>> = arr
                .iter()
                .filter_map(|row| {
                    row.as_array()
                        .map(|r| r.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                })
                .collect();
            let n_dim = tokens.first().map_or(0, Vec::len);
            let mut pooled = vec![0.0_f32; n_dim];
            for token in &tokens {
                for (d, val) in token.iter().take(n_dim).enumerate() {
                    pooled[d] += val;
                }
            }
            let n = tokens.len().max(1) as f32;
            pooled.iter_mut().for_each(|v| *v /= n);
            Ok(pooled)
        }
        Some(_) => Err(EmbeddingError::RequestFailed {
            reason: "unexpected embedding format (expected number[] or number[][])".to_string(),
        }),
    }
}

fn l2_normalize(vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.into_iter().map(|v| v / norm).collect()
    } else {
        vec
    }
}

/// Cosine similarity of two L2-normalized vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ─── Task index ─────────────────────────────────────────────────────────────

/// Normalized task embeddings in registration order.
#[derive(Debug, Clone)]
pub struct TaskIndex {
    embeddings: Vec<(TaskKind, Vec<f32>)>,
}

impl TaskIndex {
    pub async fn build(embedder: &dyn Embedder) -> Result<Self, EmbeddingError> {
        let texts: Vec<String> = TaskKind::ALL
            .iter()
            .map(|k| {
                let d = k.descriptor();
                format!("{} {}", d.description, d.primary_keywords.join(" "))
            })
            .collect();
        let raw = embedder.embed(&texts).await?;
        if raw.len() != texts.len() {
            return Err(EmbeddingError::EmptyResponse { count: texts.len() });
        }
        let embeddings: Vec<(TaskKind, Vec<f32>)> = TaskKind::ALL
            .into_iter()
            .zip(raw.into_iter().map(l2_normalize))
            .collect();
        if let Some(expected) = embeddings.first().map(|(_, e)| e.len()) {
            if let Some((_, bad)) = embeddings.iter().find(|(_, e)| e.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }
        tracing::info!(tasks = embeddings.len(), "task embedding index built");
        Ok(Self { embeddings })
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Width of the indexed vectors; zero for an empty index.
    pub fn dims(&self) -> usize {
        self.embeddings.first().map_or(0, |(_, e)| e.len())
    }

    fn similarities(&self, query: &[f32]) -> Result<Vec<(TaskKind, f32)>, EmbeddingError> {
        let expected = self.dims();
        if query.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
        Ok(self
            .embeddings
            .iter()
            .map(|(kind, emb)| (*kind, cosine_similarity(query, emb)))
            .collect())
    }
}

// ─── Classifier ─────────────────────────────────────────────────────────────

type EmbedderFactory =
    Box<dyn Fn() -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync + 'static>;

/// Embedding-similarity classifier with lazily created, shared state.
pub struct SemanticClassifier {
    factory: EmbedderFactory,
    embedder: OnceCell<Arc<dyn Embedder>>,
    index: OnceCell<TaskIndex>,
    floor: f32,
}

impl SemanticClassifier {
    /// `factory` runs at most once successfully, on first use.
    pub fn new<F>(factory: F, floor: f32) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            embedder: OnceCell::new(),
            index: OnceCell::new(),
            floor,
        }
    }

    /// Wrap an already-built embedder.
    pub fn with_embedder(embedder: Arc<dyn Embedder>, floor: f32) -> Self {
        Self::new(move || Ok(Arc::clone(&embedder)), floor)
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    async fn embedder(&self) -> Result<&Arc<dyn Embedder>, EmbeddingError> {
        self.embedder
            .get_or_try_init(|| async {
                tracing::info!("initializing embedder");
                (self.factory)()
            })
            .await
    }

    async fn index(&self) -> Result<&TaskIndex, EmbeddingError> {
        let embedder = self.embedder().await?;
        self.index
            .get_or_try_init(|| TaskIndex::build(embedder.as_ref()))
            .await
    }

    /// Cosine similarity of the utterance against every task, in
    /// registration order.
    pub async fn similarities(&self, utterance: &str) -> Result<Vec<(TaskKind, f32)>, EmbeddingError> {
        let index = self.index().await?;
        let embedder = self.embedder().await?;
        let query = embedder
            .embed(&[utterance.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResponse { count: 1 })?;
        index.similarities(&l2_normalize(query))
    }
}

#[async_trait]
impl IntentClassifier for SemanticClassifier {
    async fn classify(&self, utterance: &str) -> Option<Classification> {
        let sims = match self.similarities(utterance).await {
            Ok(sims) => sims,
            Err(e) => {
                tracing::warn!(error = %e, "semantic classification unavailable");
                return None;
            }
        };
        let mut best: Option<(TaskKind, f32)> = None;
        for (kind, sim) in sims {
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((kind, sim));
            }
        }
        let (task, similarity) = best?;
        tracing::debug!(task = %task, similarity, floor = self.floor, "semantic classification");
        (similarity > self.floor).then_some(Classification {
            task,
            confidence: similarity,
        })
    }

    async fn task_confidence(&self, utterance: &str) -> Vec<TaskConfidence> {
        match self.similarities(utterance).await {
            Ok(sims) => sims
                .into_iter()
                .map(|(task, sim)| TaskConfidence {
                    task,
                    score: sim,
                    confidence: sim.clamp(0.0, 1.0),
                    excluded: false,
                    details: vec![format!("cosine similarity {sim:.3}")],
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "semantic diagnostics unavailable");
                Vec::new()
            }
        }
    }
}
