//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 질의는 `embedContent` (RETRIEVAL_QUERY), 수집 배치는 `batchEmbedContents`
//! (RETRIEVAL_DOCUMENT) 로 처리합니다. 실패 시 0-벡터로 대체하지 않고
//! 항상 `EmbeddingService` 에러를 반환합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env(&EmbeddingConfig::default())?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::{EmbeddingConfig, DEFAULT_CACHE_CAPACITY, SUPPORTED_DIMENSIONS};
use crate::error::{RagError, Result};
use crate::gemini::{get_api_key, GeminiClient, SharedRateLimiter};

/// `batchEmbedContents` 한 번에 보낼 수 있는 최대 요청 수
const MAX_BATCH_SIZE: usize = 100;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (입력 순서 보존, 1:1)
    ///
    /// 기본 구현: 순차 호출
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Google Gemini 임베딩 구현체
///
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug)]
pub struct GeminiEmbedding {
    client: GeminiClient,
    model: String,
    dimension: usize,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `config` - 모델, 차원 (768, 1536, 3072 중 선택), 타임아웃
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&config.dimension) {
            return Err(RagError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                config.dimension
            )));
        }

        let client = GeminiClient::new(
            api_key,
            Duration::from_secs(config.timeout_secs),
            RagError::EmbeddingService,
        )?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        let embedder = Self::new(api_key, config)?;
        tracing::info!(
            "Using Gemini API embedding {} (dimension: {})",
            embedder.model,
            embedder.dimension
        );
        Ok(embedder)
    }

    /// 생성 클라이언트와 Rate Limiter 공유
    pub fn with_rate_limiter(mut self, limiter: SharedRateLimiter) -> Self {
        self.client.set_rate_limiter(limiter);
        self
    }

    fn request(&self, text: &str, task_type: &'static str) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
            output_dimensionality: Some(self.dimension),
        }
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::embedding("Cannot embed empty text"));
        }

        let url = GeminiClient::model_url(&self.model, "embedContent");
        let request = self.request(text, "RETRIEVAL_QUERY");
        let response: EmbedResponse = self.client.post_json(&url, &request).await?;

        check_vector(response.embedding.values, self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::embedding("Cannot embed empty text"));
        }

        let url = GeminiClient::model_url(&self.model, "batchEmbedContents");
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {} ({} texts, {}/{} done)",
                i + 1,
                batch.len(),
                results.len(),
                texts.len()
            );

            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|t| self.request(t, "RETRIEVAL_DOCUMENT"))
                    .collect(),
            };
            let response: BatchEmbedResponse = self.client.post_json(&url, &request).await?;
            results.extend(check_batch(response, batch.len(), self.dimension)?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 단일 벡터 검증 (비어 있거나 차원이 다르면 잘못된 응답)
fn check_vector(values: Vec<f32>, dimension: usize) -> Result<Vec<f32>> {
    if values.is_empty() {
        return Err(RagError::embedding("Malformed response payload: empty vector"));
    }
    if values.len() != dimension {
        return Err(RagError::embedding(format!(
            "Malformed response payload: expected dimension {}, got {}",
            dimension,
            values.len()
        )));
    }
    Ok(values)
}

/// 배치 응답 검증 (입력과 1:1)
fn check_batch(
    response: BatchEmbedResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.embeddings.len() != expected {
        return Err(RagError::embedding(format!(
            "Malformed response payload: expected {} embeddings, got {}",
            expected,
            response.embeddings.len()
        )));
    }

    response
        .embeddings
        .into_iter()
        .map(|e| check_vector(e.values, dimension))
        .collect()
}

// ============================================================================
// Content-Hash Cache
// ============================================================================

/// 임베딩 용도 (질의/문서 벡터는 task type 이 달라 서로 바꿔 쓸 수 없음)
#[derive(Debug, Clone, Copy)]
enum Purpose {
    Query,
    Document,
}

impl Purpose {
    fn tag(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

/// 삽입 순서로 오래된 항목부터 내보내는 캐시 저장소
#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl CacheState {
    fn insert(&mut self, key: String, embedding: Vec<f32>, capacity: usize) {
        if capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = embedding;
            return;
        }
        while self.entries.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, embedding);
    }
}

/// SHA-256 콘텐츠 해시 기반 임베딩 캐시
///
/// 키는 용도와 텍스트 해시의 조합이라 `embed` 와 `embed_batch` 결과가 섞이지 않습니다.
/// 최대 `capacity` 개를 보관하며 가득 차면 가장 먼저 들어온 항목을 버립니다.
pub struct CachedEmbedding<P> {
    inner: P,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl<P: EmbeddingProvider> CachedEmbedding<P> {
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// 캐시된 항목 수
    pub async fn cached_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    fn key(purpose: Purpose, text: &str) -> String {
        format!("{}:{:x}", purpose.tag(), Sha256::digest(text.as_bytes()))
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedding<P> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::key(Purpose::Query, text);
        if let Some(hit) = self.state.lock().await.entries.get(&key) {
            return Ok(hit.clone());
        }

        let embedding = self.inner.embed(text).await?;
        self.state
            .lock()
            .await
            .insert(key, embedding.clone(), self.capacity);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts
            .iter()
            .map(|t| Self::key(Purpose::Document, t))
            .collect();

        let mut results: Vec<Option<Vec<f32>>> = {
            let state = self.state.lock().await;
            keys.iter().map(|k| state.entries.get(k).cloned()).collect()
        };

        let mut misses: Vec<String> = Vec::new();
        let mut miss_keys: Vec<&String> = Vec::new();
        let mut seen = HashSet::new();
        for ((text, key), hit) in texts.iter().zip(&keys).zip(&results) {
            if hit.is_none() && seen.insert(key.as_str()) {
                misses.push(text.clone());
                miss_keys.push(key);
            }
        }

        if !misses.is_empty() {
            tracing::debug!("Embedding cache: {}/{} misses", misses.len(), texts.len());
            let fresh = self.inner.embed_batch(&misses).await?;
            if fresh.len() != misses.len() {
                return Err(RagError::embedding(format!(
                    "Malformed response payload: expected {} embeddings, got {}",
                    misses.len(),
                    fresh.len()
                )));
            }

            // 캐시 용량과 관계없이 이번 배치 결과는 그대로 돌려줌
            let lookup: HashMap<&str, &Vec<f32>> = miss_keys
                .iter()
                .map(|k| k.as_str())
                .zip(fresh.iter())
                .collect();
            for (slot, key) in results.iter_mut().zip(&keys) {
                if slot.is_none() {
                    *slot = lookup.get(key.as_str()).map(|v| (*v).clone());
                }
            }

            let mut state = self.state.lock().await;
            for (key, embedding) in miss_keys.into_iter().zip(fresh) {
                state.insert(key.clone(), embedding, self.capacity);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| RagError::embedding("Embedding missing from batch result")))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Tests
// ============================================================================
