//! 설정 모듈
//!
//! 기본값 위에 `CHATBOT_RAG_*` 환경변수를 덮어써서 설정을 구성합니다.
//!
//! | 환경변수 | 필드 |
//! |---|---|
//! | `CHATBOT_RAG_DATA_DIR` | `data_dir` |
//! | `CHATBOT_RAG_CHUNK_SIZE` | `chunking.chunk_size` |
//! | `CHATBOT_RAG_CHUNK_OVERLAP` | `chunking.chunk_overlap` |
//! | `CHATBOT_RAG_RETRIEVAL_LIMIT` | `retrieval.limit` |
//! | `CHATBOT_RAG_MAX_CONTEXT_CHARS` | `retrieval.max_context_chars` |
//! | `CHATBOT_RAG_HISTORY_MESSAGES` | `retrieval.history_messages` |
//! | `CHATBOT_RAG_EMBEDDING_DIMENSION` | `embedding.dimension` |
//! | `CHATBOT_RAG_EMBEDDING_CACHE` | `embedding.cache_capacity` |
//! | `CHATBOT_RAG_GENERATION_MODEL` | `generation.model` |
//! | `CHATBOT_RAG_TIMEOUT_SECS` | 임베딩/생성/로더 타임아웃 |
//! | `CHATBOT_RAG_INGEST_CONCURRENCY` | `ingestion.max_concurrent` |
//! | `CHATBOT_RAG_STATUS_URL` / `CHATBOT_RAG_STATUS_SECRET` | `status_callback` |

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{RagError, Result};
use crate::knowledge::{get_data_dir, ChunkConfig};

/// 지원하는 임베딩 차원 (gemini-embedding-001 MRL)
pub const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// 외부 호출 기본 타임아웃 (초)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// 임베딩 캐시 기본 항목 수
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

// ============================================================================
// Config Types
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// SQLite 파일이 위치하는 디렉토리
    pub data_dir: PathBuf,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub ingestion: IngestionConfig,
    /// 상태 콜백 (없으면 로그만 남김)
    pub status_callback: Option<StatusCallbackConfig>,
}

/// 질의 시점 검색 설정
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// 검색할 패시지 수
    pub limit: usize,
    /// 컨텍스트 최대 문자 수
    pub max_context_chars: usize,
    /// 프롬프트에 포함할 이전 메시지 수 (0이면 생략)
    pub history_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 4,
            max_context_chars: 4000,
            history_messages: 10,
        }
    }
}

/// 임베딩 클라이언트 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    /// 캐시에 보관할 최대 벡터 수 (0이면 캐시하지 않음)
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            dimension: 768,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// 생성 클라이언트 설정
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.5,
            max_output_tokens: 2048,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// 백그라운드 수집 워커 설정
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// 동시에 처리할 소스 수
    pub max_concurrent: usize,
    /// 대기열 용량
    pub queue_capacity: usize,
    /// 소스 로더 타임아웃 (초)
    pub loader_timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 64,
            loader_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// 외부 상태 콜백 엔드포인트
#[derive(Debug, Clone)]
pub struct StatusCallbackConfig {
    /// 기본 URL (`{url}/{source_id}/status` 로 PATCH)
    pub url: String,
    pub secret: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            ingestion: IngestionConfig::default(),
            status_callback: None,
        }
    }
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl RagConfig {
    /// 환경변수를 반영한 설정 로드
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_string("CHATBOT_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("CHATBOT_RAG_CHUNK_SIZE")? {
            config.chunking.chunk_size = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_CHUNK_OVERLAP")? {
            config.chunking.chunk_overlap = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_RETRIEVAL_LIMIT")? {
            config.retrieval.limit = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_MAX_CONTEXT_CHARS")? {
            config.retrieval.max_context_chars = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_HISTORY_MESSAGES")? {
            config.retrieval.history_messages = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_EMBEDDING_DIMENSION")? {
            config.embedding.dimension = v;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_EMBEDDING_CACHE")? {
            config.embedding.cache_capacity = v;
        }
        if let Some(model) = env_string("CHATBOT_RAG_GENERATION_MODEL") {
            config.generation.model = model;
        }
        if let Some(secs) = env_parse::<u64>("CHATBOT_RAG_TIMEOUT_SECS")? {
            config.embedding.timeout_secs = secs;
            config.generation.timeout_secs = secs;
            config.ingestion.loader_timeout_secs = secs;
        }
        if let Some(v) = env_parse("CHATBOT_RAG_INGEST_CONCURRENCY")? {
            config.ingestion.max_concurrent = v;
        }
        if let Some(url) = env_string("CHATBOT_RAG_STATUS_URL") {
            config.status_callback = Some(StatusCallbackConfig {
                url,
                secret: env_string("CHATBOT_RAG_STATUS_SECRET"),
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.limit == 0 {
            return Err(RagError::Config("retrieval limit must be >= 1".into()));
        }
        if self.retrieval.max_context_chars == 0 {
            return Err(RagError::Config("max_context_chars must be > 0".into()));
        }
        if !SUPPORTED_DIMENSIONS.contains(&self.embedding.dimension) {
            return Err(RagError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                self.embedding.dimension
            )));
        }
        if self.ingestion.max_concurrent == 0 || self.ingestion.queue_capacity == 0 {
            return Err(RagError::Config(
                "ingestion concurrency and queue capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// SQLite 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chatbot-rag.db")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| RagError::Config(format!("{} has invalid value: {}", key, raw))),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.limit, 4);
        assert_eq!(config.retrieval.max_context_chars, 4000);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        let mut config = RagConfig::default();
        config.embedding.dimension = 999;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = RagConfig::default();
        config.retrieval.limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_missing_key() {
        let value: Option<usize> = env_parse("CHATBOT_RAG_TEST_UNSET_KEY").unwrap();
        assert!(value.is_none());
    }
}
