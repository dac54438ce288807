//! 에러 모듈 - RAG 파이프라인 에러 분류
//!
//! 수집 경로의 에러는 소스 레코드(`failed` + 상세)에 기록되고,
//! 질의 경로의 에러는 호출자에게 실패한 턴으로 전달됩니다.

use thiserror::Error;

/// 라이브러리 전역 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 소스 로드 실패 (HTTP 실패, 읽을 수 없는 파일, 미지원 타입)
    #[error("Source load failed: {0}")]
    SourceLoad(String),

    /// 청킹 결과가 비어 있음
    #[error("No content chunks generated")]
    Split,

    /// 임베딩 서비스 실패 (연결 불가, 에러 상태, 잘못된 응답)
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// 생성 모델 서비스 실패 (전송 실패, 에러 상태, 빈 응답)
    #[error("Generation service error: {0}")]
    GenerationService(String),

    /// 일부 패시지만 저장됨
    #[error("Added {inserted}/{total} chunks")]
    StorePartialFailure { inserted: usize, total: usize },

    /// 질의 시점 검색 컨텍스트 구성 실패
    #[error("Retrieval context error: {0}")]
    RetrievalContext(String),

    /// 저장소 (SQLite) 에러
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 허용되지 않은 소스 상태 전이
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// 외부 상태 콜백 실패 (로그만 남기고 수집은 계속)
    #[error("Status callback failed: {0}")]
    StatusCallback(String),

    #[error("Ingestion queue closed")]
    QueueClosed,
}

impl RagError {
    pub fn source_load(reason: impl Into<String>) -> Self {
        Self::SourceLoad(reason.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingService(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationService(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("Metadata serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message() {
        let err = RagError::StorePartialFailure {
            inserted: 3,
            total: 5,
        };
        assert_eq!(err.to_string(), "Added 3/5 chunks");
    }
}
