//! chatbot-rag - 챗봇 지식베이스 RAG 파이프라인
//!
//! 챗봇별 소스(웹사이트, 문서, 텍스트)를 패시지로 나누어 임베딩과 함께
//! SQLite 에 저장하고, 질문이 오면 코사인 유사도로 관련 패시지를 찾아
//! Gemini 로 답변을 생성합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod generation;
pub mod knowledge;
pub mod loader;
pub mod pipeline;
pub mod scraper;
pub mod service;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::RagConfig;
pub use embedding::{CachedEmbedding, EmbeddingProvider, GeminiEmbedding};
pub use error::{RagError, Result};
pub use gemini::{get_api_key, has_api_key};
pub use generation::{GeminiGeneration, GenerationProvider};
pub use knowledge::{
    get_data_dir, split_text, ChunkConfig, KnowledgeStore, Passage, PassageStore, ScoredPassage,
    Source, SourceKind, SourceStatus, StoreStats,
};
pub use loader::{DefaultSourceLoader, SourceLoader};
pub use pipeline::{IngestionPipeline, QueryPipeline, QueryResponse, StatusSink};
pub use scraper::{ScrapedContent, WebScraper};
pub use service::{QueryRequest, RagService, RegisterSourceRequest, SourceStatusView};
