//! Knowledge 모듈 - 챗봇별 RAG 지식 저장소
//!
//! - SQLite: 소스, 패시지(임베딩 BLOB), 대화, 메시지 저장
//! - Vector: 챗봇 범위 코사인 유사도 검색
//! - Chunker: 구분자 우선순위 기반 텍스트 분할 (오버랩 포함)

mod chunker;
mod store;
mod vector;

// Re-exports
pub use chunker::{split_text, ChunkConfig};
pub use store::{
    get_data_dir, Conversation, KnowledgeStore, Message, NewConversation, NewSource, Role,
    Source, SourceKind, SourceStatus, StoreStats,
};
pub use vector::{
    cosine_similarity, decode_embedding, encode_embedding, rank_passages, InsertFailure,
    InsertReport, NewPassage, Passage, PassageMetadata, PassageStore, ScoredPassage,
};
