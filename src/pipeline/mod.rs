//! 파이프라인 모듈
//!
//! - ingest: 소스 수집 (로드 → 분할 → 임베딩 → 저장) + 백그라운드 워커
//! - query: 질의 응답 (임베딩 → 검색 → 컨텍스트 → 생성)
//! - status: 수집 상태 외부 통보

mod ingest;
mod query;
mod status;

pub use ingest::{IngestionJob, IngestionPipeline, IngestionQueue, IngestionWorker};
pub use query::{assemble_context, build_prompt, QueryInput, QueryPipeline, QueryResponse};
pub use status::{HttpStatusSink, LogStatusSink, StatusSink};
