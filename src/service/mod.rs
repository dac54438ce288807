//! 서비스 모듈 - RAG 코어의 외부 인터페이스
//!
//! 클라이언트와 저장소는 생성 시점에 주입되며, 소스 등록은 수집 대기열에
//! 작업을 넣고 바로 반환합니다. 상태는 `get_source_status` 로 조회합니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::RagConfig;
use crate::embedding::{CachedEmbedding, EmbeddingProvider, GeminiEmbedding};
use crate::error::{RagError, Result};
use crate::gemini::shared_rate_limiter;
use crate::generation::{GeminiGeneration, GenerationProvider};
use crate::knowledge::{KnowledgeStore, Message, NewSource, Source, SourceKind, SourceStatus};
use crate::loader::{DefaultSourceLoader, SourceLoader};
use crate::pipeline::{
    HttpStatusSink, IngestionPipeline, IngestionQueue, IngestionWorker, LogStatusSink,
    QueryInput, QueryPipeline, QueryResponse, StatusSink,
};

// ============================================================================
// Request / Response Types
// ============================================================================

/// 소스 등록 요청
#[derive(Debug, Clone)]
pub struct RegisterSourceRequest {
    pub chatbot_id: String,
    pub kind: SourceKind,
    /// URL, 파일 경로 또는 인라인 텍스트
    pub locator: String,
}

impl RegisterSourceRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("chatbot_id", &self.chatbot_id)?;
        if self.locator.trim().is_empty() {
            return Err(RagError::InvalidRequest("locator must not be empty".into()));
        }
        Ok(())
    }
}

/// 질의 요청
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub chatbot_id: String,
    pub message: String,
    pub conversation_id: Option<String>,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl QueryRequest {
    pub fn validate(&self) -> Result<()> {
        require_id("chatbot_id", &self.chatbot_id)?;
        if self.message.trim().is_empty() {
            return Err(RagError::InvalidRequest("message must not be empty".into()));
        }
        if let Some(id) = &self.conversation_id {
            require_id("conversation_id", id)?;
        }
        Ok(())
    }
}

impl From<QueryRequest> for QueryInput {
    fn from(req: QueryRequest) -> Self {
        QueryInput {
            chatbot_id: req.chatbot_id,
            message: req.message,
            conversation_id: req.conversation_id,
            user_ip: req.user_ip,
            user_agent: req.user_agent,
        }
    }
}

/// 소스 상태 조회 결과
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatusView {
    pub source_id: String,
    pub chatbot_id: String,
    pub kind: SourceKind,
    pub locator: String,
    pub status: SourceStatus,
    pub detail: Option<String>,
    pub passage_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl SourceStatusView {
    /// 소스 레코드와 패시지 수로 상태 구성
    pub fn load(store: &KnowledgeStore, source_id: &str) -> Result<Self> {
        let source = store
            .get_source(source_id)?
            .ok_or_else(|| RagError::NotFound(format!("source {}", source_id)))?;
        let passage_count = store.count_passages(source_id)?;

        Ok(Self {
            source_id: source.id,
            chatbot_id: source.chatbot_id,
            kind: source.kind,
            locator: source.locator,
            status: source.status,
            detail: source.detail,
            passage_count,
            updated_at: source.updated_at,
        })
    }
}

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RagError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============================================================================
// RagService
// ============================================================================

/// RAG 서비스
pub struct RagService {
    store: Arc<KnowledgeStore>,
    queue: IngestionQueue,
    query: QueryPipeline,
}

impl RagService {
    pub fn new(store: Arc<KnowledgeStore>, queue: IngestionQueue, query: QueryPipeline) -> Self {
        Self {
            store,
            queue,
            query,
        }
    }

    /// 주입된 협력자로 파이프라인을 구성하고 수집 워커를 시작
    ///
    /// 서비스를 drop 하면 워커는 남은 작업을 마치고 종료합니다.
    pub fn start(
        config: &RagConfig,
        store: Arc<KnowledgeStore>,
        loader: Arc<dyn SourceLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        sink: Arc<dyn StatusSink>,
    ) -> (Self, JoinHandle<()>) {
        let ingestion = Arc::new(IngestionPipeline::new(
            store.clone(),
            loader,
            embedder.clone(),
            sink,
            config.chunking.clone(),
        ));
        let (queue, worker) = IngestionWorker::spawn(ingestion, &config.ingestion);

        let query = QueryPipeline::new(
            store.clone(),
            embedder,
            generator,
            config.retrieval.clone(),
        );

        (Self::new(store, queue, query), worker)
    }

    /// 설정으로 Gemini 클라이언트, SQLite 저장소, 상태 싱크를 만들어 시작
    pub fn from_config(config: &RagConfig) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;

        let store = Arc::new(KnowledgeStore::open(&config.db_path())?);
        let loader = Arc::new(DefaultSourceLoader::new(Duration::from_secs(
            config.ingestion.loader_timeout_secs,
        ))?);
        // 두 클라이언트가 같은 API 키의 분당 한도를 나눠 씀
        let limiter = shared_rate_limiter();
        let embedder = Arc::new(CachedEmbedding::with_capacity(
            GeminiEmbedding::from_env(&config.embedding)?.with_rate_limiter(limiter.clone()),
            config.embedding.cache_capacity,
        ));
        let generator = Arc::new(
            GeminiGeneration::from_env(&config.generation)?.with_rate_limiter(limiter),
        );

        let sink: Arc<dyn StatusSink> = match &config.status_callback {
            Some(callback) => Arc::new(HttpStatusSink::new(
                callback,
                Duration::from_secs(config.ingestion.loader_timeout_secs),
            )?),
            None => Arc::new(LogStatusSink),
        };

        Ok(Self::start(config, store, loader, embedder, generator, sink))
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// 소스 등록 후 수집 예약 (소스 ID 반환)
    pub async fn register_source(&self, request: RegisterSourceRequest) -> Result<String> {
        request.validate()?;

        let source = self.store.create_source(NewSource {
            chatbot_id: request.chatbot_id.trim().to_string(),
            kind: request.kind,
            locator: request.locator,
        })?;
        self.schedule(&source.id).await?;
        Ok(source.id)
    }

    /// 종료된 소스의 재수집 예약
    pub async fn reingest_source(&self, source_id: &str) -> Result<()> {
        let source = self.store.reset_source_for_reingest(source_id)?;
        self.schedule(&source.id).await
    }

    /// 대기열에 넣지 못한 소스는 `pending` 으로 남기지 않고 `failed` 로 기록
    async fn schedule(&self, source_id: &str) -> Result<()> {
        if let Err(err) = self.queue.enqueue(source_id).await {
            if let Err(mark_err) = self.store.fail_unscheduled(source_id, &err.to_string()) {
                tracing::error!("Failed to mark source {} as failed: {}", source_id, mark_err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// 소스와 패시지 삭제
    pub fn delete_source(&self, source_id: &str) -> Result<()> {
        self.store.delete_source(source_id)?;
        Ok(())
    }

    /// 소스 상태 조회
    pub fn get_source_status(&self, source_id: &str) -> Result<SourceStatusView> {
        SourceStatusView::load(&self.store, source_id)
    }

    pub fn list_sources(&self, chatbot_id: &str) -> Result<Vec<Source>> {
        require_id("chatbot_id", chatbot_id)?;
        self.store.list_sources(chatbot_id)
    }

    /// 질의 한 턴
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        request.validate()?;
        self.query.run(request.into()).await
    }

    /// 대화 기록 (챗봇 소유 확인)
    pub fn conversation_history(
        &self,
        chatbot_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        let conversation = self.store.chatbot_conversation(chatbot_id, conversation_id)?;
        self.store.list_messages(&conversation.id)
    }

    /// 소스가 `completed`/`failed` 가 될 때까지 폴링
    ///
    /// 제한 시간이 지나면 그 시점의 상태를 그대로 반환합니다.
    pub async fn wait_for_terminal(
        &self,
        source_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<SourceStatusView> {
        let poll = async {
            loop {
                let view = self.get_source_status(source_id)?;
                if view.status.is_terminal() {
                    return Ok::<_, RagError>(view);
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Timed out waiting for source {}", source_id);
                self.get_source_status(source_id)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
