//! 수집 파이프라인
//!
//! 소스 하나를 `pending -> processing -> completed | failed` 로 진행시킵니다.
//!
//! 1. 이전 패시지 삭제 (재수집 시 중복 방지)
//! 2. 로드 → 3. 분할 → 4. 배치 임베딩 → 5. 패시지 저장
//!
//! 어느 단계든 실패하면 소스는 `failed` 가 되고 에러 메시지가 상세로 남습니다.
//! 일부 패시지만 저장된 경우 저장된 패시지는 그대로 두고 `"Added X/Y chunks"` 로 실패 처리합니다.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::IngestionConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{
    ChunkConfig, KnowledgeStore, NewPassage, PassageMetadata, PassageStore, Source, SourceKind,
    SourceStatus,
};
use crate::loader::SourceLoader;

use super::status::{notify, StatusSink};

/// 메타데이터에 남길 text 소스 로케이터 최대 길이
const TEXT_LOCATOR_PREVIEW_CHARS: usize = 100;

// ============================================================================
// IngestionPipeline
// ============================================================================

/// 소스 수집 파이프라인
pub struct IngestionPipeline {
    store: Arc<KnowledgeStore>,
    passages: Arc<dyn PassageStore>,
    loader: Arc<dyn SourceLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    sink: Arc<dyn StatusSink>,
    chunking: ChunkConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        loader: Arc<dyn SourceLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        sink: Arc<dyn StatusSink>,
        chunking: ChunkConfig,
    ) -> Self {
        Self {
            passages: store.clone(),
            store,
            loader,
            embedder,
            sink,
            chunking,
        }
    }

    /// 패시지 저장소 교체 (소스 레코드는 계속 `store` 에 기록)
    pub fn with_passage_store(mut self, passages: Arc<dyn PassageStore>) -> Self {
        self.passages = passages;
        self
    }

    /// `pending` 소스 하나를 끝까지 처리하고 최종 레코드를 반환
    ///
    /// 수집 단계의 실패는 소스 레코드에 기록되며 `Ok` 로 반환됩니다.
    /// `Err` 는 소스가 없거나 `pending` 이 아니거나 저장소 자체가 실패한 경우입니다.
    pub async fn run(&self, source_id: &str) -> Result<Source> {
        let source = self
            .store
            .update_source_status(source_id, SourceStatus::Processing, None)?;
        notify(self.sink.as_ref(), source_id, SourceStatus::Processing, None).await;
        tracing::info!(
            "Ingesting {} source {} for chatbot {}",
            source.kind,
            source.id,
            source.chatbot_id
        );

        match self.process(&source).await {
            Ok(count) => {
                let done =
                    self.store
                        .update_source_status(source_id, SourceStatus::Completed, None)?;
                notify(self.sink.as_ref(), source_id, SourceStatus::Completed, None).await;
                tracing::info!("Source {} completed ({} passages)", source_id, count);
                Ok(done)
            }
            Err(e) => {
                let detail = e.to_string();
                tracing::warn!("Source {} failed: {}", source_id, detail);
                let failed = match self.store.update_source_status(
                    source_id,
                    SourceStatus::Failed,
                    Some(&detail),
                ) {
                    Ok(failed) => failed,
                    Err(RagError::NotFound(what)) => {
                        tracing::info!("Source {} was deleted during ingestion", source_id);
                        return Err(RagError::NotFound(what));
                    }
                    Err(e) => return Err(e),
                };
                notify(
                    self.sink.as_ref(),
                    source_id,
                    SourceStatus::Failed,
                    Some(&detail),
                )
                .await;
                Ok(failed)
            }
        }
    }

    /// 로드부터 저장까지 (저장된 패시지 수 반환)
    async fn process(&self, source: &Source) -> Result<usize> {
        let removed = self.passages.delete_by_source(&source.id).await?;
        if removed > 0 {
            tracing::debug!("Removed {} stale passages of {}", removed, source.id);
        }

        let text = self.loader.load(source.kind, &source.locator).await?;

        let chunks = self.chunking.split(&text);
        if chunks.is_empty() {
            return Err(RagError::Split);
        }
        tracing::debug!("Split source {} into {} chunks", source.id, chunks.len());

        let embeddings = self.embedder.embed_batch(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let total = chunks.len();
        let locator = metadata_locator(source.kind, &source.locator);
        let passages: Vec<NewPassage> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (content, embedding))| NewPassage {
                content,
                embedding,
                metadata: PassageMetadata {
                    kind: source.kind,
                    locator: locator.clone(),
                    chunk_index,
                    total_chunks: total,
                },
            })
            .collect();

        let report = self
            .passages
            .insert(&source.chatbot_id, &source.id, &passages)
            .await?;

        if !report.is_complete() {
            for failure in &report.failures {
                tracing::warn!(
                    "Passage {} of source {} rejected: {}",
                    failure.index,
                    source.id,
                    failure.reason
                );
            }
        }

        Ok(report.into_result()?.inserted_count())
    }
}

/// 메타데이터용 로케이터 (text 소스는 앞부분만)
fn metadata_locator(kind: SourceKind, locator: &str) -> String {
    match kind {
        SourceKind::Text => locator.chars().take(TEXT_LOCATOR_PREVIEW_CHARS).collect(),
        _ => locator.to_string(),
    }
}

// ============================================================================
// Queue & Worker
// ============================================================================

/// 수집 작업 단위
#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub source_id: String,
}

/// 수집 대기열 핸들 (등록 측)
#[derive(Clone)]
pub struct IngestionQueue {
    tx: mpsc::Sender<IngestionJob>,
}

impl IngestionQueue {
    /// 작업 등록 (대기열이 가득 차면 자리가 날 때까지 대기)
    pub async fn enqueue(&self, source_id: &str) -> Result<()> {
        self.tx
            .send(IngestionJob {
                source_id: source_id.to_string(),
            })
            .await
            .map_err(|_| RagError::QueueClosed)?;
        tracing::debug!("Queued ingestion for source {}", source_id);
        Ok(())
    }
}

/// 백그라운드 수집 워커
///
/// 작업마다 태스크를 띄우며 동시 실행 수는 세마포어로 제한합니다.
pub struct IngestionWorker;

impl IngestionWorker {
    /// 워커 시작
    ///
    /// 반환된 대기열을 모두 drop 하면 워커는 진행 중인 작업을 마친 뒤 종료합니다.
    pub fn spawn(
        pipeline: Arc<IngestionPipeline>,
        config: &IngestionConfig,
    ) -> (IngestionQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<IngestionJob>(config.queue_capacity.max(1));
        let max_concurrent = config.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let pipeline = pipeline.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = pipeline.run(&job.source_id).await {
                        tracing::error!("Ingestion job for {} aborted: {}", job.source_id, e);
                    }
                });
            }

            // 진행 중인 작업이 모두 끝날 때까지 대기
            let _ = semaphore.acquire_many(max_concurrent as u32).await;
            tracing::debug!("Ingestion worker stopped");
        });

        (IngestionQueue { tx }, handle)
    }
}

// ============================================================================
// Tests
// ============================================================================
