//! 테스트용 가짜 구현체
//!
//! 네트워크 없이 파이프라인 전체를 돌릴 수 있도록 결정적인 임베딩/생성/로더/싱크를 제공합니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::knowledge::{
    InsertFailure, InsertReport, KnowledgeStore, NewPassage, PassageStore, ScoredPassage,
    SourceKind, SourceStatus,
};
use crate::loader::SourceLoader;
use crate::pipeline::StatusSink;

/// 임시 디렉토리의 저장소
pub(crate) fn temp_store() -> (TempDir, Arc<KnowledgeStore>) {
    let dir = TempDir::new().unwrap();
    let store = KnowledgeStore::open(&dir.path().join("test.db")).unwrap();
    (dir, Arc::new(store))
}

// ============================================================================
// Embedding
// ============================================================================

/// 어휘 단어 출현 횟수로 벡터를 만드는 임베더
pub(crate) struct VocabularyEmbedder {
    vocabulary: Vec<String>,
    fail: bool,
}

impl VocabularyEmbedder {
    pub(crate) fn new(words: &[&str]) -> Self {
        Self {
            vocabulary: words.iter().map(|w| w.to_lowercase()).collect(),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            vocabulary: vec!["unused".to_string()],
            fail: true,
        }
    }

    pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        self.vocabulary
            .iter()
            .map(|word| tokens.iter().filter(|t| **t == word.as_str()).count() as f32)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(RagError::embedding("connection refused"));
        }
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    fn name(&self) -> &str {
        "vocabulary"
    }
}

// ============================================================================
// Generation
// ============================================================================

/// 고정 응답(또는 실패)을 돌려주고 받은 프롬프트를 기록하는 생성기
pub(crate) struct ScriptedGenerator {
    answer: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn replying(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| RagError::generation("Gemini API error (UNAVAILABLE): overloaded"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Loader
// ============================================================================

/// 메모리 로더: text 는 그대로, 나머지는 등록된 페이지만 성공
#[derive(Default)]
pub(crate) struct StaticLoader {
    pages: HashMap<String, String>,
}

impl StaticLoader {
    pub(crate) fn with_page(mut self, locator: &str, content: &str) -> Self {
        self.pages.insert(locator.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl SourceLoader for StaticLoader {
    async fn load(&self, kind: SourceKind, locator: &str) -> Result<String> {
        let text = match kind {
            SourceKind::Text => locator.to_string(),
            _ => self
                .pages
                .get(locator)
                .cloned()
                .ok_or_else(|| RagError::source_load(format!("HTTP 404 fetching {}", locator)))?,
        };

        if text.trim().is_empty() {
            return Err(RagError::source_load("no content loaded"));
        }
        Ok(text)
    }
}

// ============================================================================
// Status Sink
// ============================================================================

/// 통보된 상태를 기록하는 싱크 (`failing` 이면 기록 후 에러 반환)
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<(String, SourceStatus, Option<String>)>>,
    fail: bool,
}

impl RecordingSink {
    pub(crate) fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn statuses(&self, source_id: &str) -> Vec<SourceStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == source_id)
            .map(|(_, status, _)| *status)
            .collect()
    }

    pub(crate) fn last_detail(&self, source_id: &str) -> Option<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == source_id)
            .and_then(|(_, _, detail)| detail.clone())
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn report(
        &self,
        source_id: &str,
        status: SourceStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        self.events.lock().unwrap().push((
            source_id.to_string(),
            status,
            detail.map(str::to_string),
        ));
        if self.fail {
            return Err(RagError::StatusCallback("HTTP 500".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Partial Store
// ============================================================================

/// 배치의 앞 `accept` 개만 실제 저장소에 넘기고 나머지는 거부하는 래퍼
pub(crate) struct RejectingStore {
    inner: Arc<KnowledgeStore>,
    accept: usize,
}

impl RejectingStore {
    pub(crate) fn new(inner: Arc<KnowledgeStore>, accept: usize) -> Self {
        Self { inner, accept }
    }
}

#[async_trait]
impl PassageStore for RejectingStore {
    async fn insert(
        &self,
        chatbot_id: &str,
        source_id: &str,
        passages: &[NewPassage],
    ) -> Result<InsertReport> {
        let accepted = passages.len().min(self.accept);
        let partial = self
            .inner
            .insert_passages(chatbot_id, source_id, &passages[..accepted])?;

        let mut report = InsertReport::new(passages.len());
        report.inserted = partial.inserted;
        report.failures = partial.failures;
        report
            .failures
            .extend((accepted..passages.len()).map(|index| InsertFailure {
                index,
                reason: "disk quota exceeded".to_string(),
            }));
        Ok(report)
    }

    async fn search(
        &self,
        chatbot_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        self.inner.search(chatbot_id, query_embedding, limit).await
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        self.inner.delete_by_source(source_id).await
    }

    async fn count_by_source(&self, source_id: &str) -> Result<usize> {
        self.inner.count_by_source(source_id).await
    }
}
