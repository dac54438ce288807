//! 질의 파이프라인
//!
//! 1. 대화 확인/생성 → 2. 사용자 메시지 저장 → 3. 질문 임베딩 → 4. 챗봇 범위 검색
//! → 5. 컨텍스트 조립 (문자 예산) → 6. 프롬프트 구성 → 7. 생성 → 8. 응답 메시지 저장
//!
//! 검색 결과가 없어도 빈 컨텍스트로 생성까지 진행합니다.
//! 생성이 실패하면 사용자 메시지만 남고 응답 메시지는 만들지 않습니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::knowledge::{
    Conversation, KnowledgeStore, Message, NewConversation, PassageStore, Role, ScoredPassage,
};

/// 컨텍스트 안 패시지 구분자
const PASSAGE_SEPARATOR: &str = "\n\n";

const SYSTEM_INSTRUCTION: &str = "You are a helpful AI chatbot assistant. \
Answer the question using only the information in the context below. \
If the context does not contain enough information to answer, say that you don't have enough information to answer. \
Do not make up an answer.";

// ============================================================================
// Types
// ============================================================================

/// 질의 입력
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub chatbot_id: String,
    pub message: String,
    /// 이전 턴에서 받은 대화 ID (없으면 새 대화)
    pub conversation_id: Option<String>,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// 질의 응답
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub conversation_id: String,
    /// 응답 메시지 ID
    pub message_id: String,
    pub answer: String,
    /// 컨텍스트에 실제로 들어간 패시지 (순위순)
    pub sources: Vec<ScoredPassage>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// QueryPipeline
// ============================================================================

/// 질의 파이프라인
pub struct QueryPipeline {
    store: Arc<KnowledgeStore>,
    passages: Arc<dyn PassageStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            passages: store.clone(),
            store,
            embedder,
            generator,
            retrieval,
        }
    }

    /// 질의 한 턴 처리
    pub async fn run(&self, input: QueryInput) -> Result<QueryResponse> {
        let question = input.message.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("message must not be empty".into()));
        }

        let conversation = self.resolve_conversation(&input)?;

        // 현재 턴 저장 전에 이전 기록을 읽음
        let history = if self.retrieval.history_messages > 0 {
            self.store
                .recent_messages(&conversation.id, self.retrieval.history_messages)?
        } else {
            vec![]
        };

        self.store
            .append_message(&conversation.id, &input.chatbot_id, Role::User, question)?;

        let query_embedding = self.embedder.embed(question).await.map_err(|e| {
            tracing::warn!("Query embedding failed for chatbot {}: {}", input.chatbot_id, e);
            RagError::RetrievalContext(format!("Failed to embed query: {}", e))
        })?;

        let retrieved = self
            .passages
            .search(&input.chatbot_id, &query_embedding, self.retrieval.limit)
            .await
            .map_err(|e| match e {
                RagError::RetrievalContext(_) => e,
                other => RagError::RetrievalContext(format!("Passage search failed: {}", other)),
            })?;

        let (context, used) = assemble_context(&retrieved, self.retrieval.max_context_chars);
        tracing::debug!(
            "Retrieved {} passages, {} fit in context ({} chars)",
            retrieved.len(),
            used,
            context.chars().count()
        );

        let prompt = build_prompt(&context, &history, question);

        let answer = self.generator.generate(&prompt).await.map_err(|e| {
            tracing::warn!(
                "Generation failed for conversation {}: {}",
                conversation.id,
                e
            );
            match e {
                RagError::GenerationService(_) => e,
                other => RagError::generation(other.to_string()),
            }
        })?;

        let reply = self.store.append_message(
            &conversation.id,
            &input.chatbot_id,
            Role::Assistant,
            &answer,
        )?;

        let mut sources = retrieved;
        sources.truncate(used);

        Ok(QueryResponse {
            conversation_id: conversation.id,
            message_id: reply.id,
            answer,
            sources,
            created_at: reply.created_at,
        })
    }

    /// 기존 대화 확인 (다른 챗봇 소유면 없는 것으로 취급) 또는 새 대화 생성
    fn resolve_conversation(&self, input: &QueryInput) -> Result<Conversation> {
        match &input.conversation_id {
            Some(id) => self.store.chatbot_conversation(&input.chatbot_id, id),
            None => {
                let conversation = self.store.create_conversation(NewConversation {
                    chatbot_id: input.chatbot_id.clone(),
                    user_ip: input.user_ip.clone(),
                    user_agent: input.user_agent.clone(),
                })?;
                tracing::debug!(
                    "Started conversation {} for chatbot {}",
                    conversation.id,
                    input.chatbot_id
                );
                Ok(conversation)
            }
        }
    }
}

// ============================================================================
// Context & Prompt
// ============================================================================

/// 순위순으로 패시지를 이어 붙이되 예산을 넘기 직전에 멈춤
///
/// 패시지는 통째로만 들어갑니다. 반환값은 (컨텍스트, 사용한 패시지 수).
pub fn assemble_context(passages: &[ScoredPassage], max_chars: usize) -> (String, usize) {
    let separator_chars = PASSAGE_SEPARATOR.chars().count();
    let mut context = String::new();
    let mut length = 0;
    let mut used = 0;

    for scored in passages {
        let content = &scored.passage.content;
        let added = content.chars().count() + if used > 0 { separator_chars } else { 0 };
        if length + added > max_chars {
            break;
        }

        if used > 0 {
            context.push_str(PASSAGE_SEPARATOR);
        }
        context.push_str(content);
        length += added;
        used += 1;
    }

    (context, used)
}

/// 고정 템플릿으로 프롬프트 구성
pub fn build_prompt(context: &str, history: &[Message], question: &str) -> String {
    let mut prompt = String::with_capacity(SYSTEM_INSTRUCTION.len() + context.len() + 256);
    prompt.push_str(SYSTEM_INSTRUCTION);
    prompt.push_str("\n\nContext:\n");
    prompt.push_str(context);

    if !history.is_empty() {
        prompt.push_str("\n\nConversation history:\n");
        for message in history {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        // 마지막 개행 정리
        prompt.pop();
    }

    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}

// ============================================================================
// Tests
// ============================================================================
