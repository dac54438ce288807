//! Knowledge Store - rusqlite 기반 지식 저장소
//!
//! 챗봇별 소스, 패시지(임베딩 포함), 대화, 메시지를 저장합니다.
//! 저장 위치: ~/.chatbot-rag/chatbot-rag.db

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};

use super::vector::{
    decode_embedding, encode_embedding, rank_passages, InsertFailure, InsertReport, NewPassage,
    Passage, PassageMetadata, PassageStore, ScoredPassage,
};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.chatbot-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatbot-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Website,
    Document,
    Text,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Website => "website",
            SourceKind::Document => "document",
            SourceKind::Text => "text",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "website" => Ok(SourceKind::Website),
            "document" => Ok(SourceKind::Document),
            "text" => Ok(SourceKind::Text),
            other => Err(RagError::InvalidRequest(format!(
                "Unknown source kind: '{}'. Must be website, document, or text",
                other
            ))),
        }
    }
}

/// 소스 수집 상태
///
/// `pending -> processing -> completed | failed` 로만 진행합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Completed => "completed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceStatus::Completed | SourceStatus::Failed)
    }

    /// 파이프라인이 수행할 수 있는 전이인지 확인
    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        matches!(
            (self, next),
            (SourceStatus::Pending, SourceStatus::Processing)
                | (SourceStatus::Processing, SourceStatus::Completed)
                | (SourceStatus::Processing, SourceStatus::Failed)
        )
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SourceStatus::Pending),
            "processing" => Ok(SourceStatus::Processing),
            "completed" => Ok(SourceStatus::Completed),
            "failed" => Ok(SourceStatus::Failed),
            other => Err(RagError::store(format!("Unknown source status: {}", other))),
        }
    }
}

/// 등록된 지식 소스
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub chatbot_id: String,
    pub kind: SourceKind,
    /// URL, 파일 경로 또는 인라인 텍스트
    pub locator: String,
    pub status: SourceStatus,
    /// 실패 상세
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 새 소스 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewSource {
    pub chatbot_id: String,
    pub kind: SourceKind,
    pub locator: String,
}

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(RagError::store(format!("Unknown message role: {}", other))),
        }
    }
}

/// 최종 사용자 대화 세션
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub chatbot_id: String,
    pub session_token: String,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 새 대화 입력용 구조체
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub chatbot_id: String,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// 대화의 한 턴
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub chatbot_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub source_count: usize,
    pub passage_count: usize,
    pub conversation_count: usize,
    pub message_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

const SOURCE_COLUMNS: &str =
    "id, chatbot_id, kind, locator, status, detail, created_at, updated_at";
const PASSAGE_COLUMNS: &str =
    "id, chatbot_id, source_id, chunk_index, content, embedding, metadata, created_at";
const CONVERSATION_COLUMNS: &str =
    "id, chatbot_id, session_token, user_ip, user_agent, created_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, chatbot_id, role, content, created_at";

/// Knowledge Store - SQLite 지식 저장소
///
/// 연결 하나를 뮤텍스로 보호하므로 여러 작업에서 동시에 호출해도 안전합니다.
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::store(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::store(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                chatbot_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                locator TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sources_chatbot ON sources(chatbot_id);

            CREATE TABLE IF NOT EXISTS passages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chatbot_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_passages_chatbot ON passages(chatbot_id);
            CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(source_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                chatbot_id TEXT NOT NULL,
                session_token TEXT NOT NULL,
                user_ip TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_chatbot ON conversations(chatbot_id);

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                chatbot_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            "#,
        )?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------------

    /// 소스 등록 (`pending` 상태)
    pub fn create_source(&self, source: NewSource) -> Result<Source> {
        let conn = self.conn()?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO sources (id, chatbot_id, kind, locator, status, detail, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?6)",
            params![
                id,
                source.chatbot_id,
                source.kind.as_str(),
                source.locator,
                SourceStatus::Pending.as_str(),
                format_datetime(now),
            ],
        )?;

        tracing::info!(
            "Registered {} source {} for chatbot {}",
            source.kind,
            id,
            source.chatbot_id
        );

        Ok(Source {
            id,
            chatbot_id: source.chatbot_id,
            kind: source.kind,
            locator: source.locator,
            status: SourceStatus::Pending,
            detail: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// ID로 소스 조회
    pub fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        Self::query_source(&conn, id)
    }

    fn query_source(conn: &Connection, id: &str) -> Result<Option<Source>> {
        let sql = format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS);
        let source = conn
            .query_row(&sql, params![id], row_to_source)
            .optional()?;
        Ok(source)
    }

    /// 챗봇의 소스 목록 (등록순)
    pub fn list_sources(&self, chatbot_id: &str) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sources WHERE chatbot_id = ?1 ORDER BY created_at, rowid",
            SOURCE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sources = stmt
            .query_map(params![chatbot_id], row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    /// 소스 상태 전이
    ///
    /// `pending -> processing -> completed | failed` 외의 전이는 거부합니다.
    pub fn update_source_status(
        &self,
        id: &str,
        status: SourceStatus,
        detail: Option<&str>,
    ) -> Result<Source> {
        let conn = self.conn()?;
        let current = Self::query_source(&conn, id)?
            .ok_or_else(|| RagError::NotFound(format!("source {}", id)))?;

        if !current.status.can_transition_to(status) {
            return Err(RagError::InvalidTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        Self::write_status(&conn, current, status, detail)
    }

    /// 재수집 요청: 종료 상태의 소스를 `pending` 으로 되돌림
    pub fn reset_source_for_reingest(&self, id: &str) -> Result<Source> {
        let conn = self.conn()?;
        let current = Self::query_source(&conn, id)?
            .ok_or_else(|| RagError::NotFound(format!("source {}", id)))?;

        if !current.status.is_terminal() {
            return Err(RagError::InvalidTransition {
                from: current.status.to_string(),
                to: SourceStatus::Pending.to_string(),
            });
        }

        Self::write_status(&conn, current, SourceStatus::Pending, None)
    }

    fn write_status(
        conn: &Connection,
        mut source: Source,
        status: SourceStatus,
        detail: Option<&str>,
    ) -> Result<Source> {
        let now = Utc::now();
        conn.execute(
            "UPDATE sources SET status = ?1, detail = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), detail, format_datetime(now), source.id],
        )?;

        tracing::debug!("Source {}: {} -> {}", source.id, source.status, status);

        source.status = status;
        source.detail = detail.map(str::to_string);
        source.updated_at = now;
        Ok(source)
    }

    /// 소스 삭제 (패시지 포함, 삭제된 패시지 수 반환)
    pub fn delete_source(&self, id: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let passages = tx.execute("DELETE FROM passages WHERE source_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(RagError::NotFound(format!("source {}", id)));
        }
        tx.commit()?;

        tracing::info!("Deleted source {} ({} passages)", id, passages);
        Ok(passages)
    }

    /// 스케줄링에 실패한 `pending` 소스를 `failed` 로 기록
    ///
    /// 처리 단계를 거치지 않았으므로 일반 전이 규칙과 별도로 `pending` 에서만 허용합니다.
    pub fn fail_unscheduled(&self, id: &str, detail: &str) -> Result<Source> {
        let conn = self.conn()?;
        let current = Self::query_source(&conn, id)?
            .ok_or_else(|| RagError::NotFound(format!("source {}", id)))?;

        if current.status != SourceStatus::Pending {
            return Err(RagError::InvalidTransition {
                from: current.status.to_string(),
                to: SourceStatus::Failed.to_string(),
            });
        }

        tracing::warn!("Source {} could not be scheduled: {}", id, detail);
        Self::write_status(&conn, current, SourceStatus::Failed, Some(detail))
    }

    // ------------------------------------------------------------------------
    // Passages
    // ------------------------------------------------------------------------

    /// 패시지 배치 삽입
    ///
    /// 패시지마다 개별 저장하며, 실패한 패시지는 보고서에 기록하고 계속 진행합니다.
    /// 챗봇의 기존 패시지와 차원이 다른 임베딩은 거부합니다.
    /// 소스가 없거나 다른 챗봇 소유면 아무것도 저장하지 않고 `NotFound` 를 반환합니다.
    pub fn insert_passages(
        &self,
        chatbot_id: &str,
        source_id: &str,
        passages: &[NewPassage],
    ) -> Result<InsertReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // 수집 도중 삭제된 소스에는 패시지를 남기지 않음
        let owner: Option<String> = tx
            .query_row(
                "SELECT chatbot_id FROM sources WHERE id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner.as_deref() != Some(chatbot_id) {
            return Err(RagError::NotFound(format!(
                "source {} of chatbot {}",
                source_id, chatbot_id
            )));
        }

        let mut report = InsertReport::new(passages.len());
        let mut expected_dimension = Self::stored_dimension(&tx, chatbot_id)?;

        for (index, passage) in passages.iter().enumerate() {
            let dimension = passage.embedding.len();

            if dimension == 0 {
                report.failures.push(InsertFailure {
                    index,
                    reason: "empty embedding".to_string(),
                });
                continue;
            }

            if let Some(expected) = expected_dimension {
                if expected != dimension {
                    report.failures.push(InsertFailure {
                        index,
                        reason: format!(
                            "dimension mismatch: expected {}, got {}",
                            expected, dimension
                        ),
                    });
                    continue;
                }
            }

            let id = Uuid::new_v4().to_string();
            let metadata = serde_json::to_string(&passage.metadata)?;
            let result = tx.execute(
                "INSERT INTO passages
                    (id, chatbot_id, source_id, chunk_index, content, embedding, dimension, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    chatbot_id,
                    source_id,
                    passage.metadata.chunk_index as i64,
                    passage.content,
                    encode_embedding(&passage.embedding),
                    dimension as i64,
                    metadata,
                    format_datetime(Utc::now()),
                ],
            );

            match result {
                Ok(_) => {
                    expected_dimension = Some(dimension);
                    report.inserted.push(id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to insert passage {} of source {}: {}",
                        index,
                        source_id,
                        e
                    );
                    report.failures.push(InsertFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit()?;

        tracing::debug!(
            "Inserted {}/{} passages for source {}",
            report.inserted_count(),
            report.total,
            source_id
        );
        Ok(report)
    }

    /// 챗봇 범위 유사도 검색 (선형 탐색)
    pub fn search_passages(
        &self,
        chatbot_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.conn()?;
        if let Some(expected) = Self::stored_dimension(&conn, chatbot_id)? {
            if expected != query_embedding.len() {
                return Err(RagError::RetrievalContext(format!(
                    "query embedding has {} dimensions, chatbot {} passages have {}",
                    query_embedding.len(),
                    chatbot_id,
                    expected
                )));
            }
        }

        let sql = format!(
            "SELECT {} FROM passages WHERE chatbot_id = ?1 ORDER BY seq",
            PASSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(params![chatbot_id], row_to_passage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rank_passages(candidates, query_embedding, limit))
    }

    /// 챗봇 패시지의 임베딩 차원 (패시지가 없으면 None)
    fn stored_dimension(conn: &Connection, chatbot_id: &str) -> Result<Option<usize>> {
        let dimension = conn
            .query_row(
                "SELECT dimension FROM passages WHERE chatbot_id = ?1 LIMIT 1",
                params![chatbot_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(dimension.map(|d| d as usize))
    }

    /// 소스의 패시지 (청크 순서)
    pub fn passages_for_source(&self, source_id: &str) -> Result<Vec<Passage>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM passages WHERE source_id = ?1 ORDER BY chunk_index, seq",
            PASSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let passages = stmt
            .query_map(params![source_id], row_to_passage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(passages)
    }

    /// 소스의 패시지 삭제
    pub fn delete_passages_by_source(&self, source_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM passages WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(rows)
    }

    /// 소스의 패시지 수
    pub fn count_passages(&self, source_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM passages WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 챗봇의 패시지 수
    pub fn count_chatbot_passages(&self, chatbot_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM passages WHERE chatbot_id = ?1",
            params![chatbot_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------------
    // Conversations & Messages
    // ------------------------------------------------------------------------

    /// 대화 생성
    pub fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let conn = self.conn()?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let session_token = format!("session_{}", Uuid::new_v4().simple());

        conn.execute(
            "INSERT INTO conversations (id, chatbot_id, session_token, user_ip, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                conversation.chatbot_id,
                session_token,
                conversation.user_ip,
                conversation.user_agent,
                format_datetime(now),
            ],
        )?;

        Ok(Conversation {
            id,
            chatbot_id: conversation.chatbot_id,
            session_token,
            user_ip: conversation.user_ip,
            user_agent: conversation.user_agent,
            created_at: now,
        })
    }

    /// ID로 대화 조회
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        );
        let conversation = conn
            .query_row(&sql, params![id], row_to_conversation)
            .optional()?;
        Ok(conversation)
    }

    /// 챗봇 소유의 대화 조회 (다른 챗봇의 대화는 없는 것으로 취급)
    pub fn chatbot_conversation(&self, chatbot_id: &str, id: &str) -> Result<Conversation> {
        self.get_conversation(id)?
            .filter(|c| c.chatbot_id == chatbot_id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {}", id)))
    }

    /// 메시지 추가
    pub fn append_message(
        &self,
        conversation_id: &str,
        chatbot_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let conn = self.conn()?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO messages (id, conversation_id, chatbot_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                conversation_id,
                chatbot_id,
                role.as_str(),
                content,
                format_datetime(now),
            ],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            chatbot_id: chatbot_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// 대화의 전체 메시지 (시간순)
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at, seq",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![conversation_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// 최근 메시지 `limit` 개 (시간순)
    pub fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {cols} FROM (
                SELECT seq, {cols} FROM messages
                WHERE conversation_id = ?1
                ORDER BY created_at DESC, seq DESC
                LIMIT ?2
             ) ORDER BY created_at, seq",
            cols = MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![conversation_id, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            source_count: count("sources")?,
            passage_count: count("passages")?,
            conversation_count: count("conversations")?,
            message_count: count("messages")?,
            db_path: self.db_path.clone(),
        })
    }
}

#[async_trait]
impl PassageStore for KnowledgeStore {
    async fn insert(
        &self,
        chatbot_id: &str,
        source_id: &str,
        passages: &[NewPassage],
    ) -> Result<InsertReport> {
        self.insert_passages(chatbot_id, source_id, passages)
    }

    async fn search(
        &self,
        chatbot_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        self.search_passages(chatbot_id, query_embedding, limit)
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        self.delete_passages_by_source(source_id)
    }

    async fn count_by_source(&self, source_id: &str) -> Result<usize> {
        self.count_passages(source_id)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 고정 폭 RFC3339 (문자열 정렬 = 시간 정렬)
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC3339 텍스트 컬럼을 DateTime<Utc>로 변환
fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// 텍스트 컬럼을 FromStr 타입으로 변환
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = RagError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        chatbot_id: row.get(1)?,
        kind: parse_column(row, 2)?,
        locator: row.get(3)?,
        status: parse_column(row, 4)?,
        detail: row.get(5)?,
        created_at: parse_datetime(row, 6)?,
        updated_at: parse_datetime(row, 7)?,
    })
}

fn row_to_passage(row: &Row<'_>) -> rusqlite::Result<Passage> {
    let raw_metadata: String = row.get(6)?;
    let metadata: PassageMetadata = serde_json::from_str(&raw_metadata).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let embedding: Vec<u8> = row.get(5)?;

    Ok(Passage {
        id: row.get(0)?,
        chatbot_id: row.get(1)?,
        source_id: row.get(2)?,
        ordinal: row.get::<_, i64>(3)? as usize,
        content: row.get(4)?,
        embedding: decode_embedding(&embedding),
        metadata,
        created_at: parse_datetime(row, 7)?,
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        chatbot_id: row.get(1)?,
        session_token: row.get(2)?,
        user_ip: row.get(3)?,
        user_agent: row.get(4)?,
        created_at: parse_datetime(row, 5)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        chatbot_id: row.get(2)?,
        role: parse_column(row, 3)?,
        content: row.get(4)?,
        created_at: parse_datetime(row, 5)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
