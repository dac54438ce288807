//! CLI 모듈
//!
//! chatbot-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::FileCollector;
use crate::config::RagConfig;
use crate::gemini::has_api_key;
use crate::error::RagError;
use crate::knowledge::{KnowledgeStore, SourceKind, SourceStatus};
use crate::service::{QueryRequest, RagService, RegisterSourceRequest, SourceStatusView};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "chatbot-rag")]
#[command(version, about = "챗봇 지식베이스 RAG 파이프라인", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// URL, 텍스트, 파일, 또는 폴더를 챗봇 지식베이스에 추가
    Add {
        /// 챗봇 ID
        #[arg(short, long)]
        chatbot: String,

        /// 수집할 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 완료/실패한 소스 재수집
    Reingest {
        /// 소스 ID
        source: String,
    },

    /// 소스 상태 확인
    Status {
        /// 소스 ID
        source: String,
    },

    /// 챗봇의 소스 목록
    Sources {
        /// 챗봇 ID
        #[arg(short, long)]
        chatbot: String,
    },

    /// 소스와 패시지 삭제
    Delete {
        /// 소스 ID
        source: String,
    },

    /// 챗봇에게 질문
    Ask {
        /// 챗봇 ID
        #[arg(short, long)]
        chatbot: String,

        /// 질문
        message: String,

        /// 이어갈 대화 ID
        #[arg(long)]
        conversation: Option<String>,
    },

    /// 대화 기록
    History {
        /// 챗봇 ID
        #[arg(short, long)]
        chatbot: String,

        /// 대화 ID
        #[arg(long)]
        conversation: String,
    },

    /// 설정 및 저장소 상태
    Info,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Add {
            chatbot,
            url,
            text,
            file,
            dir,
        } => cmd_add(&config, chatbot, url, text, file, dir).await,
        Commands::Reingest { source } => cmd_reingest(&config, &source).await,
        Commands::Status { source } => cmd_status(&config, &source),
        Commands::Sources { chatbot } => cmd_sources(&config, &chatbot),
        Commands::Delete { source } => cmd_delete(&config, &source),
        Commands::Ask {
            chatbot,
            message,
            conversation,
        } => cmd_ask(&config, chatbot, message, conversation).await,
        Commands::History {
            chatbot,
            conversation,
        } => cmd_history(&config, &chatbot, &conversation),
        Commands::Info => cmd_info(&config),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 소스 추가 명령어 (add)
///
/// 소스를 등록하고 이 프로세스의 수집 워커가 모두 처리할 때까지 기다립니다.
async fn cmd_add(
    config: &RagConfig,
    chatbot: String,
    url: Option<String>,
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
) -> Result<()> {
    require_api_key()?;

    let requests = if let Some(url) = url {
        vec![(SourceKind::Website, url)]
    } else if let Some(text) = text {
        vec![(SourceKind::Text, text)]
    } else if let Some(path) = file {
        let collected = FileCollector::with_defaults()
            .collect_file(&path)
            .context("파일 확인 실패")?;
        vec![(SourceKind::Document, absolute_locator(&collected.path)?)]
    } else if let Some(path) = dir {
        collect_documents(&path)?
    } else {
        bail!("--url, --text, --file, --dir 중 하나를 지정해야 합니다");
    };

    if requests.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let (service, worker) = RagService::from_config(config).context("서비스 초기화 실패")?;
    let store = service.store().clone();

    let mut source_ids = Vec::with_capacity(requests.len());
    for (kind, locator) in requests {
        let id = service
            .register_source(RegisterSourceRequest {
                chatbot_id: chatbot.clone(),
                kind,
                locator,
            })
            .await
            .context("소스 등록 실패")?;
        println!("[*] 등록됨: {} ({})", id, kind);
        source_ids.push(id);
    }

    println!("[*] 수집 중...");
    drop(service);
    worker.await.context("수집 워커 종료 실패")?;

    println!();
    report_sources(&store, &source_ids)
}

/// 재수집 명령어 (reingest)
async fn cmd_reingest(config: &RagConfig, source_id: &str) -> Result<()> {
    require_api_key()?;

    let (service, worker) = RagService::from_config(config).context("서비스 초기화 실패")?;
    let store = service.store().clone();

    service
        .reingest_source(source_id)
        .await
        .context("재수집 요청 실패")?;

    println!("[*] 재수집 중: {}", source_id);
    drop(service);
    worker.await.context("수집 워커 종료 실패")?;

    report_sources(&store, &[source_id.to_string()])
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig, source_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let view = SourceStatusView::load(&store, source_id).context("소스 조회 실패")?;

    println!("소스 #{}", view.source_id);
    println!("  챗봇:   {}", view.chatbot_id);
    println!("  종류:   {}", view.kind);
    println!("  위치:   {}", truncate_text(&view.locator, 80));
    println!("  상태:   {}", view.status);
    if let Some(detail) = &view.detail {
        println!("  상세:   {}", detail);
    }
    println!("  패시지: {}", view.passage_count);
    println!("  갱신:   {}", view.updated_at.format("%Y-%m-%d %H:%M:%S"));

    Ok(())
}

/// 목록 명령어 (sources)
fn cmd_sources(config: &RagConfig, chatbot_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let sources = store.list_sources(chatbot_id).context("소스 목록 조회 실패")?;

    if sources.is_empty() {
        println!("[!] 등록된 소스가 없습니다.");
        return Ok(());
    }

    println!("[OK] 소스 ({} 건):\n", sources.len());

    for source in sources {
        println!(
            "  {} [{}] [{}] {}",
            source.id,
            source.kind,
            source.status,
            truncate_text(&source.locator, 50)
        );
        println!("        {}", source.created_at.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(config: &RagConfig, source_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let passages = store.delete_source(source_id).context("소스 삭제 실패")?;
    println!("[OK] 소스 {} 삭제됨 ({} 패시지)", source_id, passages);
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: &RagConfig,
    chatbot: String,
    message: String,
    conversation: Option<String>,
) -> Result<()> {
    require_api_key()?;

    let (service, _worker) = RagService::from_config(config).context("서비스 초기화 실패")?;

    let response = service
        .query(QueryRequest {
            chatbot_id: chatbot,
            message,
            conversation_id: conversation,
            ..Default::default()
        })
        .await
        .context("질의 실패")?;

    println!("{}", response.answer);
    println!();

    if !response.sources.is_empty() {
        println!("[*] 참고한 패시지 ({} 건):", response.sources.len());
        for (i, scored) in response.sources.iter().enumerate() {
            println!(
                "  {}. [점수: {:.4}] {}",
                i + 1,
                scored.score,
                truncate_text(&scored.passage.content, 100)
            );
        }
        println!();
    }

    println!("[OK] 대화 ID: {}", response.conversation_id);
    Ok(())
}

/// 대화 기록 명령어 (history)
fn cmd_history(config: &RagConfig, chatbot_id: &str, conversation_id: &str) -> Result<()> {
    let store = open_store(config)?;

    let conversation = store
        .chatbot_conversation(chatbot_id, conversation_id)
        .context("대화 조회 실패")?;
    let messages = store
        .list_messages(&conversation.id)
        .context("메시지 조회 실패")?;

    for message in messages {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.role.as_str(),
            message.content
        );
    }

    Ok(())
}

/// 정보 명령어 (info)
fn cmd_info(config: &RagConfig) -> Result<()> {
    println!("chatbot-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {} ({}차원), 생성: {}",
        config.embedding.model, config.embedding.dimension, config.generation.model
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_store(config).and_then(|store| store.stats().context("통계 조회 실패")) {
        Ok(stats) => {
            let db_size = std::fs::metadata(&stats.db_path)
                .map(|m| m.len() as usize)
                .unwrap_or(0);
            println!(
                "[OK] 소스 {} 건, 패시지 {} 건",
                stats.source_count, stats.passage_count
            );
            println!(
                "[OK] 대화 {} 건, 메시지 {} 건",
                stats.conversation_count, stats.message_count
            );
            println!("     DB 크기: {}", format_bytes(db_size));
        }
        Err(e) => {
            println!("[!] 저장소 상태 조회 실패: {:#}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

fn open_store(config: &RagConfig) -> Result<KnowledgeStore> {
    KnowledgeStore::open(&config.db_path()).context("KnowledgeStore 열기 실패")
}

/// 폴더의 지원 파일을 document 소스 목록으로
fn collect_documents(dir: &Path) -> Result<Vec<(SourceKind, String)>> {
    let files = FileCollector::with_defaults()
        .collect_directory(dir)
        .context("파일 수집 실패")?;

    let total_size: u64 = files.iter().map(|f| f.size).sum();
    println!(
        "[*] 수집 대상: {} 파일 ({})",
        files.len(),
        format_bytes(total_size as usize)
    );

    files
        .iter()
        .map(|f| Ok((SourceKind::Document, absolute_locator(&f.path)?)))
        .collect()
}

fn absolute_locator(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("경로를 찾을 수 없습니다: {}", path.display()))?;
    Ok(absolute.display().to_string())
}

/// 수집 결과 출력
fn report_sources(store: &KnowledgeStore, source_ids: &[String]) -> Result<()> {
    let mut completed = 0;
    let mut failed = 0;

    for id in source_ids {
        let view = match SourceStatusView::load(store, id) {
            Ok(view) => view,
            Err(RagError::NotFound(_)) => continue,
            Err(e) => return Err(e).context("소스 조회 실패"),
        };

        if view.status == SourceStatus::Completed {
            println!("[OK] {} 완료 ({} 패시지)", id, view.passage_count);
            completed += 1;
        } else {
            println!(
                "[!] {} {}: {}",
                id,
                view.status,
                view.detail.as_deref().unwrap_or("-")
            );
            failed += 1;
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", completed, failed);
    Ok(())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_add_command() {
        let cli = Cli::try_parse_from([
            "chatbot-rag",
            "add",
            "--chatbot",
            "bot-1",
            "--url",
            "https://example.com",
        ])
        .unwrap();

        match cli.command {
            Commands::Add { chatbot, url, .. } => {
                assert_eq!(chatbot, "bot-1");
                assert_eq!(url.as_deref(), Some("https://example.com"));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_ask_requires_chatbot() {
        assert!(Cli::try_parse_from(["chatbot-rag", "ask", "hello"]).is_err());

        let cli = Cli::try_parse_from([
            "chatbot-rag",
            "ask",
            "-c",
            "bot-1",
            "hello",
            "--conversation",
            "conv-1",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ask { conversation: Some(ref c), .. } if c == "conv-1"
        ));
    }

    #[test]
    fn test_collect_documents_skips_unsupported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("faq.md"), "# FAQ").unwrap();
        std::fs::write(dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let docs = collect_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, SourceKind::Document);
        assert!(docs[0].1.ends_with("faq.md"));
    }

    #[test]
    fn test_offline_commands_report_missing_records() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let conversation = open_store(&config)
            .unwrap()
            .create_conversation(crate::knowledge::NewConversation {
                chatbot_id: "bot-1".to_string(),
                user_ip: None,
                user_agent: None,
            })
            .unwrap();

        assert!(cmd_history(&config, "bot-1", &conversation.id).is_ok());
        let err = cmd_history(&config, "bot-2", &conversation.id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::NotFound(_))
        ));

        let err = cmd_delete(&config, "missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::NotFound(_))
        ));
        assert!(cmd_status(&config, "missing").is_err());
    }
}
