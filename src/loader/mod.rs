//! 소스 로더 - 소스 종류별 원문 텍스트 로드
//!
//! - `website`: URL을 스크랩
//! - `document`: 로컬 파일에서 텍스트 추출
//! - `text`: 로케이터 자체가 본문

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::extractor::extract_document;
use crate::knowledge::SourceKind;
use crate::scraper::WebScraper;

/// 소스 로더 트레이트
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// 소스의 원문 텍스트 로드
    ///
    /// 실패 시 사람이 읽을 수 있는 사유를 담은 `SourceLoad` 에러를 반환합니다.
    async fn load(&self, kind: SourceKind, locator: &str) -> Result<String>;
}

/// 기본 로더 (HTTP 스크래퍼 + 파일 추출기)
pub struct DefaultSourceLoader {
    scraper: WebScraper,
    timeout: Duration,
}

impl DefaultSourceLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            scraper: WebScraper::new(timeout)?,
            timeout,
        })
    }

    async fn load_inner(&self, kind: SourceKind, locator: &str) -> Result<String> {
        match kind {
            SourceKind::Website => Ok(self.scraper.scrape(locator).await?.to_text()),
            SourceKind::Document => extract_document(Path::new(locator)).await,
            SourceKind::Text => Ok(locator.to_string()),
        }
    }
}

#[async_trait]
impl SourceLoader for DefaultSourceLoader {
    async fn load(&self, kind: SourceKind, locator: &str) -> Result<String> {
        let text = tokio::time::timeout(self.timeout, self.load_inner(kind, locator))
            .await
            .map_err(|_| {
                RagError::source_load(format!("Timed out after {:?} loading {}", self.timeout, kind))
            })??;

        if text.trim().is_empty() {
            return Err(RagError::source_load("no content loaded"));
        }

        tracing::debug!("Loaded {} chars from {} source", text.chars().count(), kind);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader() -> DefaultSourceLoader {
        DefaultSourceLoader::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_text_passthrough() {
        let text = loader()
            .load(SourceKind::Text, "A cat sat on a mat.")
            .await
            .unwrap();
        assert_eq!(text, "A cat sat on a mat.");
    }

    #[tokio::test]
    async fn test_blank_text_is_source_load_error() {
        let err = loader().load(SourceKind::Text, "  \n ").await.unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
        assert!(err.to_string().contains("no content loaded"));
    }

    #[tokio::test]
    async fn test_document_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faq.txt");
        std::fs::write(&path, "Q: Hours?\nA: 9 to 5.").unwrap();

        let text = loader()
            .load(SourceKind::Document, path.to_str().unwrap())
            .await
            .unwrap();
        assert!(text.contains("9 to 5"));
    }

    #[tokio::test]
    async fn test_unreachable_website() {
        let err = loader()
            .load(SourceKind::Website, "http://127.0.0.1:9/")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
    }
}
