//! 콘텐츠 추출 모듈
//!
//! `document` 소스의 로컬 파일에서 텍스트를 추출합니다.
//! - 텍스트 파일: UTF-8로 직접 읽기
//! - PDF 파일: pdf-extract
//! - DOCX 파일: zip + quick-xml

pub mod docx;
pub mod pdf;

use std::path::Path;

use crate::collector::FileType;
use crate::error::{RagError, Result};

/// 파일에서 텍스트 추출
///
/// PDF/DOCX 파싱은 CPU 바운드이므로 blocking 스레드에서 수행합니다.
pub async fn extract_document(path: &Path) -> Result<String> {
    let file_type = FileType::from_path(path).ok_or_else(|| {
        RagError::source_load(format!("Unsupported document type: {}", path.display()))
    })?;

    tracing::debug!("Extracting {:?} from {:?}", file_type, path);

    match file_type {
        FileType::Text => tokio::fs::read_to_string(path).await.map_err(|e| {
            RagError::source_load(format!("Failed to read {}: {}", path.display(), e))
        }),
        FileType::Pdf => {
            let path = path.to_path_buf();
            run_blocking(move || pdf::extract_text_from_pdf(&path)).await
        }
        FileType::Docx => {
            let path = path.to_path_buf();
            run_blocking(move || docx::extract_text_from_docx(&path)).await
        }
    }
}

async fn run_blocking<F>(f: F) -> Result<String>
where
    F: FnOnce() -> Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::source_load(format!("Extraction task failed: {}", e)))?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes\n\nSome content.").unwrap();

        let text = extract_document(&path).await.unwrap();
        assert_eq!(text, "# Notes\n\nSome content.");
    }

    #[tokio::test]
    async fn test_extract_docx_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("handbook.docx");
        std::fs::write(&path, docx::tests::build_docx(&["Opening hours", "9 to 5"])).unwrap();

        let text = extract_document(&path).await.unwrap();
        assert_eq!(text, "Opening hours\n9 to 5");
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let err = extract_document(Path::new("/tmp/photo.png")).await.unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
        assert!(err.to_string().contains("Unsupported document type"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = extract_document(Path::new("/nonexistent/readme.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
    }
}
