//! PDF 텍스트 추출 (pdf-extract)

use std::path::Path;

use crate::error::{RagError, Result};

/// PDF 본문 텍스트
///
/// pdf-extract 는 페이지 사이에 폼피드를 넣으므로 이를 빈 줄로 바꿉니다.
/// 텍스트 레이어가 없는 스캔 PDF 는 빈 문자열이 되고, 로더가 "no content loaded" 로 처리합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        RagError::source_load(format!("Cannot read {}: {}", path.display(), e))
    })?;

    let raw = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
        RagError::source_load(format!("Invalid PDF {}: {}", path.display(), e))
    })?;

    let text = join_pages(&raw);
    if text.is_empty() {
        tracing::warn!("{} has no text layer", path.display());
    }
    Ok(text)
}

fn join_pages(raw: &str) -> String {
    raw.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_pages() {
        assert_eq!(
            join_pages("Hours: 9-5\n\x0c  \x0cReturns within 30 days\x0c"),
            "Hours: 9-5\n\nReturns within 30 days"
        );
        assert_eq!(join_pages("single page"), "single page");
        assert_eq!(join_pages("\x0c \n\x0c"), "");
    }

    #[test]
    fn test_missing_pdf_is_source_load_error() {
        let err = extract_text_from_pdf(Path::new("/nonexistent/file.pdf")).unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
    }
}
