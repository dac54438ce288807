//! DOCX 텍스트 추출 모듈
//!
//! `word/document.xml` 의 `<w:t>` 런을 이어 붙이고, 문단(`<w:p>`)마다 줄을 바꿉니다.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use crate::error::{RagError, Result};

/// `word/document.xml` 최대 크기
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// DOCX 파일에서 텍스트 추출
pub fn extract_text_from_docx(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| RagError::source_load(format!("Failed to read DOCX {:?}: {}", path, e)))?;
    extract_text_from_docx_bytes(&bytes)
}

/// 메모리의 DOCX 바이트에서 텍스트 추출
pub fn extract_text_from_docx_bytes(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::source_load(format!("Invalid DOCX archive: {}", e)))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| RagError::source_load("word/document.xml not found"))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| RagError::source_load(format!("Failed to read document.xml: {}", e)))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::source_load("word/document.xml exceeds size limit"));
    }

    extract_paragraphs(&xml)
}

fn extract_paragraphs(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| RagError::source_load(format!("Malformed DOCX text: {}", e)))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::source_load(format!("Malformed DOCX XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// 문단 목록으로 최소 DOCX 생성
    pub(crate) fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_extracts_paragraphs() {
        let bytes = build_docx(&["First paragraph.", "Second &amp; last."]);
        let text = extract_text_from_docx_bytes(&bytes).unwrap();
        assert_eq!(text, "First paragraph.\nSecond & last.");
    }

    #[test]
    fn test_runs_are_joined() {
        let xml = br#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>Hel</w:t></w:r><w:r><w:t>lo</w:t></w:r><w:r><w:tab/><w:t>world</w:t></w:r></w:p></w:body></w:document>"#;
        assert_eq!(extract_paragraphs(xml).unwrap(), "Hello\tworld");
    }

    #[test]
    fn test_invalid_zip_is_source_load_error() {
        let err = extract_text_from_docx_bytes(b"not a zip").unwrap_err();
        assert!(matches!(err, RagError::SourceLoad(_)));
    }

    #[test]
    fn test_missing_document_xml() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_text_from_docx_bytes(&buf).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
