//! 문서 수집 모듈
//!
//! 로컬 파일/폴더에서 `document` 소스로 등록할 파일을 고릅니다.
//! 폴더는 .gitignore 를 따라 재귀 탐색하며 지원하는 확장자와 크기 제한을 통과한 파일만 남깁니다.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{RagError, Result};

/// 기본 파일 크기 제한 (10MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 지원하는 문서 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// UTF-8 텍스트 (마크다운, HTML, CSV 등)
    Text,
    Pdf,
    /// Word 문서 (OOXML)
    Docx,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "md" | "markdown" | "txt" | "text" | "rst" | "html" | "htm" | "csv" | "json"
            | "xml" | "yaml" | "yml" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(path.extension()?.to_str()?)
    }
}

/// 등록 대상 문서
#[derive(Debug, Clone)]
pub struct CollectedFile {
    pub path: PathBuf,
    pub file_type: FileType,
    /// 바이트
    pub size: u64,
}

/// 탐색 옵션
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub respect_gitignore: bool,
    pub include_hidden: bool,
    /// 0이면 제한 없음
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// 문서 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 검사
    ///
    /// 폴더 탐색과 달리 조용히 건너뛰지 않고 이유를 에러로 돌려줍니다.
    pub fn collect_file(&self, path: &Path) -> Result<CollectedFile> {
        let file_type = FileType::from_path(path).ok_or_else(|| {
            RagError::source_load(format!("Unsupported document type: {}", path.display()))
        })?;

        let metadata = std::fs::metadata(path)
            .map_err(|e| RagError::source_load(format!("Cannot read {}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(RagError::source_load(format!(
                "Not a file: {}",
                path.display()
            )));
        }
        if self.exceeds_limit(metadata.len()) {
            return Err(RagError::source_load(format!(
                "{} exceeds the {} byte limit",
                path.display(),
                self.config.max_file_size
            )));
        }

        Ok(CollectedFile {
            path: path.to_path_buf(),
            file_type,
            size: metadata.len(),
        })
    }

    /// 폴더 재귀 탐색 (경로순 정렬)
    pub fn collect_directory(&self, root: &Path) -> Result<Vec<CollectedFile>> {
        if !root.is_dir() {
            return Err(RagError::source_load(format!(
                "Not a directory: {}",
                root.display()
            )));
        }

        let use_gitignore = self.config.respect_gitignore;
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(use_gitignore)
            .git_global(use_gitignore)
            .git_exclude(use_gitignore)
            .build();

        let mut files: Vec<CollectedFile> = walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let file_type = FileType::from_path(entry.path())?;
                let size = entry.metadata().ok()?.len();
                if self.exceeds_limit(size) {
                    tracing::debug!("Skipping {:?}: {} bytes over limit", entry.path(), size);
                    return None;
                }
                Some(CollectedFile {
                    path: entry.into_path(),
                    file_type,
                    size,
                })
            })
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Found {} documents under {:?}", files.len(), root);
        Ok(files)
    }

    fn exceeds_limit(&self, size: u64) -> bool {
        self.config.max_file_size > 0 && size > self.config.max_file_size
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
    fn test_document_types() {
        assert_eq!(FileType::from_extension("Markdown"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("docx"), Some(FileType::Docx));
        assert_eq!(FileType::from_extension("png"), None);
        assert_eq!(FileType::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_collect_directory_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.md"), "# B").unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.csv"), "x,y").unwrap();

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md", "c.csv"]);
    }

    #[test]
    fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let big = dir.path().join("big.txt");
        std::fs::write(&big, "x".repeat(64)).unwrap();
        std::fs::write(dir.path().join("small.txt"), "x").unwrap();

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 16,
            ..Default::default()
        });
        let files = collector.collect_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 1);

        let err = collector.collect_file(&big).unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }

    #[test]
    fn test_collect_file() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("faq.md");
        std::fs::write(&doc, "# FAQ").unwrap();

        let collector = FileCollector::with_defaults();
        let file = collector.collect_file(&doc).unwrap();
        assert_eq!(file.file_type, FileType::Text);
        assert_eq!(file.size, 5);

        assert!(matches!(
            collector.collect_file(&dir.path().join("logo.png")),
            Err(RagError::SourceLoad(_))
        ));
        assert!(matches!(
            collector.collect_file(&dir.path().join("missing.md")),
            Err(RagError::SourceLoad(_))
        ));
    }

    #[test]
    fn test_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            FileCollector::with_defaults().collect_directory(&file),
            Err(RagError::SourceLoad(_))
        ));
    }
}
