//! Text Chunking Module
//!
//! 고정 크기 + 오버랩 방식의 재귀 문자 분할기입니다.
//! 윈도우 안에서 문단 경계 > 줄바꿈 > 공백 순으로 마지막 구분자를 찾아 자르고,
//! 구분자가 없으면 `chunk_size` 위치에서 강제로 자릅니다.
//!
//! 모든 청크는 원문의 연속된 부분 문자열이며, 다음 청크는 이전 청크의
//! 마지막 `chunk_overlap` 문자로 시작합니다. 따라서 오버랩을 제거하고 이어 붙이면
//! 원문이 정확히 복원됩니다.

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 분할 우선순위 (문단 > 줄 > 단어)
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 다음 청크 앞에 반복되는 문자 수
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

impl ChunkConfig {
    /// 이 설정으로 분할
    pub fn split(&self, text: &str) -> Vec<String> {
        split_text(text, self.chunk_size, self.chunk_overlap)
    }
}

// ============================================================================
// Splitting
// ============================================================================

/// 텍스트를 오버랩 있는 청크로 분할
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `chunk_size` - 청크 당 최대 문자 수 (0은 1로 취급)
/// * `chunk_overlap` - 청크 간 중첩 문자 수 (`chunk_size - 1` 로 제한)
///
/// # Returns
/// 순서가 보존된 청크 목록. 공백뿐인 입력이면 빈 목록.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![];
    }

    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);

    // 문자 인덱스 -> 바이트 오프셋 (마지막 원소는 text.len())
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        if total_chars - start <= chunk_size {
            chunks.push(text[bounds[start]..].to_string());
            break;
        }

        let end = find_split_point(text, &bounds, start, start + chunk_size, overlap);
        chunks.push(text[bounds[start]..bounds[end]].to_string());

        // end - start > overlap 이므로 항상 전진
        start = end - overlap;
    }

    chunks
}

/// 윈도우 `[start, window_end)` 안에서 분할 위치(문자 인덱스)를 찾음
///
/// 구분자는 앞 청크의 끝에 포함됩니다. 청크 길이가 오버랩 이하가 되는 위치는
/// 진행이 멈추므로 건너뜁니다.
fn find_split_point(
    text: &str,
    bounds: &[usize],
    start: usize,
    window_end: usize,
    overlap: usize,
) -> usize {
    let base = bounds[start];
    let window = &text[base..bounds[window_end]];

    for separator in SEPARATORS {
        let Some(pos) = window.rfind(separator) else {
            continue;
        };

        let split_byte = base + pos + separator.len();
        if let Ok(split_char) = bounds.binary_search(&split_byte) {
            if split_char - start > overlap {
                return split_char;
            }
        }
    }

    window_end
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// 오버랩을 제거하고 이어 붙여 원문 복원
    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(chunk);
            } else {
                out.extend(chunk.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_split_empty() {
        let config = ChunkConfig::default();
        assert!(config.split("").is_empty());
        assert!(config.split("   \n\n\t  ").is_empty());
    }

    #[test]
    fn test_chunker_small_text() {
        let chunks = split_text("Short paragraph.", 1000, 150);
        assert_eq!(chunks, vec!["Short paragraph.".to_string()]);
    }

    #[test]
    fn test_cat_and_dog_example() {
        let text = "A cat sat on a mat. A dog ran in the park.";
        let chunks = split_text(text, 20, 5);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20, "chunk too long: {:?}", chunk);
        }
        assert!(chunks.iter().any(|c| c.contains("dog")));
        assert_eq!(reconstruct(&chunks, 5), text);
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = "First paragraph here.\n\nSecond one follows with more words.";
        let chunks = split_text(text, 40, 0);
        assert_eq!(chunks[0], "First paragraph here.\n\n");
        assert_eq!(reconstruct(&chunks, 0), text);
    }

    #[test]
    fn test_prefers_line_break_over_space() {
        let text = "alpha beta\ngamma delta epsilon zeta";
        let chunks = split_text(text, 20, 0);
        assert_eq!(chunks[0], "alpha beta\n");
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = split_text(text, 10, 2);
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "ijklmnopqr");
        assert_eq!(reconstruct(&chunks, 2), text);
    }

    #[test]
    fn test_reconstruction_various_inputs() {
        let inputs = [
            "The quick brown fox jumps over the lazy dog. ".repeat(30),
            "line one\nline two\nline three\n\nnext paragraph\n".repeat(12),
            "안녕하세요 세계! 한국어 문장도 잘 나뉘어야 합니다. ".repeat(20),
            "x".repeat(257),
            "  leading and trailing spaces  ".to_string(),
        ];

        for text in inputs.iter() {
            for (size, overlap) in [(50, 10), (37, 0), (100, 99), (7, 3)] {
                let chunks = split_text(text, size, overlap);
                assert!(!chunks.is_empty());
                for chunk in &chunks {
                    assert!(chunk.chars().count() <= size);
                }
                assert_eq!(&reconstruct(&chunks, overlap), text);
            }
        }
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunks = split_text("a b c d e f g h", 4, 10);
        assert_eq!(reconstruct(&chunks, 3), "a b c d e f g h");
    }

    #[test]
    fn test_deterministic() {
        let text = "Repeatable input.\nWith lines.\n\nAnd paragraphs. ".repeat(10);
        assert_eq!(split_text(&text, 64, 16), split_text(&text, 64, 16));
    }

    #[test]
    fn test_config_split() {
        let default = ChunkConfig::default();
        assert_eq!(default.chunk_size, 1000);
        assert_eq!(default.chunk_overlap, 150);

        let config = ChunkConfig {
            chunk_size: 10,
            chunk_overlap: 0,
        };
        assert_eq!(config.split("aaaaaaaaaabbbbbbbbbb").len(), 2);
    }
}
