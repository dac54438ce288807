//! Vector Store - 패시지 저장 트레이트 및 유사도 유틸리티
//!
//! 챗봇 단위로 격리된 패시지를 저장하고, 질의 벡터와의 코사인 유사도로
//! 정렬된 결과를 반환합니다. 테넌트당 코퍼스가 작으므로 선형 탐색을 사용합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

use super::store::SourceKind;

// ============================================================================
// Types
// ============================================================================

/// 패시지 메타데이터 (인용 표시용으로 그대로 보존)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassageMetadata {
    /// 소스 종류
    pub kind: SourceKind,
    /// 원본 위치 (URL, 파일 경로, 텍스트 요약)
    pub locator: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: usize,
    /// 소스의 전체 청크 수
    pub total_chunks: usize,
}

/// 저장할 패시지 (임베딩 완료)
#[derive(Debug, Clone)]
pub struct NewPassage {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: PassageMetadata,
}

/// 저장된 패시지
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: String,
    pub chatbot_id: String,
    pub source_id: String,
    /// 소스 내 순서
    pub ordinal: usize,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: PassageMetadata,
    pub created_at: DateTime<Utc>,
}

/// 검색 결과
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

/// 개별 패시지 삽입 실패
#[derive(Debug, Clone)]
pub struct InsertFailure {
    /// 입력 배치 내 위치
    pub index: usize,
    pub reason: String,
}

/// 삽입 결과 보고
///
/// 배치 일부만 저장될 수 있으며, 저장된 패시지는 롤백하지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub total: usize,
    /// 저장된 패시지 ID
    pub inserted: Vec<String>,
    pub failures: Vec<InsertFailure>,
}

impl InsertReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.inserted.len() == self.total
    }

    /// 전체 성공이 아니면 `StorePartialFailure`
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(RagError::StorePartialFailure {
                inserted: self.inserted.len(),
                total: self.total,
            })
        }
    }
}

// ============================================================================
// PassageStore Trait
// ============================================================================

/// PassageStore 트레이트 (async)
///
/// 모든 연산은 챗봇 ID로 범위가 제한되며, 격리는 저장소의 쿼리 계층에서 보장합니다.
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// 한 소스의 패시지 배치 삽입 (부분 성공 보고)
    ///
    /// 소스가 없거나 다른 챗봇 소유면 아무것도 저장하지 않고 `NotFound`.
    async fn insert(
        &self,
        chatbot_id: &str,
        source_id: &str,
        passages: &[NewPassage],
    ) -> Result<InsertReport>;

    /// 챗봇 범위 유사도 검색 (점수 내림차순, 동점은 삽입 순서)
    ///
    /// 질의 벡터 차원이 저장된 패시지와 다르면 `RetrievalContext`.
    async fn search(
        &self,
        chatbot_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>>;

    /// 소스의 모든 패시지 삭제
    async fn delete_by_source(&self, source_id: &str) -> Result<usize>;

    /// 소스의 패시지 수
    async fn count_by_source(&self, source_id: &str) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 비어 있거나,
/// 어느 한쪽의 노름이 0이면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 후보 패시지를 점수순으로 정렬 후 `limit` 개로 자름
///
/// `candidates` 는 삽입 순서여야 합니다. 안정 정렬이므로 동점은 삽입 순서를 유지합니다.
pub fn rank_passages(
    candidates: Vec<Passage>,
    query_embedding: &[f32],
    limit: usize,
) -> Vec<ScoredPassage> {
    let mut scored: Vec<ScoredPassage> = candidates
        .into_iter()
        .map(|passage| {
            let score = cosine_similarity(query_embedding, &passage.embedding);
            ScoredPassage { passage, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// 임베딩을 little-endian BLOB으로 인코딩
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// BLOB을 임베딩으로 디코딩
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, embedding: Vec<f32>) -> Passage {
        Passage {
            id: id.to_string(),
            chatbot_id: "bot".to_string(),
            source_id: "src".to_string(),
            ordinal: 0,
            content: id.to_string(),
            embedding,
            metadata: PassageMetadata {
                kind: SourceKind::Text,
                locator: "text".to_string(),
                chunk_index: 0,
                total_chunks: 1,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![0.3, -1.2, 4.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        let score = cosine_similarity(&a, &zero);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn test_cosine_similarity_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_passages_orders_and_truncates() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            passage("far", vec![0.0, 1.0]),
            passage("best", vec![1.0, 0.0]),
            passage("mid", vec![1.0, 1.0]),
        ];

        let ranked = rank_passages(candidates, &query, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].passage.id, "best");
        assert_eq!(ranked[1].passage.id, "mid");
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_rank_passages_ties_keep_insertion_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            passage("first", vec![2.0, 0.0]),
            passage("second", vec![1.0, 0.0]),
            passage("third", vec![5.0, 0.0]),
        ];

        let ranked = rank_passages(candidates, &query, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.passage.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_embedding_blob_codec() {
        let embedding = vec![0.5, -1.25, 3.0e-7, f32::MAX];
        let bytes = encode_embedding(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_embedding(&bytes), embedding);
    }

    #[test]
    fn test_insert_report_partial() {
        let mut report = InsertReport::new(5);
        report.inserted = vec!["a".into(), "b".into(), "c".into()];
        assert!(!report.is_complete());

        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Added 3/5 chunks");
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = PassageMetadata {
            kind: SourceKind::Website,
            locator: "https://example.com".into(),
            chunk_index: 2,
            total_chunks: 7,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "website");
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["totalChunks"], 7);
    }
}
