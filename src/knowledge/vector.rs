//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 과목별로 파티셔닝된 교과서 청크 벡터의 공통 인터페이스입니다.
//! LanceDB ANN (Approximate Nearest Neighbor) 검색을 사용합니다.

use anyhow::Result;
use async_trait::async_trait;

use crate::syllabus::Subject;

/// 벡터 임베딩 차원 (Gemini gemini-embedding-001 기본값)
pub const EMBEDDING_DIMENSION: i32 = 768;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
///
/// 하나의 교과서 청크와 그 임베딩입니다. (subject, chapter, chunk_index)가
/// 청크의 출처를 식별합니다.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 과목
    pub subject: Subject,
    /// 단원 이름
    pub chapter: String,
    /// 단원 내 청크 인덱스 (0-based)
    pub chunk_index: i32,
    /// 청크 텍스트
    pub chunk_text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과 청크
#[derive(Debug, Clone)]
pub struct ChunkHit {
    /// 과목
    pub subject: Subject,
    /// 단원 이름
    pub chapter: String,
    /// 청크 텍스트
    pub chunk_text: String,
    /// 유사도 스코어 (0.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 과목 파티션 단위로 삽입/검색/삭제하는 벡터 저장소 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 과목 내 벡터 검색 (top-k)
    async fn search(
        &self,
        subject: Subject,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    /// 과목의 벡터 전체 삭제
    async fn delete_subject(&self, subject: Subject) -> Result<usize>;

    /// 전체 벡터 개수
    async fn count(&self) -> Result<usize>;

    /// 과목의 벡터 개수
    async fn count_subject(&self, subject: Subject) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
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

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
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
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        let empty: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&empty, &empty), 0.0);
    }
}
