//! 검색기 - 임베딩과 벡터 인덱스 결합
//!
//! 교과서 본문의 인덱싱(청킹 + 임베딩 + 저장)과 주제 검색
//! (질의 임베딩 + top-k 조회 + 컨텍스트 조립)을 담당합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::syllabus::Subject;

use super::chunker::{default_chunker, Chunker};
use super::lance::LanceVectorStore;
use super::vector::{ChunkHit, VectorEntry, VectorStore};

/// 기본 top-k
pub const DEFAULT_TOP_K: usize = 5;

/// 이보다 짧은 컨텍스트는 "내용 없음"으로 취급 (문자 수)
const MIN_CONTEXT_CHARS: usize = 50;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.pcb-tutor/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pcb-tutor")
}

/// 데이터 디렉토리 안의 인덱스 경로
pub fn index_path(data_dir: &Path) -> PathBuf {
    data_dir.join("index.lance")
}

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 컨텍스트
///
/// top-k 청크와, 청크 텍스트를 빈 줄로 이어붙인 프롬프트용 컨텍스트입니다.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// top-k 청크 (유사도 내림차순)
    pub hits: Vec<ChunkHit>,
    /// 프롬프트에 넣을 컨텍스트 텍스트
    pub context: String,
}

impl RetrievedContext {
    /// 컨텍스트가 문제 생성에 쓸 수 없을 만큼 빈약한지
    pub fn is_insufficient(&self) -> bool {
        self.context.trim().chars().count() < MIN_CONTEXT_CHARS
    }
}

/// 인덱스 통계
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// 전체 청크 수
    pub total_chunks: usize,
    /// 과목별 청크 수
    pub subjects: Vec<(Subject, usize)>,
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기
///
/// 임베더와 벡터 저장소를 묶어 인덱싱과 검색을 제공합니다.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Box<dyn Chunker>,
}

impl Retriever {
    /// 저장소와 임베더로 생성
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            chunker: default_chunker(),
        }
    }

    /// 청커를 교체하여 생성
    pub fn with_chunker(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Box<dyn Chunker>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
        }
    }

    /// 데이터 디렉토리의 LanceDB 인덱스와 Gemini 임베더로 생성
    ///
    /// # Arguments
    /// * `data_dir` - 인덱스 저장 디렉토리
    pub async fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let store = LanceVectorStore::open(&index_path(data_dir))
            .await
            .context("Failed to open vector store")?;

        let embedder = GeminiEmbedding::from_env().context("Failed to create embedder")?;

        Ok(Self::new(Arc::new(store), Arc::new(embedder)))
    }

    /// 단원 본문 인덱싱
    ///
    /// 본문을 청킹하고 각 청크를 문서 임베딩하여 저장합니다.
    ///
    /// # Returns
    /// 저장된 청크 수
    pub async fn ingest(&self, subject: Subject, chapter: &str, text: &str) -> Result<usize> {
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            tracing::warn!("No chunks generated for chapter: {}", chapter);
            return Ok(0);
        }

        let mut entries = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let embedding = self
                .embedder
                .embed_document(chunk)
                .await
                .context("Failed to embed chunk")?;

            entries.push(VectorEntry {
                subject,
                chapter: chapter.to_string(),
                chunk_index: i as i32,
                chunk_text: chunk.clone(),
                embedding,
            });
        }

        let inserted = self
            .store
            .insert_batch(&entries)
            .await
            .context("Failed to insert vectors")?;

        tracing::info!(
            "Indexed chapter: {} [{}] ({} chunks)",
            chapter,
            subject.as_str(),
            inserted
        );

        Ok(inserted)
    }

    /// 주제로 교과서 청크 검색
    ///
    /// 질의를 임베딩하여 과목 파티션에서 top-k 청크를 조회하고,
    /// 청크 텍스트를 빈 줄로 이어 컨텍스트를 만듭니다.
    pub async fn retrieve(
        &self,
        subject: Subject,
        topic: &str,
        limit: usize,
    ) -> Result<RetrievedContext> {
        let query_embedding = self
            .embedder
            .embed_query(topic)
            .await
            .context("Failed to embed query")?;

        let hits = self
            .store
            .search(subject, &query_embedding, limit)
            .await
            .context("Vector search failed")?;

        let context = hits
            .iter()
            .map(|h| h.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        tracing::debug!(
            "Retrieved {} chunks for '{}' [{}]",
            hits.len(),
            topic,
            subject.as_str()
        );

        Ok(RetrievedContext { hits, context })
    }

    /// 과목의 인덱스 삭제 (재인덱싱용)
    pub async fn clear_subject(&self, subject: Subject) -> Result<usize> {
        self.store.delete_subject(subject).await
    }

    /// 인덱스 통계
    pub async fn stats(&self) -> Result<IndexStats> {
        let total_chunks = self.store.count().await?;

        let mut subjects = Vec::with_capacity(Subject::ALL.len());
        for subject in Subject::ALL {
            let count = self.store.count_subject(subject).await?;
            subjects.push((subject, count));
        }

        Ok(IndexStats {
            total_chunks,
            subjects,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::EMBEDDING_DIMENSION;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 네트워크 없이 동작하는 결정적 임베더
    struct StubEmbedder;

    impl StubEmbedder {
        fn vector_for(text: &str) -> Vec<f32> {
            let mut vec = vec![0.0f32; EMBEDDING_DIMENSION as usize];
            for (i, byte) in text.bytes().enumerate() {
                let idx = (i + byte as usize) % vec.len();
                vec[idx] += 1.0;
            }
            vec
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            Ok(Self::vector_for(text))
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(Self::vector_for(text))
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIMENSION as usize
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    async fn create_test_retriever(dir: &TempDir) -> Retriever {
        let lance_path = dir.path().join("index.lance");
        let store = LanceVectorStore::open(&lance_path).await.unwrap();
        Retriever::new(Arc::new(store), Arc::new(StubEmbedder))
    }

    #[tokio::test]
    async fn test_ingest_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let retriever = create_test_retriever(&dir).await;

        let text = "Biotechnology is the use of living systems to develop products. \
                    Recombinant DNA technology joins DNA molecules from two different species. \
                    Genetic engineering has applications in medicine and agriculture.";

        let count = retriever
            .ingest(Subject::Biology, "Biotechnology", text)
            .await
            .unwrap();
        assert!(count > 0);

        let retrieved = retriever
            .retrieve(Subject::Biology, "recombinant DNA", DEFAULT_TOP_K)
            .await
            .unwrap();

        assert!(!retrieved.hits.is_empty());
        assert!(!retrieved.is_insufficient());
        assert!(retrieved.context.contains("DNA"));
        assert!(retrieved
            .hits
            .iter()
            .all(|h| h.chapter == "Biotechnology"));
    }

    #[tokio::test]
    async fn test_retrieve_other_subject_is_empty() {
        let dir = TempDir::new().unwrap();
        let retriever = create_test_retriever(&dir).await;

        retriever
            .ingest(Subject::Biology, "Biotechnology", "Some biology content here.")
            .await
            .unwrap();

        let retrieved = retriever
            .retrieve(Subject::Physics, "rotational dynamics", DEFAULT_TOP_K)
            .await
            .unwrap();

        assert!(retrieved.hits.is_empty());
        assert!(retrieved.is_insufficient());
    }

    #[tokio::test]
    async fn test_with_custom_chunker() {
        use super::super::chunker::{ChunkConfig, TextbookChunker};

        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("index.lance"))
            .await
            .unwrap();

        let chunker = Box::new(TextbookChunker::new(ChunkConfig::compact()));
        let retriever =
            Retriever::with_chunker(Arc::new(store), Arc::new(StubEmbedder), chunker);

        let count = retriever
            .ingest(
                Subject::Chemistry,
                "Solutions",
                "A solution is a homogeneous mixture of two or more substances. \
                 The component present in the larger amount is called the solvent.",
            )
            .await
            .unwrap();
        assert!(count > 0);
    }

    #[tokio::test]
    async fn test_ingest_empty_text() {
        let dir = TempDir::new().unwrap();
        let retriever = create_test_retriever(&dir).await;

        let count = retriever
            .ingest(Subject::Chemistry, "Solutions", "   ")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = TempDir::new().unwrap();
        let retriever = create_test_retriever(&dir).await;

        retriever
            .ingest(
                Subject::Physics,
                "Wave Optics",
                "Interference of light is the phenomenon of redistribution of light energy.",
            )
            .await
            .unwrap();

        let stats = retriever.stats().await.unwrap();
        assert!(stats.total_chunks > 0);

        let physics = stats
            .subjects
            .iter()
            .find(|(s, _)| *s == Subject::Physics)
            .unwrap();
        assert!(physics.1 > 0);
    }
}
