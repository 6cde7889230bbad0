//! LanceDB Vector Store - 교과서 청크 벡터 인덱스
//!
//! 과목(subject) 컬럼으로 파티셔닝된 단일 테이블에 청크와 임베딩을
//! 저장하고, 검색 시 과목 필터를 ANN 쿼리에 푸시다운합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::syllabus::Subject;

use super::vector::{ChunkHit, VectorEntry, VectorStore, EMBEDDING_DIMENSION};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// Apache Arrow 기반 columnar 포맷으로 빠른 읽기/쓰기를 제공합니다.
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema() -> Schema {
        Schema::new(vec![
            Field::new("subject", DataType::Utf8, false),
            Field::new("chapter", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    EMBEDDING_DIMENSION,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        let subjects: Vec<&str> = entries.iter().map(|e| e.subject.as_str()).collect();
        let chapters: Vec<&str> = entries.iter().map(|e| e.chapter.as_str()).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index).collect();
        let chunk_texts: Vec<&str> = entries.iter().map(|e| e.chunk_text.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            EMBEDDING_DIMENSION,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::create_schema()),
            vec![
                Arc::new(StringArray::from(subjects)),
                Arc::new(StringArray::from(chapters)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(chunk_texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// 과목 필터 조건식
    ///
    /// subject 값은 enum에서 나오므로 인젝션 여지가 없습니다.
    fn subject_filter(subject: Subject) -> String {
        format!("subject = '{}'", subject.as_str())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = Self::entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            // 기존 테이블에 추가
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            // 새 테이블 생성
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(entries.len())
    }

    async fn search(
        &self,
        subject: Subject,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        // 과목 필터를 ANN 쿼리에 푸시다운
        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .only_if(Self::subject_filter(subject))
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let mut hits = Vec::new();

        // RecordBatch 스트림에서 결과 추출
        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        for batch in batches {
            let subjects = batch
                .column_by_name("subject")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing subject column"))?;

            let chapters = batch
                .column_by_name("chapter")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chapter column"))?;

            let chunk_texts = batch
                .column_by_name("chunk_text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_text column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let subject = match Subject::from_str(subjects.value(i)) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("Skipping row with bad subject: {}", e);
                        continue;
                    }
                };

                let distance = distances.value(i);
                // 거리를 유사도로 변환 (L2 거리 -> 코사인 유사도 근사)
                let similarity = 1.0 / (1.0 + distance);

                hits.push(ChunkHit {
                    subject,
                    chapter: chapters.value(i).to_string(),
                    chunk_text: chunk_texts.value(i).to_string(),
                    similarity,
                });
            }
        }

        Ok(hits)
    }

    async fn delete_subject(&self, subject: Subject) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for delete")?;

        let before_count = self.count().await?;

        table
            .delete(&Self::subject_filter(subject))
            .await
            .context("Failed to delete vectors")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    async fn count_subject(&self, subject: Subject) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;

        let count = table
            .count_rows(Some(Self::subject_filter(subject)))
            .await
            .context("Failed to count rows for subject")?;

        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_entry(subject: Subject, chapter: &str, chunk_index: i32) -> VectorEntry {
        VectorEntry {
            subject,
            chapter: chapter.to_string(),
            chunk_index,
            chunk_text: format!("Chunk {} of {}", chunk_index, chapter),
            embedding: vec![0.1; EMBEDDING_DIMENSION as usize],
        }
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("test.lance");

        let store = LanceVectorStore::open(&lance_path).await.unwrap();

        // 초기 상태
        assert_eq!(store.count().await.unwrap(), 0);

        // 삽입
        let entries = vec![
            create_test_entry(Subject::Biology, "Biotechnology", 0),
            create_test_entry(Subject::Biology, "Biotechnology", 1),
            create_test_entry(Subject::Physics, "Wave Optics", 0),
        ];
        let inserted = store.insert_batch(&entries).await.unwrap();
        assert_eq!(inserted, 3);

        // 개수 확인 (전체 / 과목별)
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.count_subject(Subject::Biology).await.unwrap(), 2);
        assert_eq!(store.count_subject(Subject::Physics).await.unwrap(), 1);
        assert_eq!(store.count_subject(Subject::Chemistry).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lance_search_respects_subject() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("search_test.lance");

        let store = LanceVectorStore::open(&lance_path).await.unwrap();

        let entries = vec![
            create_test_entry(Subject::Biology, "Biotechnology", 0),
            create_test_entry(Subject::Chemistry, "Electrochemistry", 0),
            create_test_entry(Subject::Chemistry, "Solutions", 0),
        ];
        store.insert_batch(&entries).await.unwrap();

        let query = vec![0.1; EMBEDDING_DIMENSION as usize];
        let hits = store.search(Subject::Chemistry, &query, 10).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.subject == Subject::Chemistry));

        // 빈 과목은 빈 결과
        let hits = store.search(Subject::Physics, &query, 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_lance_delete_subject() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("delete_test.lance");

        let store = LanceVectorStore::open(&lance_path).await.unwrap();

        let entries = vec![
            create_test_entry(Subject::Biology, "Biotechnology", 0),
            create_test_entry(Subject::Biology, "Ecosystems and Energy Flow", 1),
            create_test_entry(Subject::Physics, "AC Circuits", 0),
        ];
        store.insert_batch(&entries).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        // Biology만 삭제
        let deleted = store.delete_subject(Subject::Biology).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.count_subject(Subject::Physics).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_on_missing_table() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("empty.lance");

        let store = LanceVectorStore::open(&lance_path).await.unwrap();
        let query = vec![0.0; EMBEDDING_DIMENSION as usize];

        let hits = store.search(Subject::Biology, &query, 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
