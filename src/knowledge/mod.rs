//! Knowledge 모듈 - 교과서 벡터 인덱스
//!
//! - Chunker: 교과서 본문 분할
//! - LanceDB: 과목 파티션 벡터 검색 (ANN)
//! - Retriever: 인덱싱 + top-k 검색 + 컨텍스트 조립

mod chunker;
mod lance;
mod retriever;
mod vector;

// Re-exports
pub use chunker::{default_chunker, ChunkConfig, Chunker, TextbookChunker};
pub use lance::LanceVectorStore;
pub use retriever::{
    get_data_dir, index_path, IndexStats, RetrievedContext, Retriever, DEFAULT_TOP_K,
};
pub use vector::{
    cosine_similarity, ChunkHit, VectorEntry, VectorStore, EMBEDDING_DIMENSION,
};
