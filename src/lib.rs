//! pcb-tutor - Class 12 PCB MCQ 생성 데모
//!
//! 교과서 발췌를 벡터 인덱스에서 검색(RAG)하고 LLM에 전달하여
//! 객관식 문제를 생성하는 데모 서비스입니다.

pub mod cli;
pub mod embedding;
pub mod generation;
pub mod knowledge;
pub mod mcq;
pub mod server;
pub mod syllabus;

// Re-exports
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use generation::{
    get_groq_api_key, has_groq_api_key, ChatOptions, ChatProvider, GroqClient,
};
pub use knowledge::{
    cosine_similarity, default_chunker, get_data_dir, ChunkConfig, ChunkHit, Chunker,
    IndexStats, LanceVectorStore, RetrievedContext, Retriever, TextbookChunker, VectorEntry,
    VectorStore, DEFAULT_TOP_K, EMBEDDING_DIMENSION,
};
pub use mcq::{clamp_num_questions, GeneratedMcqs, McqError, McqService};
pub use syllabus::Subject;
