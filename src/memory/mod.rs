//! The `EmbeddingProvider` trait and its Ollama implementation, retained
//! from the teacher's episodic-memory subsystem for the sole thing the
//! context pipeline's embedding tool retriever (`context::retrieve::embedding`)
//! needs. See DESIGN.md for what else that subsystem carried and why it was
//! cut: the rest (decay scoring, a generic store trait, a Qdrant-backed
//! vector store) has no caller in this crate.

pub mod embedders;
pub mod embedding;
pub mod error;

pub use embedders::OllamaEmbedder;
pub use embedding::EmbeddingProvider;
pub use error::MemoryError;
