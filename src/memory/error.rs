#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("embedding error: {0}")]
    Embedding(String),
}
