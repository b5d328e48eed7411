//! Error types for Lodestone.

use thiserror::Error;

/// Result type alias using LodeError.
pub type Result<T> = std::result::Result<T, LodeError>;

/// Errors that can occur in Lodestone operations.
#[derive(Debug, Error)]
pub enum LodeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page_id} is out of bounds (file has {num_pages} pages)")]
    PageOutOfBounds { page_id: u32, num_pages: u32 },

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Index errors
    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("header page full, unable to record index root")]
    HeaderFull,

    #[error("b+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    ConfigError(String),
}
