//! Log-Side Error Types
//!
//! All operations in this crate return `Result<T>`, aliased to
//! `Result<T, Error>`, so callers can propagate with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint {name} is corrupt: {reason}")]
    CorruptCheckpoint { name: String, reason: String },

    #[error("Reader pool is closed")]
    PoolClosed,
}
