//! Index-Side Error Types
//!
//! Only two things are genuine errors on the read path:
//!
//! - **Argument errors**: the caller passed an empty stream id, a negative
//!   event number where forbidden, or a zero count. Programmer error; the
//!   call aborts.
//! - **Corruption**: the index points at a log position that does not hold a
//!   prepare record, or a metastream claims a metadata event that is not in
//!   the log. The store's integrity is violated; the error propagates.
//!
//! Everything else - missing streams, deleted streams, expired events,
//! unresolvable hash collisions - is a normal outcome encoded in result
//! values, so one unlucky read never aborts a request pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store corruption: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log error: {0}")]
    Log(#[from] tidehouse_log::Error),
}
