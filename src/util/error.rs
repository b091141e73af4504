//! The error taxonomy of the engine.
//!
//! [`ArenaError::Resource`] and [`ArenaError::OutOfMemory`] are recoverable. The caller may
//! collect and retry, or report the failure upwards. [`ArenaError::Consistency`] and
//! [`ArenaError::Platform`] mean an invariant of the engine no longer holds. The embedding must
//! not continue to use the arena after seeing one of them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    /// A bounded resource is exhausted: address space, commit, trace identifiers, or shield
    /// cache entries.
    #[error("resource exhausted: {0}")]
    Resource(String),
    /// No extent can satisfy a segment request, even after reusing spare memory and reserving
    /// more address space.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// An invariant was violated by the engine or by the embedding.
    #[error("consistency check failed: {0}")]
    Consistency(String),
    /// A protection or mapping primitive failed.
    #[error("platform operation `{op}` failed: {source}")]
    Platform {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ArenaError {
    pub fn resource(msg: impl Into<String>) -> Self {
        ArenaError::Resource(msg.into())
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        ArenaError::OutOfMemory(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        ArenaError::Consistency(msg.into())
    }

    pub fn platform(op: &'static str, source: std::io::Error) -> Self {
        ArenaError::Platform { op, source }
    }

    /// Fatal errors leave the arena in an unusable state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArenaError::Consistency(_) | ArenaError::Platform { .. })
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ArenaError::OutOfMemory(_))
    }
}

pub type Result<T> = std::result::Result<T, ArenaError>;

/// Return a consistency error from the enclosing function if `cond` does not hold.
macro_rules! ensure_consistent {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::util::error::ArenaError::consistency(format!($($arg)+)));
        }
    };
}
pub(crate) use ensure_consistent;
