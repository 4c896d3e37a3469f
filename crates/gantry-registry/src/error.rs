//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Worker not found in the directory
    #[error("worker not found: {worker_id}")]
    WorkerNotFound { worker_id: String },

    /// Directory is at its worker limit
    #[error("worker limit reached: {count} workers, limit {limit}")]
    WorkerLimitReached { count: usize, limit: usize },

    /// Internal registry error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    /// Create a worker not found error
    pub fn worker_not_found(worker_id: impl Into<String>) -> Self {
        Self::WorkerNotFound {
            worker_id: worker_id.into(),
        }
    }

    /// Check if this error indicates a retriable condition
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::WorkerLimitReached { .. })
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::worker_not_found("worker-1");
        assert!(err.to_string().contains("worker-1"));
    }

    #[test]
    fn test_error_retriable() {
        assert!(RegistryError::WorkerLimitReached {
            count: 1000,
            limit: 1000
        }
        .is_retriable());
        assert!(!RegistryError::worker_not_found("x").is_retriable());
    }
}
