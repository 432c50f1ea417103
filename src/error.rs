//! Error types for the meshstore agent info cache

use thiserror::Error;

/// Boxed error produced by injected collaborators (RPC fetcher, hardware
/// scanner, interface providers).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Main cache error type
#[derive(Debug, Error)]
pub enum CacheError {
    /// Operation attempted on an entry that has never successfully fetched
    #[error("uninitialized: {0}")]
    Uninitialized(&'static str),

    /// Fetched attach info failed validation
    #[error("invalid attach info: {0}")]
    Validation(String),

    /// Remote fetch or hardware scan failure; cached content is unchanged
    #[error("fetch failed: {0}")]
    Fetch(CollaboratorError),

    /// Fabric interfaces did not become ready before the deadline
    #[error("timed out after {0:?} waiting for fabric interfaces to become ready")]
    ReadinessTimeout(std::time::Duration),

    /// Requested fabric device does not exist in the topology
    #[error("fabric device not found: {0}")]
    NotFound(String),

    /// A cache entry did not match its expected kind; key collision bug
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Facade-level refresh with both sub-caches disabled
    #[error("all caches are disabled")]
    CachesDisabled,
}

impl From<CollaboratorError> for CacheError {
    fn from(error: CollaboratorError) -> Self {
        Self::Fetch(error)
    }
}

/// Convenient alias for Result with cache error
pub type Result<T> = std::result::Result<T, CacheError>;
