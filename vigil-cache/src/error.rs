use crate::entry::QueryKey;

/// Errors surfaced by cache operations that return results to the caller.
///
/// Background refetch failures do not appear here: they are recorded on the
/// entry (`CacheStatus::Error` plus the error detail) and logged, with no
/// automatic retry.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// The remote write behind an optimistic mutation failed; the entry was
    /// rolled back to its last confirmed value.
    MutationFailed { key: QueryKey, reason: String },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::MutationFailed { key, reason } => {
                write!(f, "Mutation of '{key}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CacheError {}
