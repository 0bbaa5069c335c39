/// Errors reported by the auth provider collaborator.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The one-shot session check failed (network, backend, malformed reply).
    SessionCheckFailed(String),
    /// The provider rejected a sign-out request.
    SignOutFailed(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::SessionCheckFailed(msg) => write!(f, "Session check failed: {msg}"),
            ProviderError::SignOutFailed(msg) => write!(f, "Sign-out failed: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors reported by the data backend collaborator.
///
/// The transport's own timeout is folded in here: "no response" and "error
/// response" are indistinguishable to the core.
#[derive(Debug, Clone)]
pub enum BackendError {
    QueryFailed(String),
    MutationFailed(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            BackendError::MutationFailed(msg) => write!(f, "Mutation failed: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}
