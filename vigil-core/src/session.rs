use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated-principal record held client-side after sign-in.
///
/// At most one session exists at a time. Sessions are immutable snapshots:
/// the store replaces them wholesale on every provider event, consumers never
/// mutate them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique principal id assigned by the auth provider.
    pub principal_id: Uuid,
    /// The identifier role derivation reads, typically an email address.
    pub identifier: String,
    /// When the session was issued.
    pub issued_at: DateTime<Utc>,
    /// False once the provider reports the session expired or revoked.
    pub valid: bool,
}

impl Session {
    pub fn new(principal_id: Uuid, identifier: impl Into<String>) -> Self {
        Self {
            principal_id,
            identifier: identifier.into(),
            issued_at: Utc::now(),
            valid: true,
        }
    }

    /// Whether `other` refers to the same principal. A token refresh keeps
    /// the principal and must not look like a sign-in.
    pub fn same_principal(&self, other: &Session) -> bool {
        self.principal_id == other.principal_id
    }
}

/// Event pushed by the auth provider's subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

/// The session slot's state machine.
///
/// `Uninitialized -> Checking -> {Authenticated, Unauthenticated}`, then back
/// through `Checking` on later provider events. Consumers must not render
/// protected content before the first determination completes.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Checking,
    Authenticated(Session),
    Unauthenticated,
}

impl SessionState {
    /// True once the initial check (or any later event) has produced a
    /// definite answer.
    pub fn is_determined(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticated(_) | SessionState::Unauthenticated
        )
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Operation carried by a backend change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Backend-pushed notification that rows of some entity changed.
///
/// Consumed once by the cache to decide which entries to invalidate.
/// `affected_keys` is advisory: invalidation is entity-wide because a
/// filtered query's membership cannot be known without re-fetching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: String,
    pub op: ChangeOp,
    pub affected_keys: Vec<String>,
}

impl ChangeEvent {
    pub fn new(entity: impl Into<String>, op: ChangeOp) -> Self {
        Self {
            entity: entity.into(),
            op,
            affected_keys: Vec::new(),
        }
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.affected_keys = keys.into_iter().collect();
        self
    }
}
