use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::{BackendError, ProviderError};
use crate::session::{AuthEvent, ChangeEvent, ChangeOp, Session};

/// Boxed future alias used by the dyn-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The authentication provider, abstracted behind a narrow seam.
///
/// Push delivery is modeled as a message channel rather than ad hoc callback
/// registration: `subscribe` hands back a receiver, and the session store's
/// single worker loop drains it in arrival order. Dropping the receiver (or
/// cancelling the worker) releases the subscription.
pub trait AuthProvider: Send + Sync {
    /// One-shot "who is signed in right now" check issued at startup.
    fn current_session(&self) -> BoxFuture<'_, Result<Option<Session>, ProviderError>>;

    /// Arm the push subscription. Events arrive in provider order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthEvent>;

    /// Ask the provider to terminate the current session.
    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>>;
}

/// The data backend the cache fetches from and writes through.
///
/// Rows are opaque JSON values; the core never interprets them beyond
/// caching. The change feed is a channel for the same reason as
/// [`AuthProvider::subscribe`].
pub trait DataBackend: Send + Sync {
    fn query<'a>(
        &'a self,
        entity: &'a str,
        filter: &'a str,
    ) -> BoxFuture<'a, Result<Vec<serde_json::Value>, BackendError>>;

    /// Apply one operation with its payload to the entity's rows.
    fn mutate<'a>(
        &'a self,
        entity: &'a str,
        op: ChangeOp,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Arm the change feed for all entities this backend serves.
    fn subscribe_to_changes(&self) -> mpsc::UnboundedReceiver<ChangeEvent>;
}

/// UI-side navigation sink.
///
/// The coordinator decides *where* to go; the collaborator owns the actual
/// history/router mechanics.
pub trait Navigator: Send + Sync {
    /// The path currently displayed.
    fn current_path(&self) -> String;

    /// Replace the current location.
    fn navigate(&self, path: &str);
}

/// Severity of a user-visible notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// Fire-and-forget user notification sink (toasts, status banners).
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Default notifier that forwards notices to the `tracing` log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Info => tracing::info!(notice = message, "user notice"),
            NoticeKind::Error => tracing::warn!(notice = message, "user notice"),
        }
    }
}

/// Anything holding session-scoped state that must be wiped on sign-out.
///
/// Implemented by the cache coordinator; lets the navigation layer clear
/// session data without a crate dependency on the cache.
pub trait SessionScoped: Send + Sync {
    fn clear_session_scope(&self);
}
