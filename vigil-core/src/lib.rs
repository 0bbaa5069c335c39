pub mod config;
pub mod entity;
pub mod error;
pub mod provider;
pub mod role;
pub mod session;

// Re-export primary public types for convenience.
pub use config::{ConfigError, VigilConfig};
pub use error::{BackendError, ProviderError};
pub use provider::{
    AuthProvider, BoxFuture, DataBackend, Navigator, NoticeKind, Notifier, SessionScoped,
    TracingNotifier,
};
pub use role::Role;
pub use session::{AuthEvent, ChangeEvent, ChangeOp, Session, SessionState};

pub mod prelude {
    //! Re-exports of the most commonly used core types.
    pub use crate::{
        AuthEvent, AuthProvider, ChangeEvent, ChangeOp, DataBackend, Navigator, NoticeKind,
        Notifier, Role, Session, SessionState, VigilConfig,
    };
}
