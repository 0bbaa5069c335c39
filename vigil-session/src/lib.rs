pub mod guard;
pub mod nav;
pub mod policy;
pub mod resolver;
pub mod store;

// Re-export primary public types for convenience.
pub use guard::{Access, DenyReason, RouteGuard};
pub use nav::{NavigationCoordinator, ViewState};
pub use policy::{PolicyError, RouteAccessPolicy};
pub use resolver::RoleResolver;
pub use store::{SessionStore, Transition, TransitionCause};

pub mod prelude {
    //! Re-exports of the most commonly used session types.
    pub use crate::{
        Access, NavigationCoordinator, RoleResolver, RouteAccessPolicy, RouteGuard, SessionStore,
        Transition, ViewState,
    };
}
