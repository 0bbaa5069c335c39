//! Vigil — the session-authorization and cache-synchronization core of a
//! role-aware monitoring dashboard.
//!
//! This facade crate re-exports the Vigil sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use vigil::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature   | Default | Crate           |
//! |-----------|---------|-----------------|
//! | `session` | **yes** | `vigil-session` |
//! | `cache`   | **yes** | `vigil-cache`   |

// Re-export everything from vigil-core at the top level for convenience.
pub use vigil_core::*;

#[cfg(feature = "session")]
pub use vigil_session;

#[cfg(feature = "cache")]
pub use vigil_cache;

pub mod prelude {
    //! Re-exports of the most commonly used Vigil types.
    pub use vigil_core::prelude::*;

    #[cfg(feature = "session")]
    pub use vigil_session::prelude::*;

    #[cfg(feature = "cache")]
    pub use vigil_cache::{CacheEntry, CacheStatus, CacheSyncCoordinator, QueryKey, WatchGuard};
}
