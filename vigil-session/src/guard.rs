use vigil_core::Role;

use crate::policy::RouteAccessPolicy;

/// Why a route evaluation denied access. Drives whether the coordinator
/// shows an "unauthorized" notice (only for [`DenyReason::OutsideRoleArea`])
/// or redirects silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No session and the path needs one.
    Unauthenticated,
    /// Valid session, but the path belongs to another role's area.
    OutsideRoleArea,
    /// Authenticated users never see the login screen or the bare root.
    AlreadyAuthenticated,
}

/// Outcome of a route evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny {
        redirect_to: String,
        reason: DenyReason,
    },
}

impl Access {
    pub fn is_allow(&self) -> bool {
        matches!(self, Access::Allow)
    }
}

/// Pure route policy evaluator: no side effects, no I/O.
///
/// Rules:
/// - Without a role, the login path and anything outside the authenticated
///   area are allowed; protected paths deny toward the login path.
/// - With a role, the bare root and the login path deny toward the role's
///   home ("authenticated users never see the login screen").
/// - Otherwise a path is allowed iff it sits inside the role's prefix set;
///   denials redirect to the role's home.
#[derive(Clone, Debug, Default)]
pub struct RouteGuard {
    policy: RouteAccessPolicy,
}

impl RouteGuard {
    pub fn new(policy: RouteAccessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RouteAccessPolicy {
        &self.policy
    }

    pub fn evaluate(&self, role: Option<Role>, path: &str) -> Access {
        match role {
            None => {
                if self.policy.is_protected(path) {
                    Access::Deny {
                        redirect_to: self.policy.login_path().to_string(),
                        reason: DenyReason::Unauthenticated,
                    }
                } else {
                    Access::Allow
                }
            }
            Some(role) => {
                if path == "/" || path_is_under(path, self.policy.login_path()) {
                    return Access::Deny {
                        redirect_to: self.policy.home(role).to_string(),
                        reason: DenyReason::AlreadyAuthenticated,
                    };
                }
                if self.policy.allows(role, path) || !self.policy.is_protected(path) {
                    Access::Allow
                } else {
                    Access::Deny {
                        redirect_to: self.policy.home(role).to_string(),
                        reason: DenyReason::OutsideRoleArea,
                    }
                }
            }
        }
    }
}

fn path_is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
