use std::collections::HashMap;

use vigil_core::{Role, VigilConfig};

/// Route table for one role: the prefixes it may visit and its home page.
#[derive(Clone, Debug)]
struct RoleRoutes {
    prefixes: Vec<String>,
    home: String,
}

/// Policy errors raised at construction time. The table is validated once,
/// up front; evaluation never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A role was registered with no permitted prefixes.
    EmptyPrefixSet(Role),
    /// A role's home path is not inside any of its own prefixes.
    HomeOutsidePrefixes { role: Role, home: String },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::EmptyPrefixSet(role) => {
                write!(f, "Role '{role}' has an empty route prefix set")
            }
            PolicyError::HomeOutsidePrefixes { role, home } => {
                write!(f, "Home path '{home}' for role '{role}' is outside its prefixes")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Mapping from [`Role`] to permitted path prefixes, plus the login path.
///
/// Invariants (enforced in [`RouteAccessPolicy::with_role`]): every role has
/// a non-empty prefix set, and exactly one designated home inside it.
///
/// Prefix matching is segment-aware: `/admin` covers `/admin` and
/// `/admin/tasks` but not `/administrator`.
#[derive(Clone, Debug)]
pub struct RouteAccessPolicy {
    routes: HashMap<Role, RoleRoutes>,
    login_path: String,
}

impl RouteAccessPolicy {
    /// Start an empty policy with the given login path.
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            login_path: login_path.into(),
        }
    }

    /// Register a role's prefix set and home path.
    pub fn with_role(
        mut self,
        role: Role,
        prefixes: Vec<String>,
        home: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        if prefixes.is_empty() {
            return Err(PolicyError::EmptyPrefixSet(role));
        }
        let home = home.into();
        if !prefixes.iter().any(|p| path_has_prefix(&home, p)) {
            return Err(PolicyError::HomeOutsidePrefixes { role, home });
        }
        self.routes.insert(role, RoleRoutes { prefixes, home });
        Ok(self)
    }

    /// The standard dashboard layout: each role confined to `/{role}`,
    /// landing on `/{role}/overview`.
    pub fn standard(login_path: impl Into<String>) -> Self {
        let mut policy = Self::new(login_path);
        for role in Role::ALL {
            policy = policy
                .with_role(role, vec![role.route_prefix()], role.home_path())
                .expect("built-in routes satisfy policy invariants");
        }
        policy
    }

    pub fn from_config(config: &VigilConfig) -> Self {
        Self::standard(config.login_path.clone())
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// The role's designated post-login landing page.
    ///
    /// Every role in the table has one; an unregistered role falls back to
    /// the login path rather than panicking.
    pub fn home(&self, role: Role) -> &str {
        match self.routes.get(&role) {
            Some(routes) => &routes.home,
            None => &self.login_path,
        }
    }

    /// Whether `path` sits inside one of `role`'s permitted prefixes.
    pub fn allows(&self, role: Role, path: &str) -> bool {
        self.routes
            .get(&role)
            .is_some_and(|routes| routes.prefixes.iter().any(|p| path_has_prefix(path, p)))
    }

    /// Whether `path` belongs to the authenticated area: the literal root or
    /// any role's territory. Everything else (login page, public pages) needs
    /// no session.
    pub fn is_protected(&self, path: &str) -> bool {
        path == "/"
            || self
                .routes
                .values()
                .any(|routes| routes.prefixes.iter().any(|p| path_has_prefix(path, p)))
    }
}

impl Default for RouteAccessPolicy {
    fn default() -> Self {
        Self::standard("/auth/login")
    }
}

/// Segment-boundary prefix test: `/admin` matches `/admin` and `/admin/x`,
/// never `/administrator`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
