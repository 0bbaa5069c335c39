use vigil_core::Role;

/// Maps a principal identifier (an email-like string) to a [`Role`].
///
/// The role token is the first label of the identifier's domain part:
/// `ops@technician.tn` resolves to `Technician`. Lookup is exact and
/// case-sensitive. Anything that does not parse falls back to the
/// configured default role.
///
/// Resolution is total and never fails: it feeds redirect decisions and must
/// not be able to take down the session pipeline. Fallbacks are logged at
/// WARN so unrecognized identifiers stay visible in diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct RoleResolver {
    default_role: Role,
}

impl RoleResolver {
    pub fn new(default_role: Role) -> Self {
        Self { default_role }
    }

    pub fn default_role(&self) -> Role {
        self.default_role
    }

    /// Resolve an identifier to a role. Total: always yields a role.
    pub fn resolve(&self, identifier: &str) -> Role {
        let Some((_, domain)) = identifier.split_once('@') else {
            tracing::warn!(identifier, "identifier has no domain part, applying default role");
            return self.default_role;
        };
        if domain.is_empty() {
            tracing::warn!(identifier, "identifier has an empty domain, applying default role");
            return self.default_role;
        }
        let token = domain.split('.').next().unwrap_or_default();
        match token.parse::<Role>() {
            Ok(role) => role,
            Err(_) => {
                tracing::warn!(
                    identifier,
                    token,
                    "no role matches the domain token, applying default role"
                );
                self.default_role
            }
        }
    }
}

impl Default for RoleResolver {
    /// Unrecognized identifiers fall back to `admin`.
    /// Deployments wanting deny-by-default should configure a
    /// less-privileged role via `VigilConfig::default_role`.
    fn default() -> Self {
        Self::new(Role::Admin)
    }
}
