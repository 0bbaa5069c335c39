use serde::{Deserialize, Serialize};

/// Coarse access role derived from the authenticated principal's identifier.
///
/// The set is closed: every authenticated user maps to exactly one of these,
/// and routing is partitioned by role prefix (`/admin/...`, `/supadmin/...`,
/// `/technician/...`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supadmin,
    Technician,
}

impl Role {
    /// All roles, in a fixed order. Useful for building policy tables.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Supadmin, Role::Technician];

    /// The lowercase token used in identifiers and route prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supadmin => "supadmin",
            Role::Technician => "technician",
        }
    }

    /// The route prefix this role is confined to, e.g. `/technician`.
    pub fn route_prefix(&self) -> String {
        format!("/{}", self.as_str())
    }

    /// The canonical landing page after login, e.g. `/admin/overview`.
    pub fn home_path(&self) -> String {
        format!("/{}/overview", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    /// Exact, case-sensitive match against the role tokens.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "supadmin" => Ok(Role::Supadmin),
            "technician" => Ok(Role::Technician),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token did not name any role in the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl std::fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown role token: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}
