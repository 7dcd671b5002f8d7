use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission map as returned by the server: resource -> action -> granted.
pub type PermissionMap = BTreeMap<String, BTreeMap<String, bool>>;

/// Membership level of a user within the active company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Admin,
    #[default]
    Member,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Owner => write!(f, "owner"),
            AccessLevel::Admin => write!(f, "admin"),
            AccessLevel::Member => write!(f, "member"),
        }
    }
}

/// The signed-in user as last reported by the server.
///
/// A `User` is always replaced as a whole. Applying a new company
/// permission set goes through [`User::with_grants`], which returns a new
/// value rather than patching the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    #[serde(default)]
    pub access_level: AccessLevel,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: PermissionMap,
    #[serde(default)]
    pub onboarded: bool,
}

impl User {
    /// A copy of this user carrying the given company-scoped grants.
    pub fn with_grants(&self, grants: CompanyGrants) -> Self {
        Self {
            access_level: grants.access_level.unwrap_or(self.access_level),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            roles: grants.roles,
            permissions: grants.permissions,
            onboarded: self.onboarded,
        }
    }

    /// Name to show in prompts, falling back to the email address.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.email
        } else {
            &self.display_name
        }
    }
}

/// Response of `GET /api/company/{slug}/permissions/mine/`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompanyGrants {
    #[serde(default)]
    pub access_level: Option<AccessLevel>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: PermissionMap,
}
