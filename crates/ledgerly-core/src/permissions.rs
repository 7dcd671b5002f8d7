//! Role and permission checks against the cached grants of the active company.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PermissionMap;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid permission '{0}': expected 'resource' or 'resource.action'")]
pub struct InvalidPermission(pub String);

/// A permission reference: a whole resource, or one action on it.
///
/// Parsed from `"invoice"` or `"invoice.approve"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey {
    resource: String,
    action: Option<String>,
}

impl PermissionKey {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: None,
        }
    }

    pub fn action(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: Some(action.into()),
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    pub fn action_name(&self) -> Option<&str> {
        self.action.as_deref()
    }
}

impl FromStr for PermissionKey {
    type Err = InvalidPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPermission(s.to_string());
        let mut parts = s.split('.');
        let resource = parts.next().filter(|r| !r.is_empty()).ok_or_else(invalid)?;
        let action = match parts.next() {
            Some(a) if a.is_empty() => return Err(invalid()),
            Some(a) => Some(a.to_string()),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            resource: resource.to_string(),
            action,
        })
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = InvalidPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionKey> for String {
    fn from(key: PermissionKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Some(action) => write!(f, "{}.{}", self.resource, action),
            None => f.write_str(&self.resource),
        }
    }
}

/// Evaluates checks for one user against one permission map.
///
/// Holders of a full-access role pass every permission check.
#[derive(Debug, Clone, Copy)]
pub struct PermissionEvaluator<'a> {
    roles: &'a BTreeSet<String>,
    permissions: &'a PermissionMap,
    full_access_roles: &'a BTreeSet<String>,
}

impl<'a> PermissionEvaluator<'a> {
    pub fn new(
        roles: &'a BTreeSet<String>,
        permissions: &'a PermissionMap,
        full_access_roles: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            roles,
            permissions,
            full_access_roles,
        }
    }

    pub fn has_full_access(&self) -> bool {
        !self.roles.is_disjoint(self.full_access_roles)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<'r, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'r String>,
    {
        roles.into_iter().any(|r| self.has_role(r))
    }

    pub fn has_permission(&self, key: &PermissionKey) -> bool {
        if self.has_full_access() {
            return true;
        }
        let Some(actions) = self.permissions.get(&key.resource) else {
            return false;
        };
        match &key.action {
            Some(action) => actions.get(action).copied().unwrap_or(false),
            // Partial access to a resource counts as resource-level access
            None => actions.values().any(|granted| *granted),
        }
    }

    pub fn has_any_permission<'k, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'k PermissionKey>,
    {
        self.has_full_access() || keys.into_iter().any(|k| self.has_permission(k))
    }

    pub fn has_all_permissions<'k, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'k PermissionKey>,
    {
        self.has_full_access() || keys.into_iter().all(|k| self.has_permission(k))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn key(s: &str) -> PermissionKey {
        s.parse().unwrap()
    }

    fn sample_permissions() -> PermissionMap {
        let mut map = PermissionMap::new();
        map.insert(
            "invoice".to_string(),
            BTreeMap::from([("view".to_string(), true), ("delete".to_string(), false)]),
        );
        map.insert(
            "voucher".to_string(),
            BTreeMap::from([("view".to_string(), false), ("approve".to_string(), false)]),
        );
        map
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_permission_key() {
        assert_eq!(key("invoice"), PermissionKey::resource("invoice"));
        assert_eq!(key("invoice.view"), PermissionKey::action("invoice", "view"));
        assert_eq!(key("invoice.view").to_string(), "invoice.view");

        assert!("".parse::<PermissionKey>().is_err());
        assert!(".view".parse::<PermissionKey>().is_err());
        assert!("invoice.".parse::<PermissionKey>().is_err());
        assert!("invoice.view.extra".parse::<PermissionKey>().is_err());
    }

    #[test]
    fn test_permission_key_deserializes_from_string() {
        let keys: Vec<PermissionKey> = serde_json::from_str(r#"["invoice", "voucher.approve"]"#).unwrap();
        assert_eq!(keys[1], PermissionKey::action("voucher", "approve"));
        assert!(serde_json::from_str::<Vec<PermissionKey>>(r#"["a.b.c"]"#).is_err());
    }

    #[test]
    fn test_exact_action_lookup() {
        let perms = sample_permissions();
        let user_roles = roles(&["accountant"]);
        let full = roles(&["owner"]);
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(eval.has_permission(&key("invoice.view")));
        assert!(!eval.has_permission(&key("invoice.delete")));
        assert!(!eval.has_permission(&key("invoice.export")));
        assert!(!eval.has_permission(&key("payroll.view")));
    }

    #[test]
    fn test_resource_level_lookup_needs_one_granted_action() {
        let perms = sample_permissions();
        let user_roles = BTreeSet::new();
        let full = roles(&["owner"]);
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(eval.has_permission(&key("invoice")));
        assert!(!eval.has_permission(&key("voucher")));
        assert!(!eval.has_permission(&key("payroll")));
    }

    #[test]
    fn test_empty_map_denies() {
        let perms = PermissionMap::new();
        let user_roles = roles(&["accountant"]);
        let full = roles(&["owner"]);
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(!eval.has_permission(&key("invoice")));
        assert!(!eval.has_any_permission(&[key("invoice"), key("voucher.view")]));
    }

    #[test]
    fn test_full_access_role_bypasses_everything() {
        let perms = PermissionMap::new();
        let user_roles = roles(&["owner", "accountant"]);
        let full = roles(&["owner"]);
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(eval.has_full_access());
        assert!(eval.has_permission(&key("payroll.delete")));
        assert!(eval.has_any_permission(&[key("anything")]));
        assert!(eval.has_all_permissions(&[key("a.b"), key("c")]));
        assert!(eval.has_any_permission(std::iter::empty()));
    }

    #[test]
    fn test_any_and_all() {
        let perms = sample_permissions();
        let user_roles = BTreeSet::new();
        let full = BTreeSet::new();
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(eval.has_any_permission(&[key("voucher.view"), key("invoice.view")]));
        assert!(!eval.has_all_permissions(&[key("voucher.view"), key("invoice.view")]));
        assert!(eval.has_all_permissions(&[key("invoice"), key("invoice.view")]));
        assert!(!eval.has_any_permission(std::iter::empty()));
        assert!(eval.has_all_permissions(std::iter::empty()));
    }

    #[test]
    fn test_roles() {
        let perms = PermissionMap::new();
        let user_roles = roles(&["accountant"]);
        let full = BTreeSet::new();
        let eval = PermissionEvaluator::new(&user_roles, &perms, &full);

        assert!(eval.has_role("accountant"));
        assert!(eval.has_any_role(&roles(&["auditor", "accountant"])));
        assert!(!eval.has_any_role(&roles(&["auditor"])));
    }
}
