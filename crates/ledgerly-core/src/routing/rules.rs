//! Route-rule layers and their "defaults merge" resolution.
//!
//! Rules are keyed by glob patterns: `*` (or a `:param`) matches one
//! segment, a trailing `**` matches any remainder. For a given path every
//! matching layer is applied from most to least specific, and a broader
//! layer only fills keys the narrower ones left unset.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::segments;
use crate::permissions::PermissionKey;

/// `redirect_if_not_allowed` accepts a route or `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNotAllowed", into = "RawNotAllowed")]
pub enum NotAllowedRedirect {
    Route(String),
    Disabled,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawNotAllowed {
    Route(String),
    Flag(bool),
}

impl TryFrom<RawNotAllowed> for NotAllowedRedirect {
    type Error = String;

    fn try_from(raw: RawNotAllowed) -> Result<Self, Self::Error> {
        match raw {
            RawNotAllowed::Route(r) if !r.is_empty() => Ok(NotAllowedRedirect::Route(r)),
            RawNotAllowed::Route(_) | RawNotAllowed::Flag(false) => Ok(NotAllowedRedirect::Disabled),
            RawNotAllowed::Flag(true) => {
                Err("redirect_if_not_allowed must be a route or false".to_string())
            }
        }
    }
}

impl From<NotAllowedRedirect> for RawNotAllowed {
    fn from(value: NotAllowedRedirect) -> Self {
        match value {
            NotAllowedRedirect::Route(r) => RawNotAllowed::Route(r),
            NotAllowedRedirect::Disabled => RawNotAllowed::Flag(false),
        }
    }
}

/// One partial `auth` block as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRuleLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<PermissionKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_if_logged_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_if_not_allowed: Option<NotAllowedRedirect>,
}

impl AuthRuleLayer {
    /// Fill every unset key from `general`.
    pub fn merge_defaults(&mut self, general: &AuthRuleLayer) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.protected, &general.protected);
        fill(&mut self.namespace, &general.namespace);
        fill(&mut self.roles, &general.roles);
        fill(&mut self.permissions, &general.permissions);
        fill(&mut self.login_route, &general.login_route);
        fill(&mut self.redirect_if_logged_in, &general.redirect_if_logged_in);
        fill(&mut self.redirect_if_not_allowed, &general.redirect_if_not_allowed);
    }
}

/// A route-rule entry: `{ "auth": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteRuleLayer {
    #[serde(default)]
    pub auth: AuthRuleLayer,
}

/// The effective auth rule for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAuthRule {
    pub protected: bool,
    pub namespace: Option<String>,
    pub roles: BTreeSet<String>,
    pub permissions: Vec<PermissionKey>,
    pub login_route: String,
    pub redirect_if_logged_in: Option<String>,
    pub redirect_if_not_allowed: Option<String>,
}

impl RouteAuthRule {
    fn from_layer(layer: AuthRuleLayer, default_login_route: &str) -> Self {
        Self {
            protected: layer.protected.unwrap_or(false),
            namespace: layer.namespace,
            roles: layer.roles.unwrap_or_default(),
            permissions: layer.permissions.unwrap_or_default(),
            login_route: layer
                .login_route
                .unwrap_or_else(|| default_login_route.to_string()),
            redirect_if_logged_in: layer.redirect_if_logged_in,
            redirect_if_not_allowed: match layer.redirect_if_not_allowed {
                Some(NotAllowedRedirect::Route(r)) => Some(r),
                Some(NotAllowedRedirect::Disabled) | None => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobSegment {
    Literal(String),
    Any,
    Rest,
}

#[derive(Debug, Clone)]
struct Glob {
    segments: Vec<GlobSegment>,
}

impl Glob {
    fn parse(pattern: &str) -> Self {
        let segments = segments(pattern)
            .into_iter()
            .map(|s| match s {
                "**" => GlobSegment::Rest,
                "*" => GlobSegment::Any,
                s if s.starts_with(':') => GlobSegment::Any,
                s => GlobSegment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, parts: &[&str]) -> bool {
        let mut i = 0;
        for segment in &self.segments {
            match segment {
                GlobSegment::Rest => return true,
                GlobSegment::Any => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                GlobSegment::Literal(l) => {
                    if parts.get(i) != Some(&l.as_str()) {
                        return false;
                    }
                }
            }
            i += 1;
        }
        i == parts.len()
    }

    /// Exact patterns beat `**` patterns; then more literals, then more
    /// segments.
    fn specificity(&self) -> (bool, usize, usize) {
        let has_rest = self.segments.contains(&GlobSegment::Rest);
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, GlobSegment::Literal(_)))
            .count();
        (!has_rest, literals, self.segments.len())
    }
}

/// All configured route-rule layers, ordered most specific first.
#[derive(Debug, Clone, Default)]
pub struct RouteRules {
    layers: Vec<(Glob, AuthRuleLayer)>,
    default_login_route: String,
}

impl RouteRules {
    pub fn new(rules: &BTreeMap<String, RouteRuleLayer>, default_login_route: &str) -> Self {
        let mut layers: Vec<(Glob, AuthRuleLayer)> = rules
            .iter()
            .map(|(pattern, layer)| (Glob::parse(pattern), layer.auth.clone()))
            .collect();
        layers.sort_by_key(|(glob, _)| Reverse(glob.specificity()));
        Self {
            layers,
            default_login_route: default_login_route.to_string(),
        }
    }

    pub fn resolve(&self, path: &str) -> RouteAuthRule {
        let parts = segments(path);
        let merged = self
            .layers
            .iter()
            .filter(|(glob, _)| glob.matches(&parts))
            .fold(AuthRuleLayer::default(), |mut acc, (_, layer)| {
                acc.merge_defaults(layer);
                acc
            });
        RouteAuthRule::from_layer(merged, &self.default_login_route)
    }
}
