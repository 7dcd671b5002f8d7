//! Route table, route-rule layers and navigation locations.

pub mod rules;
pub mod table;

use std::collections::BTreeMap;
use std::fmt;

pub use rules::{AuthRuleLayer, NotAllowedRedirect, RouteAuthRule, RouteRuleLayer, RouteRules};
pub use table::{ResolvedRoute, RouteTable};

/// A navigation target: path plus decoded query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            query: BTreeMap::new(),
        }
    }

    /// Parse `"/path?key=value&other=1"`. Fragments are dropped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.split('#').next().unwrap_or_default();
        let (path, query) = match raw.split_once('?') {
            Some((p, q)) => (p, q),
            None => (raw, ""),
        };
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(k), decode(v))
            })
            .collect();
        Self {
            path: normalize_path(path),
            query,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Path segments, ignoring empty ones.
    pub fn segments(&self) -> Vec<&str> {
        segments(&self.path)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, urlencoding::encode(k), urlencoding::encode(v))?;
        }
        Ok(())
    }
}

fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.clone(),
    }
}

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Leading slash, no trailing slash, no empty segments. The root is `/`.
pub(crate) fn normalize_path(path: &str) -> String {
    let parts = segments(path);
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// True if `path` equals `prefix` or continues it with a `/`.
pub(crate) fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = normalize_path(prefix);
    let path = normalize_path(path);
    prefix == "/" || path == prefix || path.starts_with(&format!("{}/", prefix))
}
