use std::collections::BTreeMap;

use super::segments;

/// Name of the route param carrying the company slug.
pub const COMPANY_PARAM: &str = "company";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct RouteDef {
    name: String,
    segments: Vec<Segment>,
}

impl RouteDef {
    fn parse(name: &str, pattern: &str) -> Self {
        let segments = segments(pattern)
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(param) => Segment::Param(param.to_string()),
                None => Segment::Static(s.to_string()),
            })
            .collect();
        Self {
            name: name.to_string(),
            segments,
        }
    }

    fn static_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(_)))
            .count()
    }

    fn matches(&self, parts: &[&str]) -> Option<BTreeMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(s) if s.as_str() == *part => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

/// A path matched against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl ResolvedRoute {
    pub fn company(&self) -> Option<&str> {
        self.params.get(COMPANY_PARAM).map(String::as_str)
    }
}

/// Named routes with `:param` segments, e.g. `/:company/sales/vouchers`.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDef>,
}

impl RouteTable {
    pub fn new<'a, I>(routes: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(name, pattern)| RouteDef::parse(name, pattern))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match a path. When several routes match, the one with the most static
    /// segments wins, so `/onboarding` beats `/:company`.
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        let parts = segments(path);
        self.routes
            .iter()
            .filter_map(|route| route.matches(&parts).map(|params| (route, params)))
            .max_by_key(|(route, _)| route.static_count())
            .map(|(route, params)| ResolvedRoute {
                name: route.name.clone(),
                params,
            })
    }

    /// Build the path of a named route. Returns `None` for unknown routes or
    /// missing params.
    pub fn build(&self, name: &str, params: &BTreeMap<String, String>) -> Option<String> {
        let route = self.routes.iter().find(|r| r.name == name)?;
        let mut path = String::new();
        for segment in &route.segments {
            path.push('/');
            match segment {
                Segment::Static(s) => path.push_str(s),
                Segment::Param(p) => path.push_str(params.get(p)?),
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        Some(path)
    }
}
