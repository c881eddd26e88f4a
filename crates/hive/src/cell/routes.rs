//! Route Table
//!
//! Exact-method matching with named `:param` segments. Among patterns
//! matching the same path, the one with the most literal segments wins.

use std::collections::HashMap;

/// A registered route.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: String,
    pub pattern: RoutePattern,
    pub handler_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed path pattern such as `/users/:id/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            raw: path.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a concrete path, extracting named parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }
}

/// All routes registered by one project.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Register a route. A duplicate method+pattern overwrites the
    /// earlier handler.
    pub fn insert(&mut self, method: &str, path: &str, handler_id: &str) {
        let method = method.to_uppercase();
        let pattern = RoutePattern::parse(path);

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.method == method && e.pattern.raw() == pattern.raw())
        {
            existing.handler_id = handler_id.to_string();
            return;
        }

        self.entries.push(RouteEntry {
            method,
            pattern,
            handler_id: handler_id.to_string(),
        });
    }

    /// Find the best-matching route for a request.
    pub fn find(&self, method: &str, path: &str) -> Option<(String, HashMap<String, String>)> {
        let method = method.to_uppercase();
        self.entries
            .iter()
            .filter(|e| e.method == method)
            .filter_map(|e| e.pattern.matches(path).map(|params| (e, params)))
            .max_by_key(|(e, _)| e.pattern.literal_count())
            .map(|(e, params)| (e.handler_id.clone(), params))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_param_matching() {
        let mut table = RouteTable::default();
        table.insert("GET", "/users/:id", "h1");

        let (handler, params) = table.find("GET", "/users/42").unwrap();
        assert_eq!(handler, "h1");
        assert_eq!(params["id"], "42");

        assert!(table.find("POST", "/users/42").is_none());
        assert!(table.find("GET", "/users").is_none());
        assert!(table.find("GET", "/users/42/posts").is_none());
    }

    #[test]
    fn most_specific_pattern_wins() {
        let mut table = RouteTable::default();
        table.insert("GET", "/users/:id", "param");
        table.insert("GET", "/users/me", "literal");

        let (handler, _) = table.find("GET", "/users/me").unwrap();
        assert_eq!(handler, "literal");

        let (handler, _) = table.find("GET", "/users/42").unwrap();
        assert_eq!(handler, "param");
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let mut table = RouteTable::default();
        table.insert("GET", "/ping", "old");
        table.insert("GET", "/ping", "new");

        assert_eq!(table.len(), 1);
        let (handler, _) = table.find("GET", "/ping").unwrap();
        assert_eq!(handler, "new");
    }

    #[test]
    fn root_path_matches() {
        let mut table = RouteTable::default();
        table.insert("GET", "/", "root");
        assert!(table.find("GET", "/").is_some());
    }

    #[test]
    fn method_matching_is_case_insensitive() {
        let mut table = RouteTable::default();
        table.insert("get", "/ping", "h");
        assert!(table.find("GET", "/ping").is_some());
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let mut table = RouteTable::default();
        table.insert("GET", "/users/:id", "h");
        assert!(table.find("GET", "/users/42/").is_some());
    }
}
