//! Path templates and the ordered route table.
//!
//! A template such as `/v1/workflows/{id}` is a sequence of literal and
//! variable segments. A path matches when it has the same number of segments,
//! every literal is equal (case-sensitive) and every variable captures a
//! non-empty segment. Routes are tried in registration order and the first
//! match wins.

use std::fmt;
use std::str::FromStr;

use http::Method;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("path template {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    #[error("path template {0:?} has an empty segment")]
    EmptySegment(String),

    #[error("path template {0:?} has an empty variable name")]
    EmptyVariable(String),

    #[error("path template {0:?} has unbalanced braces")]
    UnbalancedBraces(String),

    #[error("path template {template:?} declares variable {name:?} twice")]
    DuplicateVariable { template: String, name: String },
}

/// A compiled path template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    template: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| RouteError::MissingLeadingSlash(template.to_owned()))?;

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for raw in rest.split('/') {
                segments.push(parse_segment(template, raw)?);
            }
        }

        let mut seen = Vec::new();
        for segment in &segments {
            if let Segment::Variable(name) = segment {
                if seen.contains(&name) {
                    return Err(RouteError::DuplicateVariable {
                        template: template.to_owned(),
                        name: name.clone(),
                    });
                }
                seen.push(name);
            }
        }

        Ok(Self {
            template: template.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match `path`, capturing variables.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Variable(_) if part.is_empty() => return None,
                Segment::Variable(name) => params.push(name.clone(), part.to_owned()),
            }
        }
        Some(params)
    }

    /// Whether some path would match both patterns.
    pub fn overlaps(&self, other: &Pattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

fn parse_segment(template: &str, raw: &str) -> Result<Segment, RouteError> {
    if raw.is_empty() {
        return Err(RouteError::EmptySegment(template.to_owned()));
    }
    match raw.strip_prefix('{') {
        Some(inner) => {
            let name = inner
                .strip_suffix('}')
                .ok_or_else(|| RouteError::UnbalancedBraces(template.to_owned()))?;
            if name.contains(['{', '}']) {
                return Err(RouteError::UnbalancedBraces(template.to_owned()));
            }
            if name.is_empty() {
                return Err(RouteError::EmptyVariable(template.to_owned()));
            }
            Ok(Segment::Variable(name.to_owned()))
        }
        None if raw.contains(['{', '}']) => Err(RouteError::UnbalancedBraces(template.to_owned())),
        None => Ok(Segment::Literal(raw.to_owned())),
    }
}

impl FromStr for Pattern {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Variables captured from a matched path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn push(&mut self, name: String, value: String) {
        self.params.push((name, value));
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

struct Route<H> {
    method: Method,
    pattern: Pattern,
    handler: H,
}

/// Outcome of a route lookup.
#[derive(Debug)]
pub enum RouteMatch<'a, H> {
    Found { handler: &'a H, params: PathParams },
    /// The path matches a route registered under another method.
    MethodNotAllowed,
    NotFound,
}

/// Routes in registration order.
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. An overlap with an earlier route for the same method is
    /// logged; the earlier route keeps precedence.
    pub fn insert(&mut self, method: Method, pattern: Pattern, handler: H) {
        for existing in self.routes.iter().filter(|r| r.method == method) {
            if existing.pattern.overlaps(&pattern) {
                tracing::warn!(
                    %method,
                    existing = %existing.pattern,
                    added = %pattern,
                    "route overlaps an earlier route, the earlier one takes precedence"
                );
            }
        }
        self.routes.push(Route {
            method,
            pattern,
            handler,
        });
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_, H> {
        let mut path_matched = false;
        for route in &self.routes {
            let Some(params) = route.pattern.match_path(path) else {
                continue;
            };
            if route.method == *method {
                return RouteMatch::Found {
                    handler: &route.handler,
                    params,
                };
            }
            path_matched = true;
        }

        if path_matched {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
