//! Route table entries and path templates.

use crate::context::RequestContext;
use crate::error::{Result, SwitchyardError};
use crate::interceptor::Handler;
use crate::predicate::Predicate;
use axum::http::Method;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// `{*name}`: the rest of the path, last segment only.
    CatchAll(String),
}

/// A path template such as `/customers/{id}`.
#[derive(Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |message: &str| SwitchyardError::InvalidPath {
            path: path.to_string(),
            message: message.to_string(),
        };
        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            let parsed = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if name.starts_with('*') => {
                    if i + 1 != raw.len() {
                        return Err(invalid("catch-all must be the last segment"));
                    }
                    Segment::CatchAll(name[1..].to_string())
                }
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            };
            if let Segment::Param(name) | Segment::CatchAll(name) = &parsed {
                if name.is_empty() {
                    return Err(invalid("empty parameter name"));
                }
            }
            segments.push(parsed);
        }
        Ok(Self {
            source: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Captured parameters when `path` fits the template.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut captures = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::CatchAll(name) => {
                    captures.push((name.clone(), parts.get(i..).unwrap_or_default().join("/")));
                    return Some(captures);
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    let decoded = percent_decode(value);
                    captures.push((name.clone(), decoded));
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(captures)
    }
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPattern({})", self.source)
    }
}

/// One registered route: first entry whose method, path and predicate all
/// match wins.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub pattern: PathPattern,
    pub predicate: Option<Arc<dyn Predicate>>,
    pub(crate) handler: Handler,
}

impl RouteEntry {
    /// Structural match only; the predicate needs a built context.
    pub fn matches_path(&self, method: &Method, path: &str) -> Option<Vec<(String, String)>> {
        if &self.method != method {
            return None;
        }
        self.pattern.matches(path)
    }

    pub fn accepts(&self, ctx: &RequestContext) -> bool {
        self.predicate.as_ref().is_none_or(|p| p.matches(ctx))
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
