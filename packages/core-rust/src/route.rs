//! Route templates: path patterns whose placeholder segments bind to named
//! variables at match time.
//!
//! Template syntax:
//! - `/customers` -- literal segments, matched case-insensitively
//! - `/customers/{id}` -- `{id}` binds exactly one segment
//! - `/files/{path*}` -- `{path*}` binds the remaining segments; a wildcard
//!   must be the last segment or be followed by a literal

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Variables bound while matching a path, keyed by placeholder name.
pub type PathVariables = BTreeMap<String, String>;

const INVALID_ROUTE_CHARS: [char; 2] = ['?', '&'];

/// Errors raised when a route template fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteTemplateError {
    #[error("route '{path}' must start with a '/'")]
    MissingLeadingSlash { path: String },
    #[error("route '{path}' contains invalid chars ('?' or '&')")]
    InvalidChars { path: String },
    #[error("route '{path}' must contain at least one literal segment")]
    NoLiteralSegment { path: String },
    #[error("route '{path}' has malformed placeholder segment '{segment}'")]
    MalformedPlaceholder { path: String, segment: String },
    #[error("route '{path}': a wildcard must be the last segment or be followed by a literal")]
    MisplacedWildcard { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Lower-cased literal.
    Literal(String),
    Variable(String),
    Wildcard(String),
}

/// A validated, pre-split route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    path: String,
    /// Upper-cased verbs; `None` accepts any verb.
    verbs: Option<Vec<String>>,
    segments: Vec<Segment>,
    variable_count: usize,
}

/// Result of a successful template match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch {
    /// Higher is a better match; see [`RouteTemplate::match_path`].
    pub score: u32,
    pub variables: PathVariables,
}

/// Route declaration as written on an operation: a template plus optional verbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    /// Comma- or space-separated verbs; `None` or `"*"` accepts any verb.
    pub verbs: Option<String>,
}

impl RouteSpec {
    #[must_use]
    pub fn new(path: impl Into<String>, verbs: Option<&str>) -> Self {
        Self {
            path: path.into(),
            verbs: verbs.map(str::to_string),
        }
    }

    /// Parses this declaration into a [`RouteTemplate`].
    ///
    /// # Errors
    ///
    /// Returns `RouteTemplateError` if the path is not a valid template.
    pub fn compile(&self) -> Result<RouteTemplate, RouteTemplateError> {
        RouteTemplate::parse(&self.path, self.verbs.as_deref())
    }
}

/// Splits a request path into its non-empty segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl RouteTemplate {
    /// Parses and validates a template.
    ///
    /// # Errors
    ///
    /// Returns `RouteTemplateError` when the path does not start with `/`,
    /// contains `?` or `&`, has no literal segment, has a malformed
    /// placeholder, or places a wildcard before another placeholder.
    pub fn parse(path: &str, verbs: Option<&str>) -> Result<Self, RouteTemplateError> {
        if !path.starts_with('/') {
            return Err(RouteTemplateError::MissingLeadingSlash { path: path.to_string() });
        }
        if path.contains(INVALID_ROUTE_CHARS) {
            return Err(RouteTemplateError::InvalidChars { path: path.to_string() });
        }

        let mut segments = Vec::new();
        for raw in split_path(path) {
            segments.push(parse_segment(path, raw)?);
        }

        if !segments.iter().any(|s| matches!(s, Segment::Literal(_))) {
            return Err(RouteTemplateError::NoLiteralSegment { path: path.to_string() });
        }

        for (i, segment) in segments.iter().enumerate() {
            let followed_by_literal = matches!(segments.get(i + 1), Some(Segment::Literal(_)));
            let is_last = i + 1 == segments.len();
            if matches!(segment, Segment::Wildcard(_)) && !is_last && !followed_by_literal {
                return Err(RouteTemplateError::MisplacedWildcard { path: path.to_string() });
            }
        }

        let variable_count = segments
            .iter()
            .filter(|s| !matches!(s, Segment::Literal(_)))
            .count();

        Ok(Self {
            path: path.to_string(),
            verbs: parse_verbs(verbs),
            segments,
            variable_count,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Upper-cased verbs this template is restricted to, if any.
    #[must_use]
    pub fn verbs(&self) -> Option<&[String]> {
        self.verbs.as_deref()
    }

    /// Whether a request with `verb` may use this template. `HEAD` is
    /// answered by `GET` templates.
    #[must_use]
    pub fn allows_verb(&self, verb: &str) -> bool {
        match &self.verbs {
            None => true,
            Some(verbs) => verbs.iter().any(|v| verb_matches(v, verb)),
        }
    }

    /// Names of every placeholder in declaration order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) | Segment::Wildcard(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard(_)))
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Matches pre-split path segments against this template.
    ///
    /// The score ranks candidate templates for the same path: fewer segments
    /// swallowed by wildcards first, then fewer placeholders, then an exact
    /// verb restriction over an any-verb template.
    #[must_use]
    pub fn match_path(&self, verb: &str, parts: &[&str]) -> Option<TemplateMatch> {
        if !self.allows_verb(verb) {
            return None;
        }
        if !self.has_wildcard() && parts.len() != self.segments.len() {
            return None;
        }

        let mut variables = PathVariables::new();
        let mut wildcard_parts = 0usize;
        let mut ix = 0usize;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if !parts.get(ix)?.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                    ix += 1;
                }
                Segment::Variable(name) => {
                    let value = parts.get(ix)?;
                    variables.insert(name.clone(), (*value).to_string());
                    ix += 1;
                }
                Segment::Wildcard(name) => {
                    let start = ix;
                    if let Some(Segment::Literal(stop)) = self.segments.get(i + 1) {
                        while ix < parts.len() && !parts[ix].eq_ignore_ascii_case(stop) {
                            ix += 1;
                        }
                        if ix == parts.len() {
                            return None;
                        }
                    } else {
                        ix = parts.len();
                    }
                    wildcard_parts += ix - start;
                    if ix > start {
                        variables.insert(name.clone(), parts[start..ix].join("/"));
                    }
                }
            }
        }

        if ix != parts.len() {
            return None;
        }

        Some(TemplateMatch {
            score: self.score(verb, wildcard_parts),
            variables,
        })
    }

    fn score(&self, verb: &str, wildcard_parts: usize) -> u32 {
        let wildcard_score = 100usize.saturating_sub(wildcard_parts).max(1) * 1000;
        let variable_score = 10usize.saturating_sub(self.variable_count).max(1) * 100;
        let verb_score = match &self.verbs {
            Some(verbs) if verbs.len() == 1 && verb_matches(&verbs[0], verb) => 10,
            _ => 1,
        };
        u32::try_from(wildcard_score + variable_score + verb_score).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verbs {
            Some(verbs) => write!(f, "{} {}", verbs.join(","), self.path),
            None => write!(f, "* {}", self.path),
        }
    }
}

fn parse_segment(path: &str, raw: &str) -> Result<Segment, RouteTemplateError> {
    if !raw.contains(['{', '}']) {
        return Ok(Segment::Literal(raw.to_ascii_lowercase()));
    }

    let malformed = || RouteTemplateError::MalformedPlaceholder {
        path: path.to_string(),
        segment: raw.to_string(),
    };

    let inner = raw
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(malformed)?;
    if inner.contains(['{', '}']) {
        return Err(malformed());
    }

    match inner.strip_suffix('*') {
        Some(name) if !name.is_empty() => Ok(Segment::Wildcard(name.to_string())),
        Some(_) => Err(malformed()),
        None if !inner.is_empty() => Ok(Segment::Variable(inner.to_string())),
        None => Err(malformed()),
    }
}

fn verb_matches(declared: &str, verb: &str) -> bool {
    declared.eq_ignore_ascii_case(verb)
        || (declared.eq_ignore_ascii_case("GET") && verb.eq_ignore_ascii_case("HEAD"))
}

fn parse_verbs(verbs: Option<&str>) -> Option<Vec<String>> {
    let verbs = verbs?.trim();
    if verbs.is_empty() || verbs == "*" {
        return None;
    }
    Some(
        verbs
            .split([',', ' '])
            .filter(|v| !v.is_empty())
            .map(str::to_ascii_uppercase)
            .collect(),
    )
}
