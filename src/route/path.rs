//! Route paths compiled into components, and their matching against the
//! path segments of a request.

use crate::{
    errors::RoutePathError,
    http::{
        query::Query,
        request::{PathSegments, MAX_PATH_SEGMENTS},
        response::Parameters,
    },
    io::buffer::InlineBytes,
};
use memchr::memmem;
use std::{fmt, ops::Range};

/// Inline capacity of a [`PathComponent::Literal`].
///
/// Longer literal text is split into consecutive literals that together
/// still match a single request segment.
pub const LITERAL_CAPACITY: usize = 64;

pub type Literal = InlineBytes<LITERAL_CAPACITY>;

/// One compiled piece of a route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    /// Exact bytes of (part of) one segment.
    Literal(Literal),
    /// Any single segment, captured by position.
    Parameter,
    /// Zero or more trailing segments, all captured.
    Catchall,
    /// Query alternatives; the request query must hold at least one of the
    /// raw `key=value` pairs. An empty list only requires a `?`.
    Query(Vec<Box<[u8]>>),
    /// A segment built from fragments, e.g. `{name}.zip` is
    /// `Components(Parameter, Literal(".zip"))`.
    Components(Box<PathComponent>, Box<PathComponent>),
}

/// A compiled route path such as `users/:id/**`.
///
/// | Segment | Component |
/// |---------|-----------|
/// | `**` | [`Catchall`](PathComponent::Catchall), must be the last segment |
/// | `*`, `:name`, `{name}` | [`Parameter`](PathComponent::Parameter) |
/// | `{name}.zip`, `v{major}.{minor}` | [`Components`](PathComponent::Components) |
/// | `search?page=1&debug` | `Literal("search")` + `Query(["page=1", "debug"])`, must be last |
/// | anything else | [`Literal`](PathComponent::Literal), split past [`LITERAL_CAPACITY`] |
///
/// Leading, trailing and repeated `/` are ignored, exactly like request
/// targets. Case-insensitive paths are lowercased when compiled and matched
/// against the lowercased start-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePath {
    source: String,
    case_sensitive: bool,
    components: Vec<PathComponent>,
    /// Component range of every path segment.
    spans: Vec<Range<usize>>,
    /// Segments holding at least one parameter, in order.
    slots: Vec<usize>,
    parameter_count: usize,
    catchall: Option<usize>,
    query: Option<usize>,
}

impl RoutePath {
    pub fn parse(path: &str, case_sensitive: bool) -> Result<Self, RoutePathError> {
        let normalized = match case_sensitive {
            true => path.to_string(),
            false => path.to_ascii_lowercase(),
        };

        let mut route = Self {
            source: path.to_string(),
            case_sensitive,
            components: Vec::new(),
            spans: Vec::new(),
            slots: Vec::new(),
            parameter_count: 0,
            catchall: None,
            query: None,
        };

        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        for (i, raw) in segments.iter().enumerate() {
            let (segment, query) = match raw.split_once('?') {
                Some((segment, query)) => (segment, Some(query)),
                None => (*raw, None),
            };

            if route.query.is_some() || (query.is_some() && i + 1 != segments.len()) {
                return Err(RoutePathError::QueryNotTerminal(path.to_string()));
            }
            if route.catchall.is_some() && !segment.is_empty() {
                return Err(RoutePathError::CatchallNotTerminal(path.to_string()));
            }

            if !segment.is_empty() {
                route.push_segment(segment)?;
            }
            if let Some(query) = query {
                route.query = Some(route.components.len());
                route.components.push(PathComponent::Query(
                    query
                        .split('&')
                        .filter(|pair| !pair.is_empty())
                        .map(|pair| pair.as_bytes().into())
                        .collect(),
                ));
            }
        }

        if route.spans.len() > MAX_PATH_SEGMENTS {
            return Err(RoutePathError::TooManySegments(path.to_string()));
        }

        Ok(route)
    }

    fn push_segment(&mut self, segment: &str) -> Result<(), RoutePathError> {
        let index = self.spans.len();
        let start = self.components.len();

        match segment {
            "**" => {
                self.catchall = Some(index);
                self.components.push(PathComponent::Catchall);
            }
            ":" => return Err(RoutePathError::EmptyParameterName(segment.to_string())),
            "*" => self.push_parameter(index, 1),
            _ if segment.starts_with(':') => self.push_parameter(index, 1),
            _ if segment.contains(['{', '}']) => {
                let (component, count) = parse_fragments(segment)?;
                match component {
                    PathComponent::Parameter => self.push_parameter(index, 1),
                    component => {
                        self.components.push(component);
                        self.slots.push(index);
                        self.parameter_count += count;
                    }
                }
            }
            _ => self.components.extend(split_literal(segment.as_bytes())),
        }

        self.spans.push(start..self.components.len());
        Ok(())
    }

    #[inline]
    fn push_parameter(&mut self, index: usize, count: usize) {
        self.components.push(PathComponent::Parameter);
        self.slots.push(index);
        self.parameter_count += count;
    }
}

fn split_literal(bytes: &[u8]) -> impl Iterator<Item = PathComponent> + '_ {
    bytes
        .chunks(LITERAL_CAPACITY)
        .filter_map(Literal::from_slice)
        .map(PathComponent::Literal)
}

enum Piece<'a> {
    Text(&'a [u8]),
    Param,
}

/// Compiles `pre{a}mid{b}post` into nested `Components`; returns the
/// component and its parameter count.
fn parse_fragments(segment: &str) -> Result<(PathComponent, usize), RoutePathError> {
    let bytes = segment.as_bytes();
    let unbalanced = || RoutePathError::UnbalancedBraces(segment.to_string());

    let mut pieces = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        match rest.iter().position(|&b| b == b'{' || b == b'}') {
            None => {
                pieces.push(Piece::Text(rest));
                rest = b"";
            }
            Some(pos) if rest[pos] == b'}' => return Err(unbalanced()),
            Some(pos) => {
                if pos > 0 {
                    pieces.push(Piece::Text(&rest[..pos]));
                }
                let name = &rest[pos + 1..];
                let close = name
                    .iter()
                    .position(|&b| b == b'}')
                    .ok_or_else(unbalanced)?;
                if name[..close].contains(&b'{') {
                    return Err(unbalanced());
                }
                if close == 0 {
                    return Err(RoutePathError::EmptyParameterName(segment.to_string()));
                }
                if matches!(pieces.last(), Some(Piece::Param)) {
                    return Err(RoutePathError::AdjacentParameters(segment.to_string()));
                }

                pieces.push(Piece::Param);
                rest = &name[close + 1..];
            }
        }
    }

    let count = pieces.iter().filter(|p| matches!(p, Piece::Param)).count();
    let mut components = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => components.extend(split_literal(text)),
            Piece::Param => components.push(PathComponent::Parameter),
        }
    }

    let mut folded = components.pop().ok_or_else(unbalanced)?;
    while let Some(left) = components.pop() {
        folded = PathComponent::Components(Box::new(left), Box::new(folded));
    }

    Ok((folded, count))
}

//

/// Receives capture ranges while a fragment is matched.
trait Capture {
    fn mark(&self) -> usize;
    fn push(&mut self, start: usize, end: usize);
    fn rollback(&mut self, mark: usize);
}

impl Capture for () {
    #[inline(always)]
    fn mark(&self) -> usize {
        0
    }

    #[inline(always)]
    fn push(&mut self, _: usize, _: usize) {}

    #[inline(always)]
    fn rollback(&mut self, _: usize) {}
}

impl Capture for Vec<(usize, usize)> {
    #[inline]
    fn mark(&self) -> usize {
        self.len()
    }

    #[inline]
    fn push(&mut self, start: usize, end: usize) {
        Vec::push(self, (start, end));
    }

    #[inline]
    fn rollback(&mut self, mark: usize) {
        self.truncate(mark);
    }
}

/// Matches the rest of a segment against a fragment component. Parameter
/// captures are never empty; the leftmost split that matches wins.
fn match_fragment<C: Capture>(
    component: &PathComponent,
    bytes: &[u8],
    offset: usize,
    captures: &mut C,
) -> bool {
    match component {
        PathComponent::Literal(literal) => bytes == literal.as_slice(),
        PathComponent::Parameter if bytes.is_empty() => false,
        PathComponent::Parameter => {
            captures.push(offset, offset + bytes.len());
            true
        }
        PathComponent::Components(left, right) => match (&**left, &**right) {
            (PathComponent::Literal(literal), _) => match bytes.strip_prefix(literal.as_slice()) {
                Some(rest) => match_fragment(right, rest, offset + literal.len(), captures),
                None => false,
            },
            (PathComponent::Parameter, PathComponent::Literal(literal)) => {
                let end = bytes.len().saturating_sub(literal.len());
                if end == 0 || !bytes.ends_with(literal.as_slice()) {
                    return false;
                }
                captures.push(offset, offset + end);
                true
            }
            (PathComponent::Parameter, PathComponent::Components(next, _)) => {
                let PathComponent::Literal(literal) = &**next else {
                    return false;
                };
                if bytes.is_empty() {
                    return false;
                }

                for pos in memmem::find_iter(&bytes[1..], literal.as_slice()) {
                    let split = pos + 1;
                    let mark = captures.mark();
                    captures.push(offset, offset + split);
                    if match_fragment(right, &bytes[split..], offset + split, captures) {
                        return true;
                    }
                    captures.rollback(mark);
                }
                false
            }
            _ => false,
        },
        _ => false,
    }
}

// Matching
impl RoutePath {
    /// Whether the request path matches, segment by segment.
    ///
    /// `segments` must come from the lowercased start-line when the route is
    /// case-insensitive.
    pub(crate) fn matches(&self, segments: &PathSegments<'_>) -> bool {
        for (i, span) in self.spans.iter().enumerate() {
            if self.catchall == Some(i) {
                return self.query_matches(segments.query());
            }

            match segments.get(i) {
                Some(segment) if self.match_segment(span.clone(), segment, &mut ()) => {}
                _ => return false,
            }
        }

        segments.len() == self.spans.len() && self.query_matches(segments.query())
    }

    fn match_segment<C: Capture>(&self, span: Range<usize>, segment: &[u8], captures: &mut C) -> bool {
        match &self.components[span] {
            [PathComponent::Parameter] => {
                captures.push(0, segment.len());
                true
            }
            [component @ PathComponent::Components(..)] => {
                match_fragment(component, segment, 0, captures)
            }
            literals => {
                let mut rest = segment;
                for component in literals {
                    let PathComponent::Literal(literal) = component else {
                        return false;
                    };
                    match rest.strip_prefix(literal.as_slice()) {
                        Some(tail) => rest = tail,
                        None => return false,
                    }
                }
                rest.is_empty()
            }
        }
    }

    #[inline]
    fn query_matches(&self, query: Option<&[u8]>) -> bool {
        let Some(PathComponent::Query(alternatives)) = self.query.map(|i| &self.components[i]) else {
            return true;
        };

        match query {
            None => false,
            Some(_) if alternatives.is_empty() => true,
            Some(query) => alternatives
                .iter()
                .any(|pair| Query::contains_pair(query, pair)),
        }
    }

    /// Copies the parameter values of a matched request into `params`:
    /// one value per parameter in path order, then every segment covered by
    /// the catch-all.
    ///
    /// Positions are found on `matching` (lowercased for case-insensitive
    /// routes) and sliced from `original`, so captures keep their case.
    pub(crate) fn extract(
        &self,
        matching: &PathSegments<'_>,
        original: &PathSegments<'_>,
        params: &mut Parameters,
    ) {
        let mut captures = Vec::new();
        for &slot in &self.slots {
            let (Some(matched), Some(value)) = (matching.get(slot), original.get(slot)) else {
                continue;
            };

            captures.clear();
            if self.match_segment(self.spans[slot].clone(), matched, &mut captures) {
                for &(start, end) in &captures {
                    params.push(&value[start..end]);
                }
            }
        }

        if let Some(at) = self.catchall {
            original.iter().skip(at).for_each(|segment| params.push(segment));
        }
    }
}

// Accessors
impl RoutePath {
    /// The path as registered.
    #[inline(always)]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline(always)]
    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    #[inline(always)]
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Number of path segments the route spans, catch-all included.
    #[inline(always)]
    pub fn segment_count(&self) -> usize {
        self.spans.len()
    }

    /// Segment indexes that hold parameters, fixed at compile time.
    #[inline(always)]
    pub fn parameter_slots(&self) -> &[usize] {
        &self.slots
    }

    /// Number of parameters before any catch-all values.
    #[inline(always)]
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    #[inline(always)]
    pub fn has_catchall(&self) -> bool {
        self.catchall.is_some()
    }

    #[inline(always)]
    pub fn has_query(&self) -> bool {
        self.query.is_some()
    }

    /// No parameters and no catch-all: only exact literal segments.
    #[inline(always)]
    pub fn is_parameterless(&self) -> bool {
        self.slots.is_empty() && self.catchall.is_none()
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
