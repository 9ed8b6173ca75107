use crate::{
    errors::{RequestParseError, ResponderError, SocketError},
    http::{
        query::{Query, QueryError},
        types::{slice_to_usize, Method, Version},
    },
    io::{
        buffer::{InlineBytes, ReadBuffer},
        socket::{read_ready, Socket},
    },
    limits::ReqLimits,
};
use memchr::{memchr, memchr_iter, memmem};
use std::{iter, ops::Range, sync::OnceLock, time::Duration};
use tracing::debug;

/// Maximum length of a request start-line, CRLF excluded.
pub const START_LINE_CAPACITY: usize = 256;
/// Maximum number of non-empty path segments in a request target.
pub const MAX_PATH_SEGMENTS: usize = 32;

/// A start-line stored inline.
pub type StartLine = InlineBytes<START_LINE_CAPACITY>;

/// An HTTP request head, parsed on demand.
///
/// Loading a request reads the start-line and the header block into a
/// fixed buffer and validates only what routing always needs: three
/// space-delimited tokens, a target starting with `/`, and a UTF-8 head.
/// Everything else is computed on first access and cached:
///
/// | Accessor | Parsed from |
/// |----------|-------------|
/// | [`start_line_lowercased`](Request::start_line_lowercased) | ASCII-lowercased copy of the start-line |
/// | [`path`](Request::path), [`path_count`](Request::path_count) | target up to `?`, split on `/` |
/// | [`header`](Request::header) | header block |
///
/// Empty path segments are skipped: `/a//b/` has the segments `a` and `b`.
///
/// The body is read only when a dynamic route is dispatched and is bounded by
/// `Content-Length` and [`ReqLimits::body_size`]. Chunked request bodies are
/// rejected.
///
/// Header keys are compared case-sensitively, exactly as stored.
///
/// # Example
///
/// For the head:
/// ```text
/// GET /api/users/42?full HTTP/1.1\r\n
/// Host: localhost\r\n
/// \r\n
/// ```
/// - `is_method(Method::Get)`: `true`
/// - `path_count()`: `Ok(3)`
/// - `path(2)`: `Ok(b"42")`
/// - `path(3)`: `Err(IndexOutOfBounds { index: 3, count: 3 })`
/// - `query_string()`: `Some(b"?full")`
/// - `header(b"Host")`: `Some(b"localhost")`, `header(b"host")`: `None`
#[derive(Debug, Clone)]
pub struct Request {
    head: ReadBuffer,
    head_end: usize,

    start_line: StartLine,
    method_end: usize,
    target: Range<usize>,

    lowercased: OnceLock<StartLine>,
    segments: OnceLock<Result<Segments, RequestParseError>>,
    headers: OnceLock<Result<Vec<HeaderSpan>, RequestParseError>>,

    body: Vec<u8>,
    body_loaded: bool,

    limits: ReqLimits,
}

impl Request {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            head: ReadBuffer::new(limits.buffer_size),
            head_end: 0,

            start_line: StartLine::new(),
            method_end: 0,
            target: 0..0,

            lowercased: OnceLock::new(),
            segments: OnceLock::new(),
            headers: OnceLock::new(),

            body: Vec::new(),
            body_loaded: false,

            limits: limits.clone(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.head.reset();
        self.head_end = 0;

        self.start_line = StartLine::new();
        self.method_end = 0;
        self.target = 0..0;

        self.lowercased.take();
        self.segments.take();
        self.headers.take();

        if self.body.capacity() > self.limits.body_size {
            self.body = Vec::new();
        } else {
            self.body.clear();
        }
        self.body_loaded = false;
    }

    /// Reads the start-line and the header block from `socket`.
    pub(crate) async fn load<S: Socket>(
        &mut self,
        socket: &mut S,
        time: Duration,
    ) -> Result<(), ResponderError> {
        let line_end = match self.head.read_line(socket, time).await {
            Ok(end) => end,
            Err(SocketError::Truncated) => return Err(RequestParseError::StartLineTooLong.into()),
            Err(e) => return Err(e.into()),
        };

        let head_end = self
            .head
            .read_head(socket, time)
            .await?
            .ok_or(RequestParseError::HeadTooLarge)?;

        let head = &self.head.filled()[..head_end];
        simdutf8::basic::from_utf8(head).map_err(|_| RequestParseError::InvalidEncoding)?;

        let line = &head[..line_end];
        let start_line = StartLine::from_slice(line).ok_or(RequestParseError::StartLineTooLong)?;
        let (method_end, target) = split_start_line(start_line.as_slice())?;

        self.start_line = start_line;
        self.method_end = method_end;
        self.target = target;
        self.head_end = head_end;

        Ok(())
    }

    /// Reads the body announced by `Content-Length` (none if absent).
    pub(crate) async fn load_body<S: Socket>(
        &mut self,
        socket: &mut S,
        time: Duration,
    ) -> Result<(), ResponderError> {
        if self.body_loaded {
            return Ok(());
        }
        self.body_loaded = true;

        if self.find_header_ignore_case(b"transfer-encoding")?.is_some() {
            return Err(RequestParseError::UnsupportedTransferEncoding.into());
        }

        let len = self.content_length()?.unwrap_or(0);
        if len > self.limits.body_size {
            return Err(RequestParseError::BodyTooLarge.into());
        }

        // Bodies that fit the head buffer are read through it.
        let filled = self
            .head
            .read_count(socket, self.head_end + len, time)
            .await?;
        let buffered = &self.head.filled()[self.head_end..filled];
        self.body.clear();
        self.body.extend_from_slice(&buffered[..buffered.len().min(len)]);

        while self.body.len() < len {
            let start = self.body.len();
            self.body.resize(len, 0);
            let read = read_ready(socket, &mut self.body[start..], time).await?;
            self.body.truncate(start + read);
        }

        Ok(())
    }

    #[inline]
    fn segment_table(&self) -> Result<&Segments, RequestParseError> {
        self.segments
            .get_or_init(|| Segments::split(self.start_line.as_slice(), self.target.clone()))
            .as_ref()
            .map_err(Clone::clone)
    }

    #[inline]
    fn header_table(&self) -> Result<&[HeaderSpan], RequestParseError> {
        self.headers
            .get_or_init(|| {
                let start = self.start_line.len() + 2;
                let end = self.head_end.max(start + 2) - 2;
                parse_headers(self.head.filled(), start..end, self.limits.header_count)
            })
            .as_deref()
            .map_err(Clone::clone)
    }

    fn find_header_ignore_case(&self, key: &[u8]) -> Result<Option<&[u8]>, RequestParseError> {
        let head = self.head.filled();
        Ok(self
            .header_table()?
            .iter()
            .find(|span| head[span.name.clone()].eq_ignore_ascii_case(key))
            .map(|span| &head[span.value.clone()]))
    }
}

// Start-line
impl Request {
    /// The start-line without its CRLF.
    #[inline(always)]
    pub fn start_line(&self) -> &[u8] {
        self.start_line.as_slice()
    }

    /// An ASCII-lowercased copy of the start-line, computed once.
    ///
    /// The case-sensitive start-line is left untouched.
    #[inline]
    pub fn start_line_lowercased(&self) -> &[u8] {
        self.lowercased_line().as_slice()
    }

    #[inline]
    pub(crate) fn start_line_key(&self, case_sensitive: bool) -> &StartLine {
        match case_sensitive {
            true => &self.start_line,
            false => self.lowercased_line(),
        }
    }

    #[inline]
    fn lowercased_line(&self) -> &StartLine {
        self.lowercased
            .get_or_init(|| self.start_line.to_lowercase())
    }

    /// The method token, byte for byte.
    #[inline(always)]
    pub fn method_bytes(&self) -> &[u8] {
        &self.start_line.as_slice()[..self.method_end]
    }

    #[inline]
    pub fn method(&self) -> Option<Method> {
        Method::from_bytes(self.method_bytes())
    }

    /// Case-sensitive comparison of the method token.
    #[inline]
    pub fn is_method(&self, method: Method) -> bool {
        self.method_bytes() == method.as_bytes()
    }

    /// The full request target, query included.
    #[inline(always)]
    pub fn target(&self) -> &[u8] {
        &self.start_line.as_slice()[self.target.clone()]
    }

    #[inline(always)]
    pub fn version_bytes(&self) -> &[u8] {
        let line = self.start_line.as_slice();
        &line[(self.target.end + 1).min(line.len())..]
    }

    #[inline]
    pub fn version(&self) -> Option<Version> {
        Version::from_bytes(self.version_bytes())
    }
}

// Path
impl Request {
    /// Number of non-empty path segments.
    #[inline]
    pub fn path_count(&self) -> Result<usize, RequestParseError> {
        Ok(self.segment_table()?.len())
    }

    /// The path segment at `at`.
    #[inline]
    pub fn path(&self, at: usize) -> Result<&[u8], RequestParseError> {
        let segments = self.segments(true)?;
        segments
            .get(at)
            .ok_or(RequestParseError::IndexOutOfBounds {
                index: at,
                count: segments.len(),
            })
    }

    /// Calls `f` with every segment from `offset` on.
    ///
    /// An `offset` equal to the segment count visits nothing; anything past
    /// it is an error.
    pub fn for_each_path<F: FnMut(&[u8])>(
        &self,
        offset: usize,
        mut f: F,
    ) -> Result<(), RequestParseError> {
        let segments = self.segments(true)?;
        if offset > segments.len() {
            return Err(RequestParseError::IndexOutOfBounds {
                index: offset,
                count: segments.len(),
            });
        }

        segments.iter().skip(offset).for_each(|segment| f(segment));
        Ok(())
    }

    /// Segments over the original or the lowercased start-line.
    #[inline]
    pub(crate) fn segments(&self, case_sensitive: bool) -> Result<PathSegments<'_>, RequestParseError> {
        let table = self.segment_table()?;
        Ok(PathSegments {
            line: self.start_line_key(case_sensitive).as_slice(),
            table,
        })
    }

    /// The query component including its leading `?`.
    #[inline]
    pub fn query_string(&self) -> Option<&[u8]> {
        let target = self.target();
        memchr(b'?', target).map(|pos| &target[pos..])
    }

    /// First value of the query parameter `key`.
    ///
    /// A query string over the limit yields `None`; use
    /// [`try_query`](Request::try_query) to see the error.
    pub fn query(&self, key: &[u8]) -> Option<&[u8]> {
        match self.try_query(key) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "query lookup failed");
                None
            }
        }
    }

    /// Like [`query`](Request::query), but fails when `key` is not among the
    /// first [`ReqLimits::query_parts`] pairs and more pairs follow.
    pub fn try_query(&self, key: &[u8]) -> Result<Option<&[u8]>, QueryError> {
        let Some(query) = self.query_string() else {
            return Ok(None);
        };

        let mut pairs: Vec<(&[u8], &[u8])> = Vec::new();
        let parsed = Query::parse_into(&mut pairs, query, self.limits.query_parts);

        match pairs.into_iter().find(|(k, _)| *k == key) {
            Some((_, value)) => Ok(Some(value)),
            None => parsed.map(|()| None),
        }
    }
}

// Headers and body
impl Request {
    /// Value of the first header named exactly `key`.
    ///
    /// Malformed header blocks yield `None`; use
    /// [`try_header`](Request::try_header) to see the error.
    #[inline]
    pub fn header(&self, key: &[u8]) -> Option<&[u8]> {
        self.try_header(key).ok().flatten()
    }

    pub fn try_header(&self, key: &[u8]) -> Result<Option<&[u8]>, RequestParseError> {
        let head = self.head.filled();
        Ok(self
            .header_table()?
            .iter()
            .find(|span| &head[span.name.clone()] == key)
            .map(|span| &head[span.value.clone()]))
    }

    /// All headers in arrival order.
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        let head = self.head.filled();
        self.header_table()
            .unwrap_or(&[])
            .iter()
            .map(move |span| (&head[span.name.clone()], &head[span.value.clone()]))
    }

    /// The announced body length.
    pub fn content_length(&self) -> Result<Option<usize>, RequestParseError> {
        match self.find_header_ignore_case(b"content-length")? {
            Some(value) => slice_to_usize(value)
                .map(Some)
                .ok_or(RequestParseError::InvalidContentLength),
            None => Ok(None),
        }
    }

    /// The request body; empty unless a dynamic route loaded it.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// An owned, independent duplicate, for work that outlives the
    /// borrowed request.
    #[inline]
    pub fn copy(&self) -> Request {
        self.clone()
    }
}

fn split_start_line(line: &[u8]) -> Result<(usize, Range<usize>), RequestParseError> {
    let method_end = memchr(b' ', line).ok_or(RequestParseError::InvalidStartLine)?;
    let target_start = method_end + 1;
    let target_end = memchr(b' ', &line[target_start..])
        .map(|pos| target_start + pos)
        .ok_or(RequestParseError::InvalidStartLine)?;
    let version = &line[target_end + 1..];

    if method_end == 0
        || line.get(target_start) != Some(&b'/')
        || version.is_empty()
        || memchr(b' ', version).is_some()
    {
        return Err(RequestParseError::InvalidStartLine);
    }

    Ok((method_end, target_start..target_end))
}

// PATH SEGMENTS

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segments {
    count: usize,
    ranges: [(u16, u16); MAX_PATH_SEGMENTS],
}

impl Segments {
    fn split(line: &[u8], target: Range<usize>) -> Result<Self, RequestParseError> {
        let mut segments = Self {
            count: 0,
            ranges: [(0, 0); MAX_PATH_SEGMENTS],
        };

        let path_end = memchr(b'?', &line[target.clone()])
            .map(|pos| target.start + pos)
            .unwrap_or(target.end);
        let base = (target.start + 1).min(path_end);
        let path = &line[base..path_end];

        let mut start = 0;
        for end in memchr_iter(b'/', path).chain(iter::once(path.len())) {
            if end > start {
                if segments.count == MAX_PATH_SEGMENTS {
                    return Err(RequestParseError::TooManySegments);
                }
                segments.ranges[segments.count] = ((base + start) as u16, (base + end) as u16);
                segments.count += 1;
            }
            start = end + 1;
        }

        Ok(segments)
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.count
    }
}

/// Borrowed view of a request's path segments.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathSegments<'a> {
    line: &'a [u8],
    table: &'a Segments,
}

impl<'a> PathSegments<'a> {
    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.table.count
    }

    #[inline]
    pub(crate) fn get(&self, at: usize) -> Option<&'a [u8]> {
        let line = self.line;
        self.table.ranges[..self.table.count]
            .get(at)
            .map(|&(start, end)| &line[start as usize..end as usize])
    }

    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let line = self.line;
        self.table.ranges[..self.table.count]
            .iter()
            .map(move |&(start, end)| &line[start as usize..end as usize])
    }

    /// The query component of the same line, `?` included.
    #[inline]
    pub(crate) fn query(&self) -> Option<&'a [u8]> {
        let line = self.line;
        let target_start = memchr(b' ', line)? + 1;
        let target_end = memchr(b' ', &line[target_start..])? + target_start;
        let target = &line[target_start..target_end];
        memchr(b'?', target).map(|pos| &target[pos..])
    }
}

// HEADERS

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderSpan {
    name: Range<usize>,
    value: Range<usize>,
}

fn parse_headers(
    head: &[u8],
    block: Range<usize>,
    limit: usize,
) -> Result<Vec<HeaderSpan>, RequestParseError> {
    let mut headers = Vec::new();
    if block.start >= block.end {
        return Ok(headers);
    }

    let finder = memmem::Finder::new(b"\r\n");
    let bytes = &head[..block.end];
    let mut start = block.start;

    while start < block.end {
        let end = finder
            .find(&bytes[start..])
            .map(|pos| start + pos)
            .unwrap_or(block.end);

        if headers.len() == limit {
            return Err(RequestParseError::TooManyHeaders);
        }
        headers.push(parse_header_line(head, start..end)?);
        start = end + 2;
    }

    Ok(headers)
}

#[inline]
fn parse_header_line(head: &[u8], line: Range<usize>) -> Result<HeaderSpan, RequestParseError> {
    let bytes = &head[line.clone()];
    let colon = memchr(b':', bytes).ok_or(RequestParseError::InvalidHeader)?;

    let name = &bytes[..colon];
    if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
        return Err(RequestParseError::InvalidHeader);
    }

    let value = &bytes[colon + 1..];
    let skip = value.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
    let trail = value[skip..]
        .iter()
        .rev()
        .take_while(|b| matches!(b, b' ' | b'\t'))
        .count();

    let value_start = line.start + colon + 1 + skip;
    Ok(HeaderSpan {
        name: line.start..line.start + colon,
        value: value_start..line.end - trail,
    })
}
