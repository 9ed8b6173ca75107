//! Pre-rendered responders keyed by the exact start-line.

use crate::{
    errors::{RoutePathError, SocketError},
    http::{
        request::{Request, StartLine, START_LINE_CAPACITY},
        response::write::WriteBuffer,
        types::{http_date, Method, StatusCode, Version, HTTP_DATE_LEN},
    },
    io::socket::{write_buffer, write_buffers, Socket},
};
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

/// A complete response rendered once and written verbatim.
///
/// Rendered on first use as:
/// ```text
/// HTTP/1.1 200 OK\r\n
/// content-type: text/plain; charset=utf-8\r\n
/// content-length: N\r\n
/// [extra headers]\r\n
/// date: Sun, 06 Nov 1994 08:49:37 GMT\r\n   (only with `with_date`)
/// connection: close\r\n
/// \r\n
/// [body]
/// ```
/// When a date is included, every write substitutes the current date at its
/// fixed byte offset; nothing else is computed per request.
#[derive(Debug, Clone)]
pub struct StaticResponse {
    version: Version,
    status: StatusCode,
    content_type: Cow<'static, str>,
    charset: Option<Cow<'static, str>>,
    headers: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    body: Cow<'static, [u8]>,
    with_date: bool,
    rendered: OnceLock<Rendered>,
}

#[derive(Debug, Clone)]
struct Rendered {
    bytes: Cow<'static, [u8]>,
    date_offset: Option<usize>,
}

impl Default for StaticResponse {
    fn default() -> Self {
        Self {
            version: Version::Http11,
            status: StatusCode::Ok,
            content_type: Cow::Borrowed("text/plain"),
            charset: Some(Cow::Borrowed("utf-8")),
            headers: Vec::new(),
            body: Cow::Borrowed(b""),
            with_date: false,
            rendered: OnceLock::new(),
        }
    }
}

impl StaticResponse {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps bytes produced elsewhere, e.g. by a compression pipeline.
    ///
    /// `date_offset` marks where a 29-byte date value is replaced with the
    /// current date on every write.
    ///
    /// # Panics
    ///
    /// If `date_offset + HTTP_DATE_LEN` is past the end of `bytes`.
    #[track_caller]
    pub fn raw<B: Into<Cow<'static, [u8]>>>(bytes: B, date_offset: Option<usize>) -> Self {
        let bytes = bytes.into();
        if let Some(at) = date_offset {
            assert!(
                at + HTTP_DATE_LEN <= bytes.len(),
                "date offset {at} does not leave room for a date in {} bytes",
                bytes.len()
            );
        }

        Self {
            rendered: OnceLock::from(Rendered { bytes, date_offset }),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self.rerender()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self.rerender()
    }

    /// `text/plain` by default; an empty value omits the header.
    pub fn content_type<T: Into<Cow<'static, str>>>(mut self, content_type: T) -> Self {
        self.content_type = content_type.into();
        self.rerender()
    }

    /// `utf-8` by default; `None` omits the parameter.
    pub fn charset<T: Into<Cow<'static, str>>>(mut self, charset: Option<T>) -> Self {
        self.charset = charset.map(Into::into);
        self.rerender()
    }

    pub fn header<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        self.headers.push((name.into(), value.into()));
        self.rerender()
    }

    pub fn body<T: WriteBuffer>(mut self, body: T) -> Self {
        let mut bytes = Vec::new();
        body.write_to(&mut bytes);
        self.body = Cow::Owned(bytes);
        self.rerender()
    }

    /// Body served without copying.
    pub fn static_body(mut self, body: &'static [u8]) -> Self {
        self.body = Cow::Borrowed(body);
        self.rerender()
    }

    /// Includes a live `date` header.
    pub fn with_date(mut self, with_date: bool) -> Self {
        self.with_date = with_date;
        self.rerender()
    }

    #[inline]
    fn rerender(mut self) -> Self {
        self.rendered.take();
        self
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// The rendered bytes; the date, if any, is the one of the first render.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.rendered().bytes
    }

    #[inline]
    pub fn date_offset(&self) -> Option<usize> {
        self.rendered().date_offset
    }

    #[inline]
    fn rendered(&self) -> &Rendered {
        self.rendered.get_or_init(|| self.render())
    }

    fn render(&self) -> Rendered {
        let mut bytes = Vec::with_capacity(128 + self.body.len());
        bytes.extend_from_slice(self.status.into_first_line(self.version));

        if !self.content_type.is_empty() {
            bytes.extend_from_slice(b"content-type: ");
            bytes.extend_from_slice(self.content_type.as_bytes());
            if let Some(charset) = &self.charset {
                bytes.extend_from_slice(b"; charset=");
                bytes.extend_from_slice(charset.as_bytes());
            }
            bytes.extend_from_slice(b"\r\n");
        }

        bytes.extend_from_slice(b"content-length: ");
        self.body.len().write_to(&mut bytes);
        bytes.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(b": ");
            bytes.extend_from_slice(value.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }

        let date_offset = match self.with_date {
            true => {
                bytes.extend_from_slice(b"date: ");
                let at = bytes.len();
                bytes.extend_from_slice(&http_date());
                bytes.extend_from_slice(b"\r\n");
                Some(at)
            }
            false => None,
        };

        bytes.extend_from_slice(b"connection: close\r\n\r\n");
        bytes.extend_from_slice(&self.body);

        Rendered {
            bytes: Cow::Owned(bytes),
            date_offset,
        }
    }

    /// Writes the rendered bytes, substituting a live date if needed.
    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        time: Duration,
    ) -> Result<(), SocketError> {
        let Rendered { bytes, date_offset } = self.rendered();

        match *date_offset {
            Some(at) => {
                let date = http_date();
                let parts: [&[u8]; 3] = [&bytes[..at], &date, &bytes[at + HTTP_DATE_LEN..]];
                write_buffers(socket, &parts, time).await
            }
            None => write_buffer(socket, bytes, time).await,
        }
    }
}

//

/// A [`StaticResponse`] bound to one exact start-line.
///
/// ```
/// use switchyard::{Method, StaticRoute};
///
/// let route = StaticRoute::new(Method::Get, "/html")
///     .unwrap()
///     .content_type("text/html")
///     .body("<h1>Hello</h1>");
///
/// assert_eq!(route.key(), b"GET /html HTTP/1.1");
/// ```
#[derive(Debug, Clone)]
pub struct StaticRoute {
    method: Method,
    path: String,
    version: Version,
    case_sensitive: bool,
    key: StartLine,
    response: StaticResponse,
}

impl StaticRoute {
    /// A route for `method path HTTP/1.1`. A missing leading `/` is added.
    ///
    /// Fails if the start-line does not fit the start-line capacity.
    pub fn new(method: Method, path: &str) -> Result<Self, RoutePathError> {
        let path = match path.starts_with('/') {
            true => path.to_string(),
            false => format!("/{path}"),
        };

        let mut route = Self {
            method,
            path,
            version: Version::Http11,
            case_sensitive: true,
            key: StartLine::new(),
            response: StaticResponse::default(),
        };
        route.key = route.build_key()?;
        Ok(route)
    }

    #[inline]
    pub fn get(path: &str) -> Result<Self, RoutePathError> {
        Self::new(Method::Get, path)
    }

    fn build_key(&self) -> Result<StartLine, RoutePathError> {
        let mut line = Vec::with_capacity(START_LINE_CAPACITY);
        line.extend_from_slice(self.method.as_bytes());
        line.push(b' ');
        line.extend_from_slice(self.path.as_bytes());
        line.push(b' ');
        line.extend_from_slice(self.version.as_bytes());

        let key = StartLine::from_slice(&line)
            .ok_or_else(|| RoutePathError::StartLineTooLong(self.path.clone()))?;

        Ok(match self.case_sensitive {
            true => key,
            false => key.to_lowercase(),
        })
    }

    #[inline]
    fn rekey(mut self) -> Result<Self, RoutePathError> {
        self.key = self.build_key()?;
        Ok(self)
    }

    /// Re-keys the route under a group prefix.
    pub(crate) fn prefixed(mut self, prefix: &str) -> Result<Self, RoutePathError> {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            self.path = format!("/{prefix}{}", self.path);
            self.key = self.build_key()?;
        }
        Ok(self)
    }

    /// Re-keys the route for `version`.
    pub fn version(mut self, version: Version) -> Result<Self, RoutePathError> {
        self.version = version;
        self.response = self.response.version(version);
        self.rekey()
    }

    /// Matches the start-line ignoring ASCII case.
    pub fn case_insensitive(mut self) -> Result<Self, RoutePathError> {
        self.case_sensitive = false;
        self.rekey()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.response = self.response.status(status);
        self
    }

    pub fn content_type<T: Into<Cow<'static, str>>>(mut self, content_type: T) -> Self {
        self.response = self.response.content_type(content_type);
        self
    }

    pub fn charset<T: Into<Cow<'static, str>>>(mut self, charset: Option<T>) -> Self {
        self.response = self.response.charset(charset);
        self
    }

    pub fn header<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        self.response = self.response.header(name, value);
        self
    }

    pub fn body<T: WriteBuffer>(mut self, body: T) -> Self {
        self.response = self.response.body(body);
        self
    }

    pub fn static_body(mut self, body: &'static [u8]) -> Self {
        self.response = self.response.static_body(body);
        self
    }

    pub fn with_date(mut self, with_date: bool) -> Self {
        self.response = self.response.with_date(with_date);
        self
    }

    /// Replaces the whole response, e.g. with [`StaticResponse::raw`].
    pub fn response(mut self, response: StaticResponse) -> Self {
        self.response = response;
        self
    }

    /// The start-line this route answers, lowercased if case-insensitive.
    #[inline(always)]
    pub fn key(&self) -> &[u8] {
        self.key.as_slice()
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    #[inline(always)]
    pub fn static_response(&self) -> &StaticResponse {
        &self.response
    }

    #[inline]
    pub(crate) async fn respond<S: Socket>(
        &self,
        socket: &mut S,
        time: Duration,
    ) -> Result<(), SocketError> {
        self.response.respond(socket, time).await
    }
}

//

/// Static routes by exact start-line; case-sensitive and case-insensitive
/// routes are kept apart.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticResponders {
    sensitive: HashMap<StartLine, Arc<StaticRoute>>,
    insensitive: HashMap<StartLine, Arc<StaticRoute>>,
}

impl StaticResponders {
    /// Registers `route`, returning the route it replaced.
    pub(crate) fn insert(&mut self, route: StaticRoute) -> Option<Arc<StaticRoute>> {
        let table = match route.case_sensitive {
            true => &mut self.sensitive,
            false => &mut self.insensitive,
        };
        table.insert(route.key, Arc::new(route))
    }

    #[inline]
    pub(crate) fn get(&self, req: &Request, case_sensitive: bool) -> Option<&Arc<StaticRoute>> {
        let table = match case_sensitive {
            true => &self.sensitive,
            false => &self.insensitive,
        };

        if table.is_empty() {
            return None;
        }
        table.get(req.start_line_key(case_sensitive))
    }

    /// Removes every route for `method` and `path`; returns how many.
    pub(crate) fn remove(&mut self, method: Method, path: &str) -> usize {
        let before = self.len();
        let path = path.trim_start_matches('/');
        let keep = |route: &Arc<StaticRoute>| {
            route.method != method || route.path.trim_start_matches('/') != path
        };

        self.sensitive.retain(|_, route| keep(route));
        self.insensitive.retain(|_, route| keep(route));
        before - self.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.sensitive.len() + self.insensitive.len()
    }
}
