//! Mutable per-request response and its wire serialization.

use crate::{
    errors::SocketError,
    http::types::{http_date, StatusCode, Version},
    io::socket::{write_buffer, write_buffers, Socket},
    BodyWriter, WriteBuffer,
};
use std::{borrow::Cow, io::Write, mem, rc::Rc, sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};

/// Response body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Static(&'static [u8]),
    /// Chunked body fed through a channel; ends when every sender is dropped.
    Stream(mpsc::Receiver<Vec<u8>>),
}

impl Body {
    /// Buffered bytes; `None` for streams.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(b""),
            Body::Bytes(bytes) => Some(bytes),
            Body::Static(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

/// Sending half of a [streamed body](Response::stream).
pub type BodySender = mpsc::Sender<Vec<u8>>;

/// Parameter values captured from the request path.
///
/// Slots are filled in path order. A catch-all appends every remaining
/// segment after the nominal slots. Values are copied into one arena that
/// the worker reuses between requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    data: Vec<u8>,
    spans: Vec<(usize, usize)>,
}

impl Parameters {
    #[inline]
    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.spans.clear();
    }

    #[inline]
    pub fn push(&mut self, value: &[u8]) {
        let start = self.data.len();
        self.data.extend_from_slice(value);
        self.spans.push((start, self.data.len()));
    }

    /// Overwrites slot `at`, growing with empty slots when needed.
    pub fn set(&mut self, at: usize, value: &[u8]) {
        if at >= self.spans.len() {
            self.spans.resize(at + 1, (0, 0));
        }

        let start = self.data.len();
        self.data.extend_from_slice(value);
        self.spans[at] = (start, self.data.len());
    }

    #[inline]
    pub fn get(&self, at: usize) -> Option<&[u8]> {
        self.spans.get(at).map(|&(start, end)| &self.data[start..end])
    }

    /// The value at `at` as UTF-8 (request heads are validated UTF-8).
    #[inline]
    pub fn get_str(&self, at: usize) -> Option<&str> {
        std::str::from_utf8(self.get(at)?).ok()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.spans.iter().map(|&(start, end)| &self.data[start..end])
    }
}

/// Default response of a dynamic route: status, headers and body every
/// dispatch starts from.
///
/// ```
/// use switchyard::{ResponseTemplate, StatusCode};
///
/// let template = ResponseTemplate::new()
///     .status(StatusCode::Created)
///     .header("content-type", "application/json")
///     .body(r#"{"created":true}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseTemplate {
    version: Version,
    status: StatusCode,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Option<Cow<'static, [u8]>>,
}

impl ResponseTemplate {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header<N: WriteBuffer, V: WriteBuffer>(mut self, name: N, value: V) -> Self {
        self.headers.push((to_bytes(name), to_bytes(value)));
        self
    }

    pub fn body<T: WriteBuffer>(mut self, data: T) -> Self {
        self.body = Some(Cow::Owned(to_bytes(data)));
        self
    }

    /// Body served without copying.
    pub fn static_body(mut self, data: &'static [u8]) -> Self {
        self.body = Some(Cow::Borrowed(data));
        self
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }
}

#[inline]
fn to_bytes<T: WriteBuffer>(value: T) -> Vec<u8> {
    let mut bytes = Vec::new();
    value.write_to(&mut bytes);
    bytes
}

/// The response being built for one request.
///
/// Created from the route's [`ResponseTemplate`], mutated by middleware and
/// the handler, then serialized as:
/// ```text
/// HTTP/1.1 200 OK\r\n
/// [headers in insertion order]\r\n
/// content-length: N\r\n           (or transfer-encoding: chunked + date)
/// connection: close\r\n
/// \r\n
/// [body]
/// ```
/// Header names are stored and compared case-sensitively. The framing headers
/// `content-length`, `transfer-encoding` and `connection` are always written
/// by the serializer and ignored if set by hand.
///
/// # Examples
/// ```
/// use switchyard::{Response, StatusCode};
///
/// let mut resp = Response::default();
/// resp.status(StatusCode::Ok)
///     .header("content-type", "text/plain")
///     .body("hello");
///
/// assert_eq!(resp.body_bytes(), Some(&b"hello"[..]));
/// ```
#[derive(Debug, Default)]
pub struct Response {
    version: Version,
    status: StatusCode,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    params: Parameters,
    body: Body,
}

impl Response {
    /// Resets to `template`, keeping the parameter arena's allocation.
    pub(crate) fn reset_from(&mut self, template: &ResponseTemplate) {
        self.version = template.version;
        self.status = template.status;
        self.headers.clear();
        self.headers.extend(template.headers.iter().cloned());
        self.params.clear();
        self.body = match &template.body {
            None => Body::Empty,
            Some(Cow::Borrowed(bytes)) => Body::Static(*bytes),
            Some(Cow::Owned(bytes)) => Body::Bytes(bytes.clone()),
        };
    }

    /// Moves the response out, leaving a default one behind.
    #[inline]
    pub fn take(&mut self) -> Response {
        mem::take(self)
    }

    #[inline]
    pub(crate) fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }
}

// Accessors
impl Response {
    #[inline(always)]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// First header named exactly `name`.
    #[inline]
    pub fn header_value(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    #[inline(always)]
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Captured parameter at slot `at`.
    #[inline]
    pub fn param(&self, at: usize) -> Option<&[u8]> {
        self.params.get(at)
    }

    #[inline]
    pub fn param_str(&self, at: usize) -> Option<&str> {
        self.params.get_str(at)
    }

    /// Buffered body bytes; `None` for a stream.
    #[inline]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_bytes()
    }
}

// Builders
impl Response {
    #[inline]
    pub fn set_version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Appends a header, keeping any existing ones with the same name.
    ///
    /// ```
    /// # let mut resp = switchyard::Response::default();
    /// resp.header("x-request-id", 42u32).header("vary", "accept");
    /// assert_eq!(resp.header_value(b"x-request-id"), Some(&b"42"[..]));
    /// ```
    #[inline]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        self.headers.push((to_bytes(name), to_bytes(value)));
        self
    }

    /// Replaces the first header named `name`, or appends it.
    pub fn set_header<V: WriteBuffer>(&mut self, name: &str, value: V) -> &mut Self {
        let value = to_bytes(value);
        match self.headers.iter_mut().find(|(n, _)| n == name.as_bytes()) {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name.as_bytes().to_vec(), value)),
        }
        self
    }

    /// Removes every header named `name`; returns whether any existed.
    pub fn remove_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| n != name.as_bytes());
        before != self.headers.len()
    }

    /// Replaces the body.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.body = Body::Bytes(to_bytes(data));
        self
    }

    /// Replaces the body with whatever `f` writes.
    ///
    /// ```
    /// # let mut resp = switchyard::Response::default();
    /// use std::io::Write;
    ///
    /// resp.body_with(|w| {
    ///     w.write("id=");
    ///     w.write(7u8);
    ///     let _ = write!(w, ", ok={}", true);
    /// });
    /// assert_eq!(resp.body_bytes(), Some(&b"id=7, ok=true"[..]));
    /// ```
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        let mut bytes = match mem::take(&mut self.body) {
            Body::Bytes(mut bytes) => {
                bytes.clear();
                bytes
            }
            _ => Vec::new(),
        };
        f(&mut BodyWriter(&mut bytes));
        self.body = Body::Bytes(bytes);
        self
    }

    /// Switches to a chunked body and returns its sender.
    ///
    /// The response is written as soon as the handler returns; chunks are
    /// forwarded as they arrive until every sender is dropped. A live `date`
    /// header is always included.
    pub fn stream(&mut self, capacity: usize) -> BodySender {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.body = Body::Stream(receiver);
        sender
    }
}

const FRAMING: [&[u8]; 3] = [b"content-length", b"transfer-encoding", b"connection"];

// Serialization
impl Response {
    /// Writes status line and headers into `buf`.
    pub(crate) fn write_head(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.status.into_first_line(self.version));

        for (name, value) in &self.headers {
            if FRAMING.iter().any(|f| name.eq_ignore_ascii_case(f)) {
                continue;
            }
            buf.extend_from_slice(name);
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value);
            buf.extend_from_slice(b"\r\n");
        }

        match self.body.as_bytes() {
            Some(body) => {
                buf.extend_from_slice(b"content-length: ");
                (body.len() as u64).write_to(buf);
                buf.extend_from_slice(b"\r\n");
            }
            None => {
                buf.extend_from_slice(b"transfer-encoding: chunked\r\ndate: ");
                buf.extend_from_slice(&http_date());
                buf.extend_from_slice(b"\r\n");
            }
        }

        buf.extend_from_slice(b"connection: close\r\n\r\n");
    }

    /// Serializes the response onto `socket`, draining a streamed body.
    ///
    /// A stream that produces no chunk within `time` fails with
    /// [`SocketError::TimedOut`].
    pub(crate) async fn write_to<S: Socket>(
        &mut self,
        socket: &mut S,
        buf: &mut Vec<u8>,
        time: Duration,
    ) -> Result<(), SocketError> {
        buf.clear();
        self.write_head(buf);

        match &mut self.body {
            Body::Stream(receiver) => {
                write_buffer(socket, buf, time).await?;

                let mut size = Vec::with_capacity(18);
                while let Some(chunk) = timeout(time, receiver.recv())
                    .await
                    .map_err(|_| SocketError::TimedOut)?
                {
                    if chunk.is_empty() {
                        continue;
                    }
                    size.clear();
                    let _ = write!(size, "{:x}\r\n", chunk.len());
                    write_buffers(socket, &[size.as_slice(), chunk.as_slice(), b"\r\n".as_slice()], time)
                        .await?;
                }

                write_buffer(socket, b"0\r\n\r\n", time).await
            }
            body => {
                let bytes = body.as_bytes().unwrap_or_default();
                write_buffers(socket, &[buf.as_slice(), bytes], time).await
            }
        }
    }
}

pub mod write {
    use super::*;

    /// Appends to a response body. Used in [`body_with`](Response::body_with).
    ///
    /// Implements [`std::io::Write`] as well, so `write!` works.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into header values and bodies.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    /// Floating-point numbers are left out on purpose: their formatting is
    /// ambiguous in protocol text.
    ///
    /// ```
    /// use switchyard::WriteBuffer;
    ///
    /// struct UserId(u64);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conv:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let conv = $conv;
                    conv(self, buffer);
                }
            })*
        };
        (number($type:ty), $conv:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conv(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }

    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_unsigned => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_signed => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn write_unsigned(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        write_unsigned(value.unsigned_abs(), buffer);
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}
