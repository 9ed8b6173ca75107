//! Protocol vocabulary shared by requests, responses and routes.

use std::time::SystemTime;

// LOWER CASE

#[rustfmt::skip]
pub(crate) const ASCII_TABLE: [u8; 256] = [
    //   x0    x1    x2    x3    x4    x5    x6    x7    x8    x9    xA    xB    xC    xD    xE    xF
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, // 0x
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, // 1x
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E, 0x2F, // 2x
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, // 3x
    0x40, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 4x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x5B, 0x5C, 0x5D, 0x5E, 0x5F, // 5x
    0x60, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 6x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x7B, 0x7C, 0x7D, 0x7E, 0x7F, // 7x
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x8D, 0x8E, 0x8F, // 8x
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0x9B, 0x9C, 0x9D, 0x9E, 0x9F, // 9x
    0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, // Ax
    0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, // Bx
    0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xCB, 0xCC, 0xCD, 0xCE, 0xCF, // Cx
    0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, // Dx
    0xE0, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xEB, 0xEC, 0xED, 0xEE, 0xEF, // Ex
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF, // Fx
];

/// Lowercases `src` in place.
#[inline(always)]
pub(crate) fn to_lower_case(src: &mut [u8]) {
    for byte in src.iter_mut() {
        *byte = ASCII_TABLE[*byte as usize];
    }
}

/// Parses an unsigned decimal; `None` on empty input, non-digits or overflow.
#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

/// Length of an IMF-fixdate such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub const HTTP_DATE_LEN: usize = 29;

/// Renders the current time as an IMF-fixdate.
#[inline]
pub(crate) fn http_date() -> [u8; HTTP_DATE_LEN] {
    let mut date = [b' '; HTTP_DATE_LEN];
    let rendered = httpdate::fmt_http_date(SystemTime::now());
    let len = rendered.len().min(HTTP_DATE_LEN);
    date[..len].copy_from_slice(&rendered.as_bytes()[..len]);
    date
}

// METHOD

macro_rules! set_methods {
    ($( $(#[$docs:meta])* $name:ident = $token:literal; )+) => {
        /// HTTP request methods.
        ///
        /// Tokens are matched case-sensitively, as they appear on the wire.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum Method { $(
            $(#[$docs])*
            $name,
        )+ }

        impl Method {
            /// Wire token, e.g. `b"GET"`.
            #[inline]
            pub const fn as_bytes(&self) -> &'static [u8] {
                match self { $( Self::$name => $token.as_bytes(), )+ }
            }

            #[inline]
            pub const fn as_str(&self) -> &'static str {
                match self { $( Self::$name => $token, )+ }
            }

            #[inline]
            pub fn from_bytes(src: &[u8]) -> Option<Self> {
                match src {
                    $( _ if src == $token.as_bytes() => Some(Self::$name), )+
                    _ => None,
                }
            }
        }
    };
}

set_methods! {
    Get = "GET";
    Head = "HEAD";
    Post = "POST";
    Put = "PUT";
    Patch = "PATCH";
    Delete = "DELETE";
    Options = "OPTIONS";
    /// Echo of the received request; routed like any other method.
    Trace = "TRACE";
    Connect = "CONNECT";
}

// VERSION

/// HTTP protocol version of a start-line or status line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Version {
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// [RFC 9112](https://datatracker.ietf.org/doc/html/rfc9112)
    #[default]
    Http11,
}

impl Version {
    #[inline]
    pub const fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Http10 => b"HTTP/1.0",
            Self::Http11 => b"HTTP/1.1",
        }
    }

    #[inline]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.1" => Some(Self::Http11),
            b"HTTP/1.0" => Some(Self::Http10),
            _ => None,
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($( $name:ident = ($num:expr, $str:expr); )+) => {
        /// HTTP status codes, as registered in
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Status line including the trailing CRLF,
            /// e.g. `b"HTTP/1.1 200 OK\r\n"`.
            #[inline]
            pub const fn into_first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $( StatusCode::$name => $str, )+ }
            }

            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $num => Some(StatusCode::$name), )+
                    _ => None,
                }
            }
        }
    }
}

impl StatusCode {
    #[inline(always)]
    pub const fn as_u16(&self) -> u16 {
        *self as u16
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::Ok
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    ImaTeapot = (418, "I'm a teapot");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooEarly = (425, "Too Early");
    UpgradeRequired = (426, "Upgrade Required");
    PreconditionRequired = (428, "Precondition Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");
    UnavailableForLegalReasons = (451, "Unavailable For Legal Reasons");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_case() {
        let mut value = *b"GET /Users/ABC HTTP/1.1";
        to_lower_case(&mut value);
        assert_eq!(&value, b"get /users/abc http/1.1");
    }

    #[test]
    fn parse_usize() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>); 6] = [
            (b"0",     Some(0)),
            (b"42",    Some(42)),
            (b"65536", Some(65536)),
            (b"",      None),
            (b"4a",    None),
            (b"99999999999999999999999", None),
        ];

        for (src, expected) in cases {
            assert_eq!(slice_to_usize(src), expected, "{:?}", src);
        }
    }

    #[test]
    fn method_tokens() {
        #[rustfmt::skip]
        let cases = [
            (&b"GET"[..],    Some(Method::Get)),
            (b"DELETE",      Some(Method::Delete)),
            (b"OPTIONS",     Some(Method::Options)),
            (b"get",         None),
            (b"GETS",        None),
        ];

        for (src, expected) in cases {
            assert_eq!(Method::from_bytes(src), expected);
            if let Some(method) = expected {
                assert_eq!(method.as_bytes(), src);
            }
        }
    }

    #[test]
    fn version_tokens() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::from_bytes(b"HTTP/1.0"), Some(Version::Http10));
        assert_eq!(Version::from_bytes(b"HTTP/2"), None);
        assert_eq!(Version::Http10.as_bytes(), b"HTTP/1.0");
    }

    #[test]
    fn status_codes() {
        #[rustfmt::skip]
        let cases = [
            (StatusCode::Ok,       Version::Http11, &b"HTTP/1.1 200 OK\r\n"[..]),
            (StatusCode::NotFound, Version::Http10, b"HTTP/1.0 404 Not Found\r\n"),
            (StatusCode::ServiceUnavailable, Version::Http11,
                b"HTTP/1.1 503 Service Unavailable\r\n"),
        ];

        for (status, version, line) in cases {
            assert_eq!(status.into_first_line(version), line);
            assert_eq!(StatusCode::from_u16(status.as_u16()), Some(status));
        }

        assert_eq!(StatusCode::from_u16(299), None);
        assert_eq!(StatusCode::UriTooLong.reason(), "URI Too Long");
    }

    #[test]
    fn date_shape() {
        let date = http_date();
        assert_eq!(&date[25..], b" GMT");
        assert_eq!(date[3], b',');
    }
}
