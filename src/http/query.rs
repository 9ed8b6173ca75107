//! Zero-copy query string splitting.
//!
//! No percent-decoding is performed: keys and values are borrowed raw.

use memchr::memchr;
use thiserror::Error;

/// Splits `key=value&flag&...` into borrowed pairs.
///
/// ```rust
/// use switchyard::query::Query;
///
/// let params: Vec<(&[u8], &[u8])> = Query::parse(b"?sort=name&debug", 8).unwrap();
/// assert_eq!(params, [(&b"sort"[..], &b"name"[..]), (&b"debug"[..], &b""[..])]);
/// ```
pub struct Query;

impl Query {
    /// Parses into a fresh collection. A leading `?` is skipped.
    #[inline]
    pub fn parse<'a, C: QueryCollector<'a>>(
        query: &'a [u8],
        limit: usize,
    ) -> Result<C, QueryError> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Appends the pairs of `query` to an existing collection.
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a [u8],
        limit: usize,
    ) -> Result<(), QueryError> {
        let data = query.strip_prefix(b"?").unwrap_or(query);

        let mut start = 0;
        while start < data.len() {
            if result.length() >= limit {
                return Err(QueryError::OverLimit(limit));
            }

            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let pair = &data[start..end];
            let (key, value) = match memchr(b'=', pair) {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, &b""[..]),
            };

            result.add_param(key, value);
            start = end + 1;
        }

        Ok(())
    }

    /// Whether `query` holds a pair whose raw `key=value` (or bare `key`)
    /// text equals `pair`.
    #[inline]
    pub(crate) fn contains_pair(query: &[u8], pair: &[u8]) -> bool {
        let data = query.strip_prefix(b"?").unwrap_or(query);
        data.split(|&b| b == b'&').any(|item| item == pair)
    }
}

/// Storage for parsed query pairs.
pub trait QueryCollector<'a>: Sized {
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]);

    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

// Order preserved
impl<'a> QueryCollector<'a> for Vec<(&'a [u8], &'a [u8])> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),
}
