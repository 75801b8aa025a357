//! Zero-copy query string parser with flexible collection support.

use memchr::memchr;
use std::collections::HashMap;
use thiserror::Error;

/// Zero-copy query string parser.
///
/// Splits a query on `&` and `=` without allocating new strings for
/// parameter names and values. No percent-decoding is applied: values
/// are returned exactly as they appear in the request target.
///
/// # Examples
/// ```rust
/// use maker_router::query::Query;
/// use std::collections::HashMap;
///
/// // Parse into Vec (preserves order)
/// let vec_params: Vec<(&str, &str)> = Query::parse("name=john&age=25&city", 10).unwrap();
/// assert_eq!(vec_params.len(), 3);
///
/// // Parse into HashMap (deduplicates)
/// let hash_params: HashMap<&str, &str> = Query::parse("key=1&key=2", 10).unwrap();
/// assert_eq!(hash_params["key"], "2");
///
/// // Handle limits
/// let result = Query::parse::<Vec<(&str, &str)>>("a=1&b=2", 1);
/// assert!(result.is_err()); // Exceeds limit of 1 parameter
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection.
    ///
    /// A leading `?` is skipped, so `?a=1` and `a=1` are equivalent.
    ///
    /// # Errors
    ///
    /// - [`Error::Empty`] if `query` is empty or only `?`
    /// - [`Error::OverLimit`] if it holds more than `limit` parameters
    #[inline]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a str, limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a query string into an existing collection, appending to it.
    ///
    /// # Examples
    /// ```
    /// use maker_router::query::Query;
    ///
    /// let mut collector = Vec::new();
    ///
    /// Query::parse_into(&mut collector, "a=1&b=2", 10).unwrap();
    /// Query::parse_into(&mut collector, "c=3", 10).unwrap();
    /// assert_eq!(collector, [("a", "1"), ("b", "2"), ("c", "3")]);
    ///
    /// // Values are not decoded
    /// let mut collector = Vec::new();
    /// Query::parse_into(&mut collector, "email=user%40example.com", 10).unwrap();
    /// assert_eq!(collector[0].1, "user%40example.com");
    /// ```
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a str,
        limit: usize,
    ) -> Result<(), Error> {
        let data = query.strip_prefix('?').unwrap_or(query);
        if data.is_empty() {
            return Err(Error::Empty);
        }

        // Splitting on ASCII bytes keeps every slice on a char boundary.
        let bytes = data.as_bytes();
        let mut start = 0;
        while start < data.len() {
            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }

            let end = memchr(b'&', &bytes[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let (key, value) = match memchr(b'=', &bytes[start..end]) {
                Some(pos) => (&data[start..start + pos], &data[start + pos + 1..end]),
                None => (&data[start..end], ""),
            };

            result.add_param(key, value);
            start = end + 1;
        }

        Ok(())
    }
}

/// A trait for types that can collect parsed query parameters.
///
/// # Examples
/// ```rust
/// use maker_router::query::QueryCollector;
///
/// struct Owned(Vec<(String, String)>);
///
/// impl<'a> QueryCollector<'a> for Owned {
///     fn add_param(&mut self, key: &'a str, value: &'a str) {
///         self.0.push((key.to_owned(), value.to_owned()));
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Owned(Vec::with_capacity(capacity))
///     }
/// }
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    /// Adds a parsed parameter; `value` is empty when the segment has no `=`.
    fn add_param(&mut self, key: &'a str, value: &'a str);

    /// Returns the current number of parameters in the collection.
    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

// Preserves parameter order
impl<'a> QueryCollector<'a> for Vec<(&'a str, &'a str)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
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

// Last value wins
impl<'a> QueryCollector<'a> for HashMap<&'a str, &'a str> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Error types that can occur during query parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// More parameters than the given limit.
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),

    /// The query string is empty or contains only a '?' character.
    #[error("query string is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    type Params<'a> = Vec<(&'a str, &'a str)>;

    #[test]
    fn basic() {
        for line in ["a=1&b=2", "?a=1&b=2"] {
            let params: Params = Query::parse(line, 8).unwrap();
            assert_eq!(params, [("a", "1"), ("b", "2")]);
        }
    }

    #[test]
    fn full() {
        let params: Params = Query::parse("flag&empty=&=val&&key=value", 10).unwrap();

        #[rustfmt::skip]
        assert_eq!(params, [
            ("flag", ""), ("empty", ""), ("", "val"), ("", ""), ("key", "value"),
        ]);
    }

    #[test]
    fn multibyte() {
        let params: Params = Query::parse("город=Москва&q=日本", 10).unwrap();
        assert_eq!(params, [("город", "Москва"), ("q", "日本")]);
    }

    #[test]
    fn repeated_equals() {
        let params: Params = Query::parse("very=long=value", 10).unwrap();
        assert_eq!(params, [("very", "long=value")]);
    }

    #[test]
    fn limit_error() {
        assert_eq!(Query::parse::<Params>("a&a", 1), Err(Error::OverLimit(1)));
    }

    #[test]
    fn empty_error() {
        assert_eq!(Query::parse::<Params>("", 10), Err(Error::Empty));
        assert_eq!(Query::parse::<Params>("?", 10), Err(Error::Empty));
    }
}
