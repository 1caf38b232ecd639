//! Incoming request model.
//!
//! A [`Request`] is the handler's read-only account of one inbound request:
//! method, path, query, version, headers, peer address, plus the pull-based
//! [`BodyReader`]. Everything except the body is immutable from the
//! application's side; the body is a forward-only stream drained by exactly
//! one consumer.
//!
//! Handlers and tests construct requests through [`Request::builder`].

use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};

use crate::body::BodyReader;

/// An inbound HTTP request.
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    segments: Vec<String>,
    query: Vec<(String, Option<String>)>,
    body: BodyReader,
}

impl Request {
    pub(crate) fn from_parts(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        remote_addr: SocketAddr,
        body: BodyReader,
    ) -> Self {
        let segments = uri
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode(s, false))
            .collect();
        let query = uri.query().map(parse_query).unwrap_or_default();

        Self { method, uri, version, headers, remote_addr, segments, query, body }
    }

    /// Builder for constructing requests in handlers and tests.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw, undecoded request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Percent-decoded path segments, empty segments dropped.
    ///
    /// `/api/users%2F42/` decodes to `["api", "users/42"]`.
    pub fn path_segments(&self) -> &[String] {
        &self.segments
    }

    /// Query parameters in wire order, duplicates preserved.
    ///
    /// A bare key (`?debug`) carries `None`; an explicit empty value
    /// (`?name=`) carries `Some("")`. Keys and values are percent-decoded
    /// with `+` treated as space.
    pub fn query(&self) -> &[(String, Option<String>)] {
        &self.query
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Every header, case-insensitive keys, duplicates preserved in order.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value for `name`, as a string. Case-insensitive; `None` for
    /// absent headers and for values that are not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The peer's address as the transport saw it.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The body reader. One consumer, forward-only.
    pub fn body_mut(&mut self) -> &mut BodyReader {
        &mut self.body
    }

    /// Consumes the request, keeping only the body reader.
    pub fn into_body(self) -> BodyReader {
        self.body
    }
}

// ── RequestBuilder ────────────────────────────────────────────────────────────

/// Fluent constructor for [`Request`].
///
/// Defaults: `GET /`, HTTP/1.1, no headers, empty body, peer `127.0.0.1:0`.
///
/// ```rust
/// use gantry::{BodyReader, Request};
///
/// let req = Request::builder()
///     .method(http::Method::POST)
///     .uri("/users?active=true")
///     .header("content-type", "application/json")
///     .body(BodyReader::full(r#"{"name":"alice"}"#))
///     .build();
///
/// assert_eq!(req.path(), "/users");
/// ```
pub struct RequestBuilder {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    body: BodyReader,
}

impl RequestBuilder {
    fn new() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: ([127, 0, 0, 1], 0).into(),
            body: BodyReader::empty(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the request target, path and optional query.
    ///
    /// # Panics
    ///
    /// Panics if `uri` is not a valid request target.
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.parse().expect("invalid request uri");
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header; call repeatedly for duplicates.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` is not a valid header token.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name: HeaderName = name.parse().expect("invalid header name");
        let value: HeaderValue = value.parse().expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn body(mut self, body: BodyReader) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Request {
        Request::from_parts(
            self.method,
            self.uri,
            self.version,
            self.headers,
            self.remote_addr,
            self.body,
        )
    }
}

// ── Query and path decoding ───────────────────────────────────────────────────

/// Splits on `&`, the first `=` separates key from value. Order and
/// duplicates are preserved; empty parameter segments are skipped.
fn parse_query(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (percent_decode(key, true), Some(percent_decode(value, true))),
            None => (percent_decode(segment, true), None),
        })
        .collect()
}

fn percent_decode(raw: &str, plus_as_space: bool) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    // Malformed escape: keep the literal '%'.
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_preserves_order_and_duplicates() {
        let req = Request::builder().uri("/search?q=one&q=two&debug&name=").build();

        let expected = [
            ("q", Some("one")),
            ("q", Some("two")),
            ("debug", None),
            ("name", Some("")),
        ];

        assert_eq!(req.query().len(), expected.len());
        for ((key, value), (want_key, want_value)) in req.query().iter().zip(expected) {
            assert_eq!(key, want_key);
            assert_eq!(value.as_deref(), want_value);
        }
    }

    #[test]
    fn query_decoding() {
        let cases = [
            ("/p?email=user%40example.com", "email", "user@example.com"),
            ("/p?note=a+b", "note", "a b"),
            ("/p?pct=50%25", "pct", "50%"),
            ("/p?broken=%zz", "broken", "%zz"),
        ];

        for (uri, key, want) in cases {
            let req = Request::builder().uri(uri).build();
            let (got_key, got_value) = &req.query()[0];
            assert_eq!(got_key, key);
            assert_eq!(got_value.as_deref(), Some(want));
        }
    }

    #[test]
    fn path_segments_are_decoded() {
        let req = Request::builder().uri("/api//users%2F42/?x=1").build();

        assert_eq!(req.path_segments(), ["api", "users/42"]);
        assert_eq!(req.path(), "/api//users%2F42/");
    }

    #[test]
    fn plus_stays_literal_in_paths() {
        let req = Request::builder().uri("/a+b").build();
        assert_eq!(req.path_segments(), ["a+b"]);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::builder()
            .header("X-Request-Id", "abc")
            .header("accept", "text/html")
            .header("Accept", "application/json")
            .build();

        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.header("ACCEPT"), Some("text/html"));

        let all: Vec<_> = req.headers().get_all("accept").iter().collect();
        assert_eq!(all, ["text/html", "application/json"]);
    }

    #[tokio::test]
    async fn builder_defaults() {
        let mut req = Request::builder().build();

        assert_eq!(req.method(), &Method::GET);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), Version::HTTP_11);
        assert!(req.query().is_empty());
        assert!(req.body_mut().read_chunk().await.unwrap().is_empty());
    }
}
