//! Appendable byte rope — the body representation for buffered and streamed
//! responses.
//!
//! # Why a rope and not a `Vec<u8>`
//!
//! Response bodies are assembled from pieces: a static prefix here, a
//! formatted number there, a chunk handed over from another buffer. Gluing
//! those into one `Vec<u8>` copies every byte once per concatenation. A
//! [`Builder`] instead keeps the pieces as reference-counted [`Bytes`]
//! fragments: appending one builder to another moves fragment handles and
//! never touches the bytes themselves. The bytes are copied at most once —
//! when the finished rope is written to the transport.
//!
//! Concatenation is associative with [`Builder::new`] as identity, so
//! middleware can glue bodies together in any grouping and the materialized
//! output is the same.

use std::fmt::{self, Write as _};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A lazily-materialized sequence of byte fragments.
///
/// ```rust
/// use gantry::Builder;
///
/// let mut body = Builder::from("status: ");
/// body.append(Builder::display(200));
/// assert_eq!(body.len(), 11);
/// assert_eq!(&body.into_bytes()[..], b"status: 200");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Builder {
    fragments: Vec<Bytes>,
    len: usize,
}

impl Builder {
    /// The empty builder — the identity for [`append`](Builder::append).
    pub fn new() -> Self {
        Self { fragments: Vec::new(), len: 0 }
    }

    /// A builder holding one fragment. The bytes are not copied.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let mut builder = Self::new();
        builder.push(bytes);
        builder
    }

    /// A builder over a `'static` byte slice. Zero-copy for the lifetime of
    /// the program — the usual case for canned bodies and separators.
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }

    /// The formatted-value fragment: renders `value` through its `Display`
    /// impl into a single fragment.
    ///
    /// Rendering happens here, once, so [`len`](Builder::len) stays exact and
    /// a handler can compute `content-length` without a second formatting
    /// pass.
    pub fn display(value: impl fmt::Display) -> Self {
        let mut rendered = String::new();
        // Formatting into a String cannot fail.
        let _ = write!(rendered, "{value}");
        Self::from_bytes(rendered)
    }

    /// Appends one fragment to the end of the rope. The bytes are not copied.
    pub fn push(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.len += bytes.len();
            self.fragments.push(bytes);
        }
    }

    /// Appends every fragment of `other`, in order. O(fragments), never
    /// O(bytes): already-materialized fragments move as handles.
    pub fn append(&mut self, other: Builder) {
        self.len += other.len;
        self.fragments.extend(other.fragments);
    }

    /// Consuming concatenation. `a.concat(b)` materializes to exactly the
    /// bytes of `a` followed by the bytes of `b`.
    pub fn concat(mut self, other: Builder) -> Self {
        self.append(other);
        self
    }

    /// Total byte length across all fragments.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The fragments, in materialization order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.fragments.iter()
    }

    /// Materializes into one contiguous [`Bytes`].
    ///
    /// A single-fragment rope is returned as-is (zero copy); anything else
    /// performs the one permitted copy per fragment into a fresh buffer.
    pub fn into_bytes(mut self) -> Bytes {
        match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments.pop().unwrap_or_default(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len);
                for fragment in &self.fragments {
                    buf.extend_from_slice(fragment);
                }
                buf.freeze()
            }
        }
    }

    /// Materializes into `writer`, fragment by fragment, in order.
    ///
    /// Each fragment is written exactly once; no intermediate buffer is
    /// built. Errors are the sink's — the rope itself cannot fail.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        for fragment in &self.fragments {
            writer.write_all(fragment).await?;
        }
        Ok(())
    }
}

impl From<&'static str> for Builder {
    fn from(s: &'static str) -> Self {
        Self::from_static(s.as_bytes())
    }
}

impl From<String> for Builder {
    fn from(s: String) -> Self {
        Self::from_bytes(s)
    }
}

impl From<Vec<u8>> for Builder {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(v)
    }
}

impl From<Bytes> for Builder {
    fn from(b: Bytes) -> Self {
        Self::from_bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn materialize(builder: Builder) -> Vec<u8> {
        builder.into_bytes().to_vec()
    }

    #[test]
    fn concat_is_associative() {
        let parts = [
            Builder::from("header|"),
            Builder::display(42),
            Builder::from_static(b"|trailer"),
        ];

        let [a1, b1, c1] = parts.clone();
        let [a2, b2, c2] = parts.clone();
        let left = a1.concat(b1).concat(c1);
        let right = a2.concat(b2.concat(c2));

        let expected = b"header|42|trailer".to_vec();
        assert_eq!(materialize(left), expected);
        assert_eq!(materialize(right), expected);
    }

    #[test]
    fn empty_is_identity() {
        let cases = ["", "x", "hello world"];

        for text in cases {
            let body = Builder::from_bytes(text.as_bytes().to_vec());
            let left = Builder::new().concat(body.clone());
            let right = body.clone().concat(Builder::new());

            assert_eq!(materialize(left), text.as_bytes());
            assert_eq!(materialize(right), text.as_bytes());
        }
    }

    #[test]
    fn display_fragment_has_exact_len() {
        let cases: [(Builder, &str); 3] = [
            (Builder::display(0), "0"),
            (Builder::display(-1234), "-1234"),
            (Builder::display("plain"), "plain"),
        ];

        for (builder, expected) in cases {
            assert_eq!(builder.len(), expected.len());
            assert_eq!(materialize(builder), expected.as_bytes());
        }
    }

    #[test]
    fn empty_fragments_are_dropped() {
        let mut builder = Builder::new();
        builder.push(Bytes::new());
        builder.push("a");
        builder.append(Builder::from(""));

        assert_eq!(builder.chunks().count(), 1);
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn single_fragment_materializes_without_copy() {
        let original = Bytes::from_static(b"untouched");
        let materialized = Builder::from_bytes(original.clone()).into_bytes();

        // Same allocation, not just the same bytes.
        assert_eq!(materialized.as_ptr(), original.as_ptr());
    }

    #[tokio::test]
    async fn write_to_matches_into_bytes() {
        let build = || {
            Builder::from("a")
                .concat(Builder::display(1))
                .concat(Builder::from_static(b"b"))
        };

        let mut sink: Vec<u8> = Vec::new();
        build().write_to(&mut sink).await.unwrap();

        assert_eq!(sink, materialize(build()));
        assert_eq!(sink, b"a1b");
    }
}
