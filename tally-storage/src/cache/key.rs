//! Composite cache keys.
//!
//! A `CacheKey` is a non-empty tuple of string segments. Keys order segment
//! by segment, and a key sorts before every longer key it is a prefix of.
//!
//! # Binary Format
//!
//! Each segment is written as its UTF-8 bytes with `0x00` escaped to
//! `0x00 0xFF`, followed by the terminator `0x00 0x01`:
//!
//! ```text
//! ("R1", "ncloc")  =>  52 31 00 01 6E 63 6C 6F 63 00 01
//! ```
//!
//! This format ensures:
//! - Byte order of encoded keys equals tuple order
//! - The encoding of a prefix tuple is a byte prefix of exactly the keys that
//!   start with that tuple, so prefix scans are plain LMDB range scans
//! - Segments may contain any character, including NUL

use std::fmt;

use tally_core::KeyError;

/// Escape byte introducing either an escaped NUL or a segment terminator.
const ESCAPE: u8 = 0x00;

/// Follows `ESCAPE` for a literal NUL inside a segment.
const ESCAPED_NUL: u8 = 0xFF;

/// Follows `ESCAPE` at the end of every segment.
const TERMINATOR: u8 = 0x01;

/// Largest key LMDB accepts with its default build options.
pub const MAX_ENCODED_KEY_LEN: usize = 511;

/// An ordered, non-empty tuple of key segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    segments: Vec<String>,
}

impl CacheKey {
    /// Build a key from its segments.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Empty` when no segment is given.
    pub fn new<I, S>(segments: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { segments })
    }

    /// Single-segment key. Cannot fail.
    pub fn single(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    /// A copy of this key with one more trailing segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always at least one).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True if `prefix`'s segments are the leading segments of this key.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Encode to the order-preserving binary format.
    pub fn encode(&self) -> Vec<u8> {
        let capacity = self.segments.iter().map(|s| s.len() + 2).sum();
        let mut bytes = Vec::with_capacity(capacity);
        for segment in &self.segments {
            for &b in segment.as_bytes() {
                if b == ESCAPE {
                    bytes.push(ESCAPE);
                    bytes.push(ESCAPED_NUL);
                } else {
                    bytes.push(b);
                }
            }
            bytes.push(ESCAPE);
            bytes.push(TERMINATOR);
        }
        bytes
    }

    /// Encode and check the result fits in an LMDB key.
    pub fn encode_checked(&self) -> Result<Vec<u8>, KeyError> {
        let bytes = self.encode();
        if bytes.len() > MAX_ENCODED_KEY_LEN {
            return Err(KeyError::TooLong {
                len: bytes.len(),
                max: MAX_ENCODED_KEY_LEN,
            });
        }
        Ok(bytes)
    }

    /// Decode a key produced by [`CacheKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, KeyError> {
        let mut segments = Vec::new();
        let mut current = Vec::new();
        let mut iter = bytes.iter().copied();

        while let Some(b) = iter.next() {
            if b != ESCAPE {
                current.push(b);
                continue;
            }
            match iter.next() {
                Some(ESCAPED_NUL) => current.push(ESCAPE),
                Some(TERMINATOR) => {
                    let segment = String::from_utf8(std::mem::take(&mut current)).map_err(|e| {
                        KeyError::Malformed {
                            reason: format!("segment {} is not UTF-8: {}", segments.len(), e),
                        }
                    })?;
                    segments.push(segment);
                }
                Some(other) => {
                    return Err(KeyError::Malformed {
                        reason: format!("invalid escape sequence 0x00 {:#04x}", other),
                    })
                }
                None => {
                    return Err(KeyError::Malformed {
                        reason: "dangling escape byte".to_string(),
                    })
                }
            }
        }

        if !current.is_empty() {
            return Err(KeyError::Malformed {
                reason: "unterminated trailing segment".to_string(),
            });
        }
        Self::new(segments)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", segment)?;
        }
        write!(f, ")")
    }
}

impl TryFrom<Vec<String>> for CacheKey {
    type Error = KeyError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl<'a> TryFrom<&[&'a str]> for CacheKey {
    type Error = KeyError;

    fn try_from(segments: &[&'a str]) -> Result<Self, Self::Error> {
        Self::new(segments.iter().copied())
    }
}

impl<const N: usize> TryFrom<[&str; N]> for CacheKey {
    type Error = KeyError;

    fn try_from(segments: [&str; N]) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}
