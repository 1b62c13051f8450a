//! Value encoding for cached entries.
//!
//! LMDB moves values larger than a page to overflow pages, which is slow and
//! bloats the map for the kind of payloads measures carry. Values are
//! therefore stored as a frame:
//!
//! ```text
//! [tag: 1 byte][payload]
//!   0x00  bincode
//!   0x01  zlib(bincode)
//! ```
//!
//! The compressed frame is the [`ValueCodec`] output and is used whenever the
//! plain frame would not fit in `page_size`, or always for types that ask for
//! it through [`CacheValue::ENCODING`].

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tally_core::{CodecError, Measure};

const FRAME_PLAIN: u8 = 0x00;
const FRAME_DEFLATE: u8 = 0x01;

/// How a value type wants to be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Plain unless the frame would exceed the page size.
    Auto,
    /// Always compressed.
    Compressed,
}

/// Types that can live in a [`CompositeKeyStore`](super::CompositeKeyStore).
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ENCODING: ValueEncoding = ValueEncoding::Auto;
}

macro_rules! auto_cache_values {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheValue for $ty {})*
    };
}

auto_cache_values!(String, Vec<u8>, i32, i64, u32, u64, f64, bool);

/// Measure data fields are routinely larger than a page.
impl CacheValue for Measure {
    const ENCODING: ValueEncoding = ValueEncoding::Compressed;
}

/// Binary serializer wrapped in zlib compression.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    level: Compression,
}

impl ValueCodec {
    /// `level` is a zlib level between 0 and 9.
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }

    /// Serialize `value`, then compress the serialized stream.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        bincode::serialize_into(&mut encoder, value).map_err(|e| CodecError::Serialize {
            reason: e.to_string(),
        })?;
        encoder.finish().map_err(|e| CodecError::Compress {
            reason: e.to_string(),
        })
    }

    /// Decompress, then deserialize.
    ///
    /// The whole zlib stream is consumed, so a truncated or corrupted stream
    /// fails even when the leading bytes happen to deserialize.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let mut decoder = ZlibDecoder::new(bytes);
        let value = bincode::deserialize_from(&mut decoder).map_err(|e| {
            CodecError::Deserialize {
                reason: e.to_string(),
            }
        })?;

        let mut trailing = Vec::new();
        decoder
            .read_to_end(&mut trailing)
            .map_err(|e| CodecError::Deserialize {
                reason: format!("corrupt compressed stream: {}", e),
            })?;
        if !trailing.is_empty() {
            return Err(CodecError::Deserialize {
                reason: format!("{} trailing bytes after value", trailing.len()),
            });
        }
        Ok(value)
    }

    /// Build the stored frame for `value`.
    pub(crate) fn encode_frame<V: CacheValue>(
        &self,
        value: &V,
        page_size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        if V::ENCODING == ValueEncoding::Auto {
            let plain = bincode::serialize(value).map_err(|e| CodecError::Serialize {
                reason: e.to_string(),
            })?;
            if plain.len() < page_size {
                let mut frame = Vec::with_capacity(plain.len() + 1);
                frame.push(FRAME_PLAIN);
                frame.extend_from_slice(&plain);
                return Ok(frame);
            }
            tracing::trace!(
                plain_len = plain.len(),
                page_size,
                "Value exceeds page size, storing compressed"
            );
        }

        let packed = self.encode(value)?;
        let mut frame = Vec::with_capacity(packed.len() + 1);
        frame.push(FRAME_DEFLATE);
        frame.extend_from_slice(&packed);
        Ok(frame)
    }

    /// Read back a frame written by [`ValueCodec::encode_frame`].
    pub(crate) fn decode_frame<V: CacheValue>(&self, frame: &[u8]) -> Result<V, CodecError> {
        let (&tag, payload) = frame.split_first().ok_or(CodecError::EmptyFrame)?;
        match tag {
            FRAME_PLAIN => bincode::deserialize(payload).map_err(|e| CodecError::Deserialize {
                reason: e.to_string(),
            }),
            FRAME_DEFLATE => self.decode(payload),
            other => Err(CodecError::UnknownFrame { tag: other }),
        }
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Characteristic, RuleKey};

    fn sample_measure() -> Measure {
        Measure::new("coverage_line_hits_data")
            .with_value(81.5)
            .with_data("1=3;2=0;3=7")
            .with_characteristic(Characteristic::new("TESTABILITY"))
            .with_person_id(12)
            .for_rule(RuleKey::of("squid", "S100"))
    }

    #[test]
    fn test_encode_decode_measure() {
        let codec = ValueCodec::default();
        let m = sample_measure();
        let bytes = codec.encode(&m).expect("encode should succeed");
        let back: Measure = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(back, m);
    }

    #[test]
    fn test_compression_shrinks_repetitive_payload() {
        let codec = ValueCodec::default();
        let data = "0=1;".repeat(10_000);
        let bytes = codec.encode(&data).expect("encode should succeed");
        assert!(bytes.len() < data.len() / 10);
    }

    #[test]
    fn test_decode_truncated_fails() {
        let codec = ValueCodec::default();
        // Poorly compressible payload, so half the stream is half the value.
        let mut seed = 0x2545_F491u32;
        let data: String = (0..20_000)
            .map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                char::from(b'a' + ((seed >> 16) % 26) as u8)
            })
            .collect();
        let bytes = codec.encode(&data).expect("encode should succeed");

        let truncated = &bytes[..bytes.len() / 2];
        let err = codec.decode::<String>(truncated).unwrap_err();
        assert!(matches!(err, CodecError::Deserialize { .. }));
    }

    #[test]
    fn test_decode_wrong_type_fails() {
        let codec = ValueCodec::default();
        let bytes = codec.encode(&true).expect("encode should succeed");
        assert!(codec.decode::<Measure>(&bytes).is_err());
    }

    #[test]
    fn test_frame_plain_for_small_auto_values() {
        let codec = ValueCodec::default();
        let frame = codec
            .encode_frame(&"small".to_string(), 8192)
            .expect("frame should encode");
        assert_eq!(frame[0], FRAME_PLAIN);
        let back: String = codec.decode_frame(&frame).expect("frame should decode");
        assert_eq!(back, "small");
    }

    #[test]
    fn test_frame_compressed_when_over_page() {
        let codec = ValueCodec::default();
        let big = "x".repeat(10_000);
        let frame = codec.encode_frame(&big, 8192).expect("frame should encode");
        assert_eq!(frame[0], FRAME_DEFLATE);
        assert!(frame.len() < 8192);
        let back: String = codec.decode_frame(&frame).expect("frame should decode");
        assert_eq!(back, big);
    }

    #[test]
    fn test_scalar_frames_roundtrip() {
        let codec = ValueCodec::default();
        let frame = codec.encode_frame(&u32::MAX, 8192).expect("frame should encode");
        assert_eq!(frame[0], FRAME_PLAIN);
        assert_eq!(codec.decode_frame::<u32>(&frame), Ok(u32::MAX));

        let frame = codec.encode_frame(&-7i32, 8192).expect("frame should encode");
        assert_eq!(codec.decode_frame::<i32>(&frame), Ok(-7));
    }

    #[test]
    fn test_measures_always_compressed() {
        let codec = ValueCodec::default();
        let frame = codec
            .encode_frame(&Measure::new("ncloc").with_value(1.0), 8192)
            .expect("frame should encode");
        assert_eq!(frame[0], FRAME_DEFLATE);
    }

    #[test]
    fn test_frame_errors() {
        let codec = ValueCodec::default();
        assert_eq!(
            codec.decode_frame::<String>(&[]).unwrap_err(),
            CodecError::EmptyFrame
        );
        assert_eq!(
            codec.decode_frame::<String>(&[0x09, 1, 2]).unwrap_err(),
            CodecError::UnknownFrame { tag: 0x09 }
        );
    }
}
