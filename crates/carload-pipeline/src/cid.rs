//! Binary content-identifier decoding for allocation payloads.
//!
//! The event payload carries a `CIDv1` in its raw binary form: varint version,
//! varint content codec, then a multihash (varint code, varint digest length,
//! digest bytes). Decoding validates the structure strictly and keeps the
//! original bytes, so re-encoding reproduces the input bit for bit.

use std::fmt;

use thiserror::Error;

/// Result alias for content-identifier operations.
pub type CidResult<T> = Result<T, CidError>;

const CID_VERSION_1: u64 = 1;
/// Multiformats uvarints are capped at nine bytes.
const MAX_VARINT_BYTES: usize = 9;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Content-identifier decoding error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidError {
    /// The payload was empty.
    #[error("content identifier payload is empty")]
    Empty,
    /// The payload ended before a complete field was read.
    #[error("content identifier payload is truncated")]
    Truncated {
        /// Field being read when the payload ran out.
        field: &'static str,
    },
    /// A varint exceeded the multiformats nine-byte cap.
    #[error("content identifier varint overflows")]
    VarintOverflow {
        /// Field whose varint was oversized.
        field: &'static str,
    },
    /// The version prefix was not CIDv1.
    #[error("unsupported content identifier version")]
    UnsupportedVersion {
        /// Version value found in the payload.
        version: u64,
    },
    /// The multihash digest length was zero.
    #[error("content identifier digest is empty")]
    EmptyDigest,
    /// Bytes remained after the digest.
    #[error("content identifier payload has trailing bytes")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },
}

/// A validated piece content identifier.
///
/// Holds the exact payload bytes alongside the parsed structure; equality and
/// re-encoding are defined over the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceCid {
    bytes: Vec<u8>,
    codec: u64,
    multihash_code: u64,
}

impl PieceCid {
    /// Decode a binary `CIDv1` payload.
    ///
    /// # Errors
    ///
    /// Returns an error for empty, truncated, or structurally invalid input;
    /// a partially-valid identifier is never produced.
    pub fn decode(input: &[u8]) -> CidResult<Self> {
        if input.is_empty() {
            return Err(CidError::Empty);
        }

        let mut cursor = input;
        let version = read_varint(&mut cursor, "version")?;
        if version != CID_VERSION_1 {
            return Err(CidError::UnsupportedVersion { version });
        }
        let codec = read_varint(&mut cursor, "codec")?;
        let multihash_code = read_varint(&mut cursor, "multihash_code")?;
        let digest_len = read_varint(&mut cursor, "digest_length")?;
        if digest_len == 0 {
            return Err(CidError::EmptyDigest);
        }
        let digest_len = usize::try_from(digest_len)
            .map_err(|_| CidError::VarintOverflow { field: "digest_length" })?;
        if cursor.len() < digest_len {
            return Err(CidError::Truncated { field: "digest" });
        }
        let remainder = cursor.len() - digest_len;
        if remainder > 0 {
            return Err(CidError::TrailingBytes { count: remainder });
        }

        Ok(Self {
            bytes: input.to_vec(),
            codec,
            multihash_code,
        })
    }

    /// Exact payload bytes this identifier was decoded from.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Re-encode the identifier; always identical to the decoded input.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Content codec of the identified piece.
    #[must_use]
    pub const fn codec(&self) -> u64 {
        self.codec
    }

    /// Multihash function code of the digest.
    #[must_use]
    pub const fn multihash_code(&self) -> u64 {
        self.multihash_code
    }
}

impl fmt::Display for PieceCid {
    /// Canonical multibase string: `b` prefix plus lowercase base32,
    /// unpadded.
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("b")?;
        formatter.write_str(&base32_lower(&self.bytes))
    }
}

fn read_varint(cursor: &mut &[u8], field: &'static str) -> CidResult<u64> {
    let mut value: u64 = 0;
    for index in 0..MAX_VARINT_BYTES {
        let Some(&byte) = cursor.get(index) else {
            return Err(CidError::Truncated { field });
        };
        let chunk = u64::from(byte & 0x7f);
        value = chunk
            .checked_shl(u32::try_from(index * 7).unwrap_or(u32::MAX))
            .and_then(|shifted| value.checked_add(shifted))
            .ok_or(CidError::VarintOverflow { field })?;
        if byte & 0x80 == 0 {
            *cursor = &cursor[index + 1..];
            return Ok(value);
        }
    }
    Err(CidError::VarintOverflow { field })
}

fn base32_lower(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: usize = 0;
    let mut bits: u32 = 0;
    for &byte in data {
        buffer = (buffer << 8) | usize::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = (buffer >> bits) & 0x1f;
            encoded.push(char::from(BASE32_ALPHABET[index]));
        }
        // Keep only the unconsumed low bits so the accumulator stays small.
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1f;
        encoded.push(char::from(BASE32_ALPHABET[index]));
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    /// fil-commitment-unsealed codec (0xf101).
    const COMMP_CODEC: u64 = 0xf101;
    /// sha2-256-trunc254-padded multihash code (0x1012).
    const COMMP_MULTIHASH: u64 = 0x1012;

    fn varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = u8::try_from(value & 0x7f).expect("masked to seven bits");
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                return out;
            }
        }
    }

    fn sample_commp_bytes() -> Vec<u8> {
        let mut bytes = varint(CID_VERSION_1);
        bytes.extend(varint(COMMP_CODEC));
        bytes.extend(varint(COMMP_MULTIHASH));
        bytes.extend(varint(32));
        bytes.extend((0u8..32).map(|index| index.wrapping_mul(7)));
        bytes
    }

    #[test]
    fn round_trips_valid_payload_exactly() -> CidResult<()> {
        let bytes = sample_commp_bytes();
        let cid = PieceCid::decode(&bytes)?;
        assert_eq!(cid.to_bytes(), bytes);
        assert_eq!(cid.as_bytes(), bytes.as_slice());
        assert_eq!(cid.codec(), COMMP_CODEC);
        assert_eq!(cid.multihash_code(), COMMP_MULTIHASH);
        Ok(())
    }

    #[test]
    fn renders_multibase_base32_string() -> CidResult<()> {
        let cid = PieceCid::decode(&sample_commp_bytes())?;
        let rendered = cid.to_string();
        assert!(rendered.starts_with('b'));
        assert!(
            rendered[1..]
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        );
        assert!(!rendered.contains('='), "multibase base32 is unpadded");
        Ok(())
    }

    #[test]
    fn rejects_empty_payload() {
        assert_eq!(PieceCid::decode(&[]), Err(CidError::Empty));
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = sample_commp_bytes();
        let truncated = &bytes[..bytes.len() - 4];
        assert_eq!(
            PieceCid::decode(truncated),
            Err(CidError::Truncated { field: "digest" })
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = sample_commp_bytes();
        bytes.push(0x00);
        assert_eq!(
            PieceCid::decode(&bytes),
            Err(CidError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn rejects_non_v1_version() {
        // CIDv0-style payload: bare sha2-256 multihash prefix.
        let bytes = [0x12, 0x20, 0xaa, 0xbb];
        assert!(matches!(
            PieceCid::decode(&bytes),
            Err(CidError::UnsupportedVersion { version: 0x12 })
        ));
    }

    #[test]
    fn rejects_zero_length_digest() {
        let mut bytes = varint(CID_VERSION_1);
        bytes.extend(varint(COMMP_CODEC));
        bytes.extend(varint(COMMP_MULTIHASH));
        bytes.extend(varint(0));
        assert_eq!(PieceCid::decode(&bytes), Err(CidError::EmptyDigest));
    }

    #[test]
    fn rejects_oversized_varint() {
        let bytes = [0xff; 12];
        assert_eq!(
            PieceCid::decode(&bytes),
            Err(CidError::VarintOverflow { field: "version" })
        );
    }
}
