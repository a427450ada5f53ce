//! `AllocationCreated` log decoding.
//!
//! The event signature is
//! `AllocationCreated(address,uint64,uint64,bytes,uint64,int64,int64,int64,string)`
//! with the first three fields indexed: client address, allocation id, and
//! provider id arrive as topics, the rest as standard ABI head/tail encoding
//! in the data section.

use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};

use carload_events::AllocationEvent;

use crate::rpc::RawLog;
use crate::{ChainError, ChainResult};

const EVENT_SIGNATURE: &str =
    "AllocationCreated(address,uint64,uint64,bytes,uint64,int64,int64,int64,string)";

const WORD_BYTES: usize = 32;
/// Topic position of the provider id (after signature, client, allocation).
const PROVIDER_TOPIC: usize = 3;

static ALLOCATION_CREATED_TOPIC: Lazy<String> = Lazy::new(|| {
    let digest = Keccak256::digest(EVENT_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(digest))
});

/// Keccak-256 topic hash of the `AllocationCreated` signature, 0x-prefixed.
#[must_use]
pub fn allocation_created_topic() -> &'static str {
    &ALLOCATION_CREATED_TOPIC
}

/// Provider id carried in a log's topics, if present and well formed.
///
/// Checked before full decoding so logs addressed to other providers are
/// filtered without paying for (or failing on) the data section.
#[must_use]
pub fn provider_of(log: &RawLog) -> Option<u64> {
    let topic = log.topics.get(PROVIDER_TOPIC)?;
    u64_from_topic(topic, "provider").ok()
}

/// Decode one raw log into an allocation event.
///
/// The caller sets `is_past_event` according to provenance; decoding always
/// leaves it `false`.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] when topics are missing or any field fails
/// to parse. A malformed log never panics and never yields a partial event.
pub fn decode_log(log: &RawLog) -> ChainResult<AllocationEvent> {
    let client = address_from_topic(topic_at(log, 1, "client")?)?;
    let allocation_id = u64_from_topic(topic_at(log, 2, "allocation_id")?, "allocation_id")?;
    let provider = u64_from_topic(topic_at(log, PROVIDER_TOPIC, "provider")?, "provider")?;

    let data = hex_to_bytes(&log.data, "data")?;
    let payload_offset = offset_word(&data, 0, "data_offset")?;
    let size = u64_word(&data, 1, "size")?;
    let term_min = i64_word(&data, 2, "term_min")?;
    let term_max = i64_word(&data, 3, "term_max")?;
    let expiration = i64_word(&data, 4, "expiration")?;
    let url_offset = offset_word(&data, 5, "download_url_offset")?;

    let payload = dynamic_bytes(&data, payload_offset, "data")?;
    let url_bytes = dynamic_bytes(&data, url_offset, "download_url")?;
    let download_url = String::from_utf8(url_bytes).map_err(|_| ChainError::Decode {
        field: "download_url",
        reason: "not valid UTF-8",
        value: None,
    })?;

    let block_number = log
        .block_number
        .as_deref()
        .map(|quantity| quantity_to_u64(quantity, "block_number"))
        .transpose()?;

    Ok(AllocationEvent {
        client,
        allocation_id,
        provider,
        data: payload,
        size,
        term_min,
        term_max,
        expiration,
        download_url,
        block_number,
        transaction_hash: log.transaction_hash.clone(),
        is_past_event: false,
    })
}

/// Parse a 0x-prefixed hex quantity (e.g. a block number) into a `u64`.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] for a missing prefix, empty digits, or a
/// value that does not fit.
pub fn quantity_to_u64(value: &str, field: &'static str) -> ChainResult<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| decode_error(field, "missing 0x prefix", value))?;
    if digits.is_empty() {
        return Err(decode_error(field, "empty quantity", value));
    }
    u64::from_str_radix(digits, 16).map_err(|_| decode_error(field, "not a u64 quantity", value))
}

fn decode_error(field: &'static str, reason: &'static str, value: &str) -> ChainError {
    ChainError::Decode {
        field,
        reason,
        value: Some(value.to_string()),
    }
}

fn topic_at<'a>(log: &'a RawLog, index: usize, field: &'static str) -> ChainResult<&'a str> {
    log.topics
        .get(index)
        .map(String::as_str)
        .ok_or(ChainError::Decode {
            field,
            reason: "topic missing",
            value: None,
        })
}

fn hex_to_bytes(value: &str, field: &'static str) -> ChainResult<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| decode_error(field, "missing 0x prefix", value))?;
    hex::decode(digits).map_err(|_| decode_error(field, "invalid hex", value))
}

fn topic_word(topic: &str, field: &'static str) -> ChainResult<[u8; WORD_BYTES]> {
    let bytes = hex_to_bytes(topic, field)?;
    <[u8; WORD_BYTES]>::try_from(bytes).map_err(|_| decode_error(field, "topic is not 32 bytes", topic))
}

fn address_from_topic(topic: &str) -> ChainResult<String> {
    let word = topic_word(topic, "client")?;
    let (padding, address) = word.split_at(WORD_BYTES - 20);
    if padding.iter().any(|byte| *byte != 0) {
        return Err(decode_error("client", "address padding not zero", topic));
    }
    Ok(format!("0x{}", hex::encode(address)))
}

fn u64_from_topic(topic: &str, field: &'static str) -> ChainResult<u64> {
    let word = topic_word(topic, field)?;
    word_to_u64(&word, field)
}

fn word_at<'a>(data: &'a [u8], index: usize, field: &'static str) -> ChainResult<&'a [u8]> {
    index
        .checked_mul(WORD_BYTES)
        .and_then(|start| data.get(start..start + WORD_BYTES))
        .ok_or(ChainError::Decode {
            field,
            reason: "data section too short",
            value: None,
        })
}

fn word_to_u64(word: &[u8], field: &'static str) -> ChainResult<u64> {
    let (head, tail) = word.split_at(WORD_BYTES - 8);
    if head.iter().any(|byte| *byte != 0) {
        return Err(ChainError::Decode {
            field,
            reason: "value does not fit in u64",
            value: Some(hex::encode(word)),
        });
    }
    let bytes = <[u8; 8]>::try_from(tail).map_err(|_| ChainError::Decode {
        field,
        reason: "word is not 32 bytes",
        value: Some(hex::encode(word)),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn word_to_i64(word: &[u8], field: &'static str) -> ChainResult<i64> {
    let (head, tail) = word.split_at(WORD_BYTES - 8);
    let negative = head.first().is_some_and(|byte| *byte & 0x80 != 0);
    let extension = if negative { 0xff } else { 0x00 };
    if head.iter().any(|byte| *byte != extension) {
        return Err(ChainError::Decode {
            field,
            reason: "value does not fit in i64",
            value: Some(hex::encode(word)),
        });
    }
    let bytes = <[u8; 8]>::try_from(tail).map_err(|_| ChainError::Decode {
        field,
        reason: "word is not 32 bytes",
        value: Some(hex::encode(word)),
    })?;
    let value = i64::from_be_bytes(bytes);
    if (value < 0) == negative {
        Ok(value)
    } else {
        Err(ChainError::Decode {
            field,
            reason: "inconsistent sign extension",
            value: Some(hex::encode(word)),
        })
    }
}

fn u64_word(data: &[u8], index: usize, field: &'static str) -> ChainResult<u64> {
    word_to_u64(word_at(data, index, field)?, field)
}

fn i64_word(data: &[u8], index: usize, field: &'static str) -> ChainResult<i64> {
    word_to_i64(word_at(data, index, field)?, field)
}

fn offset_word(data: &[u8], index: usize, field: &'static str) -> ChainResult<usize> {
    let value = u64_word(data, index, field)?;
    usize::try_from(value).map_err(|_| ChainError::Decode {
        field,
        reason: "offset does not fit in usize",
        value: Some(value.to_string()),
    })
}

fn dynamic_bytes(data: &[u8], offset: usize, field: &'static str) -> ChainResult<Vec<u8>> {
    let too_short = || ChainError::Decode {
        field,
        reason: "dynamic field out of bounds",
        value: None,
    };
    let length_word = offset
        .checked_add(WORD_BYTES)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(too_short)?;
    let length = word_to_u64(length_word, field)?;
    let length = usize::try_from(length).map_err(|_| too_short())?;
    let start = offset.checked_add(WORD_BYTES).ok_or_else(too_short)?;
    let end = start.checked_add(length).ok_or_else(too_short)?;
    data.get(start..end).map(<[u8]>::to_vec).ok_or_else(too_short)
}
