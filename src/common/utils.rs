//! Utility functions for offsetkv

use bytes::Bytes;
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};

/// Percent-encoding set for keys and values shown on a terminal
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b' ')
    .add(b'=')
    .add(b'"')
    .add(b'\\');

/// Encode raw bytes as printable, percent-encoded text
pub fn encode_key(key: &[u8]) -> String {
    percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Decode percent-encoded text into raw bytes
pub fn decode_key(encoded: &str) -> Bytes {
    Bytes::from(percent_decode_str(encoded).collect::<Vec<u8>>())
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8))
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let seconds = |factor: u64| {
        num.checked_mul(factor)
            .map(std::time::Duration::from_secs)
            .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))
    };

    match unit {
        "ms" => Ok(std::time::Duration::from_millis(num)),
        "s" => Ok(std::time::Duration::from_secs(num)),
        "m" => seconds(60),
        "h" => seconds(3600),
        _ => Err(crate::Error::InvalidConfig(format!(
            "unknown duration unit: {}",
            unit
        ))),
    }
}

/// Calculate CRC32 checksum
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
