//! Announcement Payloads
//!
//! A node announces the peer URLs it serves as a `|`-delimited list. The list
//! is gzip-compressed and split so every compressed chunk fits in one
//! Ethernet frame. Nodes serve these on `GET /peer/:cache/announcement`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::error::{CacheError, Result};

/// Largest compressed chunk, in bytes.
pub const MTU: usize = 1500;

pub const URL_DELIMITER: &str = "|";

/// Most peer URLs carried by one payload.
pub const MAXIMUM_PEERS_PER_SEND: usize = 150;

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CacheError::Internal(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Internal(format!("gzip finalization failed: {}", e)))
}

pub fn ungzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| CacheError::InvalidRequest(format!("gzip decompression failed: {}", e)))?;
    Ok(decompressed)
}

/// Splits `urls` into compressed chunks of at most `max_peers_per_send` URLs
/// and at most [`MTU`] bytes each.
///
/// A URL too large to fit a chunk on its own is dropped with a warning.
pub fn create_compressed_payload_list(
    urls: &[String],
    max_peers_per_send: usize,
) -> Result<Vec<Vec<u8>>> {
    let per_send = max_peers_per_send.max(1);
    let mut payloads = Vec::new();
    for group in urls.chunks(per_send) {
        split_to_fit(group, &mut payloads)?;
    }
    Ok(payloads)
}

fn split_to_fit(urls: &[String], payloads: &mut Vec<Vec<u8>>) -> Result<()> {
    if urls.is_empty() {
        return Ok(());
    }
    let compressed = gzip(urls.join(URL_DELIMITER).as_bytes())?;
    if compressed.len() <= MTU {
        payloads.push(compressed);
        return Ok(());
    }
    if urls.len() == 1 {
        warn!(
            url_len = urls[0].len(),
            compressed = compressed.len(),
            "peer url does not fit in one payload, not announcing it"
        );
        return Ok(());
    }
    let (left, right) = urls.split_at(urls.len() / 2);
    split_to_fit(left, payloads)?;
    split_to_fit(right, payloads)
}

/// Reverses one chunk produced by [`create_compressed_payload_list`].
pub fn decode_payload(payload: &[u8]) -> Result<Vec<String>> {
    let raw = ungzip(payload)?;
    let text = String::from_utf8(raw)
        .map_err(|e| CacheError::InvalidRequest(format!("payload is not utf-8: {}", e)))?;
    Ok(text
        .split(URL_DELIMITER)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
