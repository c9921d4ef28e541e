//! Zlib payload compression.
//!
//! Data block payloads are the only compressed bytes in a logfile; headers
//! and stream declarations are always stored verbatim.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{LogError, Result};

/// Payloads at or below this size are never worth deflating.
pub const COMPRESSION_MIN_SIZE: usize = 500;

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| LogError::Decompression(e.to_string()))?;
    Ok(out)
}
