//! Seam to the external type system.
//!
//! The engine treats sample payloads as opaque byte blobs; turning them into
//! structured values is the job of a decoder resolved from the stream's type
//! name and marshalled registry blob.  When the file's byte order differs
//! from the host's, the decoder receives `endian_swap = true` and must swap
//! the decoded value itself.

use crate::error::Result;

pub trait PayloadDecoder {
    type Value;

    fn decode(&self, payload: &[u8], endian_swap: bool) -> Result<Self::Value>;
}

/// Resolves a [`PayloadDecoder`] for one stream.
pub trait DecoderResolver {
    type Decoder: PayloadDecoder;

    fn resolve(&self, type_name: &str, registry: &[u8]) -> Result<Self::Decoder>;
}

/// Pass-through decoder: the payload bytes themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl PayloadDecoder for RawDecoder {
    type Value = Vec<u8>;

    fn decode(&self, payload: &[u8], _endian_swap: bool) -> Result<Self::Value> {
        Ok(payload.to_vec())
    }
}
