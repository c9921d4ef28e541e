//! Whole-file conversion passes: version migration, compression rewriting
//! and stream renaming.  Each pass streams blocks from a source to a
//! destination; a structural error aborts the pass with nothing swallowed.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::block::{BlockType, Endianness, StreamDeclaration};
use crate::block_stream::{from_version_1, read_prologue, BlockStream, BlockWriter};
use crate::compression::{deflate, COMPRESSION_MIN_SIZE};
use crate::error::{LogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The source already carries the current format; nothing was written.
    AlreadyCurrent,
    Migrated,
}

/// Migrate a logfile to the current format.
///
/// A missing prologue signals a v1 file, which is re-encoded through
/// [`from_version_1`] — v1 carries no endianness marker, so the caller must
/// have declared one or the `MissingPrologue` error propagates.  An obsolete
/// prologue version also propagates, so batch drivers can skip the file.
pub fn to_new_format<R: Read + Seek, W: Write>(
    mut src: R,
    dst: W,
    endianness: Option<Endianness>,
) -> Result<MigrationOutcome> {
    src.seek(SeekFrom::Start(0))?;
    match read_prologue(&mut src) {
        Ok(_) => Ok(MigrationOutcome::AlreadyCurrent),
        Err(LogError::MissingPrologue) => {
            let endianness = endianness.ok_or(LogError::MissingPrologue)?;
            from_version_1(src, dst, endianness)?;
            Ok(MigrationOutcome::Migrated)
        }
        Err(e) => Err(e),
    }
}

/// Rewrite a logfile with large Data payloads deflated.
///
/// A payload is compressed only when it is not already compressed, exceeds
/// [`COMPRESSION_MIN_SIZE`], and the deflated form is strictly smaller.
/// Every other block passes through unchanged, which makes the pass
/// idempotent.
pub fn compress_logfile<R: Read + Seek, W: Write>(src: R, dst: W) -> Result<()> {
    let mut from = BlockStream::new(src)?;
    let mut to = BlockWriter::create(dst, from.endianness())?;

    while let Some(info) = from.read_next_block_header()? {
        if info.kind == BlockType::Data {
            let header = from.read_data_block_header()?;
            let mut payload = from.read_payload()?;
            let mut compressed = header.compressed;
            if !compressed && payload.len() > COMPRESSION_MIN_SIZE {
                let deflated = deflate(&payload)?;
                if deflated.len() < payload.len() {
                    compressed = true;
                    payload = deflated;
                }
            }
            to.write_data_block(info.stream_index, header.rt, header.lg, compressed, &payload)?;
        } else {
            let payload = from.read_payload()?;
            to.write_block(info.kind, info.stream_index, &payload)?;
        }
    }
    to.flush()
}

/// Rewrite stream declarations with names mapped through `mappings`; streams
/// not in the mapping keep their name, every other block copies
/// byte-for-byte.
pub fn rename_streams<R: Read + Seek, W: Write>(
    src: R,
    dst: W,
    mappings: &HashMap<String, String>,
) -> Result<()> {
    let mut from = BlockStream::new(src)?;
    let mut to = BlockWriter::create(dst, from.endianness())?;

    while let Some(info) = from.read_next_block_header()? {
        let payload = from.read_payload()?;
        if info.kind == BlockType::StreamDecl {
            let mut decl = StreamDeclaration::parse(info.stream_index, &payload, from.endianness())
                .map_err(|reason| LogError::corrupt(info.pos, reason))?;
            if let Some(new_name) = mappings.get(&decl.name) {
                decl.name = new_name.clone();
            }
            to.write_stream_declaration(&decl)?;
        } else {
            to.write_block(info.kind, info.stream_index, &payload)?;
        }
    }
    to.flush()
}
