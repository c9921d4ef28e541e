use std::io;
use thiserror::Error;

use crate::block::Position;

pub type Result<T> = std::result::Result<T, LogError>;

/// Error taxonomy for the pocolog engine.
///
/// Exhaustion of a stream is never an error — readers return `Ok(None)`
/// instead.  Anything structurally wrong with the file surfaces here, never
/// as a silent truncation.
#[derive(Error, Debug)]
pub enum LogError {
    /// The file does not start with the pocolog magic.  May be a legacy v1
    /// logfile; the caller decides whether to migrate.
    #[error("no prologue found (not a pocolog file, or a v1 logfile)")]
    MissingPrologue,
    #[error("obsolete format version {found}, minimum supported is {min}")]
    ObsoleteVersion { found: u32, min: u32 },
    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },
    #[error("zlib inflate failed: {0}")]
    Decompression(String),
    #[error("stream {stream}: {pos} is out of range")]
    OutOfRange { stream: u16, pos: Position },
    #[error("block references undeclared stream {0}")]
    UnknownStream(u16),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LogError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        LogError::CorruptBlock { offset, reason: reason.into() }
    }
}
