pub mod error;
pub mod block;
pub mod compression;
pub mod block_stream;
pub mod catalog;
pub mod stream;
pub mod joint;
pub mod enumerator;
pub mod decode;
pub mod convert;

pub use block::{BlockType, DataBlockHeader, Endianness, Position, StreamDeclaration, Timestamp};
pub use block_stream::{BlockStream, BlockWriter, LogWriter};
pub use catalog::{LogCatalog, StreamInfo};
pub use convert::{compress_logfile, rename_streams, to_new_format, MigrationOutcome};
pub use enumerator::{SampleEnumerator, SampleFilter, StreamCursor};
pub use error::{LogError, Result};
pub use joint::{JointHeader, JointStream};
pub use stream::{DataStream, Sample};
