pub mod chunk;
pub mod chunker;
pub mod cipher;
pub mod compress;
pub mod erasure;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod placement;
pub mod restore;
pub mod rs_codec;
pub mod sizing;
pub mod symbol;

pub use chunk::{Chunk, ChunkKey, CHUNK_HEADER_LEN};
pub use error::{QrbError, Result};
pub use pipeline::{encode, render, restore, scan, self_check, Backup, BackupConfig, PageMeta};
