use crate::peer::{FileChunk, FileId};
use bytes::Bytes;
use std::io;
use std::path::PathBuf;

/// ChunkStore is the local persistence seam of a peer: chunk bodies it
/// stores for others, and files it reassembles during restore. All methods
/// are synchronous; the store is only ever driven from the state actor.
pub trait ChunkStore: Send + 'static {
    /// Persists a chunk body. Fails without writing if it would push usage
    /// past the configured capacity.
    fn save_chunk(&mut self, chunk: &FileChunk, body: &[u8]) -> Result<(), ChunkStoreError>;

    fn load_chunk(&self, chunk: &FileChunk) -> Result<Bytes, ChunkStoreError>;

    /// Deletes one chunk, returning the number of bytes freed.
    fn delete_chunk(&mut self, chunk: &FileChunk) -> Result<u64, ChunkStoreError>;

    /// Deletes every chunk of a file, returning the number of bytes freed.
    fn delete_file(&mut self, file_id: &FileId) -> Result<u64, ChunkStoreError>;

    /// Writes a fully reassembled file, returning where it landed.
    fn save_restored_file(&mut self, file_path: &str, data: &[u8]) -> Result<PathBuf, ChunkStoreError>;

    fn used_space(&self) -> u64;

    fn capacity(&self) -> u64;

    /// Lowers (or raises) the capacity limit. Does not evict; the caller
    /// drives eviction until `used_space() <= capacity()`.
    fn set_capacity(&mut self, capacity: u64);
}

#[derive(thiserror::Error, Debug)]
pub enum ChunkStoreError {
    #[error("Saving the chunk needs {needed} B but only {available} B remain")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("No such chunk in the store")]
    ChunkNotFound,
    #[error("Chunk storage I/O failure: {0}")]
    Io(#[from] io::Error),
}
