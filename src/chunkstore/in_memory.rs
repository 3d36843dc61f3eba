use crate::chunkstore::api::{ChunkStore, ChunkStoreError};
use crate::peer::{FileChunk, FileId};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;

/// In-memory chunk store, used by tests that exercise peer logic without
/// touching the filesystem.
pub struct InMemoryChunkStore {
    chunks: HashMap<FileChunk, Bytes>,
    restored_files: HashMap<String, Vec<u8>>,
    used_space: u64,
    capacity: u64,
}

impl InMemoryChunkStore {
    pub fn create(capacity: u64) -> Self {
        InMemoryChunkStore {
            chunks: HashMap::new(),
            restored_files: HashMap::new(),
            used_space: 0,
            capacity,
        }
    }

    pub fn restored_file(&self, file_path: &str) -> Option<&[u8]> {
        self.restored_files.get(file_path).map(|d| d.as_slice())
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn save_chunk(&mut self, chunk: &FileChunk, body: &[u8]) -> Result<(), ChunkStoreError> {
        let needed = body.len() as u64;
        let available = self.capacity.saturating_sub(self.used_space);
        if needed > available {
            return Err(ChunkStoreError::InsufficientSpace { needed, available });
        }

        self.chunks.insert(chunk.clone(), Bytes::copy_from_slice(body));
        self.used_space += needed;

        Ok(())
    }

    fn load_chunk(&self, chunk: &FileChunk) -> Result<Bytes, ChunkStoreError> {
        self.chunks.get(chunk).cloned().ok_or(ChunkStoreError::ChunkNotFound)
    }

    fn delete_chunk(&mut self, chunk: &FileChunk) -> Result<u64, ChunkStoreError> {
        match self.chunks.remove(chunk) {
            Some(body) => {
                let freed = body.len() as u64;
                self.used_space = self.used_space.saturating_sub(freed);
                Ok(freed)
            }
            None => Err(ChunkStoreError::ChunkNotFound),
        }
    }

    fn delete_file(&mut self, file_id: &FileId) -> Result<u64, ChunkStoreError> {
        let mut freed = 0;
        self.chunks.retain(|chunk, body| {
            if &chunk.file_id == file_id {
                freed += body.len() as u64;
                false
            } else {
                true
            }
        });
        self.used_space = self.used_space.saturating_sub(freed);

        Ok(freed)
    }

    fn save_restored_file(&mut self, file_path: &str, data: &[u8]) -> Result<PathBuf, ChunkStoreError> {
        self.restored_files.insert(file_path.to_string(), data.to_vec());

        Ok(PathBuf::from(file_path))
    }

    fn used_space(&self) -> u64 {
        self.used_space
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
    }
}
