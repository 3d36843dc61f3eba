use crate::chunkstore::api::{ChunkStore, ChunkStoreError};
use crate::peer::{FileChunk, FileId};
use bytes::Bytes;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem-backed chunk store.
///
/// Layout under the peer's storage directory:
/// - `backup/<file_id>/<chunk_no>` - one file per stored chunk body
/// - `restore/<basename>` - reassembled files
pub struct DiskChunkStore {
    backup_dir: PathBuf,
    restore_dir: PathBuf,
    used_space: u64,
    capacity: u64,
}

impl DiskChunkStore {
    /// Opens (or initializes) the store under `storage_directory`. Usage is
    /// recomputed from disk so a restarted peer starts with an accurate
    /// count.
    pub fn create(storage_directory: impl AsRef<Path>, capacity: u64) -> Result<Self, io::Error> {
        let backup_dir = storage_directory.as_ref().join("backup");
        let restore_dir = storage_directory.as_ref().join("restore");
        fs::create_dir_all(&backup_dir)?;
        fs::create_dir_all(&restore_dir)?;

        let used_space = measure_dir(&backup_dir)?;

        Ok(DiskChunkStore {
            backup_dir,
            restore_dir,
            used_space,
            capacity,
        })
    }

    fn chunk_path(&self, chunk: &FileChunk) -> PathBuf {
        self.backup_dir.join(chunk.file_id.as_str()).join(chunk.chunk_no.to_string())
    }
}

fn measure_dir(dir: &Path) -> Result<u64, io::Error> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += measure_dir(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }

    Ok(total)
}

impl ChunkStore for DiskChunkStore {
    fn save_chunk(&mut self, chunk: &FileChunk, body: &[u8]) -> Result<(), ChunkStoreError> {
        let needed = body.len() as u64;
        let available = self.capacity.saturating_sub(self.used_space);
        if needed > available {
            return Err(ChunkStoreError::InsufficientSpace { needed, available });
        }

        let path = self.chunk_path(chunk);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, body)?;
        self.used_space += needed;

        Ok(())
    }

    fn load_chunk(&self, chunk: &FileChunk) -> Result<Bytes, ChunkStoreError> {
        match fs::read(self.chunk_path(chunk)) {
            Ok(body) => Ok(Bytes::from(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ChunkStoreError::ChunkNotFound),
            Err(e) => Err(ChunkStoreError::Io(e)),
        }
    }

    fn delete_chunk(&mut self, chunk: &FileChunk) -> Result<u64, ChunkStoreError> {
        let path = self.chunk_path(chunk);
        let freed = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ChunkStoreError::ChunkNotFound),
            Err(e) => return Err(ChunkStoreError::Io(e)),
        };
        fs::remove_file(&path)?;
        self.used_space = self.used_space.saturating_sub(freed);

        // Drop the per-file directory once its last chunk is gone.
        if let Some(parent) = path.parent() {
            if fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(parent);
            }
        }

        Ok(freed)
    }

    fn delete_file(&mut self, file_id: &FileId) -> Result<u64, ChunkStoreError> {
        let dir = self.backup_dir.join(file_id.as_str());
        if !dir.exists() {
            return Ok(0);
        }

        let freed = measure_dir(&dir)?;
        fs::remove_dir_all(&dir)?;
        self.used_space = self.used_space.saturating_sub(freed);

        Ok(freed)
    }

    fn save_restored_file(&mut self, file_path: &str, data: &[u8]) -> Result<PathBuf, ChunkStoreError> {
        let basename = Path::new(file_path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "restored".into());
        let target = self.restore_dir.join(basename);
        fs::write(&target, data)?;

        Ok(target)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::FileId;

    fn temp_store(capacity: u64) -> (DiskChunkStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "chunkmesh-store-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&dir);
        (DiskChunkStore::create(&dir, capacity).unwrap(), dir)
    }

    fn chunk(n: u32) -> FileChunk {
        FileChunk::new(FileId::for_path("/tmp/subject"), n)
    }

    #[test]
    fn save_load_delete_round_trip() {
        let (mut store, dir) = temp_store(1000);

        store.save_chunk(&chunk(0), b"hello").unwrap();
        assert_eq!(store.used_space(), 5);
        assert_eq!(store.load_chunk(&chunk(0)).unwrap().as_ref(), b"hello");

        let freed = store.delete_chunk(&chunk(0)).unwrap();
        assert_eq!(freed, 5);
        assert_eq!(store.used_space(), 0);
        assert!(matches!(store.load_chunk(&chunk(0)), Err(ChunkStoreError::ChunkNotFound)));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn capacity_is_enforced_before_writing() {
        let (mut store, dir) = temp_store(4);

        let result = store.save_chunk(&chunk(0), b"hello");
        assert!(matches!(
            result,
            Err(ChunkStoreError::InsufficientSpace { needed: 5, available: 4 })
        ));
        assert_eq!(store.used_space(), 0);
        assert!(matches!(store.load_chunk(&chunk(0)), Err(ChunkStoreError::ChunkNotFound)));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn usage_is_recomputed_on_reopen() {
        let (mut store, dir) = temp_store(1000);
        store.save_chunk(&chunk(0), b"hello").unwrap();
        store.save_chunk(&chunk(1), b"world!").unwrap();
        drop(store);

        let reopened = DiskChunkStore::create(&dir, 1000).unwrap();
        assert_eq!(reopened.used_space(), 11);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn delete_file_removes_all_chunks() {
        let (mut store, dir) = temp_store(1000);
        store.save_chunk(&chunk(0), b"aa").unwrap();
        store.save_chunk(&chunk(1), b"bb").unwrap();

        let freed = store.delete_file(&FileId::for_path("/tmp/subject")).unwrap();
        assert_eq!(freed, 4);
        assert_eq!(store.used_space(), 0);
        assert_eq!(store.delete_file(&FileId::for_path("/tmp/subject")).unwrap(), 0);

        let _ = fs::remove_dir_all(dir);
    }
}
