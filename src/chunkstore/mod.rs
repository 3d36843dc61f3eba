mod api;
mod disk;
mod in_memory;

pub use api::ChunkStore;
pub use api::ChunkStoreError;
pub use disk::DiskChunkStore;
pub use in_memory::InMemoryChunkStore;
