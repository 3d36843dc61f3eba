mod actor;
mod api;
mod chunkstore;
mod dispatcher;
mod message;
mod peer;
mod protocol;
mod transport;

pub use api::try_create_peer;
pub use api::PeerConfig;
pub use api::PeerCreationError;
pub use api::PeerHandle;
pub use api::PeerOptions;
pub use chunkstore::ChunkStore;
pub use chunkstore::ChunkStoreError;
pub use chunkstore::DiskChunkStore;
pub use chunkstore::InMemoryChunkStore;
pub use message::Message;
pub use message::ParseError;
pub use message::ProtocolVersion;
pub use peer::FileId;
pub use peer::PeerId;
pub use peer::ReclaimOutcome;
pub use peer::RestoreProgress;
pub use protocol::BackupError;
pub use protocol::DeleteError;
pub use protocol::RestoreError;
pub use protocol::CHUNK_SIZE;
pub use transport::Channel;
pub use transport::InboundDatagram;
pub use transport::LoopbackNetwork;
pub use transport::Transport;
