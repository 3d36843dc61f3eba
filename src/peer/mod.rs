mod peer;
mod snapshot;
mod state;
mod types;

pub use peer::Peer;
pub use peer::ReclaimOutcome;
pub use state::RestoreProgress;
pub use types::FileChunk;
pub use types::FileId;
pub use types::FileInfo;
pub use types::PeerId;

pub(crate) use snapshot::load_snapshot;
pub(crate) use snapshot::spawn_snapshot_task;
