mod backup;
mod delete;
mod reclaim;
mod restore;

pub use backup::BackupError;
pub use delete::DeleteError;
pub use restore::RestoreError;

pub(crate) use backup::run_backup;
pub(crate) use backup::ChunkReplication;
pub(crate) use delete::run_delete;
pub(crate) use reclaim::run_reclaim;
pub(crate) use restore::run_restore;

use crate::actor::ActorClient;
use crate::api::PeerOptionsValidated;
use crate::message::ProtocolVersion;
use crate::peer::PeerId;
use crate::transport::Transport;
use std::sync::Arc;

/// Every file is sliced into chunks of this many bytes. The final chunk is
/// shorter, and empty when the file size is an exact multiple; that empty
/// chunk is what marks end-of-file, so chunk count is always
/// `len / CHUNK_SIZE + 1`.
pub const CHUNK_SIZE: usize = 64_000;

/// Everything an initiator task needs to drive a protocol from outside the
/// state actor.
#[derive(Clone)]
pub(crate) struct ProtocolContext {
    pub logger: slog::Logger,
    pub actor_client: ActorClient,
    pub transport: Arc<dyn Transport>,
    pub version: ProtocolVersion,
    pub my_id: PeerId,
    pub options: PeerOptionsValidated,
}
