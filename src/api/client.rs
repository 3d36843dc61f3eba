use crate::peer::ReclaimOutcome;
use crate::protocol;
use crate::protocol::{BackupError, DeleteError, RestoreError};
use std::path::PathBuf;

/// PeerHandle is the operator-facing surface of a running peer. Each call
/// drives one of the swarm protocols to completion; the peer keeps serving
/// the other members' traffic in the background regardless.
pub struct PeerHandle {
    ctx: protocol::ProtocolContext,
}

impl PeerHandle {
    pub(crate) fn new(ctx: protocol::ProtocolContext) -> Self {
        PeerHandle { ctx }
    }

    /// Replicates a local file onto the swarm until every chunk reaches
    /// `replication_degree` peers, or the retry budget runs out.
    pub async fn backup(&self, file_path: &str, replication_degree: u32) -> Result<(), BackupError> {
        protocol::run_backup(&self.ctx, file_path, replication_degree).await
    }

    /// Reassembles a file previously backed up from this peer, returning
    /// the path it was restored to.
    pub async fn restore(&self, file_path: &str) -> Result<PathBuf, RestoreError> {
        protocol::run_restore(&self.ctx, file_path).await
    }

    /// Tells the swarm to drop every chunk of a file backed up from this
    /// peer.
    pub async fn delete(&self, file_path: &str) -> Result<(), DeleteError> {
        protocol::run_delete(&self.ctx, file_path).await
    }

    /// Shrinks this peer's storage allowance to `target_kb` kilobytes,
    /// evicting over-replicated chunks to get there.
    pub async fn reclaim(&self, target_kb: u64) -> ReclaimOutcome {
        protocol::run_reclaim(&self.ctx, target_kb).await
    }

    /// Human-readable report of what this peer backed up and stores.
    pub async fn state(&self) -> String {
        self.ctx.actor_client.render_state().await
    }
}
