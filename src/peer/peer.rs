use crate::actor::ActorClient;
use crate::api::PeerOptionsValidated;
use crate::chunkstore::{ChunkStore, ChunkStoreError};
use crate::message::{Message, ProtocolVersion};
use crate::peer::state::PeerState;
use crate::peer::types::{FileChunk, FileId, FileInfo, PeerId};
use crate::peer::RestoreProgress;
use crate::protocol;
use crate::transport::{Channel, Transport};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;

/// Result of a reclaim pass over the local chunk store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub freed_bytes: u64,
    pub used_space: u64,
    pub capacity: u64,
    /// False when usage still exceeds the new capacity because no stored
    /// chunk was over-replicated enough to evict safely.
    pub target_met: bool,
}

/// Peer is one member of the backup swarm: the message handlers of all four
/// protocols plus the local bookkeeping they share. Driven exclusively by
/// the state actor, so handlers are synchronous and never interleave.
/// Slow work (jittered replies, replication retry loops) is spawned as its
/// own task and re-enters through the actor.
pub struct Peer<C: ChunkStore> {
    logger: slog::Logger,
    my_id: PeerId,
    version: ProtocolVersion,
    enhanced: bool,
    state: PeerState,
    chunk_store: C,
    transport: Arc<dyn Transport>,
    actor_client: ActorClient,
    options: PeerOptionsValidated,
    restore_waiters: HashMap<FileId, oneshot::Sender<PathBuf>>,
}

impl<C: ChunkStore> Peer<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        my_id: PeerId,
        version: ProtocolVersion,
        state: PeerState,
        chunk_store: C,
        transport: Arc<dyn Transport>,
        actor_client: ActorClient,
        options: PeerOptionsValidated,
    ) -> Self {
        let enhanced = !version.is_base();
        Peer {
            logger,
            my_id,
            version,
            enhanced,
            state,
            chunk_store,
            transport,
            actor_client,
            options,
            restore_waiters: HashMap::new(),
        }
    }

    // ---- backup protocol, storer side ----

    pub(crate) fn register_put_chunk_listener(&mut self, chunk: FileChunk, replication_degree: u32) {
        self.state.register_putchunk_suppression(chunk, replication_degree);
    }

    pub(crate) fn handle_put_chunk(
        &mut self,
        version: ProtocolVersion,
        chunk: FileChunk,
        replication_degree: u32,
        body: Bytes,
    ) {
        // Someone else is re-replicating this chunk; stand down.
        self.state.cancel_pending_rebackup(&chunk);
        self.state.take_pending_reclaim(&chunk);

        let suppressed = self.state.is_putchunk_suppressed(&chunk);
        self.state.clear_putchunk_suppression(&chunk);

        if self.state.owns_file(&chunk.file_id) {
            slog::debug!(self.logger, "Ignoring PUTCHUNK for a file I originated: {:?}", chunk);
            return;
        }

        if self.enhanced && !version.is_base() && suppressed {
            slog::debug!(
                self.logger,
                "Skipping PUTCHUNK, swarm already reached degree {} for {:?}",
                replication_degree,
                chunk
            );
            return;
        }

        if self.state.is_chunk_stored(&chunk) {
            // Re-announce so recounting initiators see us.
            self.broadcast_stored(chunk);
            return;
        }

        match self.chunk_store.save_chunk(&chunk, &body) {
            Ok(()) => {
                self.state.record_stored_chunk(chunk.clone(), replication_degree, body.len() as u64);
                slog::info!(self.logger, "Stored chunk {:?} ({} B)", chunk, body.len());
                self.broadcast_stored(chunk);
            }
            Err(ChunkStoreError::InsufficientSpace { needed, available }) => {
                slog::warn!(
                    self.logger,
                    "Not storing {:?}: need {} B, have {} B",
                    chunk,
                    needed,
                    available
                );
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to persist chunk {:?}: {}", chunk, e);
            }
        }
    }

    fn broadcast_stored(&self, chunk: FileChunk) {
        let message = Message::Stored {
            version: self.version.clone(),
            sender: self.my_id,
            file_id: chunk.file_id,
            chunk_no: chunk.chunk_no,
        };
        self.spawn_jittered_broadcast(Channel::Control, message, self.options.stored_reply_jitter_max);
    }

    pub(crate) fn handle_stored(&mut self, sender: PeerId, chunk: FileChunk) {
        self.state.record_stored_ack(&chunk, sender);
    }

    // ---- restore protocol ----

    pub(crate) fn register_get_chunk_listener(&mut self, chunk: FileChunk) {
        if self.state.is_chunk_stored(&chunk) {
            self.state.register_get_chunk(chunk);
        }
    }

    pub(crate) fn handle_get_chunk(&mut self, version: ProtocolVersion, requester: PeerId, chunk: FileChunk) {
        let answered_elsewhere = self.state.take_get_chunk_suppression(&chunk);
        if answered_elsewhere {
            slog::debug!(self.logger, "Suppressing CHUNK reply for {:?}", chunk);
            return;
        }
        if !self.state.is_chunk_stored(&chunk) {
            return;
        }

        let body = match self.chunk_store.load_chunk(&chunk) {
            Ok(body) => body,
            Err(e) => {
                slog::error!(self.logger, "Failed to read stored chunk {:?}: {}", chunk, e);
                return;
            }
        };

        if self.enhanced && !version.is_base() {
            // Announce on the shared channel with an empty body, so the
            // other storers suppress their replies, and hand the body to
            // the requester alone.
            let announcement = self.chunk_message(chunk.clone(), Bytes::new());
            let reply = self.chunk_message(chunk, body);
            let transport = self.transport.clone();
            tokio::spawn(async move {
                transport.broadcast(Channel::Restore, &announcement).await;
                transport.unicast(requester, Channel::Restore, &reply).await;
            });
        } else {
            let message = self.chunk_message(chunk, body);
            self.spawn_broadcast(Channel::Restore, message);
        }
    }

    fn chunk_message(&self, chunk: FileChunk, body: Bytes) -> Message {
        Message::Chunk {
            version: self.version.clone(),
            sender: self.my_id,
            file_id: chunk.file_id,
            chunk_no: chunk.chunk_no,
            body,
        }
    }

    pub(crate) fn begin_restore(&mut self, info: FileInfo, done: oneshot::Sender<PathBuf>) {
        self.restore_waiters.insert(info.file_id.clone(), done);
        self.state.begin_restore(info);
    }

    pub(crate) fn handle_chunk(&mut self, version: ProtocolVersion, chunk: FileChunk, body: Bytes, unicast: bool) {
        // Another storer answered first; our pending reply (if any) is moot.
        self.state.suppress_get_chunk(&chunk);

        if !self.state.is_restoring(&chunk.file_id) {
            return;
        }
        // A broadcast empty-body CHUNK from an enhanced peer is the
        // reply-suppression announcement; the real body follows on the
        // point-to-point path, where even a genuinely empty chunk counts.
        if !version.is_base() && body.is_empty() && !unicast {
            return;
        }

        let file_id = chunk.file_id.clone();
        if self.state.accumulate_restored_chunk(&file_id, chunk.chunk_no, body) {
            self.finish_restore(&file_id);
        }
    }

    fn finish_restore(&mut self, file_id: &FileId) {
        let (info, data) = match self.state.finish_restore(file_id) {
            Some(completed) => completed,
            None => return,
        };

        match self.chunk_store.save_restored_file(&info.file_path, &data) {
            Ok(path) => {
                slog::info!(self.logger, "Restored {} ({} B) to {:?}", info.file_path, data.len(), path);
                if let Some(waiter) = self.restore_waiters.remove(file_id) {
                    let _ = waiter.send(path);
                }
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to write restored file {}: {}", info.file_path, e);
                self.restore_waiters.remove(file_id);
            }
        }
    }

    pub(crate) fn abort_restore(&mut self, file_id: &FileId) -> RestoreProgress {
        self.restore_waiters.remove(file_id);
        self.state.abort_restore(file_id)
    }

    // ---- delete protocol ----

    pub(crate) fn delete_local_file(&mut self, file_path: &str) -> Option<FileId> {
        let (info, peers_storing) = self.state.forget_backed_up_file(file_path)?;
        slog::info!(
            self.logger,
            "Deleting backed up file {} ({} chunks, {} storers)",
            file_path,
            info.number_of_chunks,
            peers_storing.len()
        );
        if self.enhanced {
            self.state.register_pending_delete(info.file_id.clone(), peers_storing);
        }

        Some(info.file_id)
    }

    pub(crate) fn handle_delete(&mut self, file_id: FileId) {
        let chunk_nos = self.state.stored_chunks_of_file(&file_id);
        if chunk_nos.is_empty() {
            return;
        }

        for chunk_no in &chunk_nos {
            let chunk = FileChunk::new(file_id.clone(), *chunk_no);
            self.state.remove_stored_chunk(&chunk);
            self.state.cancel_pending_rebackup(&chunk);
            self.state.take_pending_reclaim(&chunk);
        }
        match self.chunk_store.delete_file(&file_id) {
            Ok(freed) => {
                slog::info!(
                    self.logger,
                    "Deleted {} chunks of {} ({} B freed)",
                    chunk_nos.len(),
                    file_id,
                    freed
                );
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to delete chunks of {}: {}", file_id, e);
            }
        }

        if self.enhanced {
            let message = Message::AckDelete {
                version: self.version.clone(),
                sender: self.my_id,
                file_id,
            };
            self.spawn_broadcast(Channel::Control, message);
        }
    }

    pub(crate) fn handle_ack_delete(&mut self, sender: PeerId, file_id: FileId) {
        self.state.record_delete_ack(&file_id, sender);
    }

    /// CONTROL is a liveness announcement. A rejoining peer may have missed
    /// DELETEs while offline; re-send the ones it still owes an ack for.
    pub(crate) fn handle_control(&mut self, sender: PeerId) {
        if !self.enhanced {
            return;
        }

        for file_id in self.state.files_owing_delete_ack(sender) {
            slog::info!(self.logger, "Re-sending DELETE of {} for rejoined peer {}", file_id, sender);
            let message = Message::Delete {
                version: self.version.clone(),
                sender: self.my_id,
                file_id,
            };
            self.spawn_broadcast(Channel::Control, message);
        }
    }

    // ---- reclaim protocol ----

    pub(crate) fn reclaim(&mut self, target_capacity: u64) -> ReclaimOutcome {
        self.chunk_store.set_capacity(target_capacity);

        let mut freed_bytes = 0;
        while self.chunk_store.used_space() > self.chunk_store.capacity() {
            let victim = match self.state.most_evictable_chunk() {
                Some(chunk) => chunk,
                None => break,
            };

            // Keep the body around in case the degree later drops below
            // desired and we have to re-replicate what we just evicted.
            let body = self.chunk_store.load_chunk(&victim).ok();
            match self.chunk_store.delete_chunk(&victim) {
                Ok(freed) => freed_bytes += freed,
                Err(e) => {
                    slog::error!(self.logger, "Failed to evict chunk {:?}: {}", victim, e);
                    break;
                }
            }

            let (info, _) = self.state.remove_stored_chunk(&victim);
            if let Some(mut info) = info {
                info.decrement_degree();
                if let Some(body) = body {
                    info.cache_body(body);
                }
                self.state.cache_pending_reclaim(victim.clone(), info);
            }

            slog::info!(self.logger, "Evicted over-replicated chunk {:?}", victim);
            let message = Message::Removed {
                version: self.version.clone(),
                sender: self.my_id,
                file_id: victim.file_id,
                chunk_no: victim.chunk_no,
            };
            self.spawn_broadcast(Channel::Control, message);
        }

        let used_space = self.chunk_store.used_space();
        let capacity = self.chunk_store.capacity();
        ReclaimOutcome {
            freed_bytes,
            used_space,
            capacity,
            target_met: used_space <= capacity,
        }
    }

    pub(crate) fn handle_removed(&mut self, sender: PeerId, chunk: FileChunk) {
        let impact = self.state.record_removed(&chunk, sender);

        let needs_rebackup = (self.state.is_chunk_stored(&chunk) && impact.stored_now_unsatisfied)
            || impact.evicted_cache_now_unsatisfied;
        if !needs_rebackup {
            return;
        }

        // Every surviving storer notices at once; the jitter plus the
        // PUTCHUNK-observed guard means roughly one of them acts.
        slog::info!(
            self.logger,
            "Chunk {:?} fell below its desired degree after {} evicted it",
            chunk,
            sender
        );
        self.state.register_pending_rebackup(chunk.clone());
        let actor_client = self.actor_client.clone();
        let delay = jitter(self.options.rebackup_jitter_max);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            actor_client.rebackup_elapsed(chunk).await;
        });
    }

    pub(crate) fn handle_rebackup_elapsed(&mut self, chunk: FileChunk) {
        if !self.state.take_pending_rebackup(&chunk) {
            // A PUTCHUNK for the chunk arrived during the jitter window.
            return;
        }

        let (body, desired_degree) = if self.state.is_chunk_stored(&chunk) {
            let desired = match self.state.stored_chunk_info_mut(&chunk) {
                Some(info) => info.desired_replication_degree(),
                None => return,
            };
            match self.chunk_store.load_chunk(&chunk) {
                Ok(body) => (body, desired),
                Err(e) => {
                    slog::error!(self.logger, "Cannot re-replicate {:?}: {}", chunk, e);
                    return;
                }
            }
        } else if let Some(info) = self.state.take_pending_reclaim(&chunk) {
            match info.cached_body() {
                Some(body) => (body.clone(), info.desired_replication_degree()),
                None => return,
            }
        } else {
            return;
        };

        slog::info!(self.logger, "Re-replicating under-replicated chunk {:?}", chunk);
        let task = protocol::ChunkReplication {
            logger: self.logger.clone(),
            actor_client: self.actor_client.clone(),
            transport: self.transport.clone(),
            version: self.version.clone(),
            my_id: self.my_id,
            initial_backoff: self.options.backup_initial_backoff,
            max_attempts: self.options.backup_max_attempts,
        };
        tokio::spawn(async move {
            task.replicate_chunk(chunk, body, desired_degree).await;
        });
    }

    // ---- initiator bookkeeping, queried by the protocol tasks ----

    pub(crate) fn register_backed_up_chunk(&mut self, chunk: FileChunk, replication_degree: u32) {
        self.state.register_backed_up_chunk(chunk, replication_degree);
    }

    pub(crate) fn backed_up_degree(&self, chunk: &FileChunk) -> u32 {
        self.state.backed_up_degree(chunk)
    }

    pub(crate) fn record_backed_up_file(&mut self, info: FileInfo) {
        self.state.record_backed_up_file(info);
    }

    pub(crate) fn lookup_backed_up_file(&self, file_path: &str) -> Option<FileInfo> {
        self.state.backed_up_file(file_path).cloned()
    }

    // ---- reporting and persistence ----

    pub(crate) fn render_state(&self) -> String {
        self.state
            .render_report(self.chunk_store.used_space(), self.chunk_store.capacity())
    }

    pub(crate) fn snapshot_bytes(&self) -> Vec<u8> {
        match bincode::serialize(&self.state) {
            Ok(bytes) => bytes,
            Err(e) => {
                slog::error!(self.logger, "Failed to serialize replication state: {}", e);
                Vec::new()
            }
        }
    }

    // ---- broadcast plumbing ----

    fn spawn_broadcast(&self, channel: Channel, message: Message) {
        self.spawn_jittered_broadcast(channel, message, Duration::ZERO);
    }

    fn spawn_jittered_broadcast(&self, channel: Channel, message: Message, jitter_max: Duration) {
        let transport = self.transport.clone();
        let delay = jitter(jitter_max);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            transport.broadcast(channel, &message).await;
        });
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }

    rand::thread_rng().gen_range(Duration::ZERO..=max)
}
