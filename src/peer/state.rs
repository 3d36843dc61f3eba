use crate::peer::types::{ChunkInfo, FileChunk, FileId, FileInfo, PeerId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// All replication bookkeeping of one peer. Owned exclusively by the state
/// actor, so every method here runs as one linearizable step; there are no
/// locks and no check-then-act windows.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct PeerState {
    /// Chunks this peer physically stores, grouped for bulk deletion.
    stored_chunks_by_file: HashMap<FileId, BTreeSet<u32>>,
    /// Convergence tracking for chunks this peer stores.
    stored_chunk_info: HashMap<FileChunk, ChunkInfo>,
    /// Convergence tracking for chunks this peer originated.
    backed_up_chunk_info: HashMap<FileChunk, ChunkInfo>,
    /// Files this peer successfully backed up, keyed by path.
    backed_up_files: HashMap<String, FileInfo>,
    /// In-flight restores.
    files_being_restored: HashMap<FileId, FileInfo>,
    restored_chunks: HashMap<FileId, BTreeMap<u32, Bytes>>,
    /// Per-chunk flag: has a CHUNK reply already been observed for a pending
    /// GETCHUNK, so our own jittered reply should be suppressed.
    pending_get_chunk: HashMap<FileChunk, bool>,
    /// Chunks evicted locally before reaching their desired degree, cached
    /// for opportunistic re-backup.
    chunks_pending_reclaim: HashMap<FileChunk, ChunkInfo>,
    /// Enhanced mode: STORED messages observed for chunks of an in-flight
    /// PUTCHUNK, consulted after the jitter delay to skip storing chunks the
    /// swarm already replicated enough.
    putchunk_suppression: HashMap<FileChunk, ChunkInfo>,
    /// Enhanced mode: per deleted file, the peers that have not yet
    /// acknowledged the DELETE.
    pending_delete_acks: HashMap<FileId, HashSet<PeerId>>,
    /// Stored chunks awaiting a jittered re-backup after a REMOVED pushed
    /// them below their desired degree. Observing a PUTCHUNK for the chunk
    /// cancels the entry.
    pending_rebackup: HashSet<FileChunk>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RestoreProgress {
    pub received: u32,
    pub expected: u32,
}

#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct RemovedImpact {
    pub stored_now_unsatisfied: bool,
    pub evicted_cache_now_unsatisfied: bool,
}

impl PeerState {
    pub(crate) fn new() -> Self {
        PeerState::default()
    }

    // ---- backup originator side ----

    pub(crate) fn register_backed_up_chunk(&mut self, chunk: FileChunk, desired_degree: u32) {
        self.backed_up_chunk_info
            .entry(chunk)
            .or_insert_with(|| ChunkInfo::new(desired_degree, 0));
    }

    pub(crate) fn backed_up_degree(&self, chunk: &FileChunk) -> u32 {
        self.backed_up_chunk_info
            .get(chunk)
            .map(|info| info.current_replication_degree())
            .unwrap_or(0)
    }

    pub(crate) fn record_backed_up_file(&mut self, info: FileInfo) {
        self.backed_up_files.insert(info.file_path.clone(), info);
    }

    pub(crate) fn backed_up_file(&self, file_path: &str) -> Option<&FileInfo> {
        self.backed_up_files.get(file_path)
    }

    /// `owns_file()` is the storing-one's-own-data guard: true if this peer
    /// is the backup originator of `file_id`.
    pub(crate) fn owns_file(&self, file_id: &FileId) -> bool {
        self.backed_up_files.values().any(|info| &info.file_id == file_id)
    }

    /// Removes a backed-up file and its per-chunk tracking, returning the
    /// file's info and the union of peers observed storing any of its
    /// chunks. Returns None if the path was never backed up here.
    pub(crate) fn forget_backed_up_file(&mut self, file_path: &str) -> Option<(FileInfo, HashSet<PeerId>)> {
        let info = self.backed_up_files.remove(file_path)?;

        let mut peers = HashSet::new();
        for chunk_no in 0..info.number_of_chunks {
            let chunk = FileChunk::new(info.file_id.clone(), chunk_no);
            if let Some(chunk_info) = self.backed_up_chunk_info.remove(&chunk) {
                peers.extend(chunk_info.peers_storing().iter().copied());
            }
        }

        Some((info, peers))
    }

    // ---- storer side ----

    pub(crate) fn is_chunk_stored(&self, chunk: &FileChunk) -> bool {
        self.stored_chunks_by_file
            .get(&chunk.file_id)
            .map(|chunks| chunks.contains(&chunk.chunk_no))
            .unwrap_or(false)
    }

    /// Registers a freshly persisted chunk. Current degree starts at 1: this
    /// peer itself.
    pub(crate) fn record_stored_chunk(&mut self, chunk: FileChunk, desired_degree: u32, size: u64) {
        self.stored_chunks_by_file
            .entry(chunk.file_id.clone())
            .or_insert_with(BTreeSet::new)
            .insert(chunk.chunk_no);
        self.stored_chunk_info
            .entry(chunk)
            .or_insert_with(|| ChunkInfo::new(desired_degree, 1).with_size(size));
    }

    /// Counts a STORED acknowledgment from `sender` towards every tracking
    /// entry that exists for this chunk, at most once per entry.
    pub(crate) fn record_stored_ack(&mut self, chunk: &FileChunk, sender: PeerId) {
        for map in [
            &mut self.stored_chunk_info,
            &mut self.backed_up_chunk_info,
            &mut self.putchunk_suppression,
        ]
        .iter_mut()
        {
            if let Some(info) = map.get_mut(chunk) {
                info.record_peer(sender);
            }
        }
    }

    pub(crate) fn stored_chunk_info_mut(&mut self, chunk: &FileChunk) -> Option<&mut ChunkInfo> {
        self.stored_chunk_info.get_mut(chunk)
    }

    /// Drops all local bookkeeping for one stored chunk, returning its info.
    /// Returns whether the file has no stored chunks left.
    pub(crate) fn remove_stored_chunk(&mut self, chunk: &FileChunk) -> (Option<ChunkInfo>, bool) {
        let info = self.stored_chunk_info.remove(chunk);

        let mut file_emptied = false;
        if let Some(chunks) = self.stored_chunks_by_file.get_mut(&chunk.file_id) {
            chunks.remove(&chunk.chunk_no);
            if chunks.is_empty() {
                self.stored_chunks_by_file.remove(&chunk.file_id);
                file_emptied = true;
            }
        }

        (info, file_emptied)
    }

    pub(crate) fn stored_chunks_of_file(&self, file_id: &FileId) -> Vec<u32> {
        self.stored_chunks_by_file
            .get(file_id)
            .map(|chunks| chunks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The most over-replicated stored chunk, eviction candidate for
    /// reclaim. Only chunks whose current degree strictly exceeds their
    /// desired degree qualify; evicting anything else would immediately
    /// re-trigger the swarm's self-healing.
    pub(crate) fn most_evictable_chunk(&self) -> Option<FileChunk> {
        self.stored_chunk_info
            .iter()
            .filter(|(_, info)| info.degree_difference() > 0)
            .max_by_key(|(_, info)| info.degree_difference())
            .map(|(chunk, _)| chunk.clone())
    }

    /// Applies one REMOVED announcement: `sender` no longer stores `chunk`.
    /// Un-counts the sender in every tracking entry and reports which
    /// entries fell below their desired degree.
    pub(crate) fn record_removed(&mut self, chunk: &FileChunk, sender: PeerId) -> RemovedImpact {
        let mut impact = RemovedImpact::default();

        if let Some(info) = self.stored_chunk_info.get_mut(chunk) {
            info.forget_peer(sender);
            impact.stored_now_unsatisfied = !info.is_satisfied();
        }
        if let Some(info) = self.backed_up_chunk_info.get_mut(chunk) {
            info.forget_peer(sender);
        }
        if let Some(info) = self.chunks_pending_reclaim.get_mut(chunk) {
            info.forget_peer(sender);
            impact.evicted_cache_now_unsatisfied = !info.is_satisfied();
        }

        impact
    }

    pub(crate) fn cache_pending_reclaim(&mut self, chunk: FileChunk, info: ChunkInfo) {
        self.chunks_pending_reclaim.entry(chunk).or_insert(info);
    }

    pub(crate) fn take_pending_reclaim(&mut self, chunk: &FileChunk) -> Option<ChunkInfo> {
        self.chunks_pending_reclaim.remove(chunk)
    }

    // ---- restore side ----

    pub(crate) fn register_get_chunk(&mut self, chunk: FileChunk) {
        self.pending_get_chunk.entry(chunk).or_insert(false);
    }

    /// Flips the suppression flag if a GETCHUNK for this chunk is pending
    /// locally.
    pub(crate) fn suppress_get_chunk(&mut self, chunk: &FileChunk) {
        if let Some(answered) = self.pending_get_chunk.get_mut(chunk) {
            *answered = true;
        }
    }

    /// Consumes the suppression flag for a pending GETCHUNK reply. True
    /// means another peer's CHUNK was observed meanwhile and our reply must
    /// be dropped.
    pub(crate) fn take_get_chunk_suppression(&mut self, chunk: &FileChunk) -> bool {
        self.pending_get_chunk.remove(chunk).unwrap_or(false)
    }

    pub(crate) fn begin_restore(&mut self, info: FileInfo) {
        self.restored_chunks
            .entry(info.file_id.clone())
            .or_insert_with(BTreeMap::new);
        self.files_being_restored.entry(info.file_id.clone()).or_insert(info);
    }

    pub(crate) fn is_restoring(&self, file_id: &FileId) -> bool {
        self.files_being_restored.contains_key(file_id)
    }

    /// Buffers one restored chunk body. Returns true when every expected
    /// chunk has arrived.
    pub(crate) fn accumulate_restored_chunk(&mut self, file_id: &FileId, chunk_no: u32, body: Bytes) -> bool {
        let expected = match self.files_being_restored.get(file_id) {
            Some(info) => info.number_of_chunks as usize,
            None => return false,
        };

        match self.restored_chunks.get_mut(file_id) {
            Some(chunks) => {
                chunks.insert(chunk_no, body);
                chunks.len() == expected
            }
            None => false,
        }
    }

    /// Concatenates the buffered chunks in chunk-index order and clears the
    /// restore bookkeeping.
    pub(crate) fn finish_restore(&mut self, file_id: &FileId) -> Option<(FileInfo, Vec<u8>)> {
        let info = self.files_being_restored.remove(file_id)?;
        let chunks = self.restored_chunks.remove(file_id)?;

        let mut data = Vec::new();
        for body in chunks.values() {
            data.extend_from_slice(body);
        }

        Some((info, data))
    }

    pub(crate) fn abort_restore(&mut self, file_id: &FileId) -> RestoreProgress {
        let expected = self
            .files_being_restored
            .remove(file_id)
            .map(|info| info.number_of_chunks)
            .unwrap_or(0);
        let received = self.restored_chunks.remove(file_id).map(|c| c.len() as u32).unwrap_or(0);

        RestoreProgress { received, expected }
    }

    // ---- removed / re-backup guard ----

    pub(crate) fn register_pending_rebackup(&mut self, chunk: FileChunk) {
        self.pending_rebackup.insert(chunk);
    }

    pub(crate) fn cancel_pending_rebackup(&mut self, chunk: &FileChunk) {
        self.pending_rebackup.remove(chunk);
    }

    /// Consumes the re-backup guard. True means no PUTCHUNK for the chunk
    /// was observed during the jitter window and this peer should start the
    /// re-backup itself.
    pub(crate) fn take_pending_rebackup(&mut self, chunk: &FileChunk) -> bool {
        self.pending_rebackup.remove(chunk)
    }

    // ---- enhanced putchunk suppression ----

    pub(crate) fn register_putchunk_suppression(&mut self, chunk: FileChunk, desired_degree: u32) {
        self.putchunk_suppression
            .entry(chunk)
            .or_insert_with(|| ChunkInfo::new(desired_degree, 0));
    }

    pub(crate) fn is_putchunk_suppressed(&self, chunk: &FileChunk) -> bool {
        self.putchunk_suppression
            .get(chunk)
            .map(|info| info.is_satisfied())
            .unwrap_or(false)
    }

    pub(crate) fn clear_putchunk_suppression(&mut self, chunk: &FileChunk) {
        self.putchunk_suppression.remove(chunk);
    }

    // ---- enhanced delete confirmation ----

    pub(crate) fn register_pending_delete(&mut self, file_id: FileId, peers: HashSet<PeerId>) {
        if !peers.is_empty() {
            self.pending_delete_acks.insert(file_id, peers);
        }
    }

    /// Removes `sender` from the file's owing set. Drops the file from
    /// pending-delete tracking once all acks are in.
    pub(crate) fn record_delete_ack(&mut self, file_id: &FileId, sender: PeerId) {
        if let Some(peers) = self.pending_delete_acks.get_mut(file_id) {
            peers.remove(&sender);
            if peers.is_empty() {
                self.pending_delete_acks.remove(file_id);
            }
        }
    }

    pub(crate) fn files_owing_delete_ack(&self, sender: PeerId) -> Vec<FileId> {
        self.pending_delete_acks
            .iter()
            .filter(|(_, peers)| peers.contains(&sender))
            .map(|(file_id, _)| file_id.clone())
            .collect()
    }

    // ---- reporting ----

    pub(crate) fn render_report(&self, used_space: u64, capacity: u64) -> String {
        let mut out = String::new();

        out.push_str("Files backed up:\n");
        for (path, info) in &self.backed_up_files {
            out.push_str(&format!("  Path: {}\n  FileId: {}\n", path, info.file_id));
            for chunk_no in 0..info.number_of_chunks {
                let chunk = FileChunk::new(info.file_id.clone(), chunk_no);
                if let Some(chunk_info) = self.backed_up_chunk_info.get(&chunk) {
                    if chunk_no == 0 {
                        out.push_str(&format!(
                            "  Desired replication degree: {}\n  Chunks:\n",
                            chunk_info.desired_replication_degree()
                        ));
                    }
                    out.push_str(&format!(
                        "    Chunk no. {} - perceived replication degree: {}\n",
                        chunk_no,
                        chunk_info.current_replication_degree()
                    ));
                }
            }
        }

        out.push_str("Chunks stored:\n");
        for (file_id, chunk_nos) in &self.stored_chunks_by_file {
            out.push_str(&format!("  FileId: {}\n", file_id));
            for chunk_no in chunk_nos {
                let chunk = FileChunk::new(file_id.clone(), *chunk_no);
                if let Some(info) = self.stored_chunk_info.get(&chunk) {
                    out.push_str(&format!(
                        "    Chunk no. {} ({} kB) - perceived replication degree: {}\n",
                        chunk_no,
                        info.size() / 1000,
                        info.current_replication_degree()
                    ));
                }
            }
        }

        out.push_str(&format!(
            "Storage:\n  Used (kB): {}\n  Available (kB): {}\n",
            used_space / 1000,
            capacity.saturating_sub(used_space) / 1000
        ));

        out
    }
}
