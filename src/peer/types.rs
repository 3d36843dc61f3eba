use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// Numeric identity of a peer in the multicast group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(u32);

impl PeerId {
    pub fn new(id: u32) -> Self {
        PeerId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-derived file identity: hex-encoded SHA-256 of the file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: String) -> Self {
        FileId(id)
    }

    pub fn for_path(file_path: &str) -> Self {
        let digest = Sha256::digest(file_path.as_bytes());
        FileId(hex::encode_upper(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key identifying one chunk of one file. Used as the map key for
/// all per-chunk bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_id: FileId,
    pub chunk_no: u32,
}

impl FileChunk {
    pub fn new(file_id: FileId, chunk_no: u32) -> Self {
        FileChunk { file_id, chunk_no }
    }
}

/// Convergence tracking for one chunk, held by whoever is watching its
/// replication degree (the chunk's local storer, or the file's backup
/// initiator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    desired_replication_degree: u32,
    current_replication_degree: u32,
    size: u64,
    peers_storing: HashSet<PeerId>,
    // Populated only when the chunk was evicted locally before reaching its
    // desired degree, so the swarm can be re-seeded without a disk read.
    cached_body: Option<Bytes>,
}

impl ChunkInfo {
    pub fn new(desired_replication_degree: u32, current_replication_degree: u32) -> Self {
        ChunkInfo {
            desired_replication_degree,
            current_replication_degree,
            size: 0,
            peers_storing: HashSet::new(),
            cached_body: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn desired_replication_degree(&self) -> u32 {
        self.desired_replication_degree
    }

    pub fn current_replication_degree(&self) -> u32 {
        self.current_replication_degree
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_satisfied(&self) -> bool {
        self.current_replication_degree >= self.desired_replication_degree
    }

    /// Current minus desired degree. Positive means over-replicated (safe to
    /// evict).
    pub fn degree_difference(&self) -> i64 {
        i64::from(self.current_replication_degree) - i64::from(self.desired_replication_degree)
    }

    /// `record_peer()` counts `peer` towards the current degree exactly
    /// once. Returns true if the peer was new. This is the single
    /// check-and-update that makes duplicate STORED delivery idempotent.
    pub fn record_peer(&mut self, peer: PeerId) -> bool {
        let newly_added = self.peers_storing.insert(peer);
        if newly_added {
            self.current_replication_degree += 1;
        }
        newly_added
    }

    /// `forget_peer()` un-counts `peer` after it announced eviction, so a
    /// later re-backup on that peer counts again.
    pub fn forget_peer(&mut self, peer: PeerId) {
        if self.peers_storing.remove(&peer) {
            self.current_replication_degree = self.current_replication_degree.saturating_sub(1);
        }
    }

    pub fn decrement_degree(&mut self) {
        self.current_replication_degree = self.current_replication_degree.saturating_sub(1);
    }

    pub fn peers_storing(&self) -> &HashSet<PeerId> {
        &self.peers_storing
    }

    pub fn cache_body(&mut self, body: Bytes) {
        self.cached_body = Some(body);
    }

    pub fn cached_body(&self) -> Option<&Bytes> {
        self.cached_body.as_ref()
    }
}

/// A whole file known to this peer, either backed up by it or being
/// restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: FileId,
    pub number_of_chunks: u32,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_stable_and_hex() {
        let a = FileId::for_path("/tmp/report.pdf");
        let b = FileId::for_path("/tmp/report.pdf");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(a, FileId::for_path("/tmp/report2.pdf"));
    }

    #[test]
    fn record_peer_is_idempotent_per_peer() {
        let mut info = ChunkInfo::new(3, 0);

        assert!(info.record_peer(PeerId::new(1)));
        assert!(!info.record_peer(PeerId::new(1)));
        assert_eq!(info.current_replication_degree(), 1);

        assert!(info.record_peer(PeerId::new(2)));
        assert_eq!(info.current_replication_degree(), 2);
        assert!(!info.is_satisfied());

        info.record_peer(PeerId::new(3));
        assert!(info.is_satisfied());
    }

    #[test]
    fn forget_peer_allows_recounting() {
        let mut info = ChunkInfo::new(2, 0);
        info.record_peer(PeerId::new(1));
        info.record_peer(PeerId::new(2));

        info.forget_peer(PeerId::new(2));
        assert_eq!(info.current_replication_degree(), 1);

        assert!(info.record_peer(PeerId::new(2)));
        assert_eq!(info.current_replication_degree(), 2);
    }

    #[test]
    fn degree_difference_sign() {
        let mut info = ChunkInfo::new(1, 0);
        assert_eq!(info.degree_difference(), -1);
        info.record_peer(PeerId::new(1));
        assert_eq!(info.degree_difference(), 0);
        info.record_peer(PeerId::new(2));
        assert_eq!(info.degree_difference(), 1);
    }
}
