use crate::actor::ActorClient;
use crate::peer::state::PeerState;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

fn snapshot_path(storage_directory: &Path) -> PathBuf {
    storage_directory.join("state.bin")
}

/// Loads the replication state persisted by a previous run. A missing or
/// unreadable snapshot yields a fresh state; losing the perceived degrees
/// is safe because STORED recounting rebuilds them over time.
pub(crate) fn load_snapshot(logger: &slog::Logger, storage_directory: &Path) -> PeerState {
    let path = snapshot_path(storage_directory);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => return PeerState::new(),
    };

    match bincode::deserialize(&bytes) {
        Ok(state) => {
            slog::info!(logger, "Loaded replication state snapshot from {:?}", path);
            state
        }
        Err(e) => {
            slog::warn!(logger, "Ignoring corrupt state snapshot {:?}: {}", path, e);
            PeerState::new()
        }
    }
}

/// Periodically asks the actor for a serialized copy of its state and
/// writes it out via a temp file so a crash mid-write never corrupts the
/// previous snapshot.
pub(crate) fn spawn_snapshot_task(
    logger: slog::Logger,
    actor_client: ActorClient,
    storage_directory: PathBuf,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let bytes = actor_client.snapshot().await;
            if bytes.is_empty() {
                continue;
            }

            let path = snapshot_path(&storage_directory);
            let tmp_path = storage_directory.join("state.bin.tmp");
            let result = fs::write(&tmp_path, &bytes).and_then(|_| fs::rename(&tmp_path, &path));
            match result {
                Ok(()) => slog::debug!(logger, "Persisted replication state ({} B)", bytes.len()),
                Err(e) => slog::warn!(logger, "Failed to persist replication state: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::{FileChunk, FileId};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn missing_snapshot_yields_fresh_state() {
        let dir = std::env::temp_dir().join("chunkmesh-snapshot-missing");
        let _ = fs::create_dir_all(&dir);
        let _ = fs::remove_file(snapshot_path(&dir));

        let state = load_snapshot(&test_logger(), &dir);
        assert!(!state.is_chunk_stored(&FileChunk::new(FileId::new("F".to_string()), 0)));
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let dir = std::env::temp_dir().join("chunkmesh-snapshot-corrupt");
        let _ = fs::create_dir_all(&dir);
        fs::write(snapshot_path(&dir), b"not bincode at all").unwrap();

        let state = load_snapshot(&test_logger(), &dir);
        assert!(!state.is_chunk_stored(&FileChunk::new(FileId::new("F".to_string()), 0)));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn snapshot_round_trips_through_bincode() {
        let mut state = PeerState::new();
        state.record_stored_chunk(FileChunk::new(FileId::new("F".to_string()), 3), 2, 100);
        let bytes = bincode::serialize(&state).unwrap();

        let dir = std::env::temp_dir().join("chunkmesh-snapshot-roundtrip");
        let _ = fs::create_dir_all(&dir);
        fs::write(snapshot_path(&dir), &bytes).unwrap();

        let reloaded = load_snapshot(&test_logger(), &dir);
        assert!(reloaded.is_chunk_stored(&FileChunk::new(FileId::new("F".to_string()), 3)));

        let _ = fs::remove_dir_all(dir);
    }
}
