use crate::actor::ActorClient;
use crate::message::{Message, ProtocolVersion};
use crate::peer::{FileChunk, FileId, FileInfo, PeerId};
use crate::protocol::{ProtocolContext, CHUNK_SIZE};
use crate::transport::{Channel, Transport};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::time::Duration;

/// Chunk numbers are encoded with at most 6 digits on the wire.
const MAX_CHUNKS: usize = 1_000_000;

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("Failed to read '{path}': {source}")]
    ReadFile { path: String, source: io::Error },
    #[error("Desired replication degree must be between 1 and 9, got {0}")]
    InvalidReplicationDegree(u32),
    #[error("File needs {0} chunks, more than the protocol's limit of {MAX_CHUNKS}")]
    TooManyChunks(usize),
    #[error(
        "Chunk {chunk_no} only reached replication degree {achieved} of {desired} after {attempts} attempts"
    )]
    DegreeNotReached {
        chunk_no: u32,
        achieved: u32,
        desired: u32,
        attempts: u32,
    },
}

/// Backs up one file: slice it, announce every chunk via PUTCHUNK rounds
/// with doubling backoff, and keep re-announcing chunks whose perceived
/// degree is still short. Succeeds once every chunk reached the desired
/// degree; the file stays registered either way so a later DELETE can
/// still clean up whatever the swarm did store.
pub(crate) async fn run_backup(
    ctx: &ProtocolContext,
    file_path: &str,
    replication_degree: u32,
) -> Result<(), BackupError> {
    if replication_degree < 1 || replication_degree > 9 {
        return Err(BackupError::InvalidReplicationDegree(replication_degree));
    }

    let data = tokio::fs::read(file_path).await.map_err(|source| BackupError::ReadFile {
        path: file_path.to_string(),
        source,
    })?;

    let file_id = FileId::for_path(file_path);
    let chunks = split_into_chunks(&data);
    if chunks.len() > MAX_CHUNKS {
        return Err(BackupError::TooManyChunks(chunks.len()));
    }
    slog::info!(
        ctx.logger,
        "Backing up '{}' as {} ({} chunks, degree {})",
        file_path,
        file_id,
        chunks.len(),
        replication_degree
    );

    // The file must be registered before the first PUTCHUNK goes out, or
    // this very peer would volunteer to store its own chunks.
    ctx.actor_client
        .record_backed_up_file(FileInfo {
            file_id: file_id.clone(),
            number_of_chunks: chunks.len() as u32,
            file_path: file_path.to_string(),
        })
        .await;

    let mut pending: Vec<(u32, Bytes)> = chunks.into_iter().enumerate().map(|(i, b)| (i as u32, b)).collect();
    for (chunk_no, _) in &pending {
        ctx.actor_client
            .register_backed_up_chunk(FileChunk::new(file_id.clone(), *chunk_no), replication_degree)
            .await;
    }

    let mut backoff = ctx.options.backup_initial_backoff;
    for attempt in 1..=ctx.options.backup_max_attempts {
        for (chunk_no, body) in &pending {
            let message = Message::PutChunk {
                version: ctx.version.clone(),
                sender: ctx.my_id,
                file_id: file_id.clone(),
                chunk_no: *chunk_no,
                replication_degree,
                body: body.clone(),
            };
            ctx.transport.broadcast(Channel::Backup, &message).await;
        }

        tokio::time::sleep(backoff).await;
        backoff *= 2;

        let mut still_short = Vec::new();
        for (chunk_no, body) in pending {
            let chunk = FileChunk::new(file_id.clone(), chunk_no);
            if ctx.actor_client.backed_up_degree(chunk).await < replication_degree {
                still_short.push((chunk_no, body));
            }
        }
        pending = still_short;

        if pending.is_empty() {
            slog::info!(ctx.logger, "Backup of '{}' reached its degree on attempt {}", file_path, attempt);
            return Ok(());
        }
        slog::debug!(
            ctx.logger,
            "Backup attempt {} left {} chunks under degree {}",
            attempt,
            pending.len(),
            replication_degree
        );
    }

    let (chunk_no, _) = pending[0];
    let achieved = ctx
        .actor_client
        .backed_up_degree(FileChunk::new(file_id, chunk_no))
        .await;
    Err(BackupError::DegreeNotReached {
        chunk_no,
        achieved,
        desired: replication_degree,
        attempts: ctx.options.backup_max_attempts,
    })
}

/// Re-replicates a single chunk after an eviction dropped it below its
/// desired degree. Same rounds-with-backoff scheme as a full backup, but
/// best effort: it gives up quietly after the last attempt.
pub(crate) struct ChunkReplication {
    pub logger: slog::Logger,
    pub actor_client: ActorClient,
    pub transport: Arc<dyn Transport>,
    pub version: ProtocolVersion,
    pub my_id: PeerId,
    pub initial_backoff: Duration,
    pub max_attempts: u32,
}

impl ChunkReplication {
    pub async fn replicate_chunk(&self, chunk: FileChunk, body: Bytes, replication_degree: u32) {
        self.actor_client
            .register_backed_up_chunk(chunk.clone(), replication_degree)
            .await;

        let mut backoff = self.initial_backoff;
        for _ in 0..self.max_attempts {
            if self.actor_client.backed_up_degree(chunk.clone()).await >= replication_degree {
                return;
            }

            let message = Message::PutChunk {
                version: self.version.clone(),
                sender: self.my_id,
                file_id: chunk.file_id.clone(),
                chunk_no: chunk.chunk_no,
                replication_degree,
                body: body.clone(),
            };
            self.transport.broadcast(Channel::Backup, &message).await;

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        let achieved = self.actor_client.backed_up_degree(chunk.clone()).await;
        if achieved < replication_degree {
            slog::warn!(
                self.logger,
                "Gave up re-replicating {:?} at degree {} of {}",
                chunk,
                achieved,
                replication_degree
            );
        }
    }
}

fn split_into_chunks(data: &[u8]) -> Vec<Bytes> {
    let count = data.len() / CHUNK_SIZE + 1;
    let mut chunks = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(data.len());
        chunks.push(Bytes::copy_from_slice(&data[start..end]));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_one_empty_chunk() {
        let chunks = split_into_chunks(&[]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn exact_multiple_gains_a_trailing_empty_chunk() {
        let data = vec![7u8; CHUNK_SIZE];
        let chunks = split_into_chunks(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert!(chunks[1].is_empty());
    }

    #[test]
    fn remainder_lands_in_final_chunk() {
        let data = vec![7u8; CHUNK_SIZE + 1];
        let chunks = split_into_chunks(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1);

        let data = vec![7u8; 10 * CHUNK_SIZE + 37];
        let chunks = split_into_chunks(&data);
        assert_eq!(chunks.len(), 11);
        assert_eq!(chunks[10].len(), 37);
        assert!(chunks.iter().take(10).all(|c| c.len() == CHUNK_SIZE));
    }
}
