use crate::message::Message;
use crate::peer::FileId;
use crate::protocol::ProtocolContext;
use crate::transport::Channel;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    #[error("'{0}' was not backed up from this peer")]
    NotBackedUp(String),
    #[error("Restore timed out with {received} of {expected} chunks")]
    Incomplete { received: u32, expected: u32 },
    #[error("Restore was interrupted before the file could be written")]
    Interrupted,
}

/// Restores a previously backed up file: fan out one GETCHUNK per chunk,
/// then wait for the state actor to report the reassembled file written.
/// On timeout the partial buffers are discarded and the progress is
/// reported back to the caller.
pub(crate) async fn run_restore(ctx: &ProtocolContext, file_path: &str) -> Result<PathBuf, RestoreError> {
    let info = ctx
        .actor_client
        .lookup_backed_up_file(file_path.to_string())
        .await
        .ok_or_else(|| RestoreError::NotBackedUp(file_path.to_string()))?;

    slog::info!(
        ctx.logger,
        "Restoring '{}' from {} ({} chunks)",
        file_path,
        info.file_id,
        info.number_of_chunks
    );
    let done = ctx.actor_client.begin_restore(info.clone()).await;

    for chunk_no in 0..info.number_of_chunks {
        let message = Message::GetChunk {
            version: ctx.version.clone(),
            sender: ctx.my_id,
            file_id: info.file_id.clone(),
            chunk_no,
        };
        ctx.transport.broadcast(Channel::Control, &message).await;
    }

    match tokio::time::timeout(ctx.options.restore_timeout, done).await {
        Ok(Ok(restored_path)) => Ok(restored_path),
        // The actor dropped the waiter without completing, e.g. the
        // reassembled file failed to write.
        Ok(Err(_)) => {
            abort(ctx, &info.file_id).await;
            Err(RestoreError::Interrupted)
        }
        Err(_elapsed) => {
            let progress = ctx.actor_client.abort_restore(info.file_id.clone()).await;
            slog::warn!(
                ctx.logger,
                "Restore of '{}' timed out with {} of {} chunks",
                file_path,
                progress.received,
                progress.expected
            );
            Err(RestoreError::Incomplete {
                received: progress.received,
                expected: progress.expected,
            })
        }
    }
}

async fn abort(ctx: &ProtocolContext, file_id: &FileId) {
    let _ = ctx.actor_client.abort_restore(file_id.clone()).await;
}
