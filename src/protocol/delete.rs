use crate::message::Message;
use crate::protocol::ProtocolContext;
use crate::transport::Channel;

#[derive(thiserror::Error, Debug)]
pub enum DeleteError {
    #[error("'{0}' was not backed up from this peer")]
    NotBackedUp(String),
}

/// Deletes a backed up file from the swarm. Fire and forget in the base
/// protocol; in enhanced mode the peer keeps the set of storers that have
/// not acknowledged yet and re-sends the DELETE when one of them announces
/// itself on the control channel.
pub(crate) async fn run_delete(ctx: &ProtocolContext, file_path: &str) -> Result<(), DeleteError> {
    let file_id = ctx
        .actor_client
        .delete_local_file(file_path.to_string())
        .await
        .ok_or_else(|| DeleteError::NotBackedUp(file_path.to_string()))?;

    let message = Message::Delete {
        version: ctx.version.clone(),
        sender: ctx.my_id,
        file_id,
    };
    ctx.transport.broadcast(Channel::Control, &message).await;

    Ok(())
}
