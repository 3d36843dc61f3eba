use crate::actor::{create_actor_client, StateActor};
use crate::api::client::PeerHandle;
use crate::api::options::{PeerOptions, PeerOptionsValidated};
use crate::chunkstore::DiskChunkStore;
use crate::dispatcher::Dispatcher;
use crate::message::{Message, ProtocolVersion};
use crate::peer::{load_snapshot, spawn_snapshot_task, Peer, PeerId};
use crate::protocol::ProtocolContext;
use crate::transport::{Channel, InboundDatagram, Transport};
use std::convert::TryFrom;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct PeerConfig {
    pub peer_id: u32,
    /// "1.0" runs the base protocols; anything else enables the enhanced
    /// behaviors (PUTCHUNK backoff, delete confirmation, startup gossip).
    pub protocol_version: String,
    /// A directory where we can create files and sub-directories to hold
    /// stored chunks, restored files and the state snapshot.
    pub storage_directory: PathBuf,
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::UnboundedReceiver<InboundDatagram>,
    pub info_logger: slog::Logger,
    pub options: PeerOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum PeerCreationError {
    #[error("Illegal options for configuring peer: {0}")]
    IllegalPeerOptions(String),
    #[error("Storage initialization failure")]
    StorageInitialization(#[from] io::Error),
}

/// Wires up and starts a peer: chunk store, state actor, dispatcher,
/// snapshot task. The returned handle drives the initiator protocols; drop
/// it and the background tasks keep serving the swarm.
pub fn try_create_peer(config: PeerConfig) -> Result<PeerHandle, PeerCreationError> {
    let options =
        PeerOptionsValidated::try_from(config.options).map_err(|e| PeerCreationError::IllegalPeerOptions(e.to_string()))?;

    let my_id = PeerId::new(config.peer_id);
    let version = ProtocolVersion::new(config.protocol_version);
    let enhanced = !version.is_base();
    let logger = config.info_logger.new(slog::o!("PeerId" => config.peer_id));

    let chunk_store = DiskChunkStore::create(&config.storage_directory, options.storage_capacity)?;
    let state = load_snapshot(&logger, &config.storage_directory);

    let (actor_client, actor_queue_rx) = create_actor_client(16);

    let peer = Peer::new(
        logger.clone(),
        my_id,
        version.clone(),
        state,
        chunk_store,
        config.transport.clone(),
        actor_client.clone(),
        options.clone(),
    );
    tokio::spawn(StateActor::new(actor_queue_rx, peer).run_event_loop());

    Dispatcher::new(
        logger.clone(),
        my_id,
        enhanced,
        actor_client.clone(),
        options.stored_reply_jitter_max,
        options.chunk_reply_jitter_max,
    )
    .spawn(config.inbound);

    spawn_snapshot_task(
        logger.clone(),
        actor_client.clone(),
        config.storage_directory,
        options.snapshot_interval,
    );

    if enhanced {
        // Announce ourselves so peers can re-send DELETEs we missed while
        // offline.
        let transport = config.transport.clone();
        let hello = Message::Control {
            version: version.clone(),
            sender: my_id,
        };
        tokio::spawn(async move {
            transport.broadcast(Channel::Control, &hello).await;
        });
    }

    Ok(PeerHandle::new(ProtocolContext {
        logger,
        actor_client,
        transport: config.transport,
        version,
        my_id,
        options,
    }))
}
