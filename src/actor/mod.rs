use crate::chunkstore::ChunkStore;
use crate::message::ProtocolVersion;
use crate::peer::{FileChunk, FileId, FileInfo, Peer, PeerId, ReclaimOutcome, RestoreProgress};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn create_actor_client(buffer_size: usize) -> (ActorClient, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer_size);

    (ActorClient { sender: tx }, rx)
}

// All replication state lives behind this actor, so counting a STORED,
// checking a suppression flag, or picking an eviction victim each happen as
// one event with nothing interleaved.
#[derive(Debug)]
pub(crate) enum Event {
    // Inbound protocol messages. The jittered ones (PutChunk, GetChunk,
    // Rebackup) arrive here after their random delay has already elapsed;
    // their listener registrations arrived earlier.
    PutChunkReceived {
        version: ProtocolVersion,
        chunk: FileChunk,
        replication_degree: u32,
        body: Bytes,
    },
    StoredReceived {
        sender: PeerId,
        chunk: FileChunk,
    },
    GetChunkReceived {
        version: ProtocolVersion,
        sender: PeerId,
        chunk: FileChunk,
    },
    ChunkReceived {
        version: ProtocolVersion,
        chunk: FileChunk,
        body: Bytes,
        unicast: bool,
    },
    DeleteReceived {
        file_id: FileId,
    },
    RemovedReceived {
        sender: PeerId,
        chunk: FileChunk,
    },
    ControlReceived {
        sender: PeerId,
    },
    AckDeleteReceived {
        sender: PeerId,
        file_id: FileId,
    },

    // Pre-jitter listener registrations from the dispatcher.
    RegisterPutChunkListener {
        chunk: FileChunk,
        replication_degree: u32,
    },
    RegisterGetChunkListener {
        chunk: FileChunk,
    },
    // Fired by the peer's own delayed task after a REMOVED jitter window.
    RebackupElapsed {
        chunk: FileChunk,
    },

    // Initiator-facing operations.
    RegisterBackedUpChunk {
        chunk: FileChunk,
        replication_degree: u32,
    },
    BackedUpDegree(FileChunk, Callback<u32>),
    RecordBackedUpFile(FileInfo),
    LookupBackedUpFile(String, Callback<Option<FileInfo>>),
    BeginRestore(FileInfo, oneshot::Sender<PathBuf>),
    AbortRestore(FileId, Callback<RestoreProgress>),
    DeleteLocalFile(String, Callback<Option<FileId>>),
    Reclaim(u64, Callback<ReclaimOutcome>),
    RenderState(Callback<String>),
    Snapshot(Callback<Vec<u8>>),
}

#[derive(Debug)]
pub(crate) struct Callback<T>(oneshot::Sender<T>);

impl<T> Callback<T> {
    pub fn send(self, message: T) {
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub async fn put_chunk_received(
        &self,
        version: ProtocolVersion,
        chunk: FileChunk,
        replication_degree: u32,
        body: Bytes,
    ) {
        self.send(Event::PutChunkReceived {
            version,
            chunk,
            replication_degree,
            body,
        })
        .await;
    }

    pub async fn stored_received(&self, sender: PeerId, chunk: FileChunk) {
        self.send(Event::StoredReceived { sender, chunk }).await;
    }

    pub async fn get_chunk_received(&self, version: ProtocolVersion, sender: PeerId, chunk: FileChunk) {
        self.send(Event::GetChunkReceived { version, sender, chunk }).await;
    }

    pub async fn chunk_received(&self, version: ProtocolVersion, chunk: FileChunk, body: Bytes, unicast: bool) {
        self.send(Event::ChunkReceived {
            version,
            chunk,
            body,
            unicast,
        })
        .await;
    }

    pub async fn delete_received(&self, file_id: FileId) {
        self.send(Event::DeleteReceived { file_id }).await;
    }

    pub async fn removed_received(&self, sender: PeerId, chunk: FileChunk) {
        self.send(Event::RemovedReceived { sender, chunk }).await;
    }

    pub async fn control_received(&self, sender: PeerId) {
        self.send(Event::ControlReceived { sender }).await;
    }

    pub async fn ack_delete_received(&self, sender: PeerId, file_id: FileId) {
        self.send(Event::AckDeleteReceived { sender, file_id }).await;
    }

    pub async fn register_put_chunk_listener(&self, chunk: FileChunk, replication_degree: u32) {
        self.send(Event::RegisterPutChunkListener {
            chunk,
            replication_degree,
        })
        .await;
    }

    pub async fn register_get_chunk_listener(&self, chunk: FileChunk) {
        self.send(Event::RegisterGetChunkListener { chunk }).await;
    }

    pub async fn rebackup_elapsed(&self, chunk: FileChunk) {
        self.send(Event::RebackupElapsed { chunk }).await;
    }

    pub async fn register_backed_up_chunk(&self, chunk: FileChunk, replication_degree: u32) {
        self.send(Event::RegisterBackedUpChunk {
            chunk,
            replication_degree,
        })
        .await;
    }

    pub async fn backed_up_degree(&self, chunk: FileChunk) -> u32 {
        let (tx, rx) = oneshot::channel();
        self.send(Event::BackedUpDegree(chunk, Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    pub async fn record_backed_up_file(&self, info: FileInfo) {
        self.send(Event::RecordBackedUpFile(info)).await;
    }

    pub async fn lookup_backed_up_file(&self, file_path: String) -> Option<FileInfo> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::LookupBackedUpFile(file_path, Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    /// Starts tracking an in-flight restore. The returned receiver resolves
    /// with the reassembled file's path once every chunk has arrived.
    pub async fn begin_restore(&self, info: FileInfo) -> oneshot::Receiver<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::BeginRestore(info, tx)).await;

        rx
    }

    pub async fn abort_restore(&self, file_id: FileId) -> RestoreProgress {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AbortRestore(file_id, Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    pub async fn delete_local_file(&self, file_path: String) -> Option<FileId> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::DeleteLocalFile(file_path, Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    pub async fn reclaim(&self, capacity: u64) -> ReclaimOutcome {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Reclaim(capacity, Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    pub async fn render_state(&self) -> String {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RenderState(Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    pub async fn snapshot(&self) -> Vec<u8> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Snapshot(Callback(tx))).await;

        rx.await.expect("Peer state actor dropped our channel. WTF!")
    }

    async fn send(&self, event: Event) {
        self.sender
            .send(event)
            .await
            .expect("Peer state actor event loop is dead. WTF!!");
    }
}

/// StateActor is the peer's replication logic in actor model.
pub(crate) struct StateActor<C: ChunkStore> {
    receiver: mpsc::Receiver<Event>,
    peer: Peer<C>,
}

impl<C: ChunkStore> StateActor<C> {
    pub fn new(receiver: mpsc::Receiver<Event>, peer: Peer<C>) -> Self {
        StateActor { receiver, peer }
    }

    pub async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
    }

    // This must NOT be async. Any long running work (jittered replies,
    // retry loops) is spawned as its own task and comes back as an event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::PutChunkReceived {
                version,
                chunk,
                replication_degree,
                body,
            } => {
                self.peer.handle_put_chunk(version, chunk, replication_degree, body);
            }
            Event::StoredReceived { sender, chunk } => {
                self.peer.handle_stored(sender, chunk);
            }
            Event::GetChunkReceived { version, sender, chunk } => {
                self.peer.handle_get_chunk(version, sender, chunk);
            }
            Event::ChunkReceived {
                version,
                chunk,
                body,
                unicast,
            } => {
                self.peer.handle_chunk(version, chunk, body, unicast);
            }
            Event::DeleteReceived { file_id } => {
                self.peer.handle_delete(file_id);
            }
            Event::RemovedReceived { sender, chunk } => {
                self.peer.handle_removed(sender, chunk);
            }
            Event::ControlReceived { sender } => {
                self.peer.handle_control(sender);
            }
            Event::AckDeleteReceived { sender, file_id } => {
                self.peer.handle_ack_delete(sender, file_id);
            }
            Event::RegisterPutChunkListener {
                chunk,
                replication_degree,
            } => {
                self.peer.register_put_chunk_listener(chunk, replication_degree);
            }
            Event::RegisterGetChunkListener { chunk } => {
                self.peer.register_get_chunk_listener(chunk);
            }
            Event::RebackupElapsed { chunk } => {
                self.peer.handle_rebackup_elapsed(chunk);
            }
            Event::RegisterBackedUpChunk {
                chunk,
                replication_degree,
            } => {
                self.peer.register_backed_up_chunk(chunk, replication_degree);
            }
            Event::BackedUpDegree(chunk, callback) => {
                callback.send(self.peer.backed_up_degree(&chunk));
            }
            Event::RecordBackedUpFile(info) => {
                self.peer.record_backed_up_file(info);
            }
            Event::LookupBackedUpFile(file_path, callback) => {
                callback.send(self.peer.lookup_backed_up_file(&file_path));
            }
            Event::BeginRestore(info, done) => {
                self.peer.begin_restore(info, done);
            }
            Event::AbortRestore(file_id, callback) => {
                callback.send(self.peer.abort_restore(&file_id));
            }
            Event::DeleteLocalFile(file_path, callback) => {
                callback.send(self.peer.delete_local_file(&file_path));
            }
            Event::Reclaim(capacity, callback) => {
                callback.send(self.peer.reclaim(capacity));
            }
            Event::RenderState(callback) => {
                callback.send(self.peer.render_state());
            }
            Event::Snapshot(callback) => {
                callback.send(self.peer.snapshot_bytes());
            }
        }
    }
}
