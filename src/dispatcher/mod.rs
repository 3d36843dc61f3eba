use crate::actor::ActorClient;
use crate::message::Message;
use crate::peer::{FileChunk, PeerId};
use crate::transport::InboundDatagram;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Dispatcher turns raw datagrams into state actor events. It owns the two
/// pre-handling jitter windows of the protocols (GETCHUNK replies and the
/// enhanced PUTCHUNK backoff); everything else is forwarded directly. No
/// replication state lives here.
pub(crate) struct Dispatcher {
    logger: slog::Logger,
    my_id: PeerId,
    enhanced: bool,
    actor_client: ActorClient,
    /// Enhanced mode delays acting on a PUTCHUNK by this much to observe
    /// other peers' STORED replies first.
    put_chunk_jitter_max: Duration,
    chunk_reply_jitter_max: Duration,
}

impl Dispatcher {
    pub fn new(
        logger: slog::Logger,
        my_id: PeerId,
        enhanced: bool,
        actor_client: ActorClient,
        put_chunk_jitter_max: Duration,
        chunk_reply_jitter_max: Duration,
    ) -> Self {
        Dispatcher {
            logger,
            my_id,
            enhanced,
            actor_client,
            put_chunk_jitter_max,
            chunk_reply_jitter_max,
        }
    }

    pub fn spawn(self, mut inbound: mpsc::UnboundedReceiver<InboundDatagram>) {
        tokio::spawn(async move {
            while let Some(datagram) = inbound.recv().await {
                self.dispatch(datagram).await;
            }
        });
    }

    async fn dispatch(&self, datagram: InboundDatagram) {
        let unicast = datagram.unicast;
        let message = match Message::parse(&datagram.data) {
            Ok(message) => message,
            Err(e) => {
                slog::warn!(self.logger, "Dropping undecodable datagram: {}", e);
                return;
            }
        };

        // Multicast loops our own datagrams back. Only REMOVED is worth
        // processing from ourselves; it keeps eviction handling uniform.
        if message.sender() == self.my_id && !matches!(message, Message::Removed { .. }) {
            return;
        }
        slog::debug!(self.logger, "{} from {}", message.tag(), message.sender());

        match message {
            Message::PutChunk {
                version,
                file_id,
                chunk_no,
                replication_degree,
                body,
                ..
            } => {
                let chunk = FileChunk::new(file_id, chunk_no);
                if self.enhanced && !version.is_base() {
                    self.actor_client
                        .register_put_chunk_listener(chunk.clone(), replication_degree)
                        .await;
                    let actor_client = self.actor_client.clone();
                    let delay = jitter(self.put_chunk_jitter_max);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        actor_client
                            .put_chunk_received(version, chunk, replication_degree, body)
                            .await;
                    });
                } else {
                    self.actor_client
                        .put_chunk_received(version, chunk, replication_degree, body)
                        .await;
                }
            }
            Message::Stored {
                sender, file_id, chunk_no, ..
            } => {
                self.actor_client
                    .stored_received(sender, FileChunk::new(file_id, chunk_no))
                    .await;
            }
            Message::GetChunk {
                version,
                sender,
                file_id,
                chunk_no,
            } => {
                let chunk = FileChunk::new(file_id, chunk_no);
                self.actor_client.register_get_chunk_listener(chunk.clone()).await;
                let actor_client = self.actor_client.clone();
                let delay = jitter(self.chunk_reply_jitter_max);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    actor_client.get_chunk_received(version, sender, chunk).await;
                });
            }
            Message::Chunk {
                version,
                file_id,
                chunk_no,
                body,
                ..
            } => {
                self.actor_client
                    .chunk_received(version, FileChunk::new(file_id, chunk_no), body, unicast)
                    .await;
            }
            Message::Delete { file_id, .. } => {
                self.actor_client.delete_received(file_id).await;
            }
            Message::Removed {
                sender, file_id, chunk_no, ..
            } => {
                self.actor_client
                    .removed_received(sender, FileChunk::new(file_id, chunk_no))
                    .await;
            }
            Message::Control { sender, .. } => {
                if self.enhanced {
                    self.actor_client.control_received(sender).await;
                }
            }
            Message::AckDelete { sender, file_id, .. } => {
                if self.enhanced {
                    self.actor_client.ack_delete_received(sender, file_id).await;
                }
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }

    rand::thread_rng().gen_range(Duration::ZERO..=max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{create_actor_client, Event};
    use crate::message::ProtocolVersion;
    use crate::peer::FileId;
    use crate::transport::Channel;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn dispatcher(enhanced: bool) -> (Dispatcher, mpsc::Receiver<Event>) {
        let (actor_client, events) = create_actor_client(64);
        let dispatcher = Dispatcher::new(
            test_logger(),
            PeerId::new(1),
            enhanced,
            actor_client,
            Duration::ZERO,
            Duration::ZERO,
        );

        (dispatcher, events)
    }

    fn datagram(message: &Message) -> InboundDatagram {
        InboundDatagram {
            channel: Channel::Control,
            data: message.encode(),
            unicast: false,
        }
    }

    #[tokio::test]
    async fn own_messages_are_filtered_except_removed() {
        let (dispatcher, mut events) = dispatcher(false);
        let file_id = FileId::new("F".to_string());

        dispatcher
            .dispatch(datagram(&Message::Stored {
                version: ProtocolVersion::base(),
                sender: PeerId::new(1),
                file_id: file_id.clone(),
                chunk_no: 0,
            }))
            .await;
        dispatcher
            .dispatch(datagram(&Message::Removed {
                version: ProtocolVersion::base(),
                sender: PeerId::new(1),
                file_id,
                chunk_no: 0,
            }))
            .await;

        // Only the REMOVED made it through.
        match events.recv().await.unwrap() {
            Event::RemovedReceived { sender, .. } => assert_eq!(sender, PeerId::new(1)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let (dispatcher, mut events) = dispatcher(false);

        dispatcher
            .dispatch(InboundDatagram {
                channel: Channel::Backup,
                data: bytes::Bytes::from_static(b"not a protocol message"),
                unicast: false,
            })
            .await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_messages_only_flow_in_enhanced_mode() {
        let control = Message::Control {
            version: ProtocolVersion::new("1.1".to_string()),
            sender: PeerId::new(2),
        };

        let (base, mut base_events) = dispatcher(false);
        base.dispatch(datagram(&control)).await;
        assert!(base_events.try_recv().is_err());

        let (enhanced, mut enhanced_events) = dispatcher(true);
        enhanced.dispatch(datagram(&control)).await;
        assert!(matches!(
            enhanced_events.recv().await.unwrap(),
            Event::ControlReceived { .. }
        ));
    }

    #[tokio::test]
    async fn get_chunk_registers_listener_before_reply_event() {
        let (dispatcher, mut events) = dispatcher(false);

        dispatcher
            .dispatch(datagram(&Message::GetChunk {
                version: ProtocolVersion::base(),
                sender: PeerId::new(2),
                file_id: FileId::new("F".to_string()),
                chunk_no: 3,
            }))
            .await;

        assert!(matches!(
            events.recv().await.unwrap(),
            Event::RegisterGetChunkListener { .. }
        ));
        assert!(matches!(events.recv().await.unwrap(), Event::GetChunkReceived { .. }));
    }
}
