use crate::message::Message;
use crate::peer::PeerId;
use crate::transport::{Channel, InboundDatagram, Transport};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-process broadcast medium connecting the peers of one test or demo.
/// Faithful to multicast semantics: every subscriber receives every
/// datagram, the sender included, and a lagging subscriber silently loses
/// messages (its channel is unbounded here, so only a dropped receiver
/// loses them). Unicast reaches exactly the subscriber that joined under
/// the target id.
#[derive(Clone)]
pub struct LoopbackNetwork {
    subscribers: Arc<Mutex<Vec<(PeerId, mpsc::UnboundedSender<InboundDatagram>)>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        LoopbackNetwork {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds one peer to the network, returning its outbound transport and
    /// the stream of datagrams it will observe. The id is this peer's
    /// unicast address; it must match the id the peer sends with.
    pub fn join(&self, peer_id: PeerId) -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<InboundDatagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("loopback subscriber list poisoned")
            .push((peer_id, tx));

        let transport = Arc::new(LoopbackTransport {
            subscribers: self.subscribers.clone(),
        });

        (transport, rx)
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        LoopbackNetwork::new()
    }
}

struct LoopbackTransport {
    subscribers: Arc<Mutex<Vec<(PeerId, mpsc::UnboundedSender<InboundDatagram>)>>>,
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn broadcast(&self, channel: Channel, message: &Message) {
        let data = message.encode();
        let mut subscribers = self.subscribers.lock().expect("loopback subscriber list poisoned");
        // A closed receiver is a departed peer; drop it from the roster.
        subscribers.retain(|(_, tx)| {
            tx.send(InboundDatagram {
                channel,
                data: data.clone(),
                unicast: false,
            })
            .is_ok()
        });
    }

    async fn unicast(&self, target: PeerId, channel: Channel, message: &Message) {
        let data = message.encode();
        let mut subscribers = self.subscribers.lock().expect("loopback subscriber list poisoned");
        subscribers.retain(|(peer_id, tx)| {
            if *peer_id != target {
                return !tx.is_closed();
            }
            tx.send(InboundDatagram {
                channel,
                data: data.clone(),
                unicast: true,
            })
            .is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProtocolVersion;

    fn control(sender: u32) -> Message {
        Message::Control {
            version: ProtocolVersion::base(),
            sender: PeerId::new(sender),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_including_sender() {
        let network = LoopbackNetwork::new();
        let (transport_a, mut rx_a) = network.join(PeerId::new(1));
        let (_transport_b, mut rx_b) = network.join(PeerId::new(2));

        let message = control(1);
        transport_a.broadcast(Channel::Control, &message).await;

        for rx in [&mut rx_a, &mut rx_b].iter_mut() {
            let datagram = rx.recv().await.unwrap();
            assert_eq!(datagram.channel, Channel::Control);
            assert!(!datagram.unicast);
            assert_eq!(Message::parse(&datagram.data).unwrap(), message);
        }
    }

    #[tokio::test]
    async fn unicast_reaches_only_its_target() {
        let network = LoopbackNetwork::new();
        let (transport_a, mut rx_a) = network.join(PeerId::new(1));
        let (_transport_b, mut rx_b) = network.join(PeerId::new(2));

        let message = control(1);
        transport_a.unicast(PeerId::new(2), Channel::Restore, &message).await;

        let datagram = rx_b.recv().await.unwrap();
        assert!(datagram.unicast);
        assert_eq!(Message::parse(&datagram.data).unwrap(), message);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn departed_subscriber_is_pruned() {
        let network = LoopbackNetwork::new();
        let (transport, mut rx_a) = network.join(PeerId::new(1));
        let (_t, rx_b) = network.join(PeerId::new(2));
        drop(rx_b);

        let message = control(1);
        transport.broadcast(Channel::Control, &message).await;
        transport.broadcast(Channel::Control, &message).await;

        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.recv().await.is_some());
    }
}
