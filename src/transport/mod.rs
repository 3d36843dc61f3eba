mod loopback;

pub use loopback::LoopbackNetwork;

use crate::message::Message;
use crate::peer::PeerId;
use bytes::Bytes;

/// The three multicast channels of the swarm. Data-heavy traffic is split
/// off the control channel so a busy backup does not starve STORED and
/// GETCHUNK exchanges.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// STORED, GETCHUNK, DELETE, REMOVED, CONTROL, ACK_DELETE.
    Control,
    /// PUTCHUNK.
    Backup,
    /// CHUNK.
    Restore,
}

/// A raw datagram received from one of the channels, before parsing.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub channel: Channel,
    pub data: Bytes,
    /// True when the datagram was addressed to this peer alone instead of
    /// broadcast on the channel. Restore chunk bodies arrive this way from
    /// enhanced peers.
    pub unicast: bool,
}

/// Transport is the outbound side of the swarm's lossy broadcast medium.
/// Every peer subscribed to a channel receives each broadcast, including
/// the sender itself; delivery is best effort.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn broadcast(&self, channel: Channel, message: &Message);

    /// Point-to-point delivery to one peer, off the shared channel. The
    /// enhanced restore protocol sends chunk bodies this way so the
    /// broadcast medium only carries the header-sized announcement.
    async fn unicast(&self, target: PeerId, channel: Channel, message: &Message);
}
