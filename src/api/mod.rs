//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod options;
mod wiring;

pub use client::PeerHandle;
pub use options::PeerOptions;
pub use wiring::try_create_peer;
pub use wiring::PeerConfig;
pub use wiring::PeerCreationError;

// So the peer and protocol tasks can share validated timing knobs.
pub(crate) use options::PeerOptionsValidated;
