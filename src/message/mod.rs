mod wire;

pub use wire::Message;
pub use wire::ParseError;
pub use wire::ProtocolVersion;
