use crate::peer::{FileId, PeerId};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Protocol version advertised in every message header. Version "1.0" is the
/// base protocol; any other version enables the enhanced behaviors
/// (STORED-based PUTCHUNK suppression, delete acknowledgment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersion(String);

impl ProtocolVersion {
    pub fn new<S: Into<String>>(version: S) -> Self {
        ProtocolVersion(version.into())
    }

    pub fn base() -> Self {
        ProtocolVersion("1.0".to_string())
    }

    pub fn is_base(&self) -> bool {
        self.0 == "1.0"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wire-level protocol message. Each variant carries exactly the fields
/// its tag requires, so a malformed combination (e.g. a DELETE with a chunk
/// number) is unrepresentable.
///
/// Encoding is a space-separated textual header terminated by CRLFCRLF,
/// optionally followed by an opaque binary body. Body length is implied by
/// the enclosing datagram framing. A CHUNK message may legally arrive with
/// its body omitted, as a header-only notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PutChunk {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
        chunk_no: u32,
        replication_degree: u32,
        body: Bytes,
    },
    Stored {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
        chunk_no: u32,
    },
    GetChunk {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
        chunk_no: u32,
    },
    Chunk {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
        chunk_no: u32,
        body: Bytes,
    },
    Delete {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
    },
    Removed {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
        chunk_no: u32,
    },
    Control {
        version: ProtocolVersion,
        sender: PeerId,
    },
    AckDelete {
        version: ProtocolVersion,
        sender: PeerId,
        file_id: FileId,
    },
}

impl Message {
    pub fn sender(&self) -> PeerId {
        match self {
            Message::PutChunk { sender, .. }
            | Message::Stored { sender, .. }
            | Message::GetChunk { sender, .. }
            | Message::Chunk { sender, .. }
            | Message::Delete { sender, .. }
            | Message::Removed { sender, .. }
            | Message::Control { sender, .. }
            | Message::AckDelete { sender, .. } => *sender,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Message::PutChunk { .. } => "PUTCHUNK",
            Message::Stored { .. } => "STORED",
            Message::GetChunk { .. } => "GETCHUNK",
            Message::Chunk { .. } => "CHUNK",
            Message::Delete { .. } => "DELETE",
            Message::Removed { .. } => "REMOVED",
            Message::Control { .. } => "CONTROL",
            Message::AckDelete { .. } => "ACK_DELETE",
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::PutChunk {
                version,
                sender,
                file_id,
                chunk_no,
                replication_degree,
                body,
            } => {
                buf.put_slice(
                    format!(
                        "PUTCHUNK {} {} {} {} {}",
                        version, sender, file_id, chunk_no, replication_degree
                    )
                    .as_bytes(),
                );
                buf.put_slice(HEADER_TERMINATOR);
                buf.put_slice(body);
            }
            Message::Stored {
                version,
                sender,
                file_id,
                chunk_no,
            } => {
                buf.put_slice(format!("STORED {} {} {} {}", version, sender, file_id, chunk_no).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
            Message::GetChunk {
                version,
                sender,
                file_id,
                chunk_no,
            } => {
                buf.put_slice(format!("GETCHUNK {} {} {} {}", version, sender, file_id, chunk_no).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
            Message::Chunk {
                version,
                sender,
                file_id,
                chunk_no,
                body,
            } => {
                buf.put_slice(format!("CHUNK {} {} {} {}", version, sender, file_id, chunk_no).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
                buf.put_slice(body);
            }
            Message::Delete {
                version,
                sender,
                file_id,
            } => {
                buf.put_slice(format!("DELETE {} {} {}", version, sender, file_id).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
            Message::Removed {
                version,
                sender,
                file_id,
                chunk_no,
            } => {
                buf.put_slice(format!("REMOVED {} {} {} {}", version, sender, file_id, chunk_no).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
            Message::Control { version, sender } => {
                buf.put_slice(format!("CONTROL {} {}", version, sender).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
            Message::AckDelete {
                version,
                sender,
                file_id,
            } => {
                buf.put_slice(format!("ACK_DELETE {} {} {}", version, sender, file_id).as_bytes());
                buf.put_slice(HEADER_TERMINATOR);
            }
        }

        buf.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<Message, ParseError> {
        let header_end = find_header_terminator(data).ok_or(ParseError::MissingHeaderTerminator)?;
        let header = std::str::from_utf8(&data[..header_end]).map_err(|_| ParseError::HeaderNotUtf8)?;
        let body = Bytes::copy_from_slice(&data[header_end + HEADER_TERMINATOR.len()..]);

        let mut fields = header.split_whitespace();
        let tag = fields.next().ok_or(ParseError::MissingField("TAG"))?;

        let version = ProtocolVersion::new(fields.next().ok_or(ParseError::MissingField("VERSION"))?);
        let sender = PeerId::new(parse_number(fields.next(), "SENDER_ID")?);

        let message = match tag {
            "PUTCHUNK" => Message::PutChunk {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
                chunk_no: parse_number(fields.next(), "CHUNK_NO")?,
                replication_degree: parse_number(fields.next(), "REPLICATION_DEGREE")?,
                body,
            },
            "STORED" => Message::Stored {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
                chunk_no: parse_number(fields.next(), "CHUNK_NO")?,
            },
            "GETCHUNK" => Message::GetChunk {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
                chunk_no: parse_number(fields.next(), "CHUNK_NO")?,
            },
            "CHUNK" => Message::Chunk {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
                chunk_no: parse_number(fields.next(), "CHUNK_NO")?,
                body,
            },
            "DELETE" => Message::Delete {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
            },
            "REMOVED" => Message::Removed {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
                chunk_no: parse_number(fields.next(), "CHUNK_NO")?,
            },
            "CONTROL" => Message::Control { version, sender },
            "ACK_DELETE" => Message::AckDelete {
                version,
                sender,
                file_id: parse_file_id(fields.next())?,
            },
            other => return Err(ParseError::UnknownTag(other.to_string())),
        };

        Ok(message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("header is not terminated by CRLFCRLF")]
    MissingHeaderTerminator,
    #[error("header is not valid UTF-8")]
    HeaderNotUtf8,
    #[error("unknown message tag: {0}")]
    UnknownTag(String),
    #[error("missing header field: {0}")]
    MissingField(&'static str),
    #[error("non-numeric header field: {0}")]
    InvalidNumber(&'static str),
}

fn find_header_terminator(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_number(field: Option<&str>, name: &'static str) -> Result<u32, ParseError> {
    field
        .ok_or(ParseError::MissingField(name))?
        .parse()
        .map_err(|_| ParseError::InvalidNumber(name))
}

fn parse_file_id(field: Option<&str>) -> Result<FileId, ParseError> {
    field
        .map(|f| FileId::new(f.to_string()))
        .ok_or(ParseError::MissingField("FILE_ID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_id() -> FileId {
        FileId::new("AB12".to_string())
    }

    #[test]
    fn putchunk_round_trip() {
        let original = Message::PutChunk {
            version: ProtocolVersion::base(),
            sender: PeerId::new(7),
            file_id: file_id(),
            chunk_no: 3,
            replication_degree: 2,
            body: Bytes::from_static(b"hello chunk"),
        };

        let parsed = Message::parse(&original.encode()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn header_only_messages_round_trip() {
        let messages = vec![
            Message::Stored {
                version: ProtocolVersion::new("1.1"),
                sender: PeerId::new(1),
                file_id: file_id(),
                chunk_no: 0,
            },
            Message::GetChunk {
                version: ProtocolVersion::base(),
                sender: PeerId::new(2),
                file_id: file_id(),
                chunk_no: 9,
            },
            Message::Delete {
                version: ProtocolVersion::base(),
                sender: PeerId::new(3),
                file_id: file_id(),
            },
            Message::Removed {
                version: ProtocolVersion::base(),
                sender: PeerId::new(4),
                file_id: file_id(),
                chunk_no: 1,
            },
            Message::Control {
                version: ProtocolVersion::new("1.1"),
                sender: PeerId::new(5),
            },
            Message::AckDelete {
                version: ProtocolVersion::new("1.1"),
                sender: PeerId::new(6),
                file_id: file_id(),
            },
        ];

        for original in messages {
            let parsed = Message::parse(&original.encode()).unwrap();
            assert_eq!(original, parsed);
        }
    }

    #[test]
    fn chunk_with_empty_body_parses_as_header_only() {
        let original = Message::Chunk {
            version: ProtocolVersion::new("1.1"),
            sender: PeerId::new(8),
            file_id: file_id(),
            chunk_no: 2,
            body: Bytes::new(),
        };

        let parsed = Message::parse(&original.encode()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn body_with_embedded_crlf_is_preserved() {
        let original = Message::PutChunk {
            version: ProtocolVersion::base(),
            sender: PeerId::new(1),
            file_id: file_id(),
            chunk_no: 0,
            replication_degree: 1,
            body: Bytes::from_static(b"line1\r\n\r\nline2"),
        };

        let parsed = Message::parse(&original.encode()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Message::parse(b"PUTCHUNK 1.0 1"),
            Err(ParseError::MissingHeaderTerminator)
        ));
        assert!(matches!(
            Message::parse(b"WHATCHUNK 1.0 1 AB 0\r\n\r\n"),
            Err(ParseError::UnknownTag(_))
        ));
        assert!(matches!(
            Message::parse(b"STORED 1.0 one AB 0\r\n\r\n"),
            Err(ParseError::InvalidNumber("SENDER_ID"))
        ));
        assert!(matches!(
            Message::parse(b"STORED 1.0 1\r\n\r\n"),
            Err(ParseError::MissingField("FILE_ID"))
        ));
    }
}
