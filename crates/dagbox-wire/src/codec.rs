//! Conversions between [`Message`] values and ordered multipart sequences.
//!
//! Decoding reads sections in wire order through three primitives:
//! [`SectionReader::read_part`] for mandatory single parts,
//! [`SectionReader::read_optional`] for the nonempty-then-delimiter
//! convention, and [`SectionReader::read_many`] for delimiter-terminated
//! runs. Encoding walks the message's fields in the same order, emitting
//! the matching delimiters.

use std::vec;

use crate::message::{Ping, Pong, Reconnect, Registration, Reply, Request};
use crate::{Address, Message, MessageKind, Part, WireError, PROTOCOL_MAGIC, PROTOCOL_VERSION};

impl Message {
    /// Decodes a multipart message.
    ///
    /// Parts past the final section of the message body are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] on framing violations and
    /// [`WireError::UnsupportedVersion`] when the magic matches but the
    /// version byte differs from [`PROTOCOL_VERSION`].
    pub fn decode(parts: Vec<Part>) -> Result<Self, WireError> {
        let mut reader = SectionReader::new(parts);

        let address = reader.read_optional()?.map(Address::new);

        let protocol = reader.read_part()?;
        if protocol.len() != PROTOCOL_MAGIC.len() + 1 || &protocol[..4] != PROTOCOL_MAGIC {
            return Err(WireError::malformed("protocol magic mismatch"));
        }
        if protocol[4] != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion { found: protocol[4] });
        }

        let type_part = reader.read_part()?;
        let &[tag] = type_part.as_slice() else {
            return Err(WireError::malformed("type part is not a single byte"));
        };

        match MessageKind::from_tag(tag)? {
            MessageKind::Registration => {
                let service = reader.read_service()?;
                Ok(Self::Registration(Registration { address, service }))
            }
            MessageKind::Ping => Ok(Self::Ping(Ping { address })),
            MessageKind::Pong => Ok(Self::Pong(Pong { address })),
            MessageKind::Request => {
                let service = reader.read_service()?;
                let client = reader.read_optional()?.map(Address::new);
                let metadata = reader.read_many();
                let data = reader.read_many();
                Ok(Self::Request(Request {
                    address,
                    service,
                    client,
                    metadata,
                    data,
                }))
            }
            MessageKind::Reply => {
                let client = reader.read_optional()?.map(Address::new);
                let metadata = reader.read_many();
                let data = reader.read_many();
                Ok(Self::Reply(Reply {
                    address,
                    client,
                    metadata,
                    data,
                }))
            }
            MessageKind::Reconnect => Ok(Self::Reconnect(Reconnect { address })),
        }
    }

    /// Encodes the message into its multipart wire form.
    #[must_use]
    pub fn encode(self) -> Vec<Part> {
        let mut writer = SectionWriter::new();
        let kind = self.kind();

        match self {
            Self::Registration(message) => {
                writer.write_header(message.address, kind);
                writer.write_part(message.service.into_bytes());
            }
            Self::Ping(message) => writer.write_header(message.address, kind),
            Self::Pong(message) => writer.write_header(message.address, kind),
            Self::Reconnect(message) => writer.write_header(message.address, kind),
            Self::Request(message) => {
                writer.write_header(message.address, kind);
                writer.write_part(message.service.into_bytes());
                writer.write_optional(message.client);
                writer.write_many(message.metadata);
                writer.write_tail(message.data);
            }
            Self::Reply(message) => {
                writer.write_header(message.address, kind);
                writer.write_optional(message.client);
                writer.write_many(message.metadata);
                writer.write_tail(message.data);
            }
        }

        writer.into_parts()
    }
}

/// Sequential reader over the parts of one multipart message.
pub(crate) struct SectionReader {
    parts: vec::IntoIter<Part>,
}

impl SectionReader {
    pub(crate) fn new(parts: Vec<Part>) -> Self {
        Self {
            parts: parts.into_iter(),
        }
    }

    /// Consumes the next part.
    ///
    /// # Errors
    ///
    /// Fails when the message has no parts left.
    pub(crate) fn read_part(&mut self) -> Result<Part, WireError> {
        self.parts
            .next()
            .ok_or_else(|| WireError::malformed("message ends mid-section"))
    }

    /// Consumes an optional section.
    ///
    /// Absent sections are a single empty part. Present sections are one
    /// nonempty part followed by an empty delimiter; a nonempty part
    /// followed by another nonempty part is not a valid optional section.
    pub(crate) fn read_optional(&mut self) -> Result<Option<Part>, WireError> {
        let Some(first) = self.parts.next() else {
            return Ok(None);
        };
        if first.is_empty() {
            return Ok(None);
        }
        let delimiter = self
            .parts
            .next()
            .ok_or_else(|| WireError::malformed("optional section missing delimiter"))?;
        if !delimiter.is_empty() {
            return Err(WireError::malformed(
                "optional section not followed by delimiter",
            ));
        }
        Ok(Some(first))
    }

    /// Consumes parts until an empty delimiter or the end of the message.
    ///
    /// The delimiter is consumed but not returned. The collected run may
    /// be empty.
    pub(crate) fn read_many(&mut self) -> Vec<Part> {
        let mut collected = Vec::new();
        for part in self.parts.by_ref() {
            if part.is_empty() {
                break;
            }
            collected.push(part);
        }
        collected
    }

    fn read_service(&mut self) -> Result<String, WireError> {
        let part = self.read_part()?;
        String::from_utf8(part).map_err(|_| WireError::malformed("service name is not UTF-8"))
    }
}

/// Accumulates parts in wire order.
struct SectionWriter {
    parts: Vec<Part>,
}

impl SectionWriter {
    fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Emits the common header: the address when present, the empty
    /// delimiter, the protocol part, and the type tag.
    fn write_header(&mut self, address: Option<Address>, kind: MessageKind) {
        if let Some(address) = address {
            self.parts.push(address.into_bytes());
        }
        self.parts.push(Vec::new());

        let mut protocol = PROTOCOL_MAGIC.to_vec();
        protocol.push(PROTOCOL_VERSION);
        self.parts.push(protocol);
        self.parts.push(vec![kind.tag()]);
    }

    fn write_part(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Emits the value followed by a delimiter, or a lone delimiter when
    /// absent.
    fn write_optional(&mut self, value: Option<Address>) {
        if let Some(value) = value {
            self.parts.push(value.into_bytes());
        }
        self.parts.push(Vec::new());
    }

    /// Emits a delimiter-terminated run of parts.
    fn write_many(&mut self, parts: Vec<Part>) {
        self.parts.extend(parts);
        self.parts.push(Vec::new());
    }

    /// Emits the trailing run, which consumes the remainder of the message
    /// and carries no delimiter.
    fn write_tail(&mut self, parts: Vec<Part>) {
        self.parts.extend(parts);
    }

    fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}
