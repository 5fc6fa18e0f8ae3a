//! Definitions of message content.
pub mod data;
pub mod header;

use byteorder::{ByteOrder, LittleEndian};
use data::Data;
use header::{Header, MessageType};

/// The largest standard message: a header and seven data objects.
pub const MAX_MESSAGE_SIZE: usize = 30;

/// The maximum number of data objects in one message.
pub const MAX_DATA_OBJECTS: usize = 7;

/// Errors that can occur during message/header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    /// * `expected` - The expected length.
    /// * `found` - The actual length found.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is not supported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// Extended messages are not supported.
    #[error("extended messages are not supported")]
    ExtendedUnsupported,
    /// Other parsing error with a message.
    #[error("other parse error: {0}")]
    Other(&'static str),
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Optional payload for data messages.
    pub payload: Option<Data>,
}

impl Message {
    /// Create a new message from a message header.
    pub fn new(header: Header) -> Self {
        Self { header, payload: None }
    }

    /// Create a new message from a message header and payload data.
    pub fn new_with_data(header: Header, data: Data) -> Self {
        Self {
            header,
            payload: Some(data),
        }
    }

    /// The type of this message.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        self.header.to_bytes(buffer)
            + match self.payload.as_ref() {
                Some(data) => data.to_bytes(&mut buffer[2..]),
                None => 0,
            }
    }

    /// Parse a message from a slice of bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(data)?;

        if header.extended() {
            return Err(ParseError::ExtendedUnsupported);
        }

        let expected = 2 + 4 * header.num_objects();
        if data.len() < expected {
            return Err(ParseError::InvalidLength {
                expected,
                found: data.len(),
            });
        }

        let message = Self::new(header);
        match header.message_type() {
            MessageType::Control(_) => Ok(message),
            MessageType::Data(message_type) => {
                let objects = data[2..expected].chunks_exact(4).map(LittleEndian::read_u32);
                Data::parse_message(message, message_type, objects)
            }
        }
    }
}
