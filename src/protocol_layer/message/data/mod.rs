//! Definitions and implementations of data messages.
//!
//! See [6.4].
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use super::header::DataMessageType;
use super::{MAX_DATA_OBJECTS, Message, ParseError};

pub mod pdo;
pub mod request;
pub mod vendor_defined;

use pdo::PowerDataObjects;
use request::Request;
use vendor_defined::VendorDefined;

/// Types of data messages.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Data {
    /// Source capabilities.
    SourceCapabilities(PowerDataObjects),
    /// Sink capabilities.
    SinkCapabilities(PowerDataObjects),
    /// Request for a power level from the source.
    Request(Request),
    /// Vendor defined.
    VendorDefined(VendorDefined),
    /// Any other data message, kept as raw objects.
    Unknown(DataMessageType, Vec<u32, MAX_DATA_OBJECTS>),
}

impl Data {
    /// Parse a data message from its data objects.
    pub fn parse_message(
        mut message: Message,
        message_type: DataMessageType,
        objects: impl Iterator<Item = u32>,
    ) -> Result<Message, ParseError> {
        let objects: Vec<u32, MAX_DATA_OBJECTS> = objects.take(MAX_DATA_OBJECTS).collect();

        message.payload = Some(match message_type {
            DataMessageType::SourceCapabilities => Data::SourceCapabilities(PowerDataObjects::from_raw(&objects)),
            DataMessageType::SinkCapabilities => Data::SinkCapabilities(PowerDataObjects::from_raw(&objects)),
            DataMessageType::Request => match objects.as_slice() {
                [raw] => Data::Request(Request(*raw)),
                _ => return Err(ParseError::Other("request must carry exactly one object")),
            },
            DataMessageType::VendorDefined => Data::VendorDefined(
                VendorDefined::from_objects(&objects).ok_or(ParseError::Other("vendor defined message is empty"))?,
            ),
            _ => {
                trace!("Unhandled data message type {:?}", message_type);
                Data::Unknown(message_type, objects)
            }
        });

        Ok(message)
    }

    /// The number of data objects that this payload serializes to.
    pub fn num_objects(&self) -> u8 {
        let count = match self {
            Self::SourceCapabilities(pdos) | Self::SinkCapabilities(pdos) => pdos.len(),
            Self::Request(_) => 1,
            Self::VendorDefined(vdm) => vdm.num_objects(),
            Self::Unknown(_, objects) => objects.len(),
        };
        count as u8
    }

    /// The data message type of this payload.
    pub fn message_type(&self) -> DataMessageType {
        match self {
            Self::SourceCapabilities(_) => DataMessageType::SourceCapabilities,
            Self::SinkCapabilities(_) => DataMessageType::SinkCapabilities,
            Self::Request(_) => DataMessageType::Request,
            Self::VendorDefined(_) => DataMessageType::VendorDefined,
            Self::Unknown(message_type, _) => *message_type,
        }
    }

    /// Serialize message data to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        let mut written = 0;
        let mut write = |object: u32| {
            LittleEndian::write_u32(&mut payload[written..written + 4], object);
            written += 4;
        };

        match self {
            Self::SourceCapabilities(pdos) | Self::SinkCapabilities(pdos) => pdos.raw().for_each(&mut write),
            Self::Request(request) => write(request.0),
            Self::VendorDefined(vdm) => vdm.to_objects().iter().copied().for_each(&mut write),
            Self::Unknown(_, objects) => objects.iter().copied().for_each(&mut write),
        }

        written
    }
}
