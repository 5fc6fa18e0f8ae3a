//! Definitions for a USB PD message header.
//!
//! See [6.2.1.1].
use core::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::counters::Counter;
use crate::protocol_layer::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// Definition of the message header. Every message shall start with it.
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Shall be set to zero to indicate a Control Message or Data Message
        /// and set to one to indicate an Extended Message.
        pub extended: bool @ 15,
        /// The number of 32 bit data objects that follow the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// A rolling counter, maintained by the originator of the message.
        pub message_id: u8 @ 9..=11,
        /// Indicate the port's present power role (0 -> sink, 1 -> source).
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// The specification revision.
        ///
        /// 00b - Revision 1.0 (deprecated)
        /// 01b - Revision 2.0
        /// 10b - Revision 3.x
        /// 11b - Reserved, shall not be used
        pub spec_revision: u8 [try_get SpecificationRevision, set SpecificationRevision] @ 6..=7,
        /// The port's data role (0 -> UFP, 1 -> DFP).
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// The type of message being sent. See [6.2.1.1.8] for details
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// Create a header template with the given attributes.
    pub fn new_template(
        port_data_role: DataRole,
        port_power_role: PowerRole,
        spec_revision: SpecificationRevision,
    ) -> Self {
        Self(0)
            .with_port_data_role(port_data_role)
            .with_port_power_role(port_power_role)
            .with_spec_revision(spec_revision)
    }

    /// Create a new header that follows a template.
    ///
    /// At most seven data objects fit into a message, larger counts are clamped.
    pub fn new(template: Self, message_id: Counter, message_type: MessageType, num_objects: u8) -> Self {
        template
            .with_message_id(message_id.value())
            .with_message_type_raw(match message_type {
                MessageType::Control(x) => x.into(),
                MessageType::Data(x) => x.into(),
            })
            .with_num_objects(num_objects.min(7))
            .with_extended(false)
    }

    /// Create a new control message header.
    pub fn new_control(template: Self, message_id: Counter, message_type: ControlMessageType) -> Self {
        Self::new(template, message_id, MessageType::Control(message_type), 0)
    }

    /// Create a new data message header.
    pub fn new_data(template: Self, message_id: Counter, message_type: DataMessageType, num_objects: u8) -> Self {
        Self::new(template, message_id, MessageType::Data(message_type), num_objects)
    }

    /// Parse a header from its binary representation.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        let header = Header(LittleEndian::read_u16(&buf[..2]));
        // Validate spec_revision
        header.spec_revision()?;
        Ok(header)
    }

    /// Serialize the header to its binary representation.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// Whether this is the all-zero sentinel that stands for "no message".
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Extract the message type that the header encodes.
    pub fn message_type(&self) -> MessageType {
        if self.num_objects() == 0 {
            MessageType::Control(self.message_type_raw().into())
        } else {
            MessageType::Data(self.message_type_raw().into())
        }
    }
}

/// Specification revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
pub enum SpecificationRevision {
    /// Version 1.0.
    R1_0,
    /// Version 2.0.
    R2_0,
    /// Version 3.x.
    R3_X,
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b00 => Ok(Self::R1_0),
            0b01 => Ok(Self::R2_0),
            0b10 => Ok(Self::R3_X),
            _ => Err(ParseError::UnsupportedSpecificationRevision(value)),
        }
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        match value {
            SpecificationRevision::R1_0 => 0b00,
            SpecificationRevision::R2_0 => 0b01,
            SpecificationRevision::R3_X => 0b10,
        }
    }
}

/// The type of message that a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// A control message, as defined in [6.3].
    Control(ControlMessageType),
    /// A data message, as defined in [6.4].
    Data(DataMessageType),
}

/// Declare a message type enum together with its five bit wire code.
///
/// Unknown codes decode to `Reserved`, which encodes as zero.
macro_rules! message_types {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal,)* }) => {
        $(#[$meta])*
        #[allow(missing_docs)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum $name {
            $($variant,)*
            Reserved,
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    $($code => Self::$variant,)*
                    _ => Self::Reserved,
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $code,)*
                    $name::Reserved => 0,
                }
            }
        }
    };
}

message_types! {
    /// Types of control messages, see [6.3].
    ControlMessageType {
        GoodCRC = 0x01,
        GotoMin = 0x02,
        Accept = 0x03,
        Reject = 0x04,
        Ping = 0x05,
        PsRdy = 0x06,
        GetSourceCap = 0x07,
        GetSinkCap = 0x08,
        DrSwap = 0x09,
        PrSwap = 0x0A,
        VconnSwap = 0x0B,
        Wait = 0x0C,
        SoftReset = 0x0D,
        DataReset = 0x0E,
        DataResetComplete = 0x0F,
        NotSupported = 0x10,
        GetStatus = 0x12,
        FrSwap = 0x13,
        GetRevision = 0x18,
    }
}

message_types! {
    /// Types of data messages, see [6.4].
    DataMessageType {
        SourceCapabilities = 0x01,
        Request = 0x02,
        Bist = 0x03,
        SinkCapabilities = 0x04,
        Alert = 0x06,
        EnterUsb = 0x08,
        Revision = 0x0C,
        VendorDefined = 0x0F,
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
    use crate::counters::{Counter, CounterType};
    use crate::{DataRole, PowerRole};

    #[test]
    fn test_header_fields() {
        let template = Header::new_template(DataRole::Dfp, PowerRole::Source, SpecificationRevision::R3_X);
        let header = Header::new_data(
            template,
            Counter::new_from_value(CounterType::MessageId, 5),
            DataMessageType::VendorDefined,
            7,
        );

        let mut buf = [0u8; 2];
        header.to_bytes(&mut buf);
        let parsed = Header::from_bytes(&buf).unwrap();

        assert_eq!(parsed.message_id(), 5);
        assert_eq!(parsed.num_objects(), 7);
        assert_eq!(parsed.port_power_role(), PowerRole::Source);
        assert_eq!(parsed.port_data_role(), DataRole::Dfp);
        assert_eq!(
            parsed.message_type(),
            MessageType::Data(DataMessageType::VendorDefined)
        );
    }

    #[test]
    fn test_control_header_has_no_objects() {
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R2_0);
        let header = Header::new_control(template, Counter::new(CounterType::MessageId), ControlMessageType::Accept);

        assert_eq!(header.num_objects(), 0);
        assert_eq!(header.message_type(), MessageType::Control(ControlMessageType::Accept));
        assert!(!header.is_empty());
    }

    #[test]
    fn test_unknown_message_codes() {
        assert_eq!(ControlMessageType::from(0x11), ControlMessageType::Reserved);
        assert_eq!(DataMessageType::from(0x09), DataMessageType::Reserved);
        assert_eq!(u8::from(ControlMessageType::NotSupported), 0x10);
    }

    #[test]
    fn test_reserved_revision_is_rejected() {
        // Revision bits 6..=7 set to 0b11.
        assert!(Header::from_bytes(&[0xC1, 0x00]).is_err());
    }
}
