//! Vendor defined messages: structured VDMs for discovery and mode entry, unstructured ones for
//! vendor transports.
//!
//! See [6.4.4].
use heapless::Vec;
use proc_bitfield::bitfield;

use crate::protocol_layer::message::MAX_DATA_OBJECTS;

/// The PD standard ID, used for discovery.
pub const PD_SID: u16 = 0xFF00;
/// The DisplayPort alternate mode SVID.
pub const DISPLAY_PORT_SVID: u16 = 0xFF01;
/// Samsung's USB vendor ID.
pub const SAMSUNG_VID: u16 = 0x04E8;

/// Structured or unstructured VDM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmType {
    /// Unstructured, the content is vendor specific.
    Unstructured,
    /// Structured, with a command and a command type.
    Structured,
}

impl From<VdmType> for bool {
    fn from(value: VdmType) -> Self {
        match value {
            VdmType::Unstructured => false,
            VdmType::Structured => true,
        }
    }
}

impl From<bool> for VdmType {
    fn from(value: bool) -> Self {
        match value {
            true => VdmType::Structured,
            false => VdmType::Unstructured,
        }
    }
}

/// The command type of a structured VDM.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommandType {
    InitiatorRequest,
    ResponderAck,
    ResponderNak,
    ResponderBusy,
}

impl From<VdmCommandType> for u8 {
    fn from(value: VdmCommandType) -> Self {
        match value {
            VdmCommandType::InitiatorRequest => 0,
            VdmCommandType::ResponderAck => 1,
            VdmCommandType::ResponderNak => 2,
            VdmCommandType::ResponderBusy => 3,
        }
    }
}

impl From<u8> for VdmCommandType {
    fn from(value: u8) -> Self {
        // Two bit field.
        match value & 0b11 {
            0 => VdmCommandType::InitiatorRequest,
            1 => VdmCommandType::ResponderAck,
            2 => VdmCommandType::ResponderNak,
            _ => VdmCommandType::ResponderBusy,
        }
    }
}

/// The command of a structured VDM.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommand {
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes,
    EnterMode,
    ExitMode,
    Attention,
    DisplayPortStatus,
    DisplayPortConfig,
    /// Reserved or SVID specific commands.
    Other(u8),
}

impl From<VdmCommand> for u8 {
    fn from(value: VdmCommand) -> Self {
        match value {
            VdmCommand::DiscoverIdentity => 0x1,
            VdmCommand::DiscoverSvids => 0x2,
            VdmCommand::DiscoverModes => 0x3,
            VdmCommand::EnterMode => 0x4,
            VdmCommand::ExitMode => 0x5,
            VdmCommand::Attention => 0x6,
            VdmCommand::DisplayPortStatus => 0x10,
            VdmCommand::DisplayPortConfig => 0x11,
            VdmCommand::Other(x) => x,
        }
    }
}

impl From<u8> for VdmCommand {
    fn from(value: u8) -> Self {
        match value {
            0x01 => VdmCommand::DiscoverIdentity,
            0x02 => VdmCommand::DiscoverSvids,
            0x03 => VdmCommand::DiscoverModes,
            0x04 => VdmCommand::EnterMode,
            0x05 => VdmCommand::ExitMode,
            0x06 => VdmCommand::Attention,
            0x10 => VdmCommand::DisplayPortStatus,
            0x11 => VdmCommand::DisplayPortConfig,
            x => VdmCommand::Other(x),
        }
    }
}

bitfield! {
    /// The fields that structured and unstructured VDM headers share.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmHeaderRaw(pub u32): FromStorage, IntoStorage {
        /// VDM Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// VDM Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
    }
}

bitfield! {
    /// A structured VDM header.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmHeaderStructured(pub u32): FromStorage, IntoStorage {
        /// VDM Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// VDM Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
        /// Structured VDM version, major
        pub vdm_version_major: u8 @ 13..=14,
        /// Structured VDM version, minor
        pub vdm_version_minor: u8 @ 11..=12,
        /// Object Position
        pub object_position: u8 @ 8..=10,
        /// Command Type
        pub command_type: u8 [VdmCommandType] @ 6..=7,
        /// Command
        pub command: u8 [VdmCommand] @ 0..=4,
    }
}

impl VdmHeaderStructured {
    /// An initiator request for a command, at version 2.0.
    pub fn request(svid: u16, command: VdmCommand, object_position: u8) -> Self {
        Self(0)
            .with_standard_or_vid(svid)
            .with_vdm_type(VdmType::Structured)
            .with_vdm_version_major(0b01)
            .with_object_position(object_position)
            .with_command_type(VdmCommandType::InitiatorRequest)
            .with_command(command)
    }
}

bitfield! {
    /// An unstructured VDM header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmHeaderUnstructured(pub u32): FromStorage, IntoStorage {
        /// Vdm Standard or Vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        /// Vdm Type (Unstructured/Structured)
        pub vdm_type: bool [VdmType] @ 15,
        /// Message defined
        pub data: u16 @ 0..=14
    }
}

impl VdmHeaderUnstructured {
    /// An unstructured header for a vendor.
    pub fn new(vid: u16) -> Self {
        Self(0).with_standard_or_vid(vid).with_vdm_type(VdmType::Unstructured)
    }
}

/// A VDM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmHeader {
    /// Structured header.
    Structured(VdmHeaderStructured),
    /// Unstructured header.
    Unstructured(VdmHeaderUnstructured),
}

impl VdmHeader {
    /// The standard or vendor ID of the message.
    pub fn svid(&self) -> u16 {
        VdmHeaderRaw(u32::from(*self)).standard_or_vid()
    }
}

impl From<VdmHeader> for u32 {
    fn from(value: VdmHeader) -> Self {
        match value {
            VdmHeader::Structured(header) => header.into(),
            VdmHeader::Unstructured(header) => header.into(),
        }
    }
}

impl From<u32> for VdmHeader {
    fn from(value: u32) -> Self {
        match VdmHeaderRaw(value).vdm_type() {
            VdmType::Structured => VdmHeader::Structured(VdmHeaderStructured(value)),
            VdmType::Unstructured => VdmHeader::Unstructured(VdmHeaderUnstructured(value)),
        }
    }
}

/// A vendor defined message: a VDM header and up to six VDOs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VendorDefined {
    /// The VDM header.
    pub header: VdmHeader,
    /// The data objects that follow the header.
    pub objects: Vec<u32, { MAX_DATA_OBJECTS - 1 }>,
}

impl VendorDefined {
    /// Create a message from a header and its VDOs. Surplus VDOs are dropped.
    pub fn new(header: VdmHeader, objects: &[u32]) -> Self {
        Self {
            header,
            objects: objects.iter().copied().take(MAX_DATA_OBJECTS - 1).collect(),
        }
    }

    /// Parse from raw objects, the first of which is the VDM header.
    pub fn from_objects(objects: &[u32]) -> Option<Self> {
        let (header, rest) = objects.split_first()?;
        Some(Self::new(VdmHeader::from(*header), rest))
    }

    /// All raw objects, starting with the VDM header.
    pub fn to_objects(&self) -> Vec<u32, MAX_DATA_OBJECTS> {
        let mut objects = Vec::new();
        // Capacities match, pushes cannot fail.
        let _ = objects.push(self.header.into());
        for object in &self.objects {
            let _ = objects.push(*object);
        }
        objects
    }

    /// The number of data objects, including the VDM header.
    pub fn num_objects(&self) -> usize {
        1 + self.objects.len()
    }

    /// The structured header, if this is a structured VDM.
    pub fn structured(&self) -> Option<VdmHeaderStructured> {
        match self.header {
            VdmHeader::Structured(header) => Some(header),
            VdmHeader::Unstructured(_) => None,
        }
    }
}

/// Connector type, as reported in the identity header.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorType {
    Receptacle,
    Plug,
    Reserved(u8),
}

impl From<ConnectorType> for u8 {
    fn from(value: ConnectorType) -> Self {
        match value {
            ConnectorType::Receptacle => 0b10,
            ConnectorType::Plug => 0b11,
            ConnectorType::Reserved(x) => x,
        }
    }
}

impl From<u8> for ConnectorType {
    fn from(value: u8) -> Self {
        match value {
            0b10 => ConnectorType::Receptacle,
            0b11 => ConnectorType::Plug,
            x => ConnectorType::Reserved(x),
        }
    }
}

bitfield! {
    /// The ID header VDO of a Discover Identity response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmIdentityHeader(pub u32): FromStorage, IntoStorage {
        /// Host data capable
        pub host_data: bool @ 31,
        /// Device data capable
        pub device_data: bool @ 30,
        /// Product type UFP
        pub product_type_ufp: u8 @ 27..=29,
        /// Modal Operation Supported
        pub modal_supported: bool @ 26,
        /// Product type DFP
        pub product_type_dfp: u8 @ 23..=25,
        /// Connector type
        pub connector_type: u8 [ConnectorType] @ 21..=22,
        /// VID
        pub vid: u16 @ 0..=15,
    }
}

bitfield! {
    /// The product VDO of a Discover Identity response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ProductVdo(pub u32): FromStorage, IntoStorage {
        /// USB Product ID
        pub pid: u16 @ 16..=31,
        /// Device release number
        pub bcd_device: u16 @ 0..=15,
    }
}

bitfield! {
    /// One VDO of a Discover SVIDs response, carrying two SVIDs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct SvidVdo(pub u32): FromStorage, IntoStorage {
        /// First SVID
        pub svid_0: u16 @ 16..=31,
        /// Second SVID
        pub svid_1: u16 @ 0..=15,
    }
}

bitfield! {
    /// The DisplayPort capabilities VDO of a Discover Modes response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct DisplayPortCapabilities(pub u32): FromStorage, IntoStorage {
        /// UFP_D Pin Assignments Supported
        pub ufp_d_pin_assignments: u8 @ 16..=23,
        /// DFP_D Pin Assignments Supported
        pub dfp_d_pin_assignments: u8 @ 8..=15,
        /// USB r2.0 Signalling Not Used
        pub usb20_signalling_not_used: bool @ 7,
        /// Receptacle Indication
        pub receptacle_indication: bool @ 6,
        /// Signalling for Transport of DisplayPort Protocol
        pub signaling_rate: u8 @ 2..=5,
        /// Port Capability
        pub capability: u8 @ 0..=1,
    }
}

bitfield! {
    /// The DisplayPort status VDO, used by Status Update and Attention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct DisplayPortStatus(pub u32): FromStorage, IntoStorage {
        /// HPD IRQ
        pub irq_hpd: bool @ 8,
        /// HPD state (high when a sink is connected)
        pub hpd_state: bool @ 7,
        /// Exit DisplayPort mode request
        pub exit_mode_request: bool @ 6,
        /// USB configuration request
        pub usb_configuration_request: bool @ 5,
        /// Multi-function preferred
        pub multi_function_preferred: bool @ 4,
        /// Enabled
        pub enabled: bool @ 3,
        /// Power low
        pub power_low: bool @ 2,
        /// Connected: 1 for DFP_D, 2 for UFP_D, 3 for both
        pub connected: u8 @ 0..=1,
    }
}

bitfield! {
    /// The DisplayPort configuration VDO.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct DisplayPortConfigure(pub u32): FromStorage, IntoStorage {
        /// Pin assignment to configure, one bit set
        pub pin_assignment: u8 @ 8..=15,
        /// Signalling for transport of DisplayPort protocol
        pub signaling: u8 @ 2..=5,
        /// 0 for USB, 1 for the partner as DFP_D, 2 for the partner as UFP_D
        pub select_configuration: u8 @ 0..=1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_request_header() {
        let header = VdmHeaderStructured::request(DISPLAY_PORT_SVID, VdmCommand::EnterMode, 1);

        assert_eq!(header.standard_or_vid(), DISPLAY_PORT_SVID);
        assert_eq!(header.command(), VdmCommand::EnterMode);
        assert_eq!(header.command_type(), VdmCommandType::InitiatorRequest);
        assert_eq!(header.object_position(), 1);
        assert_eq!(VdmHeader::from(u32::from(header)), VdmHeader::Structured(header));
    }

    #[test]
    fn test_unknown_command_is_kept() {
        let header = VdmHeaderStructured(0x1F);
        assert_eq!(header.command(), VdmCommand::Other(0x1F));
    }

    #[test]
    fn test_vendor_defined_objects() {
        let vdm = VendorDefined::from_objects(&[u32::from(VdmHeaderUnstructured::new(SAMSUNG_VID)), 1, 2]).unwrap();

        assert_eq!(vdm.header.svid(), SAMSUNG_VID);
        assert_eq!(vdm.num_objects(), 3);
        assert_eq!(&vdm.to_objects()[1..], &[1, 2]);
        assert!(VendorDefined::from_objects(&[]).is_none());
    }
}
