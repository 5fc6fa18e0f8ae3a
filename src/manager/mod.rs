//! The vendor discovery manager walks the VDM discovery sequence as DFP.
//!
//! Discover Identity, Discover SVIDs, Discover Modes, Enter Mode and, for DisplayPort,
//! Status Update and Configure. Each request is built here and sent by the policy engine. Each
//! matching ACK yields the next [`Event`], any other answer halts the sequence.
//!
//! See [6.4.4.3].
pub mod accessory;
pub mod display_port;

use accessory::{AccessoryIdentity, AccessoryType, classify_accessory, is_known_vendor};

use crate::bridge::{Command, Event, Notification, Notifications, notify};
use crate::protocol_layer::message::data::vendor_defined::{
    DISPLAY_PORT_SVID, DisplayPortCapabilities, DisplayPortConfigure, DisplayPortStatus, PD_SID, ProductVdo,
    SvidVdo, VdmCommand, VdmCommandType, VdmHeader, VdmHeaderStructured, VdmIdentityHeader, VendorDefined,
};

/// Discovery progress and the identity of the partner.
#[derive(Debug, Default)]
pub struct Manager {
    identity: Option<AccessoryIdentity>,
    accessory: Option<AccessoryType>,
    awaiting: Option<VdmCommand>,
    svid: Option<u16>,
    position: u8,
    capabilities: Option<DisplayPortCapabilities>,
    pin_assignment: u8,
    configured: bool,
    display_connected: bool,
}

fn request(svid: u16, command: VdmCommand, position: u8, objects: &[u32]) -> VendorDefined {
    VendorDefined::new(
        VdmHeader::Structured(VdmHeaderStructured::request(svid, command, position)),
        objects,
    )
}

impl Manager {
    /// The identity of the partner, once discovered.
    pub fn identity(&self) -> Option<&AccessoryIdentity> {
        self.identity.as_ref()
    }

    /// The class of the partner, once discovered.
    pub fn accessory(&self) -> Option<AccessoryType> {
        self.accessory
    }

    /// Whether a DisplayPort sink is connected.
    pub fn display_connected(&self) -> bool {
        self.display_connected
    }

    /// The command whose answer is awaited.
    pub fn awaiting(&self) -> Option<VdmCommand> {
        self.awaiting
    }

    /// Forget everything about the partner, and report what is lost.
    pub fn teardown(&mut self, notifications: &mut Notifications) {
        if self.display_connected {
            notify(notifications, Notification::DisplayDisconnected);
        }
        if self.accessory.is_some() {
            notify(notifications, Notification::AccessoryDetached);
        }
        *self = Self::default();
    }

    /// Drop the step in progress, e.g. after a soft reset. The identity is kept.
    pub fn abort(&mut self) {
        if let Some(command) = self.awaiting.take() {
            debug!("Discovery aborted while awaiting {:?}", command);
        }
        self.svid = None;
        self.position = 0;
    }

    /// Discover Identity request.
    pub fn discover_identity(&mut self) -> VendorDefined {
        self.awaiting = Some(VdmCommand::DiscoverIdentity);
        request(PD_SID, VdmCommand::DiscoverIdentity, 0, &[])
    }

    /// Discover SVIDs request.
    pub fn discover_svids(&mut self) -> VendorDefined {
        self.awaiting = Some(VdmCommand::DiscoverSvids);
        request(PD_SID, VdmCommand::DiscoverSvids, 0, &[])
    }

    /// Discover Modes request.
    pub fn discover_modes(&mut self, svid: u16) -> VendorDefined {
        self.awaiting = Some(VdmCommand::DiscoverModes);
        self.svid = Some(svid);
        request(svid, VdmCommand::DiscoverModes, 0, &[])
    }

    /// Enter Mode request.
    pub fn enter_mode(&mut self, svid: u16, position: u8) -> VendorDefined {
        self.awaiting = Some(VdmCommand::EnterMode);
        self.svid = Some(svid);
        self.position = position;
        request(svid, VdmCommand::EnterMode, position, &[])
    }

    /// DisplayPort Status Update request, reporting this port as a connected DFP_D.
    pub fn dp_status_update(&mut self, position: u8) -> VendorDefined {
        self.awaiting = Some(VdmCommand::DisplayPortStatus);
        let status = DisplayPortStatus(0).with_connected(0b01).with_enabled(true);
        request(DISPLAY_PORT_SVID, VdmCommand::DisplayPortStatus, position, &[status.into()])
    }

    /// DisplayPort Configure request, with the partner as UFP_D.
    pub fn dp_configure(&mut self, position: u8, pin_assignment: u8) -> VendorDefined {
        self.awaiting = Some(VdmCommand::DisplayPortConfig);
        self.pin_assignment = pin_assignment;
        let configure = DisplayPortConfigure(0)
            .with_select_configuration(0b10)
            .with_signaling(0b0001)
            .with_pin_assignment(pin_assignment);
        request(DISPLAY_PORT_SVID, VdmCommand::DisplayPortConfig, position, &[configure.into()])
    }

    /// Build the request for a discovery command.
    ///
    /// Returns `None` for commands that are not discovery requests.
    pub fn request_for(&mut self, command: &Command) -> Option<VendorDefined> {
        Some(match *command {
            Command::DiscoverIdentity => self.discover_identity(),
            Command::DiscoverSvids => self.discover_svids(),
            Command::DiscoverModes { svid } => self.discover_modes(svid),
            Command::EnterMode { svid, position } => self.enter_mode(svid, position),
            Command::DisplayPortStatusUpdate { position } => self.dp_status_update(position),
            Command::DisplayPortConfigure {
                position,
                pin_assignment,
            } => self.dp_configure(position, pin_assignment),
            _ => return None,
        })
    }

    fn halt(&mut self) -> Option<Event> {
        self.awaiting = None;
        Some(Event::DiscoveryHalted)
    }

    /// Interpret a structured VDM from the partner.
    ///
    /// Returns the event that the answer raises, if any.
    pub fn on_vdm(&mut self, vdm: &VendorDefined, notifications: &mut Notifications) -> Option<Event> {
        let header = vdm.structured()?;

        if header.command() == VdmCommand::Attention {
            self.on_attention(vdm, notifications);
            return None;
        }

        match header.command_type() {
            VdmCommandType::InitiatorRequest => return None,
            VdmCommandType::ResponderNak | VdmCommandType::ResponderBusy => {
                warn!("Partner answered {:?} with {:?}", header.command(), header.command_type());
                return self.halt();
            }
            VdmCommandType::ResponderAck => (),
        }

        if self.awaiting != Some(header.command()) {
            warn!("Unexpected ACK for {:?}, awaiting {:?}", header.command(), self.awaiting);
            return self.halt();
        }
        self.awaiting = None;

        let event = match header.command() {
            VdmCommand::DiscoverIdentity => self.on_identity(vdm, notifications),
            VdmCommand::DiscoverSvids => self.on_svids(vdm),
            VdmCommand::DiscoverModes => self.on_modes(vdm),
            VdmCommand::EnterMode => self.svid.map(|svid| Event::EnterModeAcked {
                svid,
                position: self.position,
            }),
            VdmCommand::DisplayPortStatus => self.on_status(vdm),
            VdmCommand::DisplayPortConfig => {
                self.configured = true;
                self.display_connected = true;
                notify(notifications, Notification::DisplayRoleChanged { usb_to_display: true });
                notify(
                    notifications,
                    Notification::DisplayConnected {
                        lanes: display_port::lanes(self.pin_assignment),
                        pin_assignment: self.pin_assignment,
                    },
                );
                Some(Event::ConfigureAcked)
            }
            _ => None,
        };

        match event {
            Some(event) => Some(event),
            None => self.halt(),
        }
    }

    fn on_identity(&mut self, vdm: &VendorDefined, notifications: &mut Notifications) -> Option<Event> {
        let [id_header, _cert_stat, product, ..] = vdm.objects.as_slice() else {
            warn!("Identity ACK with {} objects", vdm.objects.len());
            return None;
        };

        let id_header = VdmIdentityHeader(*id_header);
        let product = ProductVdo(*product);
        let identity = AccessoryIdentity {
            vendor_id: id_header.vid(),
            product_id: product.pid(),
            device_version: product.bcd_device(),
            ..Default::default()
        };
        let accessory = classify_accessory(&identity);
        info!(
            "Accessory {:?}: vendor {:#x}, product {:#x}",
            accessory, identity.vendor_id, identity.product_id
        );

        self.identity = Some(identity);
        self.accessory = Some(accessory);
        notify(
            notifications,
            Notification::AccessoryAttached {
                accessory,
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
            },
        );

        Some(Event::IdentityAcked)
    }

    fn on_svids(&mut self, vdm: &VendorDefined) -> Option<Event> {
        if let (Some(identity), Some(first)) = (self.identity.as_mut(), vdm.objects.first()) {
            let first = SvidVdo(*first);
            identity.svid_0 = first.svid_0();
            identity.svid_1 = first.svid_1();
        }

        let mut svids = vdm
            .objects
            .iter()
            .flat_map(|object| {
                let vdo = SvidVdo(*object);
                [vdo.svid_0(), vdo.svid_1()]
            })
            .filter(|svid| *svid != 0);

        let chosen = if svids.clone().any(|svid| svid == DISPLAY_PORT_SVID) {
            Some(DISPLAY_PORT_SVID)
        } else {
            svids.find(|svid| is_known_vendor(*svid))
        };

        match chosen {
            Some(svid) => {
                debug!("Discover modes of SVID {:#x}", svid);
                self.svid = Some(svid);
                Some(Event::SvidsAcked { svid })
            }
            None => {
                debug!("No usable SVID");
                Some(Event::DiscoveryFinished)
            }
        }
    }

    fn on_modes(&mut self, vdm: &VendorDefined) -> Option<Event> {
        let svid = self.svid?;
        let mode = vdm.objects.first()?;

        if svid == DISPLAY_PORT_SVID {
            self.capabilities = Some(DisplayPortCapabilities(*mode));
        }
        self.position = 1;

        Some(Event::ModesAcked { svid, position: 1 })
    }

    fn on_status(&mut self, vdm: &VendorDefined) -> Option<Event> {
        let status = DisplayPortStatus(*vdm.objects.first()?);
        let pin_assignment = display_port::select_pin_assignment(self.capabilities?, status)?;

        Some(Event::StatusUpdateAcked {
            position: self.position,
            pin_assignment,
        })
    }

    fn on_attention(&mut self, vdm: &VendorDefined, notifications: &mut Notifications) {
        if vdm.header.svid() != DISPLAY_PORT_SVID || !self.configured {
            return;
        }
        let Some(status) = vdm.objects.first().map(|object| DisplayPortStatus(*object)) else {
            return;
        };

        match (status.hpd_state(), self.display_connected) {
            (false, true) => {
                self.display_connected = false;
                notify(notifications, Notification::DisplayDisconnected);
            }
            (true, false) => {
                self.display_connected = true;
                notify(
                    notifications,
                    Notification::DisplayConnected {
                        lanes: display_port::lanes(self.pin_assignment),
                        pin_assignment: self.pin_assignment,
                    },
                );
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Manager;
    use super::accessory::AccessoryType;
    use super::display_port::pin_assignment;
    use crate::bridge::{Event, Notification, Notifications};
    use crate::protocol_layer::message::data::vendor_defined::{
        DISPLAY_PORT_SVID, DisplayPortCapabilities, DisplayPortStatus, ProductVdo, SAMSUNG_VID, SvidVdo,
        VdmCommand, VdmCommandType, VdmHeader, VdmHeaderStructured, VdmIdentityHeader, VendorDefined,
    };

    fn answer(svid: u16, command: VdmCommand, command_type: VdmCommandType, objects: &[u32]) -> VendorDefined {
        VendorDefined::new(
            VdmHeader::Structured(VdmHeaderStructured::request(svid, command, 1).with_command_type(command_type)),
            objects,
        )
    }

    fn ack(svid: u16, command: VdmCommand, objects: &[u32]) -> VendorDefined {
        answer(svid, command, VdmCommandType::ResponderAck, objects)
    }

    fn identity_ack(vendor_id: u16, product_id: u16) -> VendorDefined {
        ack(
            0xFF00,
            VdmCommand::DiscoverIdentity,
            &[
                VdmIdentityHeader(0).with_vid(vendor_id).into(),
                0,
                ProductVdo(0).with_pid(product_id).with_bcd_device(0x0100).into(),
            ],
        )
    }

    #[test]
    fn test_display_port_sequence() {
        let mut manager = Manager::default();
        let mut notifications = Notifications::new();

        manager.discover_identity();
        assert_eq!(
            manager.on_vdm(&identity_ack(SAMSUNG_VID, 0xA020), &mut notifications),
            Some(Event::IdentityAcked)
        );
        assert_eq!(manager.accessory(), Some(AccessoryType::Dex));
        assert_eq!(
            notifications.pop_front(),
            Some(Notification::AccessoryAttached {
                accessory: AccessoryType::Dex,
                vendor_id: SAMSUNG_VID,
                product_id: 0xA020
            })
        );

        manager.discover_svids();
        let svids = SvidVdo(0).with_svid_0(SAMSUNG_VID).with_svid_1(DISPLAY_PORT_SVID);
        assert_eq!(
            manager.on_vdm(&ack(0xFF00, VdmCommand::DiscoverSvids, &[svids.into()]), &mut notifications),
            Some(Event::SvidsAcked { svid: DISPLAY_PORT_SVID })
        );
        assert_eq!(manager.identity().map(|identity| identity.svid_1), Some(DISPLAY_PORT_SVID));

        manager.discover_modes(DISPLAY_PORT_SVID);
        let capabilities = DisplayPortCapabilities(0)
            .with_receptacle_indication(true)
            .with_ufp_d_pin_assignments(pin_assignment::C | pin_assignment::D);
        assert_eq!(
            manager.on_vdm(
                &ack(DISPLAY_PORT_SVID, VdmCommand::DiscoverModes, &[capabilities.into()]),
                &mut notifications
            ),
            Some(Event::ModesAcked {
                svid: DISPLAY_PORT_SVID,
                position: 1
            })
        );

        manager.enter_mode(DISPLAY_PORT_SVID, 1);
        assert_eq!(
            manager.on_vdm(&ack(DISPLAY_PORT_SVID, VdmCommand::EnterMode, &[]), &mut notifications),
            Some(Event::EnterModeAcked {
                svid: DISPLAY_PORT_SVID,
                position: 1
            })
        );

        manager.dp_status_update(1);
        let status = DisplayPortStatus(0).with_connected(0b10).with_hpd_state(true);
        assert_eq!(
            manager.on_vdm(
                &ack(DISPLAY_PORT_SVID, VdmCommand::DisplayPortStatus, &[status.into()]),
                &mut notifications
            ),
            Some(Event::StatusUpdateAcked {
                position: 1,
                pin_assignment: pin_assignment::C
            })
        );

        manager.dp_configure(1, pin_assignment::C);
        assert_eq!(
            manager.on_vdm(&ack(DISPLAY_PORT_SVID, VdmCommand::DisplayPortConfig, &[]), &mut notifications),
            Some(Event::ConfigureAcked)
        );
        assert_eq!(
            notifications.pop_front(),
            Some(Notification::DisplayRoleChanged { usb_to_display: true })
        );
        assert_eq!(
            notifications.pop_front(),
            Some(Notification::DisplayConnected {
                lanes: 4,
                pin_assignment: pin_assignment::C
            })
        );
        assert!(manager.display_connected());

        // HPD low.
        let attention = answer(
            DISPLAY_PORT_SVID,
            VdmCommand::Attention,
            VdmCommandType::InitiatorRequest,
            &[DisplayPortStatus(0).with_connected(0b10).into()],
        );
        assert_eq!(manager.on_vdm(&attention, &mut notifications), None);
        assert_eq!(notifications.pop_front(), Some(Notification::DisplayDisconnected));
    }

    #[test]
    fn test_nak_halts() {
        let mut manager = Manager::default();
        let mut notifications = Notifications::new();

        manager.discover_identity();
        let nak = answer(0xFF00, VdmCommand::DiscoverIdentity, VdmCommandType::ResponderNak, &[]);
        assert_eq!(manager.on_vdm(&nak, &mut notifications), Some(Event::DiscoveryHalted));
        assert_eq!(manager.awaiting(), None);
    }

    #[test]
    fn test_mismatched_ack_halts() {
        let mut manager = Manager::default();
        let mut notifications = Notifications::new();

        manager.discover_svids();
        assert_eq!(
            manager.on_vdm(&identity_ack(SAMSUNG_VID, 0xA020), &mut notifications),
            Some(Event::DiscoveryHalted)
        );
        assert!(manager.identity().is_none());
    }

    #[test]
    fn test_vendor_svid_and_finish() {
        let mut manager = Manager::default();
        let mut notifications = Notifications::new();

        manager.discover_svids();
        let svids = SvidVdo(0).with_svid_0(0x1234).with_svid_1(SAMSUNG_VID);
        assert_eq!(
            manager.on_vdm(&ack(0xFF00, VdmCommand::DiscoverSvids, &[svids.into()]), &mut notifications),
            Some(Event::SvidsAcked { svid: SAMSUNG_VID })
        );

        manager.discover_svids();
        let svids = SvidVdo(0).with_svid_0(0x1234);
        assert_eq!(
            manager.on_vdm(&ack(0xFF00, VdmCommand::DiscoverSvids, &[svids.into()]), &mut notifications),
            Some(Event::DiscoveryFinished)
        );
    }

    #[test]
    fn test_teardown_reports_detach() {
        let mut manager = Manager::default();
        let mut notifications = Notifications::new();

        manager.discover_identity();
        manager.on_vdm(&identity_ack(0x1234, 0x0001), &mut notifications);
        assert_eq!(manager.accessory(), Some(AccessoryType::Unknown));
        notifications.clear();

        manager.teardown(&mut notifications);
        assert_eq!(notifications.pop_front(), Some(Notification::AccessoryDetached));
        assert!(manager.identity().is_none());
    }
}
