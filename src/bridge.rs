//! Events, commands and notifications, and the table that connects them.
//!
//! The discovery manager and the application raise [`Event`]s. Each one maps to at most one
//! [`Command`] for the policy engine, through [`command_for`]. [`Notification`]s travel the other
//! way, from the policy engine to the device policy manager.
use heapless::{Deque, Vec};

use crate::manager::accessory::AccessoryType;
use crate::protocol_layer::message::MAX_DATA_OBJECTS;
use crate::protocol_layer::message::data::pdo::PowerProfile;
use crate::protocol_layer::message::data::vendor_defined::DISPLAY_PORT_SVID;
use crate::uvdm::{Direction, UvdmFrame};
use crate::{DataRole, PowerRole};

/// Depth of the notification queue of the policy engine.
pub const NOTIFICATION_QUEUE_DEPTH: usize = 8;

/// Things that happened, raised by the discovery manager or the application.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The partner answered Discover Identity.
    IdentityAcked,
    /// The partner answered Discover SVIDs, and `svid` was chosen for mode discovery.
    SvidsAcked {
        /// The chosen SVID.
        svid: u16,
    },
    /// The partner answered Discover Modes.
    ModesAcked {
        /// The SVID of the modes.
        svid: u16,
        /// The chosen mode position.
        position: u8,
    },
    /// The partner entered a mode.
    EnterModeAcked {
        /// The SVID of the mode.
        svid: u16,
        /// The mode position.
        position: u8,
    },
    /// The partner answered a DisplayPort status update.
    StatusUpdateAcked {
        /// The mode position.
        position: u8,
        /// The chosen pin assignment, one bit set.
        pin_assignment: u8,
    },
    /// The partner accepted the DisplayPort configuration.
    ConfigureAcked,
    /// The partner offers no mode that is worth entering.
    DiscoveryFinished,
    /// The partner refused a discovery step.
    DiscoveryHalted,
    /// The application selects a different source capability.
    NewPowerSourceRequested {
        /// 1-based position of the source capability.
        position: u8,
        /// The requested current in mA.
        current_ma: u32,
    },
    /// A UVDM session wants a frame transmitted.
    UvdmSendRequested(UvdmFrame),
    /// A UVDM frame arrived from the partner.
    UvdmReceived(Direction, Vec<u32, MAX_DATA_OBJECTS>),
    /// The application asks for a power role swap.
    PrSwapRequested,
    /// The application asks for a data role swap.
    DrSwapRequested,
    /// The application asks for a VCONN swap.
    VconnSwapRequested,
}

/// Commands that the policy engine executes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Start discovery.
    DiscoverIdentity,
    /// Discover the partner's SVIDs.
    DiscoverSvids,
    /// Discover the modes of an SVID.
    DiscoverModes {
        /// The SVID.
        svid: u16,
    },
    /// Enter a mode.
    EnterMode {
        /// The SVID of the mode.
        svid: u16,
        /// The mode position.
        position: u8,
    },
    /// Ask for the DisplayPort status.
    DisplayPortStatusUpdate {
        /// The mode position.
        position: u8,
    },
    /// Configure DisplayPort.
    DisplayPortConfigure {
        /// The mode position.
        position: u8,
        /// The pin assignment, one bit set.
        pin_assignment: u8,
    },
    /// Mark discovery as done.
    FinishDiscovery,
    /// Request a source capability.
    SelectCapability {
        /// 1-based position of the source capability.
        position: u8,
        /// The requested current in mA.
        current_ma: u32,
    },
    /// Transmit a UVDM frame.
    TransmitUvdm(UvdmFrame),
    /// Hand a received UVDM frame to the waiting session.
    DeliverUvdm(Direction, Vec<u32, MAX_DATA_OBJECTS>),
    /// Initiate a power role swap.
    PowerRoleSwap,
    /// Initiate a data role swap.
    DataRoleSwap,
    /// Initiate a VCONN swap.
    VconnSwap,
}

/// The command that follows an event, if any.
pub fn command_for(event: Event) -> Option<Command> {
    let command = match event {
        Event::IdentityAcked => Command::DiscoverSvids,
        Event::SvidsAcked { svid } => Command::DiscoverModes { svid },
        Event::ModesAcked { svid, position } => Command::EnterMode { svid, position },
        Event::EnterModeAcked {
            svid: DISPLAY_PORT_SVID,
            position,
        } => Command::DisplayPortStatusUpdate { position },
        Event::EnterModeAcked { .. } => Command::FinishDiscovery,
        Event::StatusUpdateAcked {
            position,
            pin_assignment,
        } => Command::DisplayPortConfigure {
            position,
            pin_assignment,
        },
        Event::ConfigureAcked | Event::DiscoveryFinished => Command::FinishDiscovery,
        Event::NewPowerSourceRequested { position, current_ma } => Command::SelectCapability { position, current_ma },
        Event::UvdmSendRequested(frame) => Command::TransmitUvdm(frame),
        Event::UvdmReceived(direction, objects) => Command::DeliverUvdm(direction, objects),
        Event::PrSwapRequested => Command::PowerRoleSwap,
        Event::DrSwapRequested => Command::DataRoleSwap,
        Event::VconnSwapRequested => Command::VconnSwap,
        Event::DiscoveryHalted => {
            info!("Discovery halted");
            return None;
        }
    };

    Some(command)
}

/// Status changes that are reported to the device policy manager.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// A new explicit contract.
    CapabilitiesChanged {
        /// The advertised profiles.
        profiles: Vec<PowerProfile, MAX_DATA_OBJECTS>,
        /// 1-based position of the contracted profile.
        selected: u8,
    },
    /// An accessory was identified.
    AccessoryAttached {
        /// The accessory class.
        accessory: AccessoryType,
        /// USB vendor ID.
        vendor_id: u16,
        /// USB product ID.
        product_id: u16,
    },
    /// The accessory is gone.
    AccessoryDetached,
    /// The USB lanes changed their use.
    DisplayRoleChanged {
        /// Whether lanes were handed over to DisplayPort.
        usb_to_display: bool,
    },
    /// DisplayPort is configured.
    DisplayConnected {
        /// Number of DisplayPort lanes.
        lanes: u8,
        /// The configured pin assignment, one bit set.
        pin_assignment: u8,
    },
    /// The DisplayPort sink went away.
    DisplayDisconnected,
    /// The port roles changed.
    RoleChanged {
        /// The new power role.
        power_role: PowerRole,
        /// The new data role.
        data_role: DataRole,
    },
}

/// Pending notifications.
pub type Notifications = Deque<Notification, NOTIFICATION_QUEUE_DEPTH>;

/// Queue a notification. The oldest one is dropped when the queue is full.
pub fn notify(notifications: &mut Notifications, notification: Notification) {
    if notifications.is_full() {
        warn!("Notification queue full, dropping the oldest");
        notifications.pop_front();
    }
    debug!("Notify {:?}", notification);
    // Space was made above.
    let _ = notifications.push_back(notification);
}

#[cfg(test)]
mod tests {
    use super::{Command, Event, Notification, Notifications, command_for, notify};
    use crate::protocol_layer::message::data::vendor_defined::{DISPLAY_PORT_SVID, SAMSUNG_VID};

    #[test]
    fn test_discovery_chain() {
        assert_eq!(command_for(Event::IdentityAcked), Some(Command::DiscoverSvids));
        assert_eq!(
            command_for(Event::SvidsAcked { svid: DISPLAY_PORT_SVID }),
            Some(Command::DiscoverModes { svid: DISPLAY_PORT_SVID })
        );
        assert_eq!(
            command_for(Event::ModesAcked {
                svid: DISPLAY_PORT_SVID,
                position: 1
            }),
            Some(Command::EnterMode {
                svid: DISPLAY_PORT_SVID,
                position: 1
            })
        );
        assert_eq!(
            command_for(Event::StatusUpdateAcked {
                position: 1,
                pin_assignment: 0x04
            }),
            Some(Command::DisplayPortConfigure {
                position: 1,
                pin_assignment: 0x04
            })
        );
        assert_eq!(command_for(Event::ConfigureAcked), Some(Command::FinishDiscovery));
    }

    #[test]
    fn test_enter_mode_depends_on_svid() {
        assert_eq!(
            command_for(Event::EnterModeAcked {
                svid: DISPLAY_PORT_SVID,
                position: 1
            }),
            Some(Command::DisplayPortStatusUpdate { position: 1 })
        );
        assert_eq!(
            command_for(Event::EnterModeAcked {
                svid: SAMSUNG_VID,
                position: 1
            }),
            Some(Command::FinishDiscovery)
        );
    }

    #[test]
    fn test_halt_has_no_command() {
        assert_eq!(command_for(Event::DiscoveryHalted), None);
    }

    #[test]
    fn test_swap_requests() {
        assert_eq!(command_for(Event::PrSwapRequested), Some(Command::PowerRoleSwap));
        assert_eq!(command_for(Event::DrSwapRequested), Some(Command::DataRoleSwap));
        assert_eq!(command_for(Event::VconnSwapRequested), Some(Command::VconnSwap));
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut notifications = Notifications::new();
        notify(&mut notifications, Notification::AccessoryDetached);
        for _ in 0..8 {
            notify(&mut notifications, Notification::DisplayDisconnected);
        }

        assert_eq!(notifications.len(), 8);
        assert_eq!(notifications.front(), Some(&Notification::DisplayDisconnected));
    }
}
