//! Definitions of request message content.
//!
//! The same object encodes fixed/variable requests (currents in 10 mA units) and battery requests
//! (powers in 250 mW units). Which one applies depends on the kind of the referenced profile.
use proc_bitfield::bitfield;

use super::pdo::{PowerProfile, ProfileKind};

bitfield! {
    /// A request data object.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Request(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7
        pub object_position: u8 @ 28..=31,
        /// GiveBack flag
        pub giveback_flag: bool @ 27,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
        /// USB communications capable
        pub usb_communications_capable: bool @ 25,
        /// No USB Suspend
        pub no_usb_suspend: bool @ 24,
        /// Operating current (10 mA units) or power (250 mW units)
        pub raw_operating: u16 @ 10..=19,
        /// Maximum operating current (10 mA units) or power (250 mW units)
        pub raw_max_operating: u16 @ 0..=9,
    }
}

impl Request {
    /// Build a request for a profile at a 1-based position.
    ///
    /// For battery profiles, the current is converted into power at the profile's minimum voltage.
    pub fn new(position: u8, profile: &PowerProfile, current_ma: u32) -> Self {
        let raw = match profile.kind {
            ProfileKind::Battery => (current_ma * profile.min_voltage_mv / 1000 / 250) as u16,
            _ => (current_ma / 10) as u16,
        };

        Request(0)
            .with_object_position(position)
            .with_raw_operating(raw)
            .with_raw_max_operating(raw)
            .with_no_usb_suspend(true)
            .with_usb_communications_capable(true)
    }

    /// The operating current in mA, for fixed and variable requests.
    pub fn operating_current_ma(&self) -> u32 {
        u32::from(self.raw_operating()) * 10
    }

    /// The operating power in mW, for battery requests.
    pub fn operating_power_mw(&self) -> u32 {
        u32::from(self.raw_operating()) * 250
    }
}
