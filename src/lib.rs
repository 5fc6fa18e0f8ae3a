//! USB PD port controller with vendor discovery and a chunked vendor message transport.
//!
//! The crate is layered like the USB PD specification itself:
//! - [`protocol_layer`] frames messages and talks to the PHY through [`usbpd_uvdm_traits::Driver`],
//! - [`policy_engine`] negotiates power contracts and role swaps,
//! - [`manager`] walks the VDM discovery sequence and classifies the attached accessory,
//! - [`uvdm`] moves arbitrarily large vendor payloads in checksummed chunks,
//! - [`bridge`] maps events of the manager (and the application) to policy engine commands,
//! - [`port`] runs all of the above as a single reactive task.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod bridge;
pub mod config;
pub mod counters;
pub mod device_policy_manager;
pub mod manager;
pub mod policy_engine;
pub mod port;
pub mod protocol_layer;
pub mod timers;
pub mod uvdm;

#[cfg(test)]
pub mod dummy;

/// The power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerRole {
    /// The port provides power.
    Source,
    /// The port consumes power.
    Sink,
}

impl PowerRole {
    /// The opposite power role.
    pub fn swapped(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataRole {
    /// Upstream facing port (device).
    Ufp,
    /// Downstream facing port (host).
    Dfp,
}

impl DataRole {
    /// The opposite data role.
    pub fn swapped(self) -> Self {
        match self {
            Self::Ufp => Self::Dfp,
            Self::Dfp => Self::Ufp,
        }
    }
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
