//! Static configuration of a port.
use heapless::Vec;

use crate::protocol_layer::message::MAX_DATA_OBJECTS;
use crate::protocol_layer::message::data::pdo::PowerProfile;
use crate::{DataRole, PowerRole};

/// Which swaps the port agrees to when the partner asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwapPermissions {
    /// Accept PR_Swap.
    pub power_role: bool,
    /// Accept DR_Swap.
    pub data_role: bool,
    /// Accept VCONN_Swap.
    pub vconn: bool,
}

impl Default for SwapPermissions {
    fn default() -> Self {
        Self {
            power_role: false,
            data_role: true,
            vconn: true,
        }
    }
}

/// Limits for capability evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    /// Highest acceptable voltage in mV.
    pub max_voltage_mv: u32,
    /// Highest current to request in mA.
    pub max_current_ma: u32,
    /// Current to request while a fault is present, in mA.
    pub fault_current_ma: u32,
}

/// Port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Power role at attach.
    pub power_role: PowerRole,
    /// Data role at attach.
    pub data_role: DataRole,
    /// Highest acceptable voltage in mV.
    pub max_voltage_mv: u32,
    /// Highest current to request in mA.
    pub max_current_ma: u32,
    /// Current to request while a fault is present, in mA.
    pub fault_current_ma: u32,
    /// Swap permissions.
    pub permissions: SwapPermissions,
    /// Whether the port sources VCONN at attach.
    pub vconn_source: bool,
    /// Profiles advertised as a source.
    pub source_profiles: Vec<PowerProfile, MAX_DATA_OBJECTS>,
    /// Profiles reported as a sink.
    pub sink_profiles: Vec<PowerProfile, MAX_DATA_OBJECTS>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            power_role: PowerRole::Sink,
            data_role: DataRole::Ufp,
            max_voltage_mv: 9000,
            max_current_ma: 3000,
            fault_current_ma: 500,
            permissions: SwapPermissions::default(),
            vconn_source: false,
            source_profiles: [PowerProfile::fixed(5000, 1500)].into_iter().collect(),
            sink_profiles: [PowerProfile::fixed(5000, 3000), PowerProfile::fixed(9000, 2000)]
                .into_iter()
                .collect(),
        }
    }
}

impl Config {
    /// Set the roles at attach.
    pub fn with_roles(mut self, power_role: PowerRole, data_role: DataRole) -> Self {
        self.power_role = power_role;
        self.data_role = data_role;
        self
    }

    /// Set voltage and current limits.
    pub fn with_limits(mut self, max_voltage_mv: u32, max_current_ma: u32) -> Self {
        self.max_voltage_mv = max_voltage_mv;
        self.max_current_ma = max_current_ma;
        self
    }

    /// Set the current that is requested while a fault is present.
    pub fn with_fault_current(mut self, fault_current_ma: u32) -> Self {
        self.fault_current_ma = fault_current_ma;
        self
    }

    /// Set the swap permissions.
    pub fn with_permissions(mut self, permissions: SwapPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set whether the port sources VCONN at attach.
    pub fn with_vconn_source(mut self, vconn_source: bool) -> Self {
        self.vconn_source = vconn_source;
        self
    }

    /// Set the profiles advertised as a source. Profiles beyond the seventh are dropped.
    pub fn with_source_profiles(mut self, profiles: &[PowerProfile]) -> Self {
        self.source_profiles = profiles.iter().copied().take(MAX_DATA_OBJECTS).collect();
        self
    }

    /// Set the profiles reported as a sink. Profiles beyond the seventh are dropped.
    pub fn with_sink_profiles(mut self, profiles: &[PowerProfile]) -> Self {
        self.sink_profiles = profiles.iter().copied().take(MAX_DATA_OBJECTS).collect();
        self
    }

    /// The limits for capability evaluation.
    pub fn limits(&self) -> Limits {
        Limits {
            max_voltage_mv: self.max_voltage_mv,
            max_current_ma: self.max_current_ma,
            fault_current_ma: self.fault_current_ma,
        }
    }
}
