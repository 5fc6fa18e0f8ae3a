//! Power data objects, as advertised in source and sink capabilities.
//!
//! See [6.4.1].
use heapless::Vec;
use proc_bitfield::bitfield;

use crate::protocol_layer::message::MAX_DATA_OBJECTS;

/// Kinds of power profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProfileKind {
    /// Fixed voltage supply.
    Fixed,
    /// Variable voltage supply.
    Variable,
    /// Battery supply.
    Battery,
    /// Programmable (augmented) supply.
    Programmable,
}

/// One advertised power profile, in plain units.
///
/// For variable and battery supplies, `voltage_mv` is the maximum voltage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowerProfile {
    /// The kind of supply.
    pub kind: ProfileKind,
    /// The (maximum) voltage in mV.
    pub voltage_mv: u32,
    /// The minimum voltage in mV. Equal to `voltage_mv` for fixed supplies.
    pub min_voltage_mv: u32,
    /// The maximum current in mA.
    pub max_current_ma: u32,
    /// The maximum power in mW.
    pub max_power_mw: u32,
}

impl PowerProfile {
    /// A fixed supply profile.
    pub const fn fixed(voltage_mv: u32, max_current_ma: u32) -> Self {
        Self {
            kind: ProfileKind::Fixed,
            voltage_mv,
            min_voltage_mv: voltage_mv,
            max_current_ma,
            max_power_mw: voltage_mv * max_current_ma / 1000,
        }
    }

    /// A variable supply profile.
    pub const fn variable(min_voltage_mv: u32, max_voltage_mv: u32, max_current_ma: u32) -> Self {
        Self {
            kind: ProfileKind::Variable,
            voltage_mv: max_voltage_mv,
            min_voltage_mv,
            max_current_ma,
            max_power_mw: max_voltage_mv * max_current_ma / 1000,
        }
    }

    /// A battery supply profile.
    pub const fn battery(min_voltage_mv: u32, max_voltage_mv: u32, max_power_mw: u32) -> Self {
        Self {
            kind: ProfileKind::Battery,
            voltage_mv: max_voltage_mv,
            min_voltage_mv,
            max_current_ma: if min_voltage_mv == 0 {
                0
            } else {
                max_power_mw * 1000 / min_voltage_mv
            },
            max_power_mw,
        }
    }
}

bitfield! {
    /// A raw power data object.
    ///
    /// Used as a fallback for encoding unknown source types.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The kind of power data object.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply
        pub kind: u8 @ 30..=31,
        /// Dual-role power
        pub dual_role_power: bool @ 29,
        /// USB suspend supported
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power
        pub unconstrained_power: bool @ 27,
        /// USB communications capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data
        pub dual_role_data: bool @ 25,
        /// Peak current
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl FixedSupply {
    /// The voltage in mV.
    pub fn voltage_mv(&self) -> u32 {
        u32::from(self.raw_voltage()) * 50
    }

    /// The maximum current in mA.
    pub fn max_current_ma(&self) -> u32 {
        u32::from(self.raw_max_current()) * 10
    }
}

bitfield! {
    /// A battery supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum Allowable Power in 250 mW units
        pub raw_max_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// The maximum voltage in mV.
    pub fn max_voltage_mv(&self) -> u32 {
        u32::from(self.raw_max_voltage()) * 50
    }

    /// The minimum voltage in mV.
    pub fn min_voltage_mv(&self) -> u32 {
        u32::from(self.raw_min_voltage()) * 50
    }

    /// The maximum power in mW.
    pub fn max_power_mw(&self) -> u32 {
        u32::from(self.raw_max_power()) * 250
    }
}

bitfield! {
    /// A variable supply (non-battery) PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply (non-battery)
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl VariableSupply {
    /// The maximum voltage in mV.
    pub fn max_voltage_mv(&self) -> u32 {
        u32::from(self.raw_max_voltage()) * 50
    }

    /// The minimum voltage in mV.
    pub fn min_voltage_mv(&self) -> u32 {
        u32::from(self.raw_min_voltage()) * 50
    }

    /// The maximum current in mA.
    pub fn max_current_ma(&self) -> u32 {
        u32::from(self.raw_max_current()) * 10
    }
}

bitfield! {
    /// An SPR programmable power supply APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ProgrammableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented power data object
        pub kind: u8 @ 30..=31,
        /// SPR programmable power supply
        pub supply: u8 @ 28..=29,
        /// PPS power limited
        pub pps_power_limited: bool @ 27,
        /// Maximum voltage in 100mV increments
        pub raw_max_voltage: u8 @ 17..=24,
        /// Minimum Voltage in 100mV increments
        pub raw_min_voltage: u8 @ 8..=15,
        /// Maximum Current in 50mA increments
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl ProgrammableSupply {
    /// The maximum voltage in mV.
    pub fn max_voltage_mv(&self) -> u32 {
        u32::from(self.raw_max_voltage()) * 100
    }

    /// The minimum voltage in mV.
    pub fn min_voltage_mv(&self) -> u32 {
        u32::from(self.raw_min_voltage()) * 100
    }

    /// The maximum current in mA.
    pub fn max_current_ma(&self) -> u32 {
        u32::from(self.raw_max_current()) * 50
    }
}

/// A power data object holds information about one power profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDataObject {
    /// Fixed voltage supply.
    FixedSupply(FixedSupply),
    /// Battery supply.
    Battery(Battery),
    /// Variable voltage supply.
    VariableSupply(VariableSupply),
    /// Programmable supply.
    Programmable(ProgrammableSupply),
    /// Unknown kind of power data object.
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// Parse a raw PDO into a typed power data object.
    pub fn from_raw(raw: u32) -> Self {
        let pdo = RawPowerDataObject(raw);
        match pdo.kind() {
            0b00 => Self::FixedSupply(FixedSupply(raw)),
            0b01 => Self::Battery(Battery(raw)),
            0b10 => Self::VariableSupply(VariableSupply(raw)),
            _ => match ProgrammableSupply(raw).supply() {
                0b00 => Self::Programmable(ProgrammableSupply(raw)),
                x => {
                    warn!("Unknown augmented power data object supply {}", x);
                    Self::Unknown(pdo)
                }
            },
        }
    }

    /// Encode a power profile as a power data object.
    pub fn from_profile(profile: &PowerProfile) -> Self {
        match profile.kind {
            ProfileKind::Fixed => Self::FixedSupply(
                FixedSupply(0)
                    .with_raw_voltage((profile.voltage_mv / 50) as u16)
                    .with_raw_max_current((profile.max_current_ma / 10) as u16),
            ),
            ProfileKind::Variable => Self::VariableSupply(
                VariableSupply(0)
                    .with_kind(0b10)
                    .with_raw_max_voltage((profile.voltage_mv / 50) as u16)
                    .with_raw_min_voltage((profile.min_voltage_mv / 50) as u16)
                    .with_raw_max_current((profile.max_current_ma / 10) as u16),
            ),
            ProfileKind::Battery => Self::Battery(
                Battery(0)
                    .with_kind(0b01)
                    .with_raw_max_voltage((profile.voltage_mv / 50) as u16)
                    .with_raw_min_voltage((profile.min_voltage_mv / 50) as u16)
                    .with_raw_max_power((profile.max_power_mw / 250) as u16),
            ),
            ProfileKind::Programmable => Self::Programmable(
                ProgrammableSupply(0)
                    .with_kind(0b11)
                    .with_raw_max_voltage((profile.voltage_mv / 100) as u8)
                    .with_raw_min_voltage((profile.min_voltage_mv / 100) as u8)
                    .with_raw_max_current((profile.max_current_ma / 50) as u8),
            ),
        }
    }

    /// The raw representation of this object.
    pub fn raw(&self) -> u32 {
        match self {
            Self::FixedSupply(pdo) => pdo.0,
            Self::Battery(pdo) => pdo.0,
            Self::VariableSupply(pdo) => pdo.0,
            Self::Programmable(pdo) => pdo.0,
            Self::Unknown(pdo) => pdo.0,
        }
    }

    /// Convert the object to a power profile in plain units.
    ///
    /// Unknown objects have no profile.
    pub fn profile(&self) -> Option<PowerProfile> {
        match self {
            Self::FixedSupply(pdo) => Some(PowerProfile::fixed(pdo.voltage_mv(), pdo.max_current_ma())),
            Self::VariableSupply(pdo) => Some(PowerProfile::variable(
                pdo.min_voltage_mv(),
                pdo.max_voltage_mv(),
                pdo.max_current_ma(),
            )),
            Self::Battery(pdo) => Some(PowerProfile::battery(
                pdo.min_voltage_mv(),
                pdo.max_voltage_mv(),
                pdo.max_power_mw(),
            )),
            Self::Programmable(pdo) => Some(PowerProfile {
                kind: ProfileKind::Programmable,
                voltage_mv: pdo.max_voltage_mv(),
                min_voltage_mv: pdo.min_voltage_mv(),
                max_current_ma: pdo.max_current_ma(),
                max_power_mw: pdo.max_voltage_mv() * pdo.max_current_ma() / 1000,
            }),
            Self::Unknown(_) => None,
        }
    }
}

/// An ordered list of power data objects, as carried by a capabilities message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerDataObjects(Vec<PowerDataObject, MAX_DATA_OBJECTS>);

impl PowerDataObjects {
    /// Parse raw objects.
    pub fn from_raw(raw: &[u32]) -> Self {
        Self(raw.iter().copied().map(PowerDataObject::from_raw).collect())
    }

    /// Encode power profiles. Profiles beyond the seventh are dropped.
    pub fn from_profiles(profiles: &[PowerProfile]) -> Self {
        Self(profiles.iter().map(PowerDataObject::from_profile).take(MAX_DATA_OBJECTS).collect())
    }

    /// The power data objects.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// The number of objects.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no objects.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw representations of all objects.
    pub fn raw(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().map(PowerDataObject::raw)
    }

    /// Power profiles for all objects, keeping positions.
    ///
    /// Unknown objects are reported as zero-volt programmable profiles, which are never eligible.
    pub fn profiles(&self) -> Vec<PowerProfile, MAX_DATA_OBJECTS> {
        self.0
            .iter()
            .map(|pdo| {
                pdo.profile().unwrap_or(PowerProfile {
                    kind: ProfileKind::Programmable,
                    voltage_mv: 0,
                    min_voltage_mv: 0,
                    max_current_ma: 0,
                    max_power_mw: 0,
                })
            })
            .collect()
    }

    /// The dual-role power flag of the vSafe5V object.
    pub fn dual_role_power(&self) -> bool {
        match self.0.first() {
            Some(PowerDataObject::FixedSupply(supply)) => supply.dual_role_power(),
            _ => false,
        }
    }
}
