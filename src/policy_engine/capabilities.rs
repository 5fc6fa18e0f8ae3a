//! Evaluation of advertised capabilities, and matching of received requests.
use crate::config::Limits;
use crate::protocol_layer::message::data::pdo::{PowerProfile, ProfileKind};
use crate::protocol_layer::message::data::request::Request;

/// A chosen power profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Selection {
    /// 1-based position in the advertised list.
    pub position: u8,
    /// Voltage in mV.
    pub voltage_mv: u32,
    /// Current in mA.
    pub current_ma: u32,
    /// Power in mW.
    pub power_mw: u32,
}

impl Selection {
    fn new(position: usize, profile: &PowerProfile, current_ma: u32) -> Self {
        Self {
            position: position as u8,
            voltage_mv: profile.voltage_mv,
            current_ma,
            power_mw: profile.voltage_mv * current_ma / 1000,
        }
    }
}

fn is_eligible(profile: &PowerProfile, limits: &Limits) -> bool {
    matches!(
        profile.kind,
        ProfileKind::Fixed | ProfileKind::Variable | ProfileKind::Battery
    ) && profile.voltage_mv <= limits.max_voltage_mv
}

/// Pick the profile to request from a source.
///
/// The last eligible profile wins. While a fault is present, the first (vSafe5V) profile is taken
/// regardless of the limits, and the current is limited to the fault current.
pub fn evaluate_capabilities(profiles: &[PowerProfile], limits: &Limits, fault: bool) -> Option<Selection> {
    if fault {
        let profile = profiles.first()?;
        let current_ma = profile
            .max_current_ma
            .min(limits.max_current_ma)
            .min(limits.fault_current_ma);
        return Some(Selection::new(1, profile, current_ma));
    }

    profiles
        .iter()
        .enumerate()
        .filter(|(_, profile)| is_eligible(profile, limits))
        .last()
        .map(|(index, profile)| Selection::new(index + 1, profile, profile.max_current_ma.min(limits.max_current_ma)))
}

/// The outcome of matching a request against the advertised profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestMatch {
    /// The request can be served.
    Ok(Selection),
    /// The request is out of range.
    Invalid,
}

/// Check a received request against the profiles that were advertised.
pub fn match_request(profiles: &[PowerProfile], request: &Request) -> RequestMatch {
    let position = usize::from(request.object_position());
    let Some(profile) = position.checked_sub(1).and_then(|index| profiles.get(index)) else {
        return RequestMatch::Invalid;
    };

    match profile.kind {
        ProfileKind::Fixed | ProfileKind::Variable if request.operating_current_ma() <= profile.max_current_ma => {
            RequestMatch::Ok(Selection::new(position, profile, request.operating_current_ma()))
        }
        ProfileKind::Battery if request.operating_power_mw() <= profile.max_power_mw => {
            let current_ma = match profile.voltage_mv {
                0 => 0,
                voltage_mv => request.operating_power_mw() * 1000 / voltage_mv,
            };
            RequestMatch::Ok(Selection {
                power_mw: request.operating_power_mw(),
                ..Selection::new(position, profile, current_ma)
            })
        }
        _ => RequestMatch::Invalid,
    }
}
