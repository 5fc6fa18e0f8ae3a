//! DisplayPort alternate mode: pin assignment choice.
use crate::protocol_layer::message::data::vendor_defined::{DisplayPortCapabilities, DisplayPortStatus};

#[allow(missing_docs)]
pub mod pin_assignment {
    pub const A: u8 = 0x01;
    pub const B: u8 = 0x02;
    pub const C: u8 = 0x04;
    pub const D: u8 = 0x08;
    pub const E: u8 = 0x10;
    pub const F: u8 = 0x20;
}

/// The number of DisplayPort lanes of a pin assignment.
pub fn lanes(pin_assignment: u8) -> u8 {
    match pin_assignment {
        pin_assignment::C | pin_assignment::E => 4,
        _ => 2,
    }
}

/// Choose a pin assignment from the partner's capabilities and status.
///
/// D is preferred when the partner wants to keep USB alive, otherwise C, E, D in that order.
pub fn select_pin_assignment(capabilities: DisplayPortCapabilities, status: DisplayPortStatus) -> Option<u8> {
    let supported = if capabilities.receptacle_indication() {
        capabilities.ufp_d_pin_assignments()
    } else {
        capabilities.dfp_d_pin_assignments()
    };

    if status.multi_function_preferred() && supported & pin_assignment::D != 0 {
        return Some(pin_assignment::D);
    }

    [pin_assignment::C, pin_assignment::E, pin_assignment::D]
        .into_iter()
        .find(|pin| supported & pin != 0)
}

#[cfg(test)]
mod tests {
    use super::{lanes, pin_assignment, select_pin_assignment};
    use crate::protocol_layer::message::data::vendor_defined::{DisplayPortCapabilities, DisplayPortStatus};

    fn receptacle(pins: u8) -> DisplayPortCapabilities {
        DisplayPortCapabilities(0)
            .with_receptacle_indication(true)
            .with_ufp_d_pin_assignments(pins)
    }

    #[test]
    fn test_prefers_four_lanes() {
        let pin = select_pin_assignment(
            receptacle(pin_assignment::C | pin_assignment::D | pin_assignment::E),
            DisplayPortStatus(0),
        );
        assert_eq!(pin, Some(pin_assignment::C));
        assert_eq!(lanes(pin_assignment::C), 4);
    }

    #[test]
    fn test_multi_function_prefers_d() {
        let pin = select_pin_assignment(
            receptacle(pin_assignment::C | pin_assignment::D),
            DisplayPortStatus(0).with_multi_function_preferred(true),
        );
        assert_eq!(pin, Some(pin_assignment::D));
        assert_eq!(lanes(pin_assignment::D), 2);
    }

    #[test]
    fn test_plug_uses_dfp_d_field() {
        let capabilities = DisplayPortCapabilities(0)
            .with_ufp_d_pin_assignments(pin_assignment::C)
            .with_dfp_d_pin_assignments(pin_assignment::E);
        assert_eq!(
            select_pin_assignment(capabilities, DisplayPortStatus(0)),
            Some(pin_assignment::E)
        );
        assert_eq!(select_pin_assignment(receptacle(pin_assignment::A), DisplayPortStatus(0)), None);
    }
}
