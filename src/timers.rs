//! Timers that are used by the protocol layer, the policy engine and the UVDM transport.
use core::future::Future;

/// The timer trait to implement by the user application.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;
}

/// Types of timers that are used for timeouts.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    PSSourceOffSpr,
    PSTransitionSpr,
    SenderResponse,
    SinkWaitCap,
    VDMModeEntry,
    VDMResponse,
    /// Round trip of one UVDM chunk.
    UvdmResponse,
}

impl TimerType {
    /// The timer duration in milliseconds.
    pub const fn millis(self) -> u64 {
        match self {
            TimerType::PSSourceOffSpr => 835,
            TimerType::PSTransitionSpr => 500,
            TimerType::SenderResponse => 30,
            TimerType::SinkWaitCap => 465,
            TimerType::VDMModeEntry => 45,
            TimerType::VDMResponse => 27,
            TimerType::UvdmResponse => 5000,
        }
    }

    /// Create a new timer for a given type.
    ///
    /// Times out after a duration that is given by the USB PD specification, or by the UVDM round trip bound.
    pub fn get_timer<TIMER: Timer>(timer_type: TimerType) -> impl Future<Output = ()> {
        TIMER::after_millis(timer_type.millis())
    }
}
