//! The device policy manager (DPM) is informed about status changes of the port.
//!
//! Commands travel the other way, as events on the [`crate::uvdm::Link`].
use core::future::Future;

use crate::bridge::Notification;

/// Trait for the device policy manager.
pub trait DevicePolicyManager {
    /// Handle a status change, e.g. a new contract or an attached accessory.
    ///
    /// Defaults to doing nothing.
    fn notify(&mut self, _notification: Notification) -> impl Future<Output = ()> {
        async {}
    }
}
