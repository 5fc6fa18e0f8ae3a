//! Transceiver traits for the USB PD port controller.
//!
//! A transceiver moves single raw PD messages (a 16 bit header and up to seven data objects)
//! over the CC line and reports the line state. Everything above that lives in `usbpd-uvdm`.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
use core::future::Future;

/// Receive Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverRxError {
    /// Received message discarded, e.g. due to CRC errors or a bus failure.
    Discarded,

    /// Hard Reset received before or during reception.
    HardReset,
}

/// Transmit Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverTxError {
    /// Concurrent receive in progress, excessive noise on the line or a bus failure.
    Discarded,

    /// Hard Reset received before or during transmission.
    HardReset,
}

/// Line conditions that the transceiver can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusFlag {
    /// VBUS is present on the connector.
    VbusPresent,
    /// A short circuit (or CC/SBU to VBUS short) was detected.
    ShortCircuit,
}

/// Driver trait, through which the protocol layer talks to the PHY.
pub trait Driver {
    /// Wait for availability of VBus voltage.
    fn wait_for_vbus(&mut self) -> impl Future<Output = ()>;

    /// Receive a packet.
    fn receive(&mut self, buffer: &mut [u8]) -> impl Future<Output = Result<usize, DriverRxError>>;

    /// Transmit a packet.
    fn transmit(&mut self, data: &[u8]) -> impl Future<Output = Result<(), DriverTxError>>;

    /// Transmit a hard reset signal.
    fn transmit_hard_reset(&mut self) -> impl Future<Output = Result<(), DriverTxError>>;

    /// Query a line status flag.
    ///
    /// Defaults to a healthy line with VBUS present.
    fn line_status(&self, flag: StatusFlag) -> bool {
        matches!(flag, StatusFlag::VbusPresent)
    }
}
