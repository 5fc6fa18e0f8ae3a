//! The protocol layer is controlled by the policy engine, and commands the PHY layer.
//!
//! Handles
//! - construction of messages and message IDs,
//! - transmission retries,
//! - duplicate suppression,
//! - soft and hard reset of the message counters,
//! - the single outstanding reply token.
//!
//! GoodCRC handling is left to the PHY. Extended messages are not supported.
pub mod message;

use message::data::Data;
use message::data::vendor_defined::VdmCommand;
use message::header::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
use message::{MAX_MESSAGE_SIZE, Message};
use usbpd_uvdm_traits::{Driver, DriverRxError, DriverTxError, StatusFlag};

use crate::counters::{Counter, CounterType};
use crate::timers::TimerType;
use crate::{DataRole, PowerRole};

/// Errors that can occur in the protocol layer.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Driver reported a hard reset.
    #[error("hard reset")]
    HardReset,
    /// Transmission failed after the maximum number of allowed retries.
    #[error("transmit retries exceeded")]
    TransmitRetriesExceeded,
    /// A frame was offered while a reply to the previous one is outstanding.
    #[error("reply pending")]
    ReplyPending,
    /// Too many consecutive failed or malformed receptions.
    #[error("reset required")]
    ResetRequired,
}

/// The reply that a transmitted message waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Expectation {
    /// Any control message, e.g. Accept, Reject or Wait.
    Control,
    /// A data message of the given type.
    Data(DataMessageType),
    /// A structured VDM response to the given command.
    Vdm(VdmCommand),
    /// An unstructured VDM of the given vendor.
    Unstructured(u16),
}

impl Expectation {
    /// Whether a received message releases the reply token.
    ///
    /// `Not_Supported` answers any request.
    pub fn is_satisfied_by(&self, message: &Message) -> bool {
        match (self, message.message_type()) {
            (_, MessageType::Control(ControlMessageType::NotSupported)) => true,
            (Expectation::Control, MessageType::Control(_)) => true,
            (Expectation::Data(expected), MessageType::Data(message_type)) => *expected == message_type,
            (Expectation::Vdm(command), MessageType::Data(DataMessageType::VendorDefined)) => {
                matches!(
                    &message.payload,
                    Some(Data::VendorDefined(vdm)) if vdm.structured().is_some_and(|header| header.command() == *command)
                )
            }
            (Expectation::Unstructured(vid), MessageType::Data(DataMessageType::VendorDefined)) => {
                matches!(
                    &message.payload,
                    Some(Data::VendorDefined(vdm)) if vdm.structured().is_none() && vdm.header.svid() == *vid
                )
            }
            _ => false,
        }
    }

    /// The timer that bounds the wait for the reply.
    pub fn timer(&self) -> TimerType {
        match self {
            Expectation::Control | Expectation::Data(_) => TimerType::SenderResponse,
            Expectation::Vdm(VdmCommand::EnterMode) | Expectation::Vdm(VdmCommand::ExitMode) => TimerType::VDMModeEntry,
            Expectation::Vdm(_) => TimerType::VDMResponse,
            Expectation::Unstructured(_) => TimerType::UvdmResponse,
        }
    }
}

/// Content of an outgoing message, framed by the protocol layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Content {
    /// A control message.
    Control(ControlMessageType),
    /// A data message.
    Data(Data),
}

#[derive(Debug)]
struct Counters {
    rx_message: Option<u8>,
    tx_message: Counter,
    retry: Counter,
    rx_failure: Counter,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            rx_message: None,
            tx_message: Counter::new(CounterType::MessageId),
            retry: Counter::new(CounterType::Retry),
            rx_failure: Counter::new(CounterType::RxFailure),
        }
    }
}

/// The USB PD protocol layer.
#[derive(Debug)]
pub struct ProtocolLayer<DRIVER: Driver> {
    driver: DRIVER,
    counters: Counters,
    header_template: Header,
    last_sent: Option<(Message, Option<Expectation>)>,
    reply: Option<Expectation>,
}

impl<DRIVER: Driver> ProtocolLayer<DRIVER> {
    /// Create a new protocol layer from a driver and the initial port roles.
    pub fn new(driver: DRIVER, power_role: PowerRole, data_role: DataRole) -> Self {
        Self {
            driver,
            counters: Default::default(),
            header_template: Header::new_template(data_role, power_role, SpecificationRevision::R2_0),
            last_sent: None,
            reply: None,
        }
    }

    /// Update the roles that outgoing headers carry.
    pub fn set_roles(&mut self, power_role: PowerRole, data_role: DataRole) {
        self.header_template = self
            .header_template
            .with_port_power_role(power_role)
            .with_port_data_role(data_role);
    }

    /// Reset counters, the retransmission buffer and the reply token.
    pub fn reset(&mut self) {
        self.counters = Default::default();
        self.last_sent = None;
        self.reply = None;
    }

    /// Handle a soft reset, sent or received.
    ///
    /// Both message ID trackers restart and the retransmission buffer is cleared.
    pub fn on_soft_reset(&mut self) {
        trace!("Protocol layer soft reset");
        self.reset();
    }

    /// Borrow the driver.
    pub fn driver(&mut self) -> &mut DRIVER {
        &mut self.driver
    }

    /// The reply that is currently awaited, if any.
    pub fn pending_reply(&self) -> Option<Expectation> {
        self.reply
    }

    /// Release the reply token after the reply timer expired.
    ///
    /// Returns the expectation that timed out.
    pub fn expire_reply(&mut self) -> Option<Expectation> {
        self.reply.take()
    }

    /// Query the line status from the driver.
    pub fn line_status(&self, flag: StatusFlag) -> bool {
        self.driver.line_status(flag)
    }

    /// Wait for VBus to be available.
    pub async fn wait_for_vbus(&mut self) {
        self.driver.wait_for_vbus().await
    }

    fn frame(&self, content: Content) -> Message {
        match content {
            Content::Control(message_type) => {
                Message::new(Header::new_control(self.header_template, self.counters.tx_message, message_type))
            }
            Content::Data(data) => Message::new_with_data(
                Header::new_data(
                    self.header_template,
                    self.counters.tx_message,
                    data.message_type(),
                    data.num_objects(),
                ),
                data,
            ),
        }
    }

    async fn transmit_inner(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);
        self.counters.retry.reset();

        loop {
            match self.driver.transmit(&buffer[..size]).await {
                Ok(()) => return Ok(()),
                Err(DriverTxError::HardReset) => {
                    self.reset();
                    return Err(ProtocolError::HardReset);
                }
                Err(DriverTxError::Discarded) => {
                    trace!("Transmission discarded, retry {}", self.counters.retry.value());
                    if self.counters.retry.increment().is_err() {
                        error!("Transmit retries exceeded");
                        return Err(ProtocolError::TransmitRetriesExceeded);
                    }
                }
            }
        }
    }

    /// Frame and transmit a message.
    ///
    /// If a reply is expected, the reply token is taken until the reply arrives or
    /// [`Self::expire_reply`] is called. A soft reset is always sent, and resets the counters first.
    pub async fn transmit(&mut self, content: Content, expectation: Option<Expectation>) -> Result<(), ProtocolError> {
        if matches!(content, Content::Control(ControlMessageType::SoftReset)) {
            self.on_soft_reset();
        } else if let Some(pending) = self.reply {
            warn!("Refusing to transmit while waiting for {:?}", pending);
            return Err(ProtocolError::ReplyPending);
        }

        let message = self.frame(content);
        trace!("Transmit message: {:?}", message);
        self.transmit_inner(&message).await?;

        self.last_sent = Some((message, expectation));
        self.reply = expectation;
        // Message IDs roll over.
        _ = self.counters.tx_message.increment();

        Ok(())
    }

    /// Transmit the last sent message again, with its original message ID.
    pub async fn retransmit(&mut self) -> Result<(), ProtocolError> {
        let Some((message, expectation)) = self.last_sent.clone() else {
            warn!("Nothing to retransmit");
            return Ok(());
        };

        trace!("Retransmit message: {:?}", message);
        self.transmit_inner(&message).await?;
        self.reply = expectation;

        Ok(())
    }

    /// Transmit hard reset signaling, after resetting all counters.
    pub async fn hard_reset(&mut self) -> Result<(), ProtocolError> {
        self.reset();

        match self.driver.transmit_hard_reset().await {
            Ok(()) | Err(DriverTxError::HardReset) => Ok(()),
            Err(DriverTxError::Discarded) => Err(ProtocolError::TransmitRetriesExceeded),
        }
    }

    fn rx_failure(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.counters.rx_failure.increment() {
            Ok(()) => Ok(None),
            Err(_) => {
                error!("Too many failed receptions");
                Err(ProtocolError::ResetRequired)
            }
        }
    }

    /// Receive the next message.
    ///
    /// Yields `Ok(None)` for frames that must not reach the policy engine: the empty sentinel,
    /// discarded or malformed frames, GoodCRC and duplicates.
    pub async fn receive_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        let length = match self.driver.receive(&mut buffer).await {
            Ok(length) => length.min(MAX_MESSAGE_SIZE),
            Err(DriverRxError::Discarded) => return self.rx_failure(),
            Err(DriverRxError::HardReset) => {
                self.reset();
                return Err(ProtocolError::HardReset);
            }
        };

        if length >= 2 && buffer[0] == 0 && buffer[1] == 0 {
            return Ok(None);
        }

        let message = match Message::from_bytes(&buffer[..length]) {
            Ok(message) => message,
            Err(error) => {
                warn!("Dropping malformed message: {:?}", error);
                return self.rx_failure();
            }
        };
        self.counters.rx_failure.reset();

        match message.message_type() {
            MessageType::Control(ControlMessageType::GoodCRC) => return Ok(None),
            MessageType::Control(ControlMessageType::SoftReset) => self.on_soft_reset(),
            _ => {
                if self.counters.rx_message == Some(message.header.message_id()) {
                    trace!("Dropping duplicate message ID {}", message.header.message_id());
                    return Ok(None);
                }
            }
        }
        self.counters.rx_message = Some(message.header.message_id());

        if self.reply.is_some_and(|expectation| expectation.is_satisfied_by(&message)) {
            self.reply = None;
        }

        trace!("Received message: {:?}", message);
        Ok(Some(message))
    }
}
