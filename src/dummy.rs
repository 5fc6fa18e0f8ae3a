//! Implements dummy drivers, timers and a device policy manager for testing.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embassy_futures::yield_now;
use usbpd_uvdm_traits::{Driver, DriverRxError, DriverTxError, StatusFlag};

use crate::bridge::Notification;
use crate::counters::{Counter, CounterType};
use crate::device_policy_manager::DevicePolicyManager;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::vendor_defined::VendorDefined;
use crate::protocol_layer::message::header::{ControlMessageType, Header, SpecificationRevision};
use crate::protocol_layer::message::{MAX_MESSAGE_SIZE, Message};
use crate::timers::{Timer, TimerType};
use crate::uvdm::Direction;
use crate::uvdm::chunk::{self, Chunk, Objects, OutgoingChunk, Response, Segmenter};
use crate::{DataRole, PowerRole};

/// A dummy timer that never expires.
pub struct DummyTimer {}

impl Timer for DummyTimer {
    async fn after_millis(_milliseconds: u64) {
        core::future::pending().await
    }
}

/// Yields until a [`DummyUvdmTimer`] expires.
pub const UVDM_TIMEOUT_YIELDS: usize = 64;

/// A dummy timer that expires UVDM round trips after a few yields, and never expires shorter timers.
pub struct DummyUvdmTimer {}

impl Timer for DummyUvdmTimer {
    async fn after_millis(milliseconds: u64) {
        if milliseconds < TimerType::UvdmResponse.millis() {
            core::future::pending::<()>().await;
        }
        for _ in 0..UVDM_TIMEOUT_YIELDS {
            yield_now().await;
        }
    }
}

fn partner_template() -> Header {
    Header::new_template(DataRole::Dfp, PowerRole::Source, SpecificationRevision::R3_X)
}

/// Serialize a control message from the partner.
pub fn control_frame(message_type: ControlMessageType, message_id: u8) -> Vec<u8> {
    let header = Header::new_control(
        partner_template(),
        Counter::new_from_value(CounterType::MessageId, message_id),
        message_type,
    );

    let mut buffer = [0u8; MAX_MESSAGE_SIZE];
    let len = Message::new(header).to_bytes(&mut buffer);
    buffer[..len].to_vec()
}

/// Serialize a data message from the partner.
pub fn data_frame(data: Data, message_id: u8) -> Vec<u8> {
    let header = Header::new_data(
        partner_template(),
        Counter::new_from_value(CounterType::MessageId, message_id),
        data.message_type(),
        data.num_objects(),
    );

    let mut buffer = [0u8; MAX_MESSAGE_SIZE];
    let len = Message::new_with_data(header, data).to_bytes(&mut buffer);
    buffer[..len].to_vec()
}

#[derive(Debug, Default)]
struct Wire {
    received: VecDeque<Vec<u8>>,
    transmitted: Vec<Vec<u8>>,
    discard: usize,
    short_circuit: bool,
    no_vbus: bool,
}

/// A dummy driver for testing.
///
/// Clones share the same wire, so that a test can inject and inspect frames while a port owns the driver.
#[derive(Debug, Clone, Default)]
pub struct DummyDriver {
    wire: Rc<RefCell<Wire>>,
}

impl DummyDriver {
    /// Create a new dummy driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a received frame that can be retrieved later.
    pub fn inject_received_data(&self, data: &[u8]) {
        self.wire.borrow_mut().received.push_back(data.to_vec());
    }

    /// All frames that were transmitted successfully.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.wire.borrow().transmitted.clone()
    }

    /// Discard the next `count` transmissions.
    pub fn discard_transmissions(&self, count: usize) {
        self.wire.borrow_mut().discard = count;
    }

    /// Remove or apply VBUS.
    pub fn set_vbus(&self, present: bool) {
        self.wire.borrow_mut().no_vbus = !present;
    }

    /// Report a short circuit on the line.
    pub fn set_short_circuit(&self, short_circuit: bool) {
        self.wire.borrow_mut().short_circuit = short_circuit;
    }
}

impl Driver for DummyDriver {
    async fn wait_for_vbus(&mut self) {
        while self.wire.borrow().no_vbus {
            yield_now().await;
        }
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, DriverRxError> {
        loop {
            let frame = self.wire.borrow_mut().received.pop_front();
            if let Some(frame) = frame {
                let len = frame.len().min(buffer.len());
                buffer[..len].copy_from_slice(&frame[..len]);
                return Ok(len);
            }
            yield_now().await;
        }
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<(), DriverTxError> {
        let mut wire = self.wire.borrow_mut();
        if wire.discard > 0 {
            wire.discard -= 1;
            return Err(DriverTxError::Discarded);
        }

        wire.transmitted.push(data.to_vec());
        Ok(())
    }

    async fn transmit_hard_reset(&mut self) -> Result<(), DriverTxError> {
        Ok(())
    }

    fn line_status(&self, flag: StatusFlag) -> bool {
        match flag {
            StatusFlag::VbusPresent => !self.wire.borrow().no_vbus,
            StatusFlag::ShortCircuit => self.wire.borrow().short_circuit,
        }
    }
}

/// A dummy device policy manager that records notifications.
#[derive(Debug, Clone, Default)]
pub struct DummyDevicePolicyManager {
    notifications: Rc<RefCell<Vec<Notification>>>,
}

impl DummyDevicePolicyManager {
    /// All notifications so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }
}

impl DevicePolicyManager for DummyDevicePolicyManager {
    async fn notify(&mut self, notification: Notification) {
        self.notifications.borrow_mut().push(notification);
    }
}

#[derive(Debug, Default)]
struct Accessory {
    message_id: u8,
    received: Vec<u8>,
    expected: usize,
    complete: Vec<u8>,
    replay: Vec<OutgoingChunk>,
    nak_at: Option<u8>,
    busy: bool,
    flip_bit_in: Option<u8>,
    silent: bool,
    silent_from: Option<u8>,
}

/// A simulated accessory on top of [`DummyDriver`].
///
/// Payloads that are sent to the accessory are reassembled, and replayed when the host asks to receive.
#[derive(Debug, Clone, Default)]
pub struct DummyAccessory {
    driver: DummyDriver,
    accessory: Rc<RefCell<Accessory>>,
}

impl DummyAccessory {
    /// Create a new accessory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last payload that was sent to the accessory.
    pub fn received(&self) -> Vec<u8> {
        self.accessory.borrow().received.clone()
    }

    /// Answer the chunk with sequence number `sequence` with NAK.
    pub fn nak_at(&self, sequence: u8) {
        self.accessory.borrow_mut().nak_at = Some(sequence);
    }

    /// Answer every chunk with BUSY.
    pub fn set_busy(&self, busy: bool) {
        self.accessory.borrow_mut().busy = busy;
    }

    /// Corrupt the replayed chunk with sequence number `sequence`.
    pub fn flip_bit_in(&self, sequence: u8) {
        self.accessory.borrow_mut().flip_bit_in = Some(sequence);
    }

    /// Never answer.
    pub fn set_silent(&self, silent: bool) {
        self.accessory.borrow_mut().silent = silent;
    }

    /// Stop answering at the chunk with sequence number `sequence`.
    pub fn silent_from(&self, sequence: u8) {
        self.accessory.borrow_mut().silent_from = Some(sequence);
    }

    /// Payloads are replayed from the last complete transfer, so that a receive is not affected
    /// by a concurrent send.
    fn replayed(&self) -> Vec<u8> {
        self.accessory.borrow().complete.clone()
    }

    fn reply(&self, objects: &[u32]) {
        let Some(vdm) = VendorDefined::from_objects(objects) else {
            return;
        };

        let message_id = {
            let mut accessory = self.accessory.borrow_mut();
            let message_id = accessory.message_id;
            accessory.message_id = (message_id + 1) % 8;
            message_id
        };
        self.driver
            .inject_received_data(&data_frame(Data::VendorDefined(vdm), message_id));
    }

    fn replay(&self, index: usize) {
        let objects = {
            let accessory = self.accessory.borrow();
            let Some(chunk) = accessory.replay.get(index) else {
                return;
            };
            let mut objects: Objects = chunk.objects.clone();
            if accessory.flip_bit_in == Some(chunk.sequence) {
                objects[3] ^= 1 << 4;
            }
            objects
        };
        self.reply(&objects);
    }

    fn on_uvdm(&self, objects: &[u32]) {
        if self.accessory.borrow().silent {
            return;
        }

        match chunk::parse(objects) {
            Ok(Chunk::Short {
                direction: Direction::Out,
                data,
            }) => {
                {
                    let mut accessory = self.accessory.borrow_mut();
                    accessory.received = data.into_iter().collect();
                    accessory.complete = accessory.received.clone();
                }
                self.reply(&chunk::response_frame(Direction::Out, 1, Response::Ack));
            }
            Ok(Chunk::Short {
                direction: Direction::In,
                ..
            }) => {
                let payload = self.replayed();
                if payload.len() <= 1 {
                    self.reply(&chunk::short_frame(Direction::In, payload.first().copied()));
                } else {
                    let chunks: Vec<OutgoingChunk> = Segmenter::new(Direction::In, &payload).unwrap().collect();
                    self.accessory.borrow_mut().replay = chunks;
                    self.replay(0);
                }
            }
            Ok(Chunk::Long(incoming)) => {
                let sequence = incoming.header.sequence();
                if self.accessory.borrow().silent_from.is_some_and(|silent| sequence >= silent) {
                    return;
                }

                let response = {
                    let mut accessory = self.accessory.borrow_mut();
                    if accessory.busy {
                        Response::Busy
                    } else if accessory.nak_at == Some(sequence) || incoming.verify().is_err() {
                        Response::Nak
                    } else {
                        if let Some(header) = incoming.transfer_header() {
                            accessory.received.clear();
                            accessory.expected = usize::from(header.total_size());
                        }
                        accessory.received.extend(incoming.data());
                        if accessory.received.len() >= accessory.expected {
                            accessory.complete = accessory.received.clone();
                        }
                        Response::Ack
                    }
                };
                self.reply(&chunk::response_frame(Direction::Out, sequence, response));
            }
            Ok(Chunk::Response {
                direction: Direction::In,
                sequence,
                response: Response::Ack,
            }) => self.replay(usize::from(sequence)),
            _ => (),
        }
    }
}

impl Driver for DummyAccessory {
    async fn wait_for_vbus(&mut self) {
        self.driver.wait_for_vbus().await
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, DriverRxError> {
        self.driver.receive(buffer).await
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<(), DriverTxError> {
        self.driver.transmit(data).await?;

        if let Ok(Message {
            payload: Some(Data::VendorDefined(vdm)),
            ..
        }) = Message::from_bytes(data)
        {
            self.on_uvdm(&vdm.to_objects());
        }
        Ok(())
    }

    async fn transmit_hard_reset(&mut self) -> Result<(), DriverTxError> {
        Ok(())
    }
}
