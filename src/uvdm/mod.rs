//! The UVDM transport moves arbitrarily large vendor payloads over unstructured VDMs.
//!
//! Payloads of at most one byte travel in a single short frame. Longer payloads are split into
//! checksummed chunks (see [`chunk`]), each of which is answered by the partner with ACK, NAK or
//! BUSY before the next one is sent.
//!
//! The blocking entry points [`Link::uvdm_send`] and [`Link::uvdm_receive`] run in application
//! tasks. They hand frames to the port through the [`Link`] event channel, and wait for the
//! partner's answer on a per-direction signal that the port completes.
pub mod chunk;

use core::cell::Cell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::bridge::Event;
use crate::timers::{Timer, TimerType};
use chunk::{Chunk, MAX_PAYLOAD_SIZE, Objects, Progress, Reassembler, Response, Segmenter};

/// Depth of the event queue between the application and the port.
pub const EVENT_QUEUE_DEPTH: usize = 4;

/// The direction of a UVDM transfer, as seen from this port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// From this port to the accessory.
    Out,
    /// From the accessory to this port.
    In,
}

impl From<bool> for Direction {
    fn from(value: bool) -> Self {
        if value { Self::In } else { Self::Out }
    }
}

impl From<Direction> for bool {
    fn from(value: Direction) -> Self {
        matches!(value, Direction::In)
    }
}

/// Errors of a UVDM transfer.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UvdmError {
    /// The partner rejected a chunk.
    #[error("rejected by partner after {transferred} bytes")]
    Nak {
        /// Acknowledged bytes.
        transferred: usize,
    },
    /// The partner was busy.
    #[error("partner busy after {transferred} bytes")]
    Busy {
        /// Acknowledged bytes.
        transferred: usize,
    },
    /// The partner did not answer in time.
    #[error("timeout after {transferred} bytes")]
    Timeout {
        /// Acknowledged bytes.
        transferred: usize,
    },
    /// The port detached during the transfer.
    #[error("aborted after {transferred} bytes")]
    Aborted {
        /// Acknowledged bytes.
        transferred: usize,
    },
    /// A received chunk failed its checksum.
    #[error("checksum mismatch")]
    Checksum,
    /// A chunk or response carried an unexpected sequence number.
    #[error("unexpected sequence number")]
    Sequence,
    /// A frame could not be decoded.
    #[error("malformed frame")]
    Malformed,
    /// The payload exceeds the transport limit or the receive buffer.
    #[error("payload too large")]
    TooLarge,
}

impl UvdmError {
    /// The number of bytes that were transferred before the error.
    pub fn bytes_transferred(&self) -> usize {
        match self {
            Self::Nak { transferred }
            | Self::Busy { transferred }
            | Self::Timeout { transferred }
            | Self::Aborted { transferred } => *transferred,
            _ => 0,
        }
    }
}

/// A UVDM frame that the port shall transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UvdmFrame {
    /// The session that sends the frame.
    pub direction: Direction,
    /// The raw objects, starting with the VDM header.
    pub objects: Objects,
    /// Whether the partner answers this frame.
    pub expects_reply: bool,
}

/// The answer to a frame, as handed from the port to a waiting session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// A frame from the partner.
    Frame(Objects),
    /// The partner did not answer.
    Timeout,
    /// The port detached.
    Aborted,
}

/// The result of a finished session.
pub type Outcome = Result<usize, UvdmError>;

/// Book keeping of one blocking transfer.
#[derive(Debug)]
pub struct UvdmSession {
    direction: Direction,
    is_first_chunk: bool,
    total_size: usize,
    bytes_transferred: usize,
    pending_result: Option<Outcome>,
}

impl UvdmSession {
    /// Start a session.
    pub fn new(direction: Direction, total_size: usize) -> Self {
        Self {
            direction,
            is_first_chunk: true,
            total_size,
            bytes_transferred: 0,
            pending_result: None,
        }
    }

    /// The direction of this session.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether no chunk was acknowledged yet.
    pub fn is_first_chunk(&self) -> bool {
        self.is_first_chunk
    }

    /// The payload size, if known.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// The acknowledged bytes.
    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    /// The result, once the session has finished.
    pub fn pending_result(&self) -> Option<Outcome> {
        self.pending_result
    }

    fn fail(&mut self, error: UvdmError) -> UvdmError {
        self.pending_result = Some(Err(error));
        error
    }

    fn complete(&mut self, size: usize) {
        self.total_size = size;
        self.bytes_transferred = size;
        self.pending_result = Some(Ok(size));
    }

    /// End the session with its recorded result.
    pub fn finish(self) -> Outcome {
        self.pending_result.unwrap_or(Ok(self.bytes_transferred))
    }

    /// Unwrap the frame of a delivery, failing on timeout and detach.
    pub fn frame(&mut self, delivery: Delivery) -> Result<Objects, UvdmError> {
        let transferred = self.bytes_transferred;
        match delivery {
            Delivery::Frame(objects) => Ok(objects),
            Delivery::Timeout => Err(self.fail(UvdmError::Timeout { transferred })),
            Delivery::Aborted => Err(self.fail(UvdmError::Aborted { transferred })),
        }
    }

    /// Decode a chunk that the partner sent.
    ///
    /// Only the first answer of a receive session may be a short frame.
    pub fn incoming(&mut self, delivery: Delivery) -> Result<Chunk, UvdmError> {
        let objects = self.frame(delivery)?;
        match chunk::parse(&objects) {
            Ok(Chunk::Short { .. }) if !self.is_first_chunk => Err(self.fail(UvdmError::Malformed)),
            Ok(Chunk::Response { .. }) => Err(self.fail(UvdmError::Malformed)),
            Ok(chunk) => {
                self.is_first_chunk = false;
                Ok(chunk)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Evaluate the partner's answer to a sent chunk of `len` bytes.
    pub fn on_response(&mut self, sequence: u8, len: usize, delivery: Delivery) -> Result<(), UvdmError> {
        let objects = self.frame(delivery)?;
        let transferred = self.bytes_transferred;

        let Ok(Chunk::Response {
            sequence: answered,
            response,
            ..
        }) = chunk::parse(&objects)
        else {
            return Err(self.fail(UvdmError::Malformed));
        };

        match response {
            Response::Ack if answered == sequence => {
                self.is_first_chunk = false;
                self.bytes_transferred += len;
                if self.bytes_transferred >= self.total_size {
                    self.pending_result = Some(Ok(self.bytes_transferred));
                }
                Ok(())
            }
            Response::Ack => Err(self.fail(UvdmError::Sequence)),
            Response::Nak => Err(self.fail(UvdmError::Nak { transferred })),
            Response::Busy => Err(self.fail(UvdmError::Busy { transferred })),
            Response::Reserved => Err(self.fail(UvdmError::Malformed)),
        }
    }
}

/// One direction of the transport: session exclusion and the answer slot.
pub struct Endpoint<M: RawMutex> {
    session: Mutex<M, ()>,
    delivery: Signal<M, Delivery>,
}

impl<M: RawMutex> Endpoint<M> {
    const fn new() -> Self {
        Self {
            session: Mutex::new(()),
            delivery: Signal::new(),
        }
    }
}

/// Shared state between the port task and the application.
///
/// Carries application events towards the port, the detach signal, and per direction the answer
/// slot of the running UVDM session. UVDM calls fail with [`UvdmError::Aborted`] while the port is
/// not attached.
pub struct Link<M: RawMutex> {
    events: Channel<M, Event, EVENT_QUEUE_DEPTH>,
    attached: BlockingMutex<M, Cell<bool>>,
    detached: Signal<M, ()>,
    outbound: Endpoint<M>,
    inbound: Endpoint<M>,
}

impl<M: RawMutex> Default for Link<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Link<M> {
    /// Create a new link.
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
            attached: BlockingMutex::new(Cell::new(false)),
            detached: Signal::new(),
            outbound: Endpoint::new(),
            inbound: Endpoint::new(),
        }
    }

    fn endpoint(&self, direction: Direction) -> &Endpoint<M> {
        match direction {
            Direction::Out => &self.outbound,
            Direction::In => &self.inbound,
        }
    }

    /// Post an event to the port, e.g. a role swap request.
    pub async fn send_event(&self, event: Event) {
        self.events.send(event).await
    }

    /// Wait for the next application event.
    pub async fn receive_event(&self) -> Event {
        self.events.receive().await
    }

    /// Complete the wait of a session.
    pub fn deliver(&self, direction: Direction, delivery: Delivery) {
        self.endpoint(direction).delivery.signal(delivery);
    }

    /// Whether the port is attached.
    pub fn is_attached(&self) -> bool {
        self.attached.lock(Cell::get)
    }

    fn discard_events(&self) {
        while self.events.try_receive().is_ok() {}
    }

    /// Mark the port as attached, forgetting events and detaches from before.
    pub fn attach(&self) {
        debug!("Link attached");
        self.discard_events();
        self.detached.reset();
        self.attached.lock(|attached| attached.set(true));
    }

    /// Report a detach.
    ///
    /// Running sessions of both directions fail with [`UvdmError::Aborted`], queued events are dropped.
    pub fn detach(&self) {
        debug!("Link detached");
        self.attached.lock(|attached| attached.set(false));
        self.discard_events();
        self.deliver(Direction::Out, Delivery::Aborted);
        self.deliver(Direction::In, Delivery::Aborted);
        self.detached.signal(());
    }

    /// Wait until [`Self::detach`] was called.
    pub async fn wait_detach(&self) {
        self.detached.wait().await
    }

    async fn post(&self, direction: Direction, objects: Objects) {
        if !self.is_attached() {
            return;
        }
        self.send_event(Event::UvdmSendRequested(UvdmFrame {
            direction,
            objects,
            expects_reply: false,
        }))
        .await
    }

    async fn round_trip<TIMER: Timer>(&self, direction: Direction, objects: Objects) -> Delivery {
        if !self.is_attached() {
            return Delivery::Aborted;
        }

        let endpoint = self.endpoint(direction);
        endpoint.delivery.reset();

        let exchange = async {
            self.send_event(Event::UvdmSendRequested(UvdmFrame {
                direction,
                objects,
                expects_reply: true,
            }))
            .await;
            endpoint.delivery.wait().await
        };

        match select(exchange, TimerType::get_timer::<TIMER>(TimerType::UvdmResponse)).await {
            Either::First(delivery) => delivery,
            Either::Second(_) => {
                warn!("UVDM {:?} response timeout", direction);
                Delivery::Timeout
            }
        }
    }

    /// Send a payload to the accessory.
    ///
    /// Returns the number of acknowledged bytes, which equals the payload size on success.
    pub async fn uvdm_send<TIMER: Timer>(&self, data: &[u8]) -> Result<usize, UvdmError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(UvdmError::TooLarge);
        }

        let _guard = self.outbound.session.lock().await;
        let mut session = UvdmSession::new(Direction::Out, data.len());
        debug!("UVDM send of {} bytes", data.len());

        if data.len() <= 1 {
            let delivery = self
                .round_trip::<TIMER>(Direction::Out, chunk::short_frame(Direction::Out, data.first().copied()))
                .await;
            session.on_response(1, data.len(), delivery)?;
        } else {
            for chunk in Segmenter::new(Direction::Out, data).map_err(|error| session.fail(error))? {
                let delivery = self.round_trip::<TIMER>(Direction::Out, chunk.objects).await;
                session.on_response(chunk.sequence, chunk.len, delivery)?;
            }
        }

        session.finish()
    }

    /// Receive a payload from the accessory into `buffer`.
    ///
    /// Returns the payload size. On failure, the buffer is zeroed.
    pub async fn uvdm_receive<TIMER: Timer>(&self, buffer: &mut [u8]) -> Result<usize, UvdmError> {
        let _guard = self.inbound.session.lock().await;
        let mut session = UvdmSession::new(Direction::In, 0);

        if let Err(error) = self.receive_inner::<TIMER>(&mut session, buffer).await {
            session.fail(error);
        }

        let result = session.finish();
        if let Err(error) = result {
            warn!("UVDM receive failed: {:?}", error);
            buffer.fill(0);
        }
        result
    }

    async fn receive_inner<TIMER: Timer>(&self, session: &mut UvdmSession, buffer: &mut [u8]) -> Result<(), UvdmError> {
        let delivery = self.round_trip::<TIMER>(Direction::In, chunk::receive_intent()).await;
        let mut incoming = match session.incoming(delivery)? {
            Chunk::Short { data: None, .. } => {
                session.complete(0);
                return Ok(());
            }
            Chunk::Short { data: Some(byte), .. } => {
                let slot = buffer.first_mut().ok_or(UvdmError::TooLarge)?;
                *slot = byte;
                session.complete(1);
                return Ok(());
            }
            Chunk::Long(incoming) => incoming,
            Chunk::Response { .. } => return Err(UvdmError::Malformed),
        };

        let mut reassembler = Reassembler::new(buffer);
        loop {
            let sequence = incoming.header.sequence();

            match reassembler.accept(&incoming) {
                Ok(Progress::Complete(size)) => {
                    self.post(Direction::In, chunk::response_frame(Direction::In, sequence, Response::Ack))
                        .await;
                    debug!("UVDM received {} bytes", size);
                    session.complete(size);
                    return Ok(());
                }
                Ok(Progress::Pending) => {
                    session.total_size = reassembler.total_size().unwrap_or_default();
                    session.bytes_transferred = reassembler.received();
                    let delivery = self
                        .round_trip::<TIMER>(Direction::In, chunk::response_frame(Direction::In, sequence, Response::Ack))
                        .await;

                    incoming = match session.incoming(delivery)? {
                        Chunk::Long(incoming) => incoming,
                        _ => return Err(UvdmError::Malformed),
                    };
                }
                Err(error) => {
                    // Stop the partner.
                    self.post(Direction::In, chunk::response_frame(Direction::In, sequence, Response::Nak))
                        .await;
                    return Err(error);
                }
            }
        }
    }
}
