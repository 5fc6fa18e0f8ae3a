//! Policy engine for both power roles.
//!
//! The engine is a synchronous state machine. It consumes received messages, commands and timer
//! expiries, and produces frames to transmit (the outbox), notifications for the device policy
//! manager and answers for waiting UVDM sessions. All I/O is done by [`crate::port::Port`].
//!
//! See USB PD specification, [8.3.3.2] and [8.3.3.3].
pub mod capabilities;


use heapless::{Deque, Vec};

use crate::bridge::{Command, Event, Notification, Notifications, command_for, notify};
use crate::config::{Config, SwapPermissions};
use crate::counters::{Counter, CounterType};
use crate::manager::Manager;
use crate::manager::accessory::AccessoryType;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::pdo::{PowerDataObjects, PowerProfile};
use crate::protocol_layer::message::data::request::Request;
use crate::protocol_layer::message::data::vendor_defined::{
    SAMSUNG_VID, VdmCommand, VdmCommandType, VdmHeader, VendorDefined,
};
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType, MessageType};
use crate::protocol_layer::message::{MAX_DATA_OBJECTS, Message};
use crate::protocol_layer::{Content, Expectation, ProtocolError};
use crate::timers::TimerType;
use crate::uvdm::chunk::UvdmHeader;
use crate::uvdm::{Delivery, Direction};
use crate::{DataRole, PowerRole};
use capabilities::{RequestMatch, Selection, evaluate_capabilities, match_request};

/// Depth of the outbox.
pub const OUTBOX_DEPTH: usize = 8;

/// Policy engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Entered at attach and after hard reset.
    Startup,
    /// A sink waits for VBUS.
    Discovery,
    /// A sink waits for source capabilities.
    WaitForCapabilities,
    /// A source waits for a request.
    SendCapabilities,
    /// A sink waits for the answer to its request.
    Negotiating,
    /// A sink waits for the new power level.
    TransitionSink,
    /// Explicit contract in place.
    Ready,
    /// The old sink of a power role swap waits for the source to turn off.
    PowerRoleSwap,
    /// A soft reset was sent.
    SendSoftReset,
    /// Hard reset signaling was requested.
    HardReset,
    /// Nothing attached.
    Detached,
}

/// Errors that can occur in the policy engine.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The port partner is unresponsive.
    #[error("port partner unresponsive")]
    PortPartnerUnresponsive,
    /// A protocol error has occured.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl From<ProtocolError> for Error {
    fn from(protocol_error: ProtocolError) -> Self {
        Error::Protocol(protocol_error)
    }
}

/// Work items for the port.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outgoing {
    /// Frame and transmit a message.
    Transmit {
        /// The message content.
        content: Content,
        /// The reply that the message waits for.
        expectation: Option<Expectation>,
    },
    /// Transmit the last message again.
    Retransmit,
    /// Send hard reset signaling.
    HardReset,
    /// Update the roles that outgoing headers carry.
    Roles {
        /// The new power role.
        power_role: PowerRole,
        /// The new data role.
        data_role: DataRole,
    },
}

impl Outgoing {
    /// Whether the item may be processed while a reply is outstanding.
    pub fn is_urgent(&self) -> bool {
        matches!(
            self,
            Outgoing::HardReset
                | Outgoing::Roles { .. }
                | Outgoing::Transmit {
                    content: Content::Control(ControlMessageType::SoftReset),
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Swap {
    PowerRole,
    DataRole,
    Vconn,
}

/// Negotiation state of an attached port.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    /// The current state.
    pub state: State,
    /// The present power role.
    pub power_role: PowerRole,
    /// The present data role.
    pub data_role: DataRole,
    /// Whether this port sources VCONN.
    pub vconn_source: bool,
    /// The explicit contract.
    pub contract: Option<Selection>,
    /// The profiles that were advertised, by the partner (as sink) or by this port (as source).
    pub advertised: Vec<PowerProfile, MAX_DATA_OBJECTS>,
    /// The type of the last queued message.
    pub last_sent: Option<MessageType>,
    /// The type of the last received message.
    pub last_received: Option<MessageType>,
    /// Swap permissions.
    pub permissions: SwapPermissions,
    /// Whether discovery ran to its end.
    pub discovery_done: bool,
    pending_selection: Option<Selection>,
    pending_swap: Option<Swap>,
}

impl NegotiationState {
    fn new(config: &Config) -> Self {
        Self {
            state: State::Startup,
            power_role: config.power_role,
            data_role: config.data_role,
            vconn_source: config.vconn_source,
            contract: None,
            advertised: Vec::new(),
            last_sent: None,
            last_received: None,
            permissions: config.permissions,
            discovery_done: false,
            pending_selection: None,
            pending_swap: None,
        }
    }
}

/// The policy engine.
#[derive(Debug)]
pub struct PolicyEngine {
    config: Config,
    negotiation: Option<NegotiationState>,
    manager: Manager,
    hard_reset_counter: Counter,
    reply_timeouts: Counter,
    fault: bool,
    uvdm_queued: Deque<Direction, 4>,
    uvdm_in_flight: Option<Direction>,
    outbox: Deque<Outgoing, OUTBOX_DEPTH>,
    notifications: Notifications,
    deliveries: Deque<(Direction, Delivery), 4>,
}

impl PolicyEngine {
    /// Create a detached policy engine.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            negotiation: None,
            manager: Manager::default(),
            hard_reset_counter: Counter::new(CounterType::HardReset),
            reply_timeouts: Counter::new(CounterType::ReplyTimeout),
            fault: false,
            uvdm_queued: Deque::new(),
            uvdm_in_flight: None,
            outbox: Deque::new(),
            notifications: Notifications::new(),
            deliveries: Deque::new(),
        }
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.negotiation.as_ref().map_or(State::Detached, |negotiation| negotiation.state)
    }

    /// The negotiation state, while attached.
    pub fn negotiation(&self) -> Option<&NegotiationState> {
        self.negotiation.as_ref()
    }

    /// The explicit contract, if any.
    pub fn contract(&self) -> Option<Selection> {
        self.negotiation.as_ref().and_then(|negotiation| negotiation.contract)
    }

    /// The class of the attached accessory, once discovered.
    pub fn accessory(&self) -> Option<AccessoryType> {
        self.manager.accessory()
    }

    /// The discovery manager.
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// The present port roles.
    pub fn roles(&self) -> (PowerRole, DataRole) {
        match &self.negotiation {
            Some(negotiation) => (negotiation.power_role, negotiation.data_role),
            None => (self.config.power_role, self.config.data_role),
        }
    }

    /// Report whether the line is faulty. Capability evaluation falls back to a safe level.
    pub fn set_fault(&mut self, fault: bool) {
        if fault != self.fault {
            warn!("Line fault {}", fault);
        }
        self.fault = fault;
    }

    /// The timer that bounds the current state, if any.
    pub fn state_timer(&self) -> Option<TimerType> {
        match self.state() {
            State::WaitForCapabilities => Some(TimerType::SinkWaitCap),
            State::TransitionSink => Some(TimerType::PSTransitionSpr),
            State::PowerRoleSwap => Some(TimerType::PSSourceOffSpr),
            _ => None,
        }
    }

    /// Take the next work item for the port.
    ///
    /// While a reply is outstanding, only resets and role updates are handed out.
    pub fn pop_outgoing(&mut self, reply_pending: bool) -> Option<Outgoing> {
        if reply_pending && !self.outbox.front()?.is_urgent() {
            return None;
        }

        let outgoing = self.outbox.pop_front()?;
        if let Outgoing::Transmit {
            expectation: Some(Expectation::Unstructured(_)),
            ..
        } = outgoing
        {
            self.uvdm_in_flight = self.uvdm_queued.pop_front();
        }
        Some(outgoing)
    }

    /// Take the next notification.
    pub fn pop_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    /// Take the next answer for a waiting UVDM session.
    pub fn pop_delivery(&mut self) -> Option<(Direction, Delivery)> {
        self.deliveries.pop_front()
    }

    fn negotiation_mut(&mut self) -> Option<&mut NegotiationState> {
        self.negotiation.as_mut()
    }

    fn set_state(&mut self, state: State) {
        if let Some(negotiation) = self.negotiation_mut() {
            trace!("State transition: {:?} -> {:?}", negotiation.state, state);
            negotiation.state = state;
        }
    }

    fn push(&mut self, outgoing: Outgoing) {
        if self.outbox.push_back(outgoing).is_err() {
            error!("Outbox full, dropping work item");
        }
    }

    fn transmit(&mut self, content: Content, expectation: Option<Expectation>) {
        if let Some(negotiation) = self.negotiation_mut() {
            negotiation.last_sent = Some(match &content {
                Content::Control(control) => MessageType::Control(*control),
                Content::Data(data) => MessageType::Data(data.message_type()),
            });
        }
        self.push(Outgoing::Transmit { content, expectation });
    }

    fn send_control(&mut self, control: ControlMessageType) {
        self.transmit(Content::Control(control), None);
    }

    fn deliver(&mut self, direction: Direction, delivery: Delivery) {
        if self.deliveries.is_full() {
            warn!("Delivery queue full, dropping the oldest");
            self.deliveries.pop_front();
        }
        let _ = self.deliveries.push_back((direction, delivery));
    }

    fn set_roles(&mut self, power_role: PowerRole, data_role: DataRole) {
        let Some(negotiation) = self.negotiation_mut() else {
            return;
        };
        if (negotiation.power_role, negotiation.data_role) == (power_role, data_role) {
            return;
        }
        negotiation.power_role = power_role;
        negotiation.data_role = data_role;

        info!("Roles changed: {:?}, {:?}", power_role, data_role);
        self.push(Outgoing::Roles { power_role, data_role });
        notify(&mut self.notifications, Notification::RoleChanged { power_role, data_role });
    }

    /// Fail all UVDM frames that are queued or in flight, and drop queued work.
    fn abort_pending(&mut self) {
        if let Some(direction) = self.uvdm_in_flight.take() {
            self.deliver(direction, Delivery::Aborted);
        }
        while let Some(direction) = self.uvdm_queued.pop_front() {
            self.deliver(direction, Delivery::Aborted);
        }
        self.manager.abort();
        self.outbox.clear();
    }

    /// Start negotiation after attach.
    pub fn attach(&mut self) {
        info!("Attached as {:?}", self.config.power_role);
        self.negotiation = Some(NegotiationState::new(&self.config));
        self.hard_reset_counter.reset();
        self.reply_timeouts.reset();
        self.start();
    }

    /// Drop all state after detach.
    pub fn detach(&mut self) {
        info!("Detached");
        self.abort_pending();
        self.manager.teardown(&mut self.notifications);
        self.negotiation = None;
        self.hard_reset_counter.reset();
        self.reply_timeouts.reset();
    }

    /// VBUS is present. A sink in discovery starts waiting for capabilities.
    pub fn on_vbus_present(&mut self) {
        if self.state() == State::Discovery {
            self.set_state(State::WaitForCapabilities);
        }
    }

    fn start(&mut self) {
        let Some(negotiation) = self.negotiation_mut() else {
            return;
        };
        negotiation.contract = None;
        negotiation.pending_selection = None;
        negotiation.pending_swap = None;

        match negotiation.power_role {
            PowerRole::Sink => self.set_state(State::Discovery),
            PowerRole::Source => self.send_capabilities(),
        }
    }

    fn send_capabilities(&mut self) {
        let profiles = self.config.source_profiles.clone();
        if let Some(negotiation) = self.negotiation_mut() {
            negotiation.advertised = profiles.clone();
        }

        self.set_state(State::SendCapabilities);
        self.transmit(
            Content::Data(Data::SourceCapabilities(PowerDataObjects::from_profiles(&profiles))),
            Some(Expectation::Data(DataMessageType::Request)),
        );
    }

    fn soft_reset(&mut self) {
        warn!("Soft reset");
        self.abort_pending();
        self.reply_timeouts.reset();
        self.set_state(State::SendSoftReset);
        self.transmit(
            Content::Control(ControlMessageType::SoftReset),
            Some(Expectation::Control),
        );
    }

    fn after_soft_reset(&mut self) {
        let Some(negotiation) = self.negotiation_mut() else {
            return;
        };
        negotiation.pending_selection = None;
        negotiation.pending_swap = None;

        match negotiation.power_role {
            PowerRole::Sink => self.set_state(State::WaitForCapabilities),
            PowerRole::Source => self.send_capabilities(),
        }
    }

    /// Forget the partner and start over, after hard reset signaling in either direction.
    fn restart(&mut self) {
        self.abort_pending();
        self.manager.teardown(&mut self.notifications);
        self.reply_timeouts.reset();

        self.set_roles(self.config.power_role, self.config.data_role);
        self.negotiation = Some(NegotiationState::new(&self.config));
        self.start();
    }

    fn hard_reset(&mut self) -> Result<(), Error> {
        if self.negotiation.is_none() {
            return Ok(());
        }

        if self.hard_reset_counter.increment().is_err() {
            error!("Port partner unresponsive");
            self.detach();
            return Err(Error::PortPartnerUnresponsive);
        }

        warn!("Hard reset {}", self.hard_reset_counter.value());
        self.set_state(State::HardReset);
        self.restart();
        // Signaling goes out before anything that the restart queued.
        if self.outbox.push_front(Outgoing::HardReset).is_err() {
            error!("Outbox full, dropping hard reset");
        }

        Ok(())
    }

    /// Handle a received message.
    pub fn handle_message(&mut self, message: Message) -> Result<(), Error> {
        let state = self.state();
        let Some(negotiation) = self.negotiation_mut() else {
            trace!("Detached, ignoring {:?}", message.message_type());
            return Ok(());
        };
        negotiation.last_received = Some(message.message_type());
        self.reply_timeouts.reset();

        match (message.message_type(), message.payload) {
            (_, Some(data)) => self.handle_data(state, data),
            (MessageType::Control(control), None) => self.handle_control(state, control),
            (message_type, None) => {
                warn!("Data message {:?} without payload", message_type);
                Ok(())
            }
        }
    }

    fn handle_data(&mut self, state: State, data: Data) -> Result<(), Error> {
        let (power_role, _) = self.roles();

        match (state, power_role, data) {
            (
                State::Discovery | State::WaitForCapabilities | State::Negotiating | State::Ready,
                PowerRole::Sink,
                Data::SourceCapabilities(pdos),
            ) => {
                self.evaluate(&pdos);
                Ok(())
            }
            (State::SendCapabilities | State::Ready, PowerRole::Source, Data::Request(request)) => {
                self.on_request(&request);
                Ok(())
            }
            (_, _, Data::VendorDefined(vdm)) => self.on_vendor_defined(vdm),
            (State::Ready, _, data) => {
                debug!("Unsupported {:?} in ready state", data.message_type());
                self.send_control(ControlMessageType::NotSupported);
                Ok(())
            }
            (state, _, data) => {
                warn!("Unexpected {:?} in state {:?}", data.message_type(), state);
                Ok(())
            }
        }
    }

    fn handle_control(&mut self, state: State, control: ControlMessageType) -> Result<(), Error> {
        use ControlMessageType::*;

        let (power_role, _) = self.roles();
        let pending_swap = self.negotiation.as_ref().and_then(|negotiation| negotiation.pending_swap);

        match (state, control) {
            (_, SoftReset) => {
                warn!("Soft reset by partner");
                self.abort_pending();
                self.reply_timeouts.reset();
                self.send_control(Accept);
                self.after_soft_reset();
            }
            (State::SendSoftReset, Accept) => self.after_soft_reset(),
            (State::Negotiating, Accept) => self.set_state(State::TransitionSink),
            (State::Negotiating, Reject | Wait | NotSupported) => {
                info!("Request answered with {:?}", control);
                let has_contract = match self.negotiation_mut() {
                    Some(negotiation) => {
                        negotiation.pending_selection = None;
                        negotiation.contract.is_some()
                    }
                    None => false,
                };
                self.set_state(if has_contract {
                    State::Ready
                } else {
                    State::WaitForCapabilities
                });
            }
            (State::TransitionSink, PsRdy) => self.on_contract(),
            (State::PowerRoleSwap, PsRdy) => {
                // The old source is off, take over.
                let (_, data_role) = self.roles();
                self.set_roles(PowerRole::Source, data_role);
                self.send_control(PsRdy);
                self.send_capabilities();
            }
            (State::Ready, GotoMin) if power_role == PowerRole::Sink => {
                if let Some(negotiation) = self.negotiation_mut() {
                    negotiation.pending_selection = negotiation.contract;
                }
                self.set_state(State::TransitionSink);
            }
            (State::Ready, PrSwap | DrSwap | VconnSwap) => self.on_swap_request(control),
            (state, PrSwap | DrSwap | VconnSwap) => {
                debug!("Rejecting {:?} in state {:?}", control, state);
                self.send_control(Reject);
            }
            (State::Ready, Accept) if pending_swap.is_some() => self.on_swap_accepted(),
            (State::Ready, Reject | Wait | NotSupported) if pending_swap.is_some() => {
                info!("Swap {:?} answered with {:?}", pending_swap, control);
                if let Some(negotiation) = self.negotiation_mut() {
                    negotiation.pending_swap = None;
                }
            }
            (_, NotSupported) if self.uvdm_in_flight.is_some() => {
                if let Some(direction) = self.uvdm_in_flight.take() {
                    self.deliver(direction, Delivery::Timeout);
                }
            }
            (State::Ready, GetSourceCap) => match power_role {
                PowerRole::Source => self.send_capabilities(),
                PowerRole::Sink if !self.config.source_profiles.is_empty() => {
                    let pdos = PowerDataObjects::from_profiles(&self.config.source_profiles);
                    self.transmit(Content::Data(Data::SourceCapabilities(pdos)), None);
                }
                PowerRole::Sink => self.send_control(NotSupported),
            },
            (State::Ready, GetSinkCap) => {
                if self.config.sink_profiles.is_empty() {
                    self.send_control(NotSupported);
                } else {
                    let pdos = PowerDataObjects::from_profiles(&self.config.sink_profiles);
                    self.transmit(Content::Data(Data::SinkCapabilities(pdos)), None);
                }
            }
            (_, GoodCRC | Ping) => (),
            (State::Ready, Accept | Reject | Wait | PsRdy | NotSupported) => {
                debug!("Ignoring unsolicited {:?}", control);
            }
            (State::Ready, _) => {
                debug!("Unsupported {:?} in ready state", control);
                self.send_control(NotSupported);
            }
            (state, control) => warn!("Unexpected {:?} in state {:?}", control, state),
        }

        Ok(())
    }

    fn evaluate(&mut self, pdos: &PowerDataObjects) {
        let profiles = pdos.profiles();
        let Some(first) = profiles.first().copied() else {
            warn!("Empty source capabilities");
            return;
        };

        let limits = self.config.limits();
        let (selection, profile, mismatch) = match evaluate_capabilities(&profiles, &limits, self.fault) {
            Some(selection) => (selection, profiles[usize::from(selection.position) - 1], false),
            None => {
                warn!("No suitable source capability, requesting vSafe5V");
                let current_ma = first.max_current_ma.min(limits.max_current_ma);
                (
                    Selection {
                        position: 1,
                        voltage_mv: first.voltage_mv,
                        current_ma,
                        power_mw: first.voltage_mv * current_ma / 1000,
                    },
                    first,
                    true,
                )
            }
        };
        debug!("Selected {:?}", selection);

        self.request(selection, &profile, mismatch, profiles);
    }

    fn request(
        &mut self,
        selection: Selection,
        profile: &PowerProfile,
        mismatch: bool,
        profiles: Vec<PowerProfile, MAX_DATA_OBJECTS>,
    ) {
        let request = Request::new(selection.position, profile, selection.current_ma).with_capability_mismatch(mismatch);

        if let Some(negotiation) = self.negotiation_mut() {
            negotiation.advertised = profiles;
            negotiation.pending_selection = Some(selection);
        }
        self.set_state(State::Negotiating);
        self.transmit(Content::Data(Data::Request(request)), Some(Expectation::Control));
    }

    fn on_request(&mut self, request: &Request) {
        let advertised = match &self.negotiation {
            Some(negotiation) => negotiation.advertised.clone(),
            None => return,
        };

        match match_request(&advertised, request) {
            RequestMatch::Ok(selection) => {
                debug!("Accepting request {:?}", selection);
                self.send_control(ControlMessageType::Accept);
                self.send_control(ControlMessageType::PsRdy);
                if let Some(negotiation) = self.negotiation_mut() {
                    negotiation.pending_selection = Some(selection);
                }
                self.on_contract();
            }
            RequestMatch::Invalid => {
                warn!("Rejecting request for position {}", request.object_position());
                self.send_control(ControlMessageType::Reject);
                let next = if self.contract().is_some() {
                    State::Ready
                } else {
                    State::SendCapabilities
                };
                self.set_state(next);
            }
        }
    }

    fn on_contract(&mut self) {
        let Some(negotiation) = self.negotiation_mut() else {
            return;
        };
        negotiation.contract = negotiation.pending_selection.take().or(negotiation.contract);
        let Some(contract) = negotiation.contract else {
            return;
        };
        let profiles = negotiation.advertised.clone();

        info!("Explicit contract: {:?}", contract);
        self.set_state(State::Ready);
        self.hard_reset_counter.reset();
        notify(
            &mut self.notifications,
            Notification::CapabilitiesChanged {
                profiles,
                selected: contract.position,
            },
        );

        self.start_discovery();
    }

    fn start_discovery(&mut self) {
        let Some(negotiation) = self.negotiation.as_ref() else {
            return;
        };
        if negotiation.data_role != DataRole::Dfp || negotiation.discovery_done || self.manager.awaiting().is_some() {
            return;
        }

        debug!("Start discovery");
        // Discovery commands do not fail.
        let _ = self.execute(Command::DiscoverIdentity);
    }

    fn on_swap_request(&mut self, control: ControlMessageType) {
        let Some(negotiation) = self.negotiation.as_ref() else {
            return;
        };
        let permitted = match control {
            ControlMessageType::PrSwap => negotiation.permissions.power_role,
            ControlMessageType::DrSwap => negotiation.permissions.data_role,
            _ => negotiation.permissions.vconn,
        };

        if !permitted {
            info!("Rejecting {:?}", control);
            self.send_control(ControlMessageType::Reject);
            return;
        }

        self.send_control(ControlMessageType::Accept);
        match control {
            ControlMessageType::PrSwap => self.swap_power_role(),
            ControlMessageType::DrSwap => self.swap_data_role(),
            _ => self.swap_vconn(),
        }
    }

    fn on_swap_accepted(&mut self) {
        let Some(swap) = self.negotiation_mut().and_then(|negotiation| negotiation.pending_swap.take()) else {
            return;
        };

        match swap {
            Swap::PowerRole => self.swap_power_role(),
            Swap::DataRole => self.swap_data_role(),
            Swap::Vconn => self.swap_vconn(),
        }
    }

    fn swap_power_role(&mut self) {
        let (power_role, data_role) = self.roles();
        if let Some(negotiation) = self.negotiation_mut() {
            negotiation.contract = None;
        }

        match power_role {
            PowerRole::Sink => self.set_state(State::PowerRoleSwap),
            PowerRole::Source => {
                self.set_roles(PowerRole::Sink, data_role);
                self.send_control(ControlMessageType::PsRdy);
                self.set_state(State::WaitForCapabilities);
            }
        }
    }

    fn swap_data_role(&mut self) {
        let (power_role, data_role) = self.roles();
        self.set_roles(power_role, data_role.swapped());

        if data_role.swapped() == DataRole::Dfp {
            if let Some(negotiation) = self.negotiation_mut() {
                negotiation.discovery_done = false;
            }
            self.start_discovery();
        }
    }

    fn swap_vconn(&mut self) {
        let Some(negotiation) = self.negotiation_mut() else {
            return;
        };
        negotiation.vconn_source = !negotiation.vconn_source;
        let vconn_source = negotiation.vconn_source;

        debug!("VCONN source: {}", vconn_source);
        if vconn_source {
            self.send_control(ControlMessageType::PsRdy);
        }
    }

    fn initiate_swap(&mut self, swap: Swap, control: ControlMessageType) {
        let Some(negotiation) = self.negotiation_mut() else {
            warn!("Detached, cannot swap");
            return;
        };
        if negotiation.state != State::Ready || negotiation.pending_swap.is_some() {
            warn!("Cannot initiate {:?} in state {:?}", swap, negotiation.state);
            return;
        }

        negotiation.pending_swap = Some(swap);
        self.transmit(Content::Control(control), Some(Expectation::Control));
    }

    fn on_vendor_defined(&mut self, vdm: VendorDefined) -> Result<(), Error> {
        match vdm.header {
            VdmHeader::Unstructured(header) if header.standard_or_vid() == SAMSUNG_VID => {
                self.uvdm_in_flight = None;
                let Some(uvdm_header) = vdm.objects.first().map(|object| UvdmHeader(*object)) else {
                    warn!("UVDM without header");
                    return Ok(());
                };
                self.raise(Event::UvdmReceived(uvdm_header.direction(), vdm.to_objects()))
            }
            VdmHeader::Unstructured(header) => {
                debug!("Ignoring unstructured VDM of {:#x}", header.standard_or_vid());
                Ok(())
            }
            VdmHeader::Structured(header)
                if header.command_type() == VdmCommandType::InitiatorRequest
                    && header.command() != VdmCommand::Attention =>
            {
                debug!("NAK for {:?}", header.command());
                let nak = VendorDefined::new(
                    VdmHeader::Structured(header.with_command_type(VdmCommandType::ResponderNak)),
                    &[],
                );
                self.transmit(Content::Data(Data::VendorDefined(nak)), None);
                Ok(())
            }
            VdmHeader::Structured(_) => match self.manager.on_vdm(&vdm, &mut self.notifications) {
                Some(event) => self.raise(event),
                None => Ok(()),
            },
        }
    }

    /// Raise an event, and execute the command that follows from it.
    pub fn raise(&mut self, event: Event) -> Result<(), Error> {
        if event == Event::DiscoveryHalted {
            if let Some(negotiation) = self.negotiation_mut() {
                negotiation.discovery_done = true;
            }
        }

        match command_for(event) {
            Some(command) => self.execute(command),
            None => Ok(()),
        }
    }

    /// Execute a command.
    pub fn execute(&mut self, command: Command) -> Result<(), Error> {
        trace!("Execute {:?}", command);

        match command {
            Command::TransmitUvdm(frame) => {
                if matches!(self.state(), State::Detached | State::Discovery) {
                    self.deliver(frame.direction, Delivery::Aborted);
                    return Ok(());
                }
                let Some(vdm) = VendorDefined::from_objects(&frame.objects) else {
                    warn!("Empty UVDM frame");
                    self.deliver(frame.direction, Delivery::Aborted);
                    return Ok(());
                };

                let expectation = if frame.expects_reply {
                    if self.uvdm_queued.push_back(frame.direction).is_err() {
                        warn!("Too many UVDM frames queued");
                        self.deliver(frame.direction, Delivery::Aborted);
                        return Ok(());
                    }
                    Some(Expectation::Unstructured(SAMSUNG_VID))
                } else {
                    None
                };
                self.transmit(Content::Data(Data::VendorDefined(vdm)), expectation);
            }
            Command::DeliverUvdm(direction, objects) => self.deliver(direction, Delivery::Frame(objects)),
            Command::FinishDiscovery => {
                info!("Discovery finished");
                if let Some(negotiation) = self.negotiation_mut() {
                    negotiation.discovery_done = true;
                }
            }
            Command::SelectCapability { position, current_ma } => self.select_capability(position, current_ma),
            Command::PowerRoleSwap => self.initiate_swap(Swap::PowerRole, ControlMessageType::PrSwap),
            Command::DataRoleSwap => self.initiate_swap(Swap::DataRole, ControlMessageType::DrSwap),
            Command::VconnSwap => self.initiate_swap(Swap::Vconn, ControlMessageType::VconnSwap),
            discovery => {
                if self.roles().1 != DataRole::Dfp || self.negotiation.is_none() {
                    warn!("Discovery needs an attached DFP");
                    return Ok(());
                }
                if let Some(vdm) = self.manager.request_for(&discovery) {
                    let command = vdm.structured().map_or(VdmCommand::DiscoverIdentity, |header| header.command());
                    self.transmit(
                        Content::Data(Data::VendorDefined(vdm)),
                        Some(Expectation::Vdm(command)),
                    );
                }
            }
        }

        Ok(())
    }

    fn select_capability(&mut self, position: u8, current_ma: u32) {
        let Some(negotiation) = self.negotiation.as_ref() else {
            return;
        };
        if negotiation.power_role != PowerRole::Sink || negotiation.state != State::Ready {
            warn!("Cannot select a capability in state {:?}", negotiation.state);
            return;
        }

        let profiles = negotiation.advertised.clone();
        let Some(profile) = usize::from(position).checked_sub(1).and_then(|index| profiles.get(index)).copied()
        else {
            warn!("No source capability at position {}", position);
            return;
        };

        let granted = current_ma.min(profile.max_current_ma);
        let selection = Selection {
            position,
            voltage_mv: profile.voltage_mv,
            current_ma: granted,
            power_mw: profile.voltage_mv * granted / 1000,
        };
        self.request(selection, &profile, granted < current_ma, profiles);
    }

    /// The reply to a transmitted message did not arrive in time.
    pub fn on_reply_timeout(&mut self, expectation: Expectation) -> Result<(), Error> {
        if self.negotiation.is_none() {
            return Ok(());
        }

        if let Expectation::Unstructured(_) = expectation {
            if let Some(direction) = self.uvdm_in_flight.take() {
                self.deliver(direction, Delivery::Timeout);
            }
            return Ok(());
        }

        if self.state() == State::SendSoftReset {
            return self.hard_reset();
        }

        match self.reply_timeouts.increment() {
            Ok(()) => {
                debug!("Reply timeout for {:?}, retransmit", expectation);
                if self.outbox.push_front(Outgoing::Retransmit).is_err() {
                    error!("Outbox full, dropping retransmission");
                }
                Ok(())
            }
            Err(_) => {
                self.soft_reset();
                Ok(())
            }
        }
    }

    /// The timer of the current state expired.
    pub fn on_state_timeout(&mut self) -> Result<(), Error> {
        match self.state() {
            State::WaitForCapabilities | State::TransitionSink | State::PowerRoleSwap => {
                warn!("Timeout in state {:?}", self.state());
                self.hard_reset()
            }
            _ => Ok(()),
        }
    }

    /// Handle an error of the protocol layer.
    pub fn on_protocol_error(&mut self, error: ProtocolError) -> Result<(), Error> {
        if self.negotiation.is_none() {
            return Ok(());
        }

        match (self.state(), error) {
            (_, ProtocolError::HardReset) => {
                warn!("Hard reset by partner");
                self.restart();
                Ok(())
            }
            (State::SendSoftReset | State::TransitionSink, _) => self.hard_reset(),
            (_, ProtocolError::TransmitRetriesExceeded | ProtocolError::ResetRequired) => {
                self.soft_reset();
                Ok(())
            }
            (state, ProtocolError::ReplyPending) => {
                error!("Protocol error {:?} in state {:?}", error, state);
                Ok(())
            }
        }
    }
}
