//! The port runs the protocol layer and the policy engine as a single reactive task.
//!
//! Each step transmits what the policy engine queued, forwards notifications and UVDM answers,
//! and then waits for whatever comes first: a detach, an application event, a received message
//! or the running timer.
use core::future::pending;
use core::marker::PhantomData;

use embassy_futures::select::{Either3, Either4, select3, select4};
use embassy_sync::blocking_mutex::raw::RawMutex;
use usbpd_uvdm_traits::{Driver, StatusFlag};

use crate::config::Config;
use crate::device_policy_manager::DevicePolicyManager;
use crate::policy_engine::{Error, Outgoing, PolicyEngine, State};
use crate::protocol_layer::ProtocolLayer;
use crate::timers::{Timer, TimerType};
use crate::uvdm::Link;

enum Step {
    Continue,
    Detached,
}

/// A USB PD port.
pub struct Port<'a, DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager, M: RawMutex> {
    protocol_layer: ProtocolLayer<DRIVER>,
    engine: PolicyEngine,
    device_policy_manager: DPM,
    link: &'a Link<M>,
    config: Config,

    _timer: PhantomData<TIMER>,
}

impl<'a, DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager, M: RawMutex> Port<'a, DRIVER, TIMER, DPM, M> {
    /// Create a new port.
    pub fn new(driver: DRIVER, device_policy_manager: DPM, config: Config, link: &'a Link<M>) -> Self {
        Self {
            protocol_layer: ProtocolLayer::new(driver, config.power_role, config.data_role),
            engine: PolicyEngine::new(config.clone()),
            device_policy_manager,
            link,
            config,
            _timer: PhantomData,
        }
    }

    /// The policy engine.
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// The device policy manager.
    pub fn device_policy_manager(&mut self) -> &mut DPM {
        &mut self.device_policy_manager
    }

    async fn flush(&mut self) -> Result<(), Error> {
        while let Some(outgoing) = self.engine.pop_outgoing(self.protocol_layer.pending_reply().is_some()) {
            let result = match outgoing {
                Outgoing::Transmit { content, expectation } => self.protocol_layer.transmit(content, expectation).await,
                Outgoing::Retransmit => self.protocol_layer.retransmit().await,
                Outgoing::HardReset => self.protocol_layer.hard_reset().await,
                Outgoing::Roles { power_role, data_role } => {
                    self.protocol_layer.set_roles(power_role, data_role);
                    Ok(())
                }
            };

            if let Err(error) = result {
                self.engine.on_protocol_error(error)?;
            }
        }

        Ok(())
    }

    async fn drain(&mut self) {
        while let Some((direction, delivery)) = self.engine.pop_delivery() {
            self.link.deliver(direction, delivery);
        }

        while let Some(notification) = self.engine.pop_notification() {
            self.device_policy_manager.notify(notification).await;
        }
    }

    /// Run a single step.
    async fn run_step(&mut self) -> Result<Step, Error> {
        self.engine
            .set_fault(self.protocol_layer.line_status(StatusFlag::ShortCircuit));
        self.flush().await?;
        self.drain().await;

        if self.engine.state() == State::Discovery {
            match select3(
                self.link.wait_detach(),
                self.protocol_layer.wait_for_vbus(),
                self.link.receive_event(),
            )
            .await
            {
                Either3::First(_) => return Ok(Step::Detached),
                Either3::Second(_) => self.engine.on_vbus_present(),
                Either3::Third(event) => self.engine.raise(event)?,
            }
            return Ok(Step::Continue);
        }

        let expectation = self.protocol_layer.pending_reply();
        let timer_type = match expectation {
            Some(expectation) => Some(expectation.timer()),
            None => self.engine.state_timer(),
        };
        let timer = async {
            match timer_type {
                Some(timer_type) => TimerType::get_timer::<TIMER>(timer_type).await,
                None => pending().await,
            }
        };

        match select4(
            self.link.wait_detach(),
            self.link.receive_event(),
            self.protocol_layer.receive_message(),
            timer,
        )
        .await
        {
            Either4::First(_) => return Ok(Step::Detached),
            Either4::Second(event) => self.engine.raise(event)?,
            Either4::Third(Ok(Some(message))) => self.engine.handle_message(message)?,
            Either4::Third(Ok(None)) => (),
            Either4::Third(Err(error)) => self.engine.on_protocol_error(error)?,
            Either4::Fourth(_) => match self.protocol_layer.expire_reply() {
                Some(expectation) => self.engine.on_reply_timeout(expectation)?,
                None => self.engine.on_state_timeout()?,
            },
        }

        Ok(Step::Continue)
    }

    fn reset(&mut self) {
        self.protocol_layer.reset();
        self.protocol_layer
            .set_roles(self.config.power_role, self.config.data_role);
    }

    /// Run the port continuously.
    ///
    /// Detaches start over at attach. The loop is only broken for unrecoverable errors, for example if the
    /// port partner is unresponsive.
    pub async fn run(&mut self) -> Result<(), Error> {
        loop {
            self.protocol_layer.wait_for_vbus().await;
            self.reset();
            self.link.attach();
            self.engine.attach();

            let result = loop {
                match self.run_step().await {
                    Ok(Step::Continue) => (),
                    Ok(Step::Detached) => break Ok(()),
                    Err(error) => break Err(error),
                }
            };

            self.engine.detach();
            self.link.detach();
            self.drain().await;

            if let Err(error) = result {
                error!("Unrecoverable result {:?} in port", error);
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::join::join;
    use embassy_futures::select::{Either, select};
    use embassy_futures::yield_now;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::Port;
    use crate::bridge::Notification;
    use crate::config::Config;
    use crate::dummy::{
        DummyAccessory, DummyDevicePolicyManager, DummyDriver, DummyTimer, DummyUvdmTimer, control_frame, data_frame,
    };
    use crate::protocol_layer::message::Message;
    use crate::protocol_layer::message::data::Data;
    use crate::protocol_layer::message::data::pdo::{PowerDataObjects, PowerProfile};
    use crate::protocol_layer::message::header::ControlMessageType;
    use crate::uvdm::{Link, UvdmError};

    type TestPort<'a, DRIVER> = Port<'a, DRIVER, DummyTimer, DummyDevicePolicyManager, NoopRawMutex>;
    type TimingPort<'a, DRIVER> = Port<'a, DRIVER, DummyUvdmTimer, DummyDevicePolicyManager, NoopRawMutex>;

    fn payload(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 13 + 1) as u8).collect()
    }

    async fn settle() {
        for _ in 0..16 {
            yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_uvdm_round_trips() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = async {
            for size in [0, 1, 2, 15, 16, 17, 160] {
                let data = payload(size);
                assert_eq!(link.uvdm_send::<DummyTimer>(&data).await, Ok(size));
                assert_eq!(accessory.received(), data);

                let mut buffer = [0xAAu8; 256];
                assert_eq!(link.uvdm_receive::<DummyTimer>(&mut buffer).await, Ok(size));
                assert_eq!(&buffer[..size], data.as_slice());
            }
        };

        match select(port.run(), test).await {
            Either::First(result) => panic!("port stopped: {:?}", result),
            Either::Second(()) => (),
        }
    }

    #[tokio::test]
    async fn test_nak_reports_acknowledged_bytes() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        accessory.nak_at(3);
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        // Chunks of 12, 16 and 16 bytes, the third is rejected.
        let test = link.uvdm_send::<DummyTimer>(&[0x55; 60]);
        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::Nak { transferred: 28 })),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_busy_partner() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        accessory.set_busy(true);
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = link.uvdm_send::<DummyTimer>(&[1, 2, 3]);
        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::Busy { transferred: 0 })),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_bit_flip_zeroes_buffer() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = async {
            assert_eq!(link.uvdm_send::<DummyTimer>(&payload(40)).await, Ok(40));
            accessory.flip_bit_in(2);

            let mut buffer = [0xFFu8; 64];
            let result = link.uvdm_receive::<DummyTimer>(&mut buffer).await;
            (result, buffer)
        };

        match select(port.run(), test).await {
            Either::Second((result, buffer)) => {
                assert_eq!(result, Err(UvdmError::Checksum));
                assert!(buffer.iter().all(|byte| *byte == 0));
            }
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_receive_buffer_too_small() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = async {
            assert_eq!(link.uvdm_send::<DummyTimer>(&payload(40)).await, Ok(40));
            let mut buffer = [0u8; 16];
            link.uvdm_receive::<DummyTimer>(&mut buffer).await
        };

        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::TooLarge)),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_detach_aborts_session() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        accessory.set_silent(true);
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = async {
            let (result, _) = join(link.uvdm_send::<DummyTimer>(&payload(100)), async {
                settle().await;
                link.detach();
            })
            .await;
            result
        };

        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::Aborted { transferred: 0 })),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_link_timeout_reports_acknowledged_bytes() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        accessory.silent_from(3);
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = link.uvdm_send::<DummyUvdmTimer>(&[0x55; 60]);
        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::Timeout { transferred: 28 })),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_reply_timeout_ends_session() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        accessory.silent_from(2);
        let mut port: TimingPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        // Only the port's reply timer can expire.
        let test = link.uvdm_send::<DummyTimer>(&[0x55; 60]);
        match select(port.run(), test).await {
            Either::Second(result) => assert_eq!(result, Err(UvdmError::Timeout { transferred: 12 })),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
    }

    #[tokio::test]
    async fn test_send_without_vbus_is_aborted() {
        let link = Link::<NoopRawMutex>::new();
        let driver = DummyDriver::new();
        driver.set_vbus(false);
        let mut port: TestPort<_> = Port::new(
            driver.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let test = async {
            let sent = link.uvdm_send::<DummyTimer>(&[1, 2, 3]).await;
            let mut buffer = [0xFFu8; 8];
            let received = link.uvdm_receive::<DummyTimer>(&mut buffer).await;
            (sent, received, buffer)
        };

        match select(port.run(), test).await {
            Either::Second((sent, received, buffer)) => {
                assert_eq!(sent, Err(UvdmError::Aborted { transferred: 0 }));
                assert_eq!(received, Err(UvdmError::Aborted { transferred: 0 }));
                assert_eq!(buffer, [0; 8]);
            }
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
        assert!(driver.transmitted().is_empty());
    }

    #[tokio::test]
    async fn test_sends_are_serialized() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let first = [0x11u8; 40];
        let second = payload(50);
        let test = join(link.uvdm_send::<DummyTimer>(&first), link.uvdm_send::<DummyTimer>(&second));

        match select(port.run(), test).await {
            Either::Second(results) => assert_eq!(results, (Ok(40), Ok(50))),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
        assert_eq!(accessory.received(), second);
    }

    #[tokio::test]
    async fn test_send_and_receive_interleave() {
        let link = Link::<NoopRawMutex>::new();
        let accessory = DummyAccessory::new();
        let mut port: TestPort<_> = Port::new(
            accessory.clone(),
            DummyDevicePolicyManager::default(),
            Config::default(),
            &link,
        );

        let first = [0x11u8; 40];
        let second = payload(50);
        let test = async {
            assert_eq!(link.uvdm_send::<DummyTimer>(&first).await, Ok(40));

            let mut buffer = [0u8; 64];
            let (sent, received) = join(
                link.uvdm_send::<DummyTimer>(&second),
                link.uvdm_receive::<DummyTimer>(&mut buffer),
            )
            .await;
            (sent, received, buffer)
        };

        match select(port.run(), test).await {
            Either::Second((sent, received, buffer)) => {
                assert_eq!(sent, Ok(50));
                // The receive sees either payload, but never a mix.
                let size = received.unwrap();
                assert!(buffer[..size] == first[..] || buffer[..size] == second[..]);
            }
            Either::First(result) => panic!("port stopped: {:?}", result),
        }
        assert_eq!(accessory.received(), second);
    }

    #[tokio::test]
    async fn test_sink_negotiation() {
        let link = Link::<NoopRawMutex>::new();
        let driver = DummyDriver::new();
        let device_policy_manager = DummyDevicePolicyManager::default();
        let mut port: TestPort<_> = Port::new(
            driver.clone(),
            device_policy_manager.clone(),
            Config::default(),
            &link,
        );

        let capabilities = Data::SourceCapabilities(PowerDataObjects::from_profiles(&[
            PowerProfile::fixed(5000, 3000),
            PowerProfile::fixed(9000, 3000),
            PowerProfile::fixed(15000, 3000),
        ]));

        let test = async {
            driver.inject_received_data(&data_frame(capabilities, 0));
            settle().await;

            let request = driver.transmitted().pop().map(|frame| Message::from_bytes(&frame));
            let Some(Ok(Message {
                payload: Some(Data::Request(request)),
                ..
            })) = request
            else {
                panic!("no request sent");
            };
            assert_eq!(request.object_position(), 2);

            driver.inject_received_data(&control_frame(ControlMessageType::Accept, 1));
            driver.inject_received_data(&control_frame(ControlMessageType::PsRdy, 2));
            settle().await;
        };

        match select(port.run(), test).await {
            Either::Second(()) => (),
            Either::First(result) => panic!("port stopped: {:?}", result),
        }

        let notifications = device_policy_manager.notifications();
        assert!(
            notifications
                .iter()
                .any(|notification| matches!(notification, Notification::CapabilitiesChanged { selected: 2, .. }))
        );
    }
}
