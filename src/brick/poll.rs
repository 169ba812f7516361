// Poll cycle
//
// Once per iteration: sensor setup where a port changed type, a pending timeout
// update, then one values exchange per sub-controller (controller 0 first). Every
// reply wait that fails resets the transport's read path before the next attempt.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::bits::BitBuffer;
use super::error::{BrickError, Result};
use super::frame::{decode_frame, encode_frame};
use super::payload::{MessageType, PortLayout, ValuesReply, check_reply, decode_values, encode_values};
use super::sensor::SensorType;
use super::setup::{
    CHANGE_ADDRESS_TIMEOUT, MAX_RETRIES, TIMEOUT_SETTINGS_TIMEOUT, VALUES_TIMEOUT,
    check_setup_reply, encode_change_address, encode_setup, encode_timeout_settings,
};
use super::state::{
    CONTROLLER_COUNT, DeviceState, PORT_COUNT, PORTS_PER_CONTROLLER, SharedState, lock_state,
    port_index,
};
use super::transport::Transport;

/// Attempts of a values exchange per controller per cycle
pub const VALUES_ATTEMPTS: usize = MAX_RETRIES + 1;

/// Result of one controller's values exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerOutcome {
    /// Reply decoded and written to the state
    Committed { attempts: usize },
    /// Retry budget spent, previous readings kept
    Abandoned { attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub controllers: [ControllerOutcome; CONTROLLER_COUNT],
}

impl CycleReport {
    pub fn all_committed(&self) -> bool {
        self.controllers
            .iter()
            .all(|outcome| matches!(outcome, ControllerOutcome::Committed { .. }))
    }
}

fn queued_offsets(state: &DeviceState, controller: usize) -> [i32; PORTS_PER_CONTROLLER] {
    std::array::from_fn(|local| state.motors[port_index(controller, local)].encoder_offset)
}

/// Offsets went out on the wire; keep any that were replaced in the meantime
fn consume_offsets(state: &mut DeviceState, controller: usize, sent: [i32; PORTS_PER_CONTROLLER]) {
    for (local, offset) in sent.into_iter().enumerate() {
        let motor = &mut state.motors[port_index(controller, local)];
        if motor.encoder_offset == offset {
            motor.encoder_offset = 0;
        }
    }
}

/// Owns the transport and runs poll cycles against a shared state
pub struct Poller {
    transport: Box<dyn Transport>,
    buffer: BitBuffer,
    /// Sensor type and I2C revision each port was last set up with
    configured: [Option<(SensorType, u32)>; PORT_COUNT],
}

impl Poller {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            buffer: BitBuffer::new(),
            configured: [None; PORT_COUNT],
        }
    }

    /// Run one full cycle over both sub-controllers
    pub fn run_cycle(&mut self, state: &SharedState) -> CycleReport {
        for controller in 0..CONTROLLER_COUNT {
            if let Err(e) = self.setup_controller(state, controller) {
                warn!("Sensor setup of controller {} failed: {}", controller, e);
            }
        }

        let timeout_update = lock_state(state).take_timeout_update();
        if let Some(timeout_ms) = timeout_update {
            self.send_timeout_settings(state, timeout_ms);
        }

        let controllers = [0, 1].map(|controller| self.exchange_values(state, controller));
        CycleReport { controllers }
    }

    /// Drop partial input left by an interrupted exchange
    pub fn reset_transport(&mut self) {
        self.transport.reset();
    }

    /// Send one request and wait for a checksum-valid reply payload
    fn transact(&mut self, address: u8, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.send_request(address, payload)?;
        self.await_reply(timeout)
    }

    /// Write one request frame; a failed write is logged and the reply still awaited
    fn send_request(&mut self, address: u8, payload: &[u8]) -> Result<bool> {
        let frame = encode_frame(address, payload)?;
        match self.transport.send(address, &frame) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Send to controller at {} failed: {}", address, e);
                Ok(false)
            }
        }
    }

    fn await_reply(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let received = match self.transport.receive(timeout) {
            Ok(received) => received,
            Err(e) => {
                self.transport.reset();
                return Err(e);
            }
        };
        match decode_frame(&received) {
            Ok(payload) => Ok(payload.to_vec()),
            Err(e) => {
                self.transport.reset();
                Err(e.into())
            }
        }
    }

    /// Send the sensor setup of `controller` if one of its ports changed type or I2C devices.
    ///
    /// Returns whether a setup was sent and accepted.
    fn setup_controller(&mut self, state: &SharedState, controller: usize) -> Result<bool> {
        let (address, request, types) = {
            let mut guard = lock_state(state);
            let wanted: [(SensorType, u32); PORTS_PER_CONTROLLER] = std::array::from_fn(|local| {
                let port = port_index(controller, local);
                (guard.sensors[port].sensor_type, guard.i2c_revision(port))
            });
            let up_to_date = (0..PORTS_PER_CONTROLLER)
                .all(|local| self.configured[port_index(controller, local)] == Some(wanted[local]));
            if up_to_date {
                return Ok(false);
            }
            let (len, timeout) = encode_setup(&mut guard, controller, &mut self.buffer);
            let address = guard.address(controller);
            (address, (self.buffer.bytes()[..len].to_vec(), timeout), wanted)
        };

        info!(
            "Setting up controller {} (address {}): {:?}",
            controller,
            address,
            types.map(|(sensor_type, _)| sensor_type)
        );
        let (payload, timeout) = request;
        let reply = self.transact(address, &payload, timeout)?;
        check_setup_reply(address, &reply)?;

        for (local, wanted) in types.into_iter().enumerate() {
            self.configured[port_index(controller, local)] = Some(wanted);
        }
        Ok(true)
    }

    fn send_timeout_settings(&mut self, state: &SharedState, timeout_ms: u32) {
        let addresses = lock_state(state).addresses();
        let payload = encode_timeout_settings(timeout_ms);
        for address in addresses {
            let result = self
                .transact(address, &payload, TIMEOUT_SETTINGS_TIMEOUT)
                .and_then(|reply| check_reply(address, &reply, MessageType::TimeoutSettings));
            match result {
                Ok(()) => info!("Controller {} motor timeout set to {} ms", address, timeout_ms),
                Err(e) => warn!("Timeout settings for controller {} failed: {}", address, e),
            }
        }
    }

    fn decode_reply(
        &mut self,
        address: u8,
        reply: &[u8],
        layouts: &[PortLayout; PORTS_PER_CONTROLLER],
    ) -> Result<ValuesReply> {
        check_reply(address, reply, MessageType::Values)?;
        if reply.len() < 2 {
            return Err(BrickError::ShortReply {
                address,
                len: reply.len(),
            });
        }
        Ok(decode_values(reply, layouts, &mut self.buffer))
    }

    fn exchange_values(&mut self, state: &SharedState, controller: usize) -> ControllerOutcome {
        for attempt in 1..=VALUES_ATTEMPTS {
            let (address, request, layouts, offsets) = {
                let guard = lock_state(state);
                let len = encode_values(&guard, controller, &mut self.buffer);
                (
                    guard.address(controller),
                    self.buffer.bytes()[..len].to_vec(),
                    PortLayout::capture(&guard, controller),
                    queued_offsets(&guard, controller),
                )
            };

            let sent = match self.send_request(address, &request) {
                Ok(sent) => sent,
                Err(e) => {
                    debug!("Values request for controller {} not sent: {}", address, e);
                    continue;
                }
            };
            // Offsets count as applied once written, whether or not a reply arrives
            if sent {
                consume_offsets(&mut lock_state(state), controller, offsets);
            }

            let reply = match self.await_reply(VALUES_TIMEOUT) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(
                        "Values exchange with controller {} failed (attempt {}): {}",
                        address, attempt, e
                    );
                    continue;
                }
            };

            let mut guard = lock_state(state);
            match self.decode_reply(address, &reply, &layouts) {
                Ok(values) => {
                    values.commit(&mut guard, controller);
                    return ControllerOutcome::Committed { attempts: attempt };
                }
                Err(e) => debug!(
                    "Bad values reply from controller {} (attempt {}): {}",
                    address, attempt, e
                ),
            }
        }

        warn!(
            "Controller {} gave no valid reply in {} attempts, keeping previous values",
            controller, VALUES_ATTEMPTS
        );
        ControllerOutcome::Abandoned {
            attempts: VALUES_ATTEMPTS,
        }
    }

    /// Move `controller` to `new_address` and record it in the state
    pub fn change_address(
        &mut self,
        state: &SharedState,
        controller: usize,
        new_address: u8,
    ) -> Result<()> {
        let old_address = lock_state(state).address(controller);
        let reply = self.transact(
            old_address,
            &encode_change_address(new_address),
            CHANGE_ADDRESS_TIMEOUT,
        )?;
        check_reply(old_address, &reply, MessageType::ChangeAddress)?;

        lock_state(state).set_address(controller, new_address);
        info!(
            "Controller {} moved from address {} to {}",
            controller, old_address, new_address
        );
        Ok(())
    }
}
