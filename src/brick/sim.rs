// Simulated BrickPi board
//
// Answers every message the host sends the way the sub-controller firmware does,
// so the whole engine runs without hardware. Motor encoders advance by a fixed
// step per values exchange; sensor readings are whatever the handle last set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::bits::BitBuffer;
use super::error::{BrickError, Result};
use super::frame::{decode_request, encode_reply};
use super::payload::{MessageType, PortLayout, encode_values_reply, parse_values_request};
use super::sensor::{SensorReading, SensorType};
use super::setup::parse_setup;
use super::state::{
    CONTROLLER_COUNT, DEFAULT_ADDRESSES, DEFAULT_BOARD_TIMEOUT_MS, I2cChannel, MotorPort,
    PORTS_PER_CONTROLLER, SensorPort,
};
use super::transport::Transport;

/// Encoder ticks per values exchange at full speed
const TICKS_PER_EXCHANGE_AT_FULL_SPEED: i32 = 32;

#[derive(Debug, Clone)]
struct SimController {
    address: u8,
    responding: bool,
    timeout_ms: u32,
    wire_types: [SensorType; PORTS_PER_CONTROLLER],
    channels: [I2cChannel; PORTS_PER_CONTROLLER],
    encoders: [i32; PORTS_PER_CONTROLLER],
    speeds: [i16; PORTS_PER_CONTROLLER],
    enabled: [bool; PORTS_PER_CONTROLLER],
    readings: [Option<SensorReading>; PORTS_PER_CONTROLLER],
}

impl SimController {
    fn new(address: u8) -> Self {
        Self {
            address,
            responding: true,
            timeout_ms: DEFAULT_BOARD_TIMEOUT_MS,
            wire_types: [SensorType::Raw; PORTS_PER_CONTROLLER],
            channels: [I2cChannel::default(); PORTS_PER_CONTROLLER],
            encoders: [0; PORTS_PER_CONTROLLER],
            speeds: [0; PORTS_PER_CONTROLLER],
            enabled: [false; PORTS_PER_CONTROLLER],
            readings: [None; PORTS_PER_CONTROLLER],
        }
    }

    fn layouts(&self) -> [PortLayout; PORTS_PER_CONTROLLER] {
        std::array::from_fn(|local| PortLayout {
            sensor_type: self.wire_types[local],
            i2c: self.channels[local],
        })
    }

    /// Reading to report on `local`, zero if none set or it doesn't fit the port
    fn reading(&self, local: usize) -> SensorReading {
        let zero = SensorReading::zero_for(self.wire_types[local]);
        match self.readings[local] {
            Some(reading) if same_layout(&reading, &zero) => reading,
            _ => zero,
        }
    }
}

fn same_layout(a: &SensorReading, b: &SensorReading) -> bool {
    use SensorReading::*;
    matches!(
        (a, b),
        (Touch(_), Touch(_))
            | (Distance(_), Distance(_))
            | (FullColor { .. }, FullColor { .. })
            | (I2cBus(_) | Ultrasonic { .. }, I2cBus(_) | Ultrasonic { .. })
            | (Wide32(_), Wide32(_))
            | (Wide16(_), Wide16(_))
            | (Generic10(_), Generic10(_))
    )
}

#[derive(Debug)]
struct BoardModel {
    controllers: [SimController; CONTROLLER_COUNT],
}

fn lock_model(model: &Mutex<BoardModel>) -> MutexGuard<'_, BoardModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to inspect and drive a [`SimulatedBoard`] after it was handed to a driver
#[derive(Clone)]
pub struct SimHandle {
    model: Arc<Mutex<BoardModel>>,
}

fn split_motor(port: MotorPort) -> (usize, usize) {
    let index = port.index();
    (index / PORTS_PER_CONTROLLER, index % PORTS_PER_CONTROLLER)
}

fn split_sensor(port: SensorPort) -> (usize, usize) {
    let index = port.index();
    (index / PORTS_PER_CONTROLLER, index % PORTS_PER_CONTROLLER)
}

impl SimHandle {
    /// Reading reported for `port` from the next values exchange on
    pub fn set_reading(&self, port: SensorPort, reading: SensorReading) {
        let (controller, local) = split_sensor(port);
        lock_model(&self.model).controllers[controller].readings[local] = Some(reading);
    }

    pub fn encoder(&self, port: MotorPort) -> i32 {
        let (controller, local) = split_motor(port);
        lock_model(&self.model).controllers[controller].encoders[local]
    }

    /// Speed and enable flag last received for `port`
    pub fn motor(&self, port: MotorPort) -> (i16, bool) {
        let (controller, local) = split_motor(port);
        let model = lock_model(&self.model);
        let sim = &model.controllers[controller];
        (sim.speeds[local], sim.enabled[local])
    }

    /// Sensor type the board was set up with on `port`
    pub fn sensor_type(&self, port: SensorPort) -> SensorType {
        let (controller, local) = split_sensor(port);
        lock_model(&self.model).controllers[controller].wire_types[local]
    }

    pub fn address(&self, controller: usize) -> u8 {
        lock_model(&self.model).controllers[controller].address
    }

    pub fn timeout_ms(&self, controller: usize) -> u32 {
        lock_model(&self.model).controllers[controller].timeout_ms
    }

    /// Make `controller` ignore every request, as if unplugged
    pub fn set_responding(&self, controller: usize, responding: bool) {
        lock_model(&self.model).controllers[controller].responding = responding;
    }
}

/// Transport that plays both sub-controllers
pub struct SimulatedBoard {
    model: Arc<Mutex<BoardModel>>,
    pending: VecDeque<Vec<u8>>,
    buffer: BitBuffer,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(BoardModel {
                controllers: DEFAULT_ADDRESSES.map(SimController::new),
            })),
            pending: VecDeque::new(),
            buffer: BitBuffer::new(),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            model: Arc::clone(&self.model),
        }
    }

    /// Handle one request payload, returning the reply payload if the firmware sends one
    fn answer(&mut self, address: u8, payload: &[u8]) -> Option<Vec<u8>> {
        let mut model = lock_model(&self.model);
        let sim = model
            .controllers
            .iter_mut()
            .find(|sim| sim.address == address && sim.responding)?;
        let tag = *payload.first()?;

        match tag {
            t if t == MessageType::ChangeAddress.tag() => {
                let new_address = *payload.get(1)?;
                debug!("Sim controller {} moves to {}", sim.address, new_address);
                sim.address = new_address;
                Some(vec![tag])
            }
            t if t == MessageType::SensorSetup.tag() => {
                let request = parse_setup(payload, &mut self.buffer)?;
                for local in 0..PORTS_PER_CONTROLLER {
                    sim.wire_types[local] =
                        SensorType::try_from(request.wire_types[local]).unwrap_or_default();
                    sim.channels[local] = request.channels[local].unwrap_or_default();
                }
                Some(vec![tag])
            }
            t if t == MessageType::Values.tag() => {
                let layouts = sim.layouts();
                let request = parse_values_request(payload, &layouts, &mut self.buffer);
                for write in &request.i2c_writes {
                    sim.channels[write.local_port].devices[write.device].read_len = write.read_len;
                }
                for local in 0..PORTS_PER_CONTROLLER {
                    sim.encoders[local] =
                        sim.encoders[local].saturating_sub(request.encoder_offsets[local]);
                    sim.speeds[local] = request.speeds[local];
                    sim.enabled[local] = request.enabled[local];
                    if sim.enabled[local] {
                        let step = i32::from(sim.speeds[local]) * TICKS_PER_EXCHANGE_AT_FULL_SPEED
                            / 255;
                        sim.encoders[local] = sim.encoders[local].saturating_add(step);
                    }
                }
                let readings = [sim.reading(0), sim.reading(1)];
                Some(encode_values_reply(
                    sim.encoders,
                    &readings,
                    &sim.layouts(),
                    &mut self.buffer,
                ))
            }
            t if t == MessageType::EmergencyStop.tag() => {
                sim.enabled = [false; PORTS_PER_CONTROLLER];
                None
            }
            t if t == MessageType::TimeoutSettings.tag() => {
                let bytes: [u8; 4] = payload.get(1..5)?.try_into().ok()?;
                sim.timeout_ms = u32::from_le_bytes(bytes);
                Some(vec![tag])
            }
            _ => None,
        }
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedBoard {
    fn send(&mut self, address: u8, frame: &[u8]) -> Result<()> {
        let (frame_address, payload) = match decode_request(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Sim dropped a bad frame: {}", e);
                return Ok(());
            }
        };
        if frame_address != address {
            debug!("Sim frame for {} sent as {}", frame_address, address);
        }
        if let Some(reply) = self.answer(frame_address, payload) {
            self.pending.push_back(encode_reply(&reply)?);
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        self.pending.pop_front().ok_or(BrickError::Timeout)
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::poll::{ControllerOutcome, Poller};
    use crate::brick::sensor::{I2cInputs, INDEX_BACKGROUND, INDEX_BLUE, INDEX_GREEN, INDEX_RED};
    use crate::brick::state::{DeviceState, I2cDevice, SharedState, lock_state};

    fn setup() -> (SharedState, Poller, SimHandle) {
        let board = SimulatedBoard::new();
        let handle = board.handle();
        (
            DeviceState::new().into_shared(),
            Poller::new(Box::new(board)),
            handle,
        )
    }

    #[test]
    fn test_all_sensor_families() {
        let (state, mut poller, sim) = setup();
        {
            let mut guard = lock_state(&state);
            guard.set_sensor_type(SensorPort::S1, SensorType::Touch);
            guard.set_sensor_type(SensorPort::S2, SensorType::ColorFull);
            guard.set_sensor_type(SensorPort::S3, SensorType::UltrasonicCont);
            guard.set_sensor_type(SensorPort::S4, SensorType::Ev3GyroM0);
        }

        let mut channels = [0u16; 4];
        channels[INDEX_RED] = 600;
        channels[INDEX_GREEN] = 500;
        channels[INDEX_BLUE] = 400;
        channels[INDEX_BACKGROUND] = 30;
        sim.set_reading(SensorPort::S1, SensorReading::Touch(true));
        sim.set_reading(
            SensorPort::S2,
            SensorReading::FullColor {
                status: 2,
                channels,
            },
        );
        sim.set_reading(
            SensorPort::S3,
            SensorReading::Ultrasonic {
                distance: Some(42),
                bus: I2cInputs::empty(),
            },
        );
        sim.set_reading(SensorPort::S4, SensorReading::Wide16(-90));

        assert!(poller.run_cycle(&state).all_committed());
        assert_eq!(sim.sensor_type(SensorPort::S3), SensorType::I2c);

        let guard = lock_state(&state);
        assert_eq!(guard.sensor(SensorPort::S1).value, 1);
        assert_eq!(guard.sensor(SensorPort::S2).value, 2);
        assert_eq!(guard.sensor(SensorPort::S2).aux_values, [600, 500, 400, 30]);
        assert_eq!(guard.sensor(SensorPort::S3).value, 42);
        assert_eq!(guard.sensor(SensorPort::S4).value, -90);
    }

    #[test]
    fn test_ultrasonic_absent_reads_minus_one() {
        let (state, mut poller, _sim) = setup();
        lock_state(&state).set_sensor_type(SensorPort::S2, SensorType::UltrasonicCont);
        poller.run_cycle(&state);
        assert_eq!(lock_state(&state).sensor(SensorPort::S2).value, -1);
    }

    #[test]
    fn test_i2c_read_lengths_from_values_request() {
        let (state, mut poller, sim) = setup();
        {
            let mut guard = lock_state(&state);
            guard.set_sensor_type(SensorPort::S4, SensorType::I2c);
            guard.set_i2c_devices(SensorPort::S4, 0, &[I2cDevice::new(0x20, &[0x00], 3)]);
        }
        let mut bus = I2cInputs::empty();
        bus.presence = 1;
        bus.data[0][..3].copy_from_slice(&[1, 2, 3]);
        sim.set_reading(SensorPort::S4, SensorReading::I2cBus(bus));

        poller.run_cycle(&state);
        let guard = lock_state(&state);
        assert_eq!(guard.sensor(SensorPort::S4).value, 1);
        assert_eq!(&guard.i2c_channel(SensorPort::S4).devices[0].in_bytes[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_motors_and_encoder_offsets() {
        let (state, mut poller, sim) = setup();
        {
            let mut guard = lock_state(&state);
            guard.set_motor_speed(MotorPort::C, -255);
            guard.set_motor_enabled(MotorPort::C, true);
            guard.set_motor_speed(MotorPort::D, 255);
        }

        poller.run_cycle(&state);
        poller.run_cycle(&state);
        assert_eq!(sim.motor(MotorPort::C), (-255, true));
        assert_eq!(sim.motor(MotorPort::D), (255, false));
        assert_eq!(sim.encoder(MotorPort::C), -64);
        assert_eq!(lock_state(&state).encoder_position(MotorPort::C), -64);
        assert_eq!(lock_state(&state).encoder_position(MotorPort::D), 0);

        {
            let mut guard = lock_state(&state);
            guard.set_motor_enabled(MotorPort::C, false);
            guard.set_encoder_offset(MotorPort::C, -64);
        }
        poller.run_cycle(&state);
        assert_eq!(lock_state(&state).encoder_position(MotorPort::C), 0);
        assert_eq!(lock_state(&state).motor(MotorPort::C).encoder_offset, 0);
    }

    #[test]
    fn test_dead_controller_abandoned() {
        let (state, mut poller, sim) = setup();
        sim.set_reading(SensorPort::S1, SensorReading::Generic10(700));
        poller.run_cycle(&state);
        assert_eq!(lock_state(&state).sensor(SensorPort::S1).value, 700);

        sim.set_responding(0, false);
        sim.set_reading(SensorPort::S1, SensorReading::Generic10(12));
        sim.set_reading(SensorPort::S3, SensorReading::Generic10(13));
        let report = poller.run_cycle(&state);
        assert_eq!(
            report.controllers,
            [
                ControllerOutcome::Abandoned { attempts: 3 },
                ControllerOutcome::Committed { attempts: 1 }
            ]
        );
        assert_eq!(lock_state(&state).sensor(SensorPort::S1).value, 700);
        assert_eq!(lock_state(&state).sensor(SensorPort::S3).value, 13);
    }

    #[test]
    fn test_timeout_and_address_changes() {
        let (state, mut poller, sim) = setup();
        lock_state(&state).set_board_timeout_ms(400);
        poller.run_cycle(&state);
        assert_eq!(sim.timeout_ms(0), 400);
        assert_eq!(sim.timeout_ms(1), 400);

        poller.change_address(&state, 0, 9).expect("address change");
        assert_eq!(sim.address(0), 9);
        assert_eq!(lock_state(&state).addresses(), [9, 2]);
        assert!(poller.run_cycle(&state).all_committed());
    }

    #[test]
    fn test_mismatched_reading_reported_as_zero() {
        let (state, mut poller, sim) = setup();
        lock_state(&state).set_sensor_type(SensorPort::S2, SensorType::Touch);
        sim.set_reading(SensorPort::S2, SensorReading::Wide32(99));
        assert!(poller.run_cycle(&state).all_committed());
        assert_eq!(lock_state(&state).sensor(SensorPort::S2).value, 0);
    }
}
