// Shared board state: motor targets, sensor assignments and the latest readings
//
// One `DeviceState` exists per board. The polling thread and every client share it
// through `SharedState`; all fields are small values, a single mutex is enough.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::sensor::SensorType;

pub const CONTROLLER_COUNT: usize = 2;
pub const PORTS_PER_CONTROLLER: usize = 2;
pub const PORT_COUNT: usize = CONTROLLER_COUNT * PORTS_PER_CONTROLLER;

/// Logical addresses of the two sub-controllers at power-up
pub const DEFAULT_ADDRESSES: [u8; CONTROLLER_COUNT] = [1, 2];

/// Motor watchdog of the sub-controllers, in milliseconds
pub const DEFAULT_BOARD_TIMEOUT_MS: u32 = 1000;

pub const MAX_SPEED: i16 = 255;

pub const MAX_I2C_DEVICES: usize = 8;
pub const I2C_BUFFER_LEN: usize = 16;

/// Longest I2C transfer a 4-bit length field can carry
pub const MAX_I2C_TRANSFER: u8 = 15;

/// I2C device settings bits
pub const I2C_MID_CLOCK: u8 = 0x01; // extra clock pulse between write and read
pub const I2C_SAME: u8 = 0x02; // transfer doesn't change, sent once at setup

/// Global port index of `local` (0 or 1) on sub-controller `controller`
pub fn port_index(controller: usize, local: usize) -> usize {
    controller * PORTS_PER_CONTROLLER + local
}

/// Motor ports A to D
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorPort {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
}

/// Sensor ports 1 to 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorPort {
    S1 = 0,
    S2 = 1,
    S3 = 2,
    S4 = 3,
}

impl MotorPort {
    pub const ALL: [MotorPort; PORT_COUNT] = [MotorPort::A, MotorPort::B, MotorPort::C, MotorPort::D];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl SensorPort {
    pub const ALL: [SensorPort; PORT_COUNT] =
        [SensorPort::S1, SensorPort::S2, SensorPort::S3, SensorPort::S4];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for MotorPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| format!("unknown motor port '{}'", s))
    }
}

impl FromStr for SensorPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| format!("unknown sensor port '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotorState {
    /// -255..=255, sign is the direction
    pub speed: i16,
    pub enabled: bool,
    /// Sent once with the next values exchange, then reset to 0
    pub encoder_offset: i32,
    /// Last position reported by the sub-controller, in half degrees
    pub encoder_position: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorState {
    pub sensor_type: SensorType,
    pub value: i32,
    /// Full-color channels (see `sensor::INDEX_RED`..`INDEX_BACKGROUND`)
    pub aux_values: [i32; 4],
}

/// One device chained on a port's I2C bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct I2cDevice {
    /// 8-bit bus address, sent shifted right by one
    pub address: u8,
    /// `I2C_MID_CLOCK` | `I2C_SAME`
    pub settings: u8,
    pub write_len: u8,
    pub read_len: u8,
    pub out_bytes: [u8; I2C_BUFFER_LEN],
    pub in_bytes: [u8; I2C_BUFFER_LEN],
}

impl I2cDevice {
    /// Device writing `out` then reading `read_len` bytes; lengths are clamped to 15
    pub fn new(address: u8, out: &[u8], read_len: u8) -> Self {
        let write_len = out.len().min(usize::from(MAX_I2C_TRANSFER));
        let mut out_bytes = [0; I2C_BUFFER_LEN];
        out_bytes[..write_len].copy_from_slice(&out[..write_len]);
        Self {
            address,
            settings: 0,
            write_len: write_len as u8,
            read_len: read_len.min(MAX_I2C_TRANSFER),
            out_bytes,
            in_bytes: [0; I2C_BUFFER_LEN],
        }
    }

    pub fn with_settings(mut self, settings: u8) -> Self {
        self.settings = settings;
        self
    }

    /// Transfer is registered at setup and skipped in values requests
    pub fn is_same(&self) -> bool {
        self.settings & I2C_SAME == I2C_SAME
    }

    pub fn write_len(&self) -> u8 {
        self.write_len.min(MAX_I2C_TRANSFER)
    }

    pub fn read_len(&self) -> u8 {
        self.read_len.min(MAX_I2C_TRANSFER)
    }
}

/// I2C devices chained on one sensor port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct I2cChannel {
    pub speed: u8,
    pub device_count: u8,
    pub devices: [I2cDevice; MAX_I2C_DEVICES],
}

impl I2cChannel {
    /// Bring `device_count` into 1..=8, as every setup message requires
    pub fn clamp_device_count(&mut self) {
        self.device_count = self.device_count.clamp(1, MAX_I2C_DEVICES as u8);
    }

    /// Devices currently configured
    pub fn active_devices(&self) -> &[I2cDevice] {
        let count = usize::from(self.device_count).min(MAX_I2C_DEVICES);
        &self.devices[..count]
    }
}

/// Everything the host knows about the board
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub motors: [MotorState; PORT_COUNT],
    pub sensors: [SensorState; PORT_COUNT],
    pub i2c: [I2cChannel; PORT_COUNT],
    addresses: [u8; CONTROLLER_COUNT],
    board_timeout_ms: u32,
    timeout_pending: bool,
    /// Bumped on every I2C reconfiguration of a port
    i2c_revisions: [u32; PORT_COUNT],
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            motors: [MotorState::default(); PORT_COUNT],
            sensors: [SensorState::default(); PORT_COUNT],
            i2c: [I2cChannel::default(); PORT_COUNT],
            addresses: DEFAULT_ADDRESSES,
            board_timeout_ms: DEFAULT_BOARD_TIMEOUT_MS,
            timeout_pending: false,
            i2c_revisions: [0; PORT_COUNT],
        }
    }

    /// Wrap into the handle shared with the polling thread
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn motor(&self, port: MotorPort) -> &MotorState {
        &self.motors[port.index()]
    }

    /// Set the target speed, clamped to -255..=255
    pub fn set_motor_speed(&mut self, port: MotorPort, speed: i32) {
        let clamped = speed.clamp(-i32::from(MAX_SPEED), i32::from(MAX_SPEED));
        self.motors[port.index()].speed = clamped as i16;
    }

    pub fn set_motor_enabled(&mut self, port: MotorPort, enabled: bool) {
        self.motors[port.index()].enabled = enabled;
    }

    /// Queue an encoder offset for the next values exchange
    pub fn set_encoder_offset(&mut self, port: MotorPort, offset: i32) {
        self.motors[port.index()].encoder_offset = offset;
    }

    pub fn encoder_position(&self, port: MotorPort) -> i32 {
        self.motors[port.index()].encoder_position
    }

    /// Zero and disable every motor
    pub fn stop_all_motors(&mut self) {
        for motor in &mut self.motors {
            motor.speed = 0;
            motor.enabled = false;
        }
    }

    pub fn sensor(&self, port: SensorPort) -> &SensorState {
        &self.sensors[port.index()]
    }

    /// Assign a sensor type; the polling loop sends a setup message before the next exchange
    pub fn set_sensor_type(&mut self, port: SensorPort, sensor_type: SensorType) {
        self.sensors[port.index()].sensor_type = sensor_type;
    }

    pub fn i2c_channel(&self, port: SensorPort) -> &I2cChannel {
        &self.i2c[port.index()]
    }

    /// Mutable access to a channel; the port is set up again before the next exchange
    pub fn i2c_channel_mut(&mut self, port: SensorPort) -> &mut I2cChannel {
        self.touch_i2c(port.index());
        &mut self.i2c[port.index()]
    }

    /// Replace the devices chained on `port`; at most 8 are kept.
    ///
    /// The port is set up again before the next exchange, even if its type is unchanged.
    pub fn set_i2c_devices(&mut self, port: SensorPort, speed: u8, devices: &[I2cDevice]) {
        self.touch_i2c(port.index());
        let channel = &mut self.i2c[port.index()];
        let count = devices.len().min(MAX_I2C_DEVICES);
        channel.speed = speed;
        channel.device_count = count as u8;
        channel.devices = [I2cDevice::default(); MAX_I2C_DEVICES];
        channel.devices[..count].copy_from_slice(&devices[..count]);
    }

    /// Revision of the I2C configuration of port `index`
    pub fn i2c_revision(&self, index: usize) -> u32 {
        self.i2c_revisions[index]
    }

    fn touch_i2c(&mut self, index: usize) {
        self.i2c_revisions[index] = self.i2c_revisions[index].wrapping_add(1);
    }

    pub fn addresses(&self) -> [u8; CONTROLLER_COUNT] {
        self.addresses
    }

    pub fn address(&self, controller: usize) -> u8 {
        self.addresses[controller]
    }

    /// Record a new logical address; does not reprogram the sub-controller
    pub fn set_address(&mut self, controller: usize, address: u8) {
        self.addresses[controller] = address;
    }

    pub fn board_timeout_ms(&self) -> u32 {
        self.board_timeout_ms
    }

    /// Change the sub-controllers' motor watchdog; sent before the next values exchange
    pub fn set_board_timeout_ms(&mut self, timeout_ms: u32) {
        if timeout_ms != self.board_timeout_ms {
            self.board_timeout_ms = timeout_ms;
            self.timeout_pending = true;
        }
    }

    /// Pending timeout change, cleared once taken
    pub fn take_timeout_update(&mut self) -> Option<u32> {
        std::mem::take(&mut self.timeout_pending).then_some(self.board_timeout_ms)
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

/// `DeviceState` shared between the polling thread and its clients
pub type SharedState = Arc<Mutex<DeviceState>>;

/// Lock the shared state; a panic in another holder leaves only plain values behind
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
