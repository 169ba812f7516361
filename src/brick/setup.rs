// Configuration messages: sensor setup (type 2), timeout settings (type 5)
// and change address (type 1)
//
// Sensor setup layout:
//   byte 0 message type, bytes 1-2 wire types of the two ports, then bits from byte 3,
//   per I2C port: [speed:8 devices-1:3] then per device
//   [addr>>1:7 settings:2 (wlen:4 rlen:4 out:8*wlen if "same")]

use std::time::Duration;

use super::bits::{BitBuffer, FieldCursor};
use super::error::{BrickError, Result};
use super::payload::MessageType;
use super::sensor::{SensorType, US_I2C_DEVICE};
use super::state::{
    DeviceState, I2C_MID_CLOCK, I2C_SAME, I2cChannel, I2cDevice, MAX_I2C_DEVICES,
    PORTS_PER_CONTROLLER, port_index,
};

/// Reply wait of a values exchange
pub const VALUES_TIMEOUT: Duration = Duration::from_millis(20);
/// Reply wait of a sensor setup
pub const SETUP_TIMEOUT: Duration = Duration::from_millis(100);
/// Reply wait of a sensor setup involving a color sensor
pub const COLOR_SETUP_TIMEOUT: Duration = Duration::from_millis(5000);
/// Reply wait of a timeout settings message, per controller
pub const TIMEOUT_SETTINGS_TIMEOUT: Duration = Duration::from_millis(20);
/// Reply wait of a change address message
pub const CHANGE_ADDRESS_TIMEOUT: Duration = Duration::from_millis(5);

/// Extra attempts of a values exchange after the first
pub const MAX_RETRIES: usize = 2;

/// Bits of the setup message start after the type bytes
const SETUP_ORIGIN: usize = 3;

/// I2C channel the continuous ultrasonic sensor is driven through
const US_I2C_SPEED: u8 = 10;
const US_I2C_ADDRESS: u8 = 0x02;
const US_DATA_REGISTER: u8 = 0x42;

/// Channel that makes the sub-controller poll the ultrasonic sensor's distance register
pub fn ultrasonic_channel() -> I2cChannel {
    let mut channel = I2cChannel {
        speed: US_I2C_SPEED,
        device_count: 1,
        ..I2cChannel::default()
    };
    channel.devices[US_I2C_DEVICE] = I2cDevice::new(US_I2C_ADDRESS, &[US_DATA_REGISTER], 1)
        .with_settings(I2C_MID_CLOCK | I2C_SAME);
    channel
}

fn is_i2c_wire_type(tag: u8) -> bool {
    tag == SensorType::I2c.tag() || tag == SensorType::I2c9V.tag()
}

/// Encode the sensor setup message for `controller`.
///
/// Ports with the continuous ultrasonic sensor get their I2C channel replaced by
/// [`ultrasonic_channel`], and every I2C port has its device count brought into 1..=8;
/// both changes are written back to `state`. Returns the number of payload bytes to
/// transmit and the reply wait.
pub fn encode_setup(
    state: &mut DeviceState,
    controller: usize,
    buf: &mut BitBuffer,
) -> (usize, Duration) {
    buf.clear();
    buf.bytes_mut()[0] = MessageType::SensorSetup.tag();

    let mut timeout = SETUP_TIMEOUT;
    for local in 0..PORTS_PER_CONTROLLER {
        let port = port_index(controller, local);
        let sensor_type = state.sensors[port].sensor_type;
        if sensor_type.is_color_family() {
            timeout = COLOR_SETUP_TIMEOUT;
        }
        if sensor_type == SensorType::UltrasonicCont {
            state.i2c[port] = ultrasonic_channel();
        }
        buf.bytes_mut()[1 + local] = sensor_type.wire_type().tag();
    }

    let mut cursor = FieldCursor::new(buf, SETUP_ORIGIN);
    for local in 0..PORTS_PER_CONTROLLER {
        let port = port_index(controller, local);
        if !state.sensors[port].sensor_type.uses_i2c_channel() {
            continue;
        }
        let channel = &mut state.i2c[port];
        channel.clamp_device_count();
        cursor.write(8, u32::from(channel.speed));
        cursor.write(3, u32::from(channel.device_count - 1));
        for device in channel.active_devices() {
            cursor.write(7, u32::from(device.address >> 1));
            cursor.write(2, u32::from(device.settings & (I2C_MID_CLOCK | I2C_SAME)));
            if device.is_same() {
                let write_len = device.write_len();
                cursor.write(4, u32::from(write_len));
                cursor.write(4, u32::from(device.read_len()));
                for &byte in &device.out_bytes[..usize::from(write_len)] {
                    cursor.write(8, u32::from(byte));
                }
            }
        }
    }

    let len = SETUP_ORIGIN + cursor.bit_offset().div_ceil(8);
    (len, timeout)
}

/// A setup is accepted only by the exact reply `[2]`
pub fn check_setup_reply(address: u8, payload: &[u8]) -> Result<()> {
    if payload == [MessageType::SensorSetup.tag()] {
        Ok(())
    } else {
        Err(BrickError::SetupRejected { address })
    }
}

/// `[5, timeout as 4 little-endian bytes]`
pub fn encode_timeout_settings(timeout_ms: u32) -> Vec<u8> {
    let mut payload = vec![MessageType::TimeoutSettings.tag()];
    payload.extend_from_slice(&timeout_ms.to_le_bytes());
    payload
}

/// `[1, new address]`
pub fn encode_change_address(new_address: u8) -> Vec<u8> {
    vec![MessageType::ChangeAddress.tag(), new_address]
}

/// Sensor setup as seen by a sub-controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    /// Wire type tags, the continuous ultrasonic sensor already shows up as I2C
    pub wire_types: [u8; PORTS_PER_CONTROLLER],
    /// Channel of each I2C port; `None` for the others
    pub channels: [Option<I2cChannel>; PORTS_PER_CONTROLLER],
}

/// Parse a sensor setup payload (board side of the link)
pub fn parse_setup(payload: &[u8], buf: &mut BitBuffer) -> Option<SetupRequest> {
    if payload.len() < SETUP_ORIGIN || payload[0] != MessageType::SensorSetup.tag() {
        return None;
    }
    let wire_types = [payload[1], payload[2]];
    buf.load(payload);
    let mut cursor = FieldCursor::new(buf, SETUP_ORIGIN);

    let mut channels = [None; PORTS_PER_CONTROLLER];
    for (local, &tag) in wire_types.iter().enumerate() {
        if !is_i2c_wire_type(tag) {
            continue;
        }
        let mut channel = I2cChannel {
            speed: cursor.read(8) as u8,
            device_count: cursor.read(3) as u8 + 1,
            ..I2cChannel::default()
        };
        let count = usize::from(channel.device_count).min(MAX_I2C_DEVICES);
        for device in channel.devices.iter_mut().take(count) {
            device.address = (cursor.read(7) as u8) << 1;
            device.settings = cursor.read(2) as u8;
            if device.is_same() {
                device.write_len = cursor.read(4) as u8;
                device.read_len = cursor.read(4) as u8;
                for byte in device.out_bytes.iter_mut().take(usize::from(device.write_len)) {
                    *byte = cursor.read(8) as u8;
                }
            }
        }
        channels[local] = Some(channel);
    }

    Some(SetupRequest {
        wire_types,
        channels,
    })
}
