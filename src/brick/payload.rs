// Values exchange payloads (message type 3)
//
// Request, packed from byte 1 for the controller's two ports:
//   encoder offsets  [flag:1 (width:5 value:width)?] x2
//   motors           [speed:8 dir:1 enable:1] x2 (LSB first: enable, dir, speed)
//   I2C writes       per I2C port, per device not flagged "same": [wlen:4 rlen:4 out:8*wlen]
// Reply, packed from byte 1:
//   encoder widths   [width:5] x2
//   encoders         [value:width] x2, LSB = sign
//   sensors          per port, layout chosen by its sensor type

use super::bits::{BitBuffer, FieldCursor, bits_needed};
use super::error::{BrickError, Result};
use super::sensor::{SensorReading, SensorType, decode_port, encode_port};
use super::state::{
    DeviceState, I2cChannel, MAX_I2C_DEVICES, MAX_SPEED, MotorState, PORTS_PER_CONTROLLER,
    port_index,
};

/// Message type tag, payload byte 0
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    ChangeAddress = 1,
    SensorSetup = 2,
    Values = 3,
    /// Floats all motors at once. Defined by the firmware, never issued by the polling loop.
    EmergencyStop = 4,
    TimeoutSettings = 5,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Values fields start after the message type byte
const VALUES_ORIGIN: usize = 1;

/// Largest encoder offset magnitude whose width still fits the 5-bit width field
pub const MAX_ENCODER_OFFSET: u32 = (1 << 30) - 1;

/// Check that a reply payload carries the expected message type
pub fn check_reply(address: u8, payload: &[u8], expected: MessageType) -> Result<()> {
    match payload.first() {
        Some(&tag) if tag == expected.tag() => Ok(()),
        Some(&tag) => Err(BrickError::UnexpectedMessage {
            address,
            expected: expected.tag(),
            got: tag,
        }),
        None => Err(BrickError::ShortReply { address, len: 0 }),
    }
}

/// Sensor configuration of one port, captured when a request is encoded so that
/// the reply is decoded with the same layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    pub sensor_type: SensorType,
    pub i2c: I2cChannel,
}

impl PortLayout {
    pub fn capture(state: &DeviceState, controller: usize) -> [PortLayout; PORTS_PER_CONTROLLER] {
        std::array::from_fn(|local| {
            let port = port_index(controller, local);
            PortLayout {
                sensor_type: state.sensors[port].sensor_type,
                i2c: state.i2c[port],
            }
        })
    }
}

fn write_encoder_offset(cursor: &mut FieldCursor<'_>, offset: i32) {
    if offset == 0 {
        cursor.write(1, 0);
        return;
    }
    let magnitude = offset.unsigned_abs().min(MAX_ENCODER_OFFSET);
    let width = bits_needed(magnitude) + 1;
    cursor.write(1, 1);
    cursor.write(5, u32::from(width));
    cursor.write(width, (magnitude << 1) | u32::from(offset < 0));
}

fn read_encoder_offset(cursor: &mut FieldCursor<'_>) -> i32 {
    if cursor.read(1) == 0 {
        return 0;
    }
    let width = cursor.read(5) as u8;
    read_signed(cursor, width)
}

/// Sign in the LSB, magnitude above it
fn read_signed(cursor: &mut FieldCursor<'_>, width: u8) -> i32 {
    let raw = cursor.read(width);
    let magnitude = (raw >> 1) as i32;
    if raw & 0x01 == 1 { -magnitude } else { magnitude }
}

fn signed_field(value: i32) -> (u8, u32) {
    let magnitude = value.unsigned_abs().min(MAX_ENCODER_OFFSET);
    let field = (magnitude << 1) | u32::from(value < 0);
    (bits_needed(field), field)
}

fn motor_word(motor: &MotorState) -> u32 {
    let magnitude = u32::from(motor.speed.unsigned_abs()).min(MAX_SPEED as u32);
    let direction = u32::from(motor.speed < 0);
    let enable = u32::from(motor.enabled);
    ((magnitude & 0xFF) << 2) | (direction << 1) | enable
}

/// Encode the values request for `controller` into `buf`.
///
/// Returns the number of payload bytes to transmit.
pub fn encode_values(state: &DeviceState, controller: usize, buf: &mut BitBuffer) -> usize {
    buf.clear();
    buf.bytes_mut()[0] = MessageType::Values.tag();
    let ports: [usize; PORTS_PER_CONTROLLER] =
        std::array::from_fn(|local| port_index(controller, local));

    let mut cursor = FieldCursor::new(buf, VALUES_ORIGIN);
    for &port in &ports {
        write_encoder_offset(&mut cursor, state.motors[port].encoder_offset);
    }
    for &port in &ports {
        cursor.write(10, motor_word(&state.motors[port]));
    }
    for &port in &ports {
        if !state.sensors[port].sensor_type.uses_i2c_channel() {
            continue;
        }
        for device in state.i2c[port].active_devices() {
            if device.is_same() {
                continue;
            }
            let write_len = device.write_len();
            cursor.write(4, u32::from(write_len));
            cursor.write(4, u32::from(device.read_len()));
            for &byte in &device.out_bytes[..usize::from(write_len)] {
                cursor.write(8, u32::from(byte));
            }
        }
    }

    VALUES_ORIGIN + cursor.bit_offset().div_ceil(8)
}

/// Decoded values reply of one sub-controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesReply {
    pub encoders: [i32; PORTS_PER_CONTROLLER],
    pub readings: [SensorReading; PORTS_PER_CONTROLLER],
    sensor_types: [SensorType; PORTS_PER_CONTROLLER],
}

/// Decode a values reply payload (message type byte included)
pub fn decode_values(
    payload: &[u8],
    layouts: &[PortLayout; PORTS_PER_CONTROLLER],
    buf: &mut BitBuffer,
) -> ValuesReply {
    buf.load(payload);
    let mut cursor = FieldCursor::new(buf, VALUES_ORIGIN);

    let widths = [cursor.read(5) as u8, cursor.read(5) as u8];
    let encoders = widths.map(|width| read_signed(&mut cursor, width));
    let readings = [
        decode_port(layouts[0].sensor_type, &layouts[0].i2c, &mut cursor),
        decode_port(layouts[1].sensor_type, &layouts[1].i2c, &mut cursor),
    ];

    ValuesReply {
        encoders,
        readings,
        sensor_types: layouts.map(|layout| layout.sensor_type),
    }
}

impl ValuesReply {
    /// Write positions and readings into the state.
    ///
    /// A port whose sensor type changed since the request keeps its previous reading.
    pub fn commit(&self, state: &mut DeviceState, controller: usize) {
        for local in 0..PORTS_PER_CONTROLLER {
            let port = port_index(controller, local);
            state.motors[port].encoder_position = self.encoders[local];

            if state.sensors[port].sensor_type != self.sensor_types[local] {
                continue;
            }
            let reading = &self.readings[local];
            state.sensors[port].value = reading.value();
            match reading {
                SensorReading::FullColor { channels, .. } => {
                    state.sensors[port].aux_values = channels.map(i32::from);
                }
                SensorReading::I2cBus(bus) | SensorReading::Ultrasonic { bus, .. } => {
                    let channel = &mut state.i2c[port];
                    for device in 0..MAX_I2C_DEVICES {
                        if !bus.is_present(device) {
                            continue;
                        }
                        let len = usize::from(channel.devices[device].read_len());
                        channel.devices[device].in_bytes[..len]
                            .copy_from_slice(&bus.data[device][..len]);
                    }
                }
                _ => {}
            }
        }
    }
}

/// I2C transfer requested in a values request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cWrite {
    pub local_port: usize,
    pub device: usize,
    pub read_len: u8,
    pub bytes: Vec<u8>,
}

/// Values request as seen by a sub-controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesRequest {
    pub encoder_offsets: [i32; PORTS_PER_CONTROLLER],
    pub speeds: [i16; PORTS_PER_CONTROLLER],
    pub enabled: [bool; PORTS_PER_CONTROLLER],
    pub i2c_writes: Vec<I2cWrite>,
}

/// Parse a values request payload (board side of the link)
pub fn parse_values_request(
    payload: &[u8],
    layouts: &[PortLayout; PORTS_PER_CONTROLLER],
    buf: &mut BitBuffer,
) -> ValuesRequest {
    buf.load(payload);
    let mut cursor = FieldCursor::new(buf, VALUES_ORIGIN);

    let encoder_offsets = [
        read_encoder_offset(&mut cursor),
        read_encoder_offset(&mut cursor),
    ];
    let mut speeds = [0i16; PORTS_PER_CONTROLLER];
    let mut enabled = [false; PORTS_PER_CONTROLLER];
    for local in 0..PORTS_PER_CONTROLLER {
        let word = cursor.read(10);
        let magnitude = (word >> 2) as i16;
        speeds[local] = if word & 0x02 != 0 { -magnitude } else { magnitude };
        enabled[local] = word & 0x01 == 1;
    }

    let mut i2c_writes = Vec::new();
    for (local, layout) in layouts.iter().enumerate() {
        if !layout.sensor_type.uses_i2c_channel() {
            continue;
        }
        for (device, config) in layout.i2c.active_devices().iter().enumerate() {
            if config.is_same() {
                continue;
            }
            let write_len = cursor.read(4) as usize;
            let read_len = cursor.read(4) as u8;
            let bytes = (0..write_len).map(|_| cursor.read(8) as u8).collect();
            i2c_writes.push(I2cWrite {
                local_port: local,
                device,
                read_len,
                bytes,
            });
        }
    }

    ValuesRequest {
        encoder_offsets,
        speeds,
        enabled,
        i2c_writes,
    }
}

/// Encode a values reply payload (board side of the link)
pub fn encode_values_reply(
    encoders: [i32; PORTS_PER_CONTROLLER],
    readings: &[SensorReading; PORTS_PER_CONTROLLER],
    layouts: &[PortLayout; PORTS_PER_CONTROLLER],
    buf: &mut BitBuffer,
) -> Vec<u8> {
    buf.clear();
    buf.bytes_mut()[0] = MessageType::Values.tag();
    let fields = encoders.map(signed_field);

    let mut cursor = FieldCursor::new(buf, VALUES_ORIGIN);
    for &(width, _) in &fields {
        cursor.write(5, u32::from(width));
    }
    for &(width, field) in &fields {
        cursor.write(width, field);
    }
    for (reading, layout) in readings.iter().zip(layouts) {
        encode_port(reading, &layout.i2c, &mut cursor);
    }

    let len = VALUES_ORIGIN + cursor.bit_offset().div_ceil(8);
    buf.bytes()[..len].to_vec()
}
