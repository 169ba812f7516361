// Sensor type tags and per-port reading codec
//
// The sensor type assigned to a port is the only thing that decides how many bits
// its reading occupies in a values reply and how those bits are post-processed.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::bits::FieldCursor;
use super::state::{I2C_BUFFER_LEN, I2cChannel, MAX_I2C_DEVICES};

/// Sensor type tags, as sent in the setup message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[default]
    Raw = 0,
    LightOn = 0x01 | 0x08,
    Touch = 32,
    UltrasonicCont = 33,
    UltrasonicSs = 34,
    RcxLight = 35,
    ColorFull = 36,
    ColorRed = 37,
    ColorGreen = 38,
    ColorBlue = 39,
    ColorNone = 40,
    I2c = 41,
    #[serde(rename = "i2c_9v")]
    I2c9V = 42,

    Ev3UsM0 = 43, // distance, cm
    Ev3UsM1 = 44, // distance, in
    Ev3UsM2 = 45, // listen
    Ev3UsM3 = 46,
    Ev3UsM4 = 47,
    Ev3UsM5 = 48,
    Ev3UsM6 = 49,

    Ev3ColorM0 = 50, // reflected
    Ev3ColorM1 = 51, // ambient
    Ev3ColorM2 = 52, // color index
    Ev3ColorM3 = 53, // raw reflected
    Ev3ColorM4 = 54, // raw components
    Ev3ColorM5 = 55,

    Ev3GyroM0 = 56, // angle
    Ev3GyroM1 = 57, // rotational speed
    Ev3GyroM2 = 58,
    Ev3GyroM3 = 59,
    Ev3GyroM4 = 60,

    Ev3InfraredM0 = 61, // proximity
    Ev3InfraredM1 = 62, // seek
    Ev3InfraredM2 = 63, // remote
    Ev3InfraredM3 = 64,
    Ev3InfraredM4 = 65,
    Ev3InfraredM5 = 66,

    Ev3Touch0 = 67,
    Ev3TouchDebounce = 68,
    TouchDebounce = 69,
}

/// Field layout family of a sensor type in the values reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingClass {
    /// 1 bit
    Touch,
    /// 8 bits
    Distance,
    /// 3-bit status, then background, red, green and blue on 10 bits each
    FullColor,
    /// Presence bitmap, then the read bytes of every present device
    I2cBus,
    /// Same as `I2cBus`, reported as device 0's first byte or -1
    UltrasonicI2c,
    /// 32 bits, no adjustment
    Wide32,
    /// 16 bits; gyro angle and rate wrap at 32767
    Wide16 { wrap_correction: bool },
    /// 10 bits
    Generic10,
}

impl SensorType {
    /// LIGHT_OFF shares the raw tag
    pub const LIGHT_OFF: SensorType = SensorType::Raw;

    pub const ALL: [SensorType; 40] = [
        SensorType::Raw,
        SensorType::LightOn,
        SensorType::Touch,
        SensorType::UltrasonicCont,
        SensorType::UltrasonicSs,
        SensorType::RcxLight,
        SensorType::ColorFull,
        SensorType::ColorRed,
        SensorType::ColorGreen,
        SensorType::ColorBlue,
        SensorType::ColorNone,
        SensorType::I2c,
        SensorType::I2c9V,
        SensorType::Ev3UsM0,
        SensorType::Ev3UsM1,
        SensorType::Ev3UsM2,
        SensorType::Ev3UsM3,
        SensorType::Ev3UsM4,
        SensorType::Ev3UsM5,
        SensorType::Ev3UsM6,
        SensorType::Ev3ColorM0,
        SensorType::Ev3ColorM1,
        SensorType::Ev3ColorM2,
        SensorType::Ev3ColorM3,
        SensorType::Ev3ColorM4,
        SensorType::Ev3ColorM5,
        SensorType::Ev3GyroM0,
        SensorType::Ev3GyroM1,
        SensorType::Ev3GyroM2,
        SensorType::Ev3GyroM3,
        SensorType::Ev3GyroM4,
        SensorType::Ev3InfraredM0,
        SensorType::Ev3InfraredM1,
        SensorType::Ev3InfraredM2,
        SensorType::Ev3InfraredM3,
        SensorType::Ev3InfraredM4,
        SensorType::Ev3InfraredM5,
        SensorType::Ev3Touch0,
        SensorType::Ev3TouchDebounce,
        SensorType::TouchDebounce,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Color sensors need seconds to initialize after a setup message
    pub fn is_color_family(self) -> bool {
        matches!(
            self,
            SensorType::ColorFull
                | SensorType::ColorRed
                | SensorType::ColorGreen
                | SensorType::ColorBlue
                | SensorType::ColorNone
                | SensorType::Ev3ColorM0
                | SensorType::Ev3ColorM1
                | SensorType::Ev3ColorM2
                | SensorType::Ev3ColorM3
                | SensorType::Ev3ColorM4
                | SensorType::Ev3ColorM5
        )
    }

    /// Types relayed through the port's I2C channel
    pub fn uses_i2c_channel(self) -> bool {
        matches!(
            self,
            SensorType::I2c | SensorType::I2c9V | SensorType::UltrasonicCont
        )
    }

    /// Type announced to the sub-controller; the continuous ultrasonic sensor is driven as I2C
    pub fn wire_type(self) -> SensorType {
        match self {
            SensorType::UltrasonicCont => SensorType::I2c,
            other => other,
        }
    }

    pub fn reading_class(self) -> ReadingClass {
        match self {
            SensorType::Touch => ReadingClass::Touch,
            SensorType::UltrasonicSs => ReadingClass::Distance,
            SensorType::ColorFull => ReadingClass::FullColor,
            SensorType::I2c | SensorType::I2c9V => ReadingClass::I2cBus,
            SensorType::UltrasonicCont => ReadingClass::UltrasonicI2c,
            SensorType::Ev3InfraredM2 | SensorType::Ev3GyroM3 | SensorType::Ev3ColorM3 => {
                ReadingClass::Wide32
            }
            SensorType::Ev3GyroM0 | SensorType::Ev3GyroM1 => ReadingClass::Wide16 {
                wrap_correction: true,
            },
            SensorType::Ev3UsM0
            | SensorType::Ev3UsM1
            | SensorType::Ev3UsM2
            | SensorType::Ev3UsM3
            | SensorType::Ev3UsM4
            | SensorType::Ev3UsM5
            | SensorType::Ev3UsM6
            | SensorType::Ev3ColorM0
            | SensorType::Ev3ColorM1
            | SensorType::Ev3ColorM2
            | SensorType::Ev3ColorM4
            | SensorType::Ev3ColorM5
            | SensorType::Ev3GyroM2
            | SensorType::Ev3GyroM4
            | SensorType::Ev3InfraredM0
            | SensorType::Ev3InfraredM1
            | SensorType::Ev3InfraredM3
            | SensorType::Ev3InfraredM4
            | SensorType::Ev3InfraredM5
            | SensorType::Ev3Touch0 => ReadingClass::Wide16 {
                wrap_correction: false,
            },
            SensorType::Raw
            | SensorType::LightOn
            | SensorType::RcxLight
            | SensorType::ColorRed
            | SensorType::ColorGreen
            | SensorType::ColorBlue
            | SensorType::ColorNone
            | SensorType::Ev3TouchDebounce
            | SensorType::TouchDebounce => ReadingClass::Generic10,
        }
    }
}

impl TryFrom<u8> for SensorType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        SensorType::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or(tag)
    }
}

impl FromStr for SensorType {
    type Err = String;

    /// Parse the snake_case name used in JSON messages (`touch`, `ev3_gyro_m0`, ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| format!("unknown sensor type '{}'", s))
    }
}

/// Bytes read back from the devices of an I2C channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cInputs {
    /// Bit `d` set when device `d` answered
    pub presence: u8,
    pub data: [[u8; I2C_BUFFER_LEN]; MAX_I2C_DEVICES],
}

impl I2cInputs {
    pub fn empty() -> Self {
        Self {
            presence: 0,
            data: [[0; I2C_BUFFER_LEN]; MAX_I2C_DEVICES],
        }
    }

    pub fn is_present(&self, device: usize) -> bool {
        device < MAX_I2C_DEVICES && self.presence & (1 << device) != 0
    }
}

/// Index of the ultrasonic device on its synthesized I2C channel
pub const US_I2C_DEVICE: usize = 0;

/// Indices of the full-color channels in `aux_values`
pub const INDEX_RED: usize = 0;
pub const INDEX_GREEN: usize = 1;
pub const INDEX_BLUE: usize = 2;
pub const INDEX_BACKGROUND: usize = 3;

/// One port's decoded reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    Touch(bool),
    Distance(u8),
    /// `channels` is indexed by `INDEX_RED`..`INDEX_BACKGROUND`
    FullColor { status: u8, channels: [u16; 4] },
    I2cBus(I2cInputs),
    Ultrasonic { distance: Option<u8>, bus: I2cInputs },
    Wide32(i32),
    Wide16(i32),
    Generic10(u16),
}

impl SensorReading {
    /// Zero reading with the layout of `sensor_type`
    pub fn zero_for(sensor_type: SensorType) -> Self {
        match sensor_type.reading_class() {
            ReadingClass::Touch => SensorReading::Touch(false),
            ReadingClass::Distance => SensorReading::Distance(0),
            ReadingClass::FullColor => SensorReading::FullColor {
                status: 0,
                channels: [0; 4],
            },
            ReadingClass::I2cBus => SensorReading::I2cBus(I2cInputs::empty()),
            ReadingClass::UltrasonicI2c => SensorReading::Ultrasonic {
                distance: None,
                bus: I2cInputs::empty(),
            },
            ReadingClass::Wide32 => SensorReading::Wide32(0),
            ReadingClass::Wide16 { .. } => SensorReading::Wide16(0),
            ReadingClass::Generic10 => SensorReading::Generic10(0),
        }
    }

    /// Main value stored in the sensor state
    pub fn value(&self) -> i32 {
        match *self {
            SensorReading::Touch(pressed) => i32::from(pressed),
            SensorReading::Distance(d) => i32::from(d),
            SensorReading::FullColor { status, .. } => i32::from(status),
            SensorReading::I2cBus(bus) => i32::from(bus.presence),
            SensorReading::Ultrasonic { distance, .. } => distance.map_or(-1, i32::from),
            SensorReading::Wide32(v) | SensorReading::Wide16(v) => v,
            SensorReading::Generic10(v) => i32::from(v),
        }
    }
}

/// Undo the 16-bit wrap of gyro angle and rate readings.
///
/// The boundary is 65535, not 65536: raw 40000 reads as -25535.
fn gyro_wrap(raw: i32) -> i32 {
    if raw >= 32767 { raw - 65535 } else { raw }
}

fn decode_i2c(channel: &I2cChannel, cursor: &mut FieldCursor<'_>) -> I2cInputs {
    let devices = usize::from(channel.device_count).min(MAX_I2C_DEVICES);
    let mut inputs = I2cInputs::empty();
    inputs.presence = cursor.read(devices as u8) as u8;
    for (device, config) in channel.devices.iter().enumerate().take(devices) {
        if !inputs.is_present(device) {
            continue;
        }
        let read_len = usize::from(config.read_len).min(I2C_BUFFER_LEN);
        for byte in inputs.data[device].iter_mut().take(read_len) {
            *byte = cursor.read(8) as u8;
        }
    }
    inputs
}

fn encode_i2c(inputs: &I2cInputs, channel: &I2cChannel, cursor: &mut FieldCursor<'_>) {
    let devices = usize::from(channel.device_count).min(MAX_I2C_DEVICES);
    let presence = u32::from(inputs.presence) & ((1u32 << devices) - 1);
    cursor.write(devices as u8, presence);
    for (device, config) in channel.devices.iter().enumerate().take(devices) {
        if presence & (1 << device) == 0 {
            continue;
        }
        let read_len = usize::from(config.read_len).min(I2C_BUFFER_LEN);
        for &byte in inputs.data[device].iter().take(read_len) {
            cursor.write(8, u32::from(byte));
        }
    }
}

/// Decode one port's reading from a values reply.
///
/// `channel` is only consulted by the I2C classes.
pub fn decode_port(
    sensor_type: SensorType,
    channel: &I2cChannel,
    cursor: &mut FieldCursor<'_>,
) -> SensorReading {
    match sensor_type.reading_class() {
        ReadingClass::Touch => SensorReading::Touch(cursor.read(1) == 1),
        ReadingClass::Distance => SensorReading::Distance(cursor.read(8) as u8),
        ReadingClass::FullColor => {
            let status = cursor.read(3) as u8;
            let mut channels = [0u16; 4];
            for index in [INDEX_BACKGROUND, INDEX_RED, INDEX_GREEN, INDEX_BLUE] {
                channels[index] = cursor.read(10) as u16;
            }
            SensorReading::FullColor { status, channels }
        }
        ReadingClass::I2cBus => SensorReading::I2cBus(decode_i2c(channel, cursor)),
        ReadingClass::UltrasonicI2c => {
            let bus = decode_i2c(channel, cursor);
            let distance = bus
                .is_present(US_I2C_DEVICE)
                .then_some(bus.data[US_I2C_DEVICE][0]);
            SensorReading::Ultrasonic { distance, bus }
        }
        ReadingClass::Wide32 => SensorReading::Wide32(cursor.read(32) as i32),
        ReadingClass::Wide16 { wrap_correction } => {
            let raw = cursor.read(16) as i32;
            SensorReading::Wide16(if wrap_correction { gyro_wrap(raw) } else { raw })
        }
        ReadingClass::Generic10 => SensorReading::Generic10(cursor.read(10) as u16),
    }
}

/// Encode one port's reading the way a sub-controller does (board side of the link)
pub fn encode_port(reading: &SensorReading, channel: &I2cChannel, cursor: &mut FieldCursor<'_>) {
    match reading {
        SensorReading::Touch(pressed) => cursor.write(1, u32::from(*pressed)),
        SensorReading::Distance(d) => cursor.write(8, u32::from(*d)),
        SensorReading::FullColor { status, channels } => {
            cursor.write(3, u32::from(*status));
            for index in [INDEX_BACKGROUND, INDEX_RED, INDEX_GREEN, INDEX_BLUE] {
                cursor.write(10, u32::from(channels[index]));
            }
        }
        SensorReading::I2cBus(bus) => encode_i2c(bus, channel, cursor),
        SensorReading::Ultrasonic { distance, bus } => {
            let mut bus = *bus;
            match distance {
                Some(d) => {
                    bus.presence |= 1 << US_I2C_DEVICE;
                    bus.data[US_I2C_DEVICE][0] = *d;
                }
                None => bus.presence &= !(1 << US_I2C_DEVICE),
            }
            encode_i2c(&bus, channel, cursor);
        }
        SensorReading::Wide32(v) => cursor.write(32, *v as u32),
        SensorReading::Wide16(v) => {
            let raw = if *v < 0 { *v + 65535 } else { *v };
            cursor.write(16, raw as u32);
        }
        SensorReading::Generic10(v) => cursor.write(10, u32::from(*v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::bits::BitBuffer;
    use crate::brick::state::I2cDevice;

    fn decode_raw(sensor_type: SensorType, bits: u8, raw: u32) -> SensorReading {
        let mut buf = BitBuffer::new();
        FieldCursor::new(&mut buf, 1).write(bits, raw);
        buf.reset_cursor();
        decode_port(sensor_type, &I2cChannel::default(), &mut FieldCursor::new(&mut buf, 1))
    }

    #[test]
    fn test_tags_round_trip() {
        for t in SensorType::ALL {
            assert_eq!(SensorType::try_from(t.tag()), Ok(t));
        }
        assert_eq!(SensorType::try_from(1), Err(1));
        assert_eq!(SensorType::LightOn.tag(), 9);
        assert_eq!(SensorType::LIGHT_OFF.tag(), 0);
        assert_eq!(SensorType::TouchDebounce.tag(), 69);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("touch".parse::<SensorType>(), Ok(SensorType::Touch));
        assert_eq!("EV3_GYRO_M0".parse::<SensorType>(), Ok(SensorType::Ev3GyroM0));
        assert_eq!("i2c_9v".parse::<SensorType>(), Ok(SensorType::I2c9V));
        assert!("laser".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_field_widths() {
        let mut channel = I2cChannel::default();
        channel.device_count = 3;
        let cases = [
            (SensorType::Touch, 1),
            (SensorType::UltrasonicSs, 8),
            (SensorType::ColorFull, 43),
            (SensorType::I2c, 3),
            (SensorType::UltrasonicCont, 3),
            (SensorType::Ev3GyroM3, 32),
            (SensorType::Ev3InfraredM2, 32),
            (SensorType::Ev3UsM0, 16),
            (SensorType::Ev3Touch0, 16),
            (SensorType::Ev3GyroM1, 16),
            (SensorType::Raw, 10),
            (SensorType::TouchDebounce, 10),
            (SensorType::ColorRed, 10),
        ];
        for (sensor_type, width) in cases {
            let mut buf = BitBuffer::new();
            decode_port(sensor_type, &channel, &mut FieldCursor::new(&mut buf, 1));
            assert_eq!(buf.bit_offset(), width, "{:?}", sensor_type);
        }
    }

    #[test]
    fn test_gyro_wrap_correction() {
        assert_eq!(
            decode_raw(SensorType::Ev3GyroM0, 16, 40000),
            SensorReading::Wide16(-25535)
        );
        assert_eq!(
            decode_raw(SensorType::Ev3GyroM0, 16, 100),
            SensorReading::Wide16(100)
        );
        assert_eq!(
            decode_raw(SensorType::Ev3GyroM1, 16, 32767),
            SensorReading::Wide16(-32768)
        );
        assert_eq!(
            decode_raw(SensorType::Ev3GyroM1, 16, 32766),
            SensorReading::Wide16(32766)
        );
        // Other 16-bit modes are left alone
        assert_eq!(
            decode_raw(SensorType::Ev3UsM0, 16, 40000),
            SensorReading::Wide16(40000)
        );
    }

    #[test]
    fn test_wide32_is_signed() {
        assert_eq!(
            decode_raw(SensorType::Ev3InfraredM2, 32, 0xFFFF_FFFF).value(),
            -1
        );
    }

    #[test]
    fn test_ultrasonic_sentinel() {
        let mut channel = I2cChannel::default();
        channel.device_count = 1;
        channel.devices[0].read_len = 1;

        // Presence bit of device 0 cleared: nothing else follows
        let mut buf = BitBuffer::new();
        let reading = decode_port(
            SensorType::UltrasonicCont,
            &channel,
            &mut FieldCursor::new(&mut buf, 1),
        );
        assert_eq!(reading.value(), -1);
        assert_eq!(buf.bit_offset(), 1);

        // Device present, first byte is the distance
        let mut buf = BitBuffer::new();
        let mut cursor = FieldCursor::new(&mut buf, 1);
        cursor.write(1, 1);
        cursor.write(8, 87);
        buf.reset_cursor();
        let reading = decode_port(
            SensorType::UltrasonicCont,
            &channel,
            &mut FieldCursor::new(&mut buf, 1),
        );
        assert_eq!(reading.value(), 87);
    }

    #[test]
    fn test_i2c_reads_only_present_devices() {
        let mut channel = I2cChannel::default();
        channel.device_count = 2;
        channel.devices[0] = I2cDevice::new(0x10, &[], 2);
        channel.devices[1] = I2cDevice::new(0x20, &[], 3);

        let mut inputs = I2cInputs::empty();
        inputs.presence = 0b10;
        inputs.data[1][..3].copy_from_slice(&[7, 8, 9]);
        // Device 0 is absent, its bytes must not be sent
        inputs.data[0][0] = 0xEE;

        let mut buf = BitBuffer::new();
        encode_port(
            &SensorReading::I2cBus(inputs),
            &channel,
            &mut FieldCursor::new(&mut buf, 1),
        );
        assert_eq!(buf.bit_offset(), 2 + 3 * 8);

        buf.reset_cursor();
        let reading = decode_port(SensorType::I2c, &channel, &mut FieldCursor::new(&mut buf, 1));
        let SensorReading::I2cBus(bus) = reading else {
            panic!("expected I2C reading, got {:?}", reading);
        };
        assert_eq!(bus.presence, 0b10);
        assert_eq!(&bus.data[1][..3], &[7, 8, 9]);
        assert_eq!(bus.data[0][0], 0);
        assert_eq!(reading.value(), 2);
    }

    #[test]
    fn test_full_color_channel_order() {
        let mut buf = BitBuffer::new();
        let mut cursor = FieldCursor::new(&mut buf, 1);
        cursor.write(3, 5);
        // background, red, green, blue on the wire
        for v in [11, 22, 33, 44] {
            cursor.write(10, v);
        }
        buf.reset_cursor();
        let reading = decode_port(
            SensorType::ColorFull,
            &I2cChannel::default(),
            &mut FieldCursor::new(&mut buf, 1),
        );
        let mut channels = [0u16; 4];
        channels[INDEX_BACKGROUND] = 11;
        channels[INDEX_RED] = 22;
        channels[INDEX_GREEN] = 33;
        channels[INDEX_BLUE] = 44;
        assert_eq!(
            reading,
            SensorReading::FullColor {
                status: 5,
                channels
            }
        );
        assert_eq!(reading.value(), 5);
    }

    #[test]
    fn test_color_family() {
        assert!(SensorType::ColorFull.is_color_family());
        assert!(SensorType::Ev3ColorM5.is_color_family());
        assert!(!SensorType::Ev3GyroM0.is_color_family());
        assert!(!SensorType::Touch.is_color_family());
    }
}
