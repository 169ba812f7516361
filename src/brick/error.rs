// Error types for BrickPi communication

/// Reasons an incoming frame is discarded, or an outgoing one cannot be built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("declared length {declared} overruns the {actual} bytes received")]
    LengthOverrun { declared: usize, actual: usize },

    #[error("checksum mismatch: frame says 0x{received:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { received: u8, computed: u8 },

    #[error("payload of {len} bytes does not fit a frame")]
    PayloadTooLong { len: usize },
}

/// Error types for the BrickPi driver
#[derive(Debug, thiserror::Error)]
pub enum BrickError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("Timeout waiting for a reply")]
    Timeout,

    #[error("Controller {address} answered message type {got}, expected {expected}")]
    UnexpectedMessage { address: u8, expected: u8, got: u8 },

    #[error("Controller {address} sent a {len}-byte reply")]
    ShortReply { address: u8, len: usize },

    #[error("Controller {address} rejected the sensor setup")]
    SetupRejected { address: u8 },

    #[error("No serial port found for the BrickPi")]
    NoSerialPort,

    #[error("{port_name:?} is already driven by this process")]
    PortBusy { port_name: String },

    #[error("Polling thread did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("Polling thread exited without handing back the transport")]
    PollerLost,

    #[error("Not possible while the polling loop is running")]
    PollingActive,
}

pub type Result<T> = std::result::Result<T, BrickError>;
