// Timeouts, topics, board configuration
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_MOTORS: &str = "brickpi/cmd/motors"; // motor commands
pub const TOPIC_CMD_SENSORS: &str = "brickpi/cmd/sensors"; // sensor type assignments
pub const TOPIC_STATE_BOARD: &str = "brickpi/state/board"; // encoders and sensor readings
pub const TOPIC_HEALTH: &str = "brickpi/state/health"; // health status

// Board configuration
// Serial port of the BrickPi on a Raspberry Pi ("auto" to detect)
pub const SERIAL_PORT: &str = "/dev/ttyAMA0";

// Sub-controller motor timeout, ms without a values exchange before motors float
pub const BOARD_TIMEOUT_MS: u32 = 1000;
