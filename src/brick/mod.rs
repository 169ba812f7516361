// BrickPi protocol engine
//
// Provides:
// - Bit-packed payload codecs for the sensor setup and values exchange messages
// - Frame codec and transports (serial port, simulated board)
// - Poll cycle and the driver running it on a dedicated thread

pub mod bits;
mod driver;
pub mod error;
pub mod frame;
pub mod payload;
pub mod poll;
pub mod sensor;
pub mod setup;
pub mod sim;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use driver::{BrickPi, DEFAULT_CYCLE_PERIOD, STOP_GRACE};
pub use error::{BrickError, FrameError, Result};
pub use poll::{ControllerOutcome, CycleReport, Poller};
pub use sensor::{SensorReading, SensorType};
pub use sim::{SimHandle, SimulatedBoard};
pub use state::{
    DeviceState, I2cDevice, MotorPort, MotorState, SensorPort, SensorState, SharedState,
    lock_state,
};
pub use transport::{AUTO_PORT, SerialTransport, Transport};
