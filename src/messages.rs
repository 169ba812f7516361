// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::brick::{DeviceState, MotorPort, MotorState, SensorPort, SensorState, SensorType};

// Motor command from teleop/scripts -> runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorCommand {
    pub port: MotorPort,
    /// -255..=255, clamped by the runtime
    pub speed: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sent to the board once, shifts the encoder origin
    #[serde(default)]
    pub encoder_offset: Option<i32>,
}

fn default_enabled() -> bool {
    true
}

// Sensor assignment from scripts -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorCommand {
    pub port: SensorPort,
    pub sensor_type: SensorType,
}

/// One motor in a board snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MotorSnapshot {
    pub port: MotorPort,
    #[serde(flatten)]
    pub state: MotorState,
}

/// One sensor in a board snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SensorSnapshot {
    pub port: SensorPort,
    #[serde(flatten)]
    pub state: SensorState,
}

// State output from runtime -> clients
#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub motors: Vec<MotorSnapshot>,
    pub sensors: Vec<SensorSnapshot>,
}

impl From<&DeviceState> for BoardSnapshot {
    fn from(state: &DeviceState) -> Self {
        Self {
            motors: MotorPort::ALL
                .into_iter()
                .map(|port| MotorSnapshot {
                    port,
                    state: *state.motor(port),
                })
                .collect(),
            sensors: SensorPort::ALL
                .into_iter()
                .map(|port| SensorSnapshot {
                    port,
                    state: *state.sensor(port),
                })
                .collect(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}
