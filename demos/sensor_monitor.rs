// Sensor monitor: drives the board directly (no zenoh) and prints every reading
//
// cargo run --example sensor_monitor -- auto s1=touch s2=color_full
// cargo run --example sensor_monitor -- sim s1=touch
use std::env;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use brickpi_zenoh_runtime::brick::{
    BrickPi, SensorPort, SensorReading, SensorType, SimulatedBoard,
};

const PRINT_PERIOD: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut args = env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "auto".to_string());

    let mut brick = if port == "sim" {
        let board = SimulatedBoard::new();
        let sim = board.handle();
        sim.set_reading(SensorPort::S1, SensorReading::Touch(true));
        sim.set_reading(SensorPort::S2, SensorReading::Generic10(512));
        BrickPi::with_transport(Box::new(board))
    } else {
        BrickPi::open(&port)?
    };

    for arg in args {
        let Some((port, sensor_type)) = arg.split_once('=') else {
            warn!("Ignoring '{}', expected PORT=TYPE", arg);
            continue;
        };
        let port: SensorPort = port.parse()?;
        let sensor_type: SensorType = sensor_type.parse()?;
        brick.with_state(|state| state.set_sensor_type(port, sensor_type));
        info!("{:?}: {:?}", port, sensor_type);
    }

    brick.start()?;
    info!("Printing sensor values every {:?}, Ctrl-C to quit", PRINT_PERIOD);

    loop {
        thread::sleep(PRINT_PERIOD);
        let line = brick.with_state(|state| {
            SensorPort::ALL
                .iter()
                .map(|&port| {
                    let sensor = state.sensor(port);
                    if sensor.sensor_type == SensorType::ColorFull {
                        format!("{:?}={} {:?}", port, sensor.value, sensor.aux_values)
                    } else {
                        format!("{:?}={}", port, sensor.value)
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
        });
        info!("{}", line);
    }
}
