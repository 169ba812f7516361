use clap::Parser;
use tracing_subscriber::EnvFilter;

use brickpi_zenoh_runtime::brick::{SensorPort, SensorType};
use brickpi_zenoh_runtime::config::{BOARD_TIMEOUT_MS, SERIAL_PORT};
use brickpi_zenoh_runtime::messages::SensorCommand;
use brickpi_zenoh_runtime::runtime::{self, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(name = "brickpi-zenoh-runtime")]
#[command(about = "Bridge a BrickPi board to zenoh")]
struct Args {
    /// Serial port of the board ("auto" to detect)
    #[arg(short, long, default_value = SERIAL_PORT)]
    port: String,

    /// Run against the simulated board
    #[arg(long)]
    simulate: bool,

    /// Sensor assignment, repeatable (e.g. --sensor s1=touch --sensor s4=ev3_gyro_m0)
    #[arg(short, long = "sensor", value_parser = parse_sensor)]
    sensors: Vec<SensorCommand>,

    /// Sub-controller motor timeout in ms
    #[arg(long, default_value_t = BOARD_TIMEOUT_MS)]
    board_timeout: u32,

    /// Keep the motors running when commands go stale
    #[arg(long)]
    no_watchdog: bool,
}

fn parse_sensor(s: &str) -> Result<SensorCommand, String> {
    let (port, sensor_type) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PORT=TYPE, got '{}'", s))?;
    Ok(SensorCommand {
        port: port.trim().parse::<SensorPort>()?,
        sensor_type: sensor_type.trim().parse::<SensorType>()?,
    })
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RuntimeOptions {
        port: args.port,
        simulate: args.simulate,
        sensors: args.sensors,
        board_timeout_ms: args.board_timeout,
        watchdog: !args.no_watchdog,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
