// 50 Hz bridge between zenoh clients and the BrickPi driver, with a motor watchdog
// Note: if teleop crashes and stops sending commands, the watchdog stops the motors
// instead of letting the board run the last command until its own timeout

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

// local imports
use crate::brick::{BrickPi, SharedState, SimulatedBoard, lock_state};
use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_MOTORS, TOPIC_CMD_SENSORS, TOPIC_HEALTH, TOPIC_STATE_BOARD,
};
use crate::messages::{BoardSnapshot, MotorCommand, RuntimeHealth, SensorCommand};

/// How the runtime reaches the board
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Serial device, or "auto"
    pub port: String,
    /// Drive the simulated board instead of the serial port
    pub simulate: bool,
    /// Sensor types assigned at startup
    pub sensors: Vec<SensorCommand>,
    pub board_timeout_ms: u32,
    /// Stop the motors when motor commands go stale
    pub watchdog: bool,
}

pub struct Runtime {
    state: SharedState,
    cmd_received_at: Option<Instant>,
    health: RuntimeHealth,
    watchdog: bool,
}

impl Runtime {
    pub fn new(state: SharedState, watchdog: bool) -> Self {
        Self {
            state,
            cmd_received_at: None,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            watchdog,
        }
    }

    /// Process incoming motor command
    fn on_motor_command(&mut self, cmd: MotorCommand) {
        info!("Received command: {:?}", &cmd);
        let mut state = lock_state(&self.state);
        state.set_motor_speed(cmd.port, cmd.speed);
        state.set_motor_enabled(cmd.port, cmd.enabled);
        if let Some(offset) = cmd.encoder_offset {
            state.set_encoder_offset(cmd.port, offset);
        }
        self.cmd_received_at = Some(Instant::now());
    }

    fn on_sensor_command(&mut self, cmd: SensorCommand) {
        info!("Sensor {:?} set to {:?}", cmd.port, cmd.sensor_type);
        lock_state(&self.state).set_sensor_type(cmd.port, cmd.sensor_type);
    }

    /// Update health, stopping the motors when commands went stale
    fn check_watchdog(&mut self) {
        let stale = match self.cmd_received_at {
            Some(received_at) => received_at.elapsed() > CMD_TIMEOUT,
            None => true,
        };

        if !stale {
            self.health = RuntimeHealth::Ok;
            return;
        }
        if self.health != RuntimeHealth::CmdStale {
            if let Some(received_at) = self.cmd_received_at {
                warn!("Command stale ({:?} old), stopping motors", received_at.elapsed());
            }
        }
        self.health = RuntimeHealth::CmdStale;
        if self.watchdog {
            lock_state(&self.state).stop_all_motors();
        }
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot::from(&*lock_state(&self.state))
    }
}

fn open_board(options: &RuntimeOptions) -> Result<BrickPi, Box<dyn std::error::Error + Send + Sync>> {
    let mut brick = if options.simulate {
        info!("Using the simulated board");
        BrickPi::with_transport(Box::new(SimulatedBoard::new()))
    } else {
        BrickPi::open(&options.port)?
    };

    brick.with_state(|state| {
        state.set_board_timeout_ms(options.board_timeout_ms);
        for cmd in &options.sensors {
            state.set_sensor_type(cmd.port, cmd.sensor_type);
        }
    });
    brick.start()?;
    Ok(brick)
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut brick = open_board(&options)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_motors = session.declare_subscriber(TOPIC_CMD_MOTORS).await?;
    let sub_sensors = session.declare_subscriber(TOPIC_CMD_SENSORS).await?;
    let pub_board = session.declare_publisher(TOPIC_STATE_BOARD).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(brick.state(), options.watchdog);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout{}",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis(),
        if options.watchdog { "" } else { " (disabled)" }
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_MOTORS, TOPIC_CMD_SENSORS);
    info!("Publishing to: {}, {}", TOPIC_STATE_BOARD, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = sub_sensors.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<SensorCommand>(&payload) {
                Ok(cmd) => runtime.on_sensor_command(cmd),
                Err(e) => warn!("Failed to parse sensor command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_motors.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotorCommand>(&payload) {
                Ok(cmd) => runtime.on_motor_command(cmd),
                Err(e) => warn!("Failed to parse motor command: {}", e),
            }
        }

        // 2. Watchdog
        runtime.check_watchdog();

        // 3. Publish board state
        let board_json = serde_json::to_string(&runtime.snapshot())?;
        pub_board.put(board_json).await?;

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;
    }

    brick.stop()?;
    Ok(())
}
