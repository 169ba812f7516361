// BrickPi driver: owns the poller and runs it on a dedicated thread
//
// Clients change motor targets and sensor types through the shared state at any
// time; the polling thread picks them up at the start of its next exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::{BrickError, Result};
use super::poll::{CycleReport, Poller};
use super::state::{DeviceState, SharedState, lock_state};
use super::transport::{SerialTransport, Transport};

/// Pause target between the starts of two poll cycles
pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_millis(10);

/// Longest a cycle can take: two color sensor setups plus every values retry
pub const STOP_GRACE: Duration = Duration::from_secs(11);

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    returned: mpsc::Receiver<Poller>,
}

/// Driver for one BrickPi board
pub struct BrickPi {
    state: SharedState,
    poller: Option<Poller>,
    worker: Option<Worker>,
    cycle_period: Duration,
}

impl BrickPi {
    /// Connect to the board on `port` (`"auto"` to detect it)
    pub fn open(port: &str) -> Result<Self> {
        let transport = SerialTransport::open(port)?;
        info!("Opened BrickPi on {}", transport.port_name());
        Ok(Self::with_transport(Box::new(transport)))
    }

    /// Drive the board through any transport
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            state: DeviceState::new().into_shared(),
            poller: Some(Poller::new(transport)),
            worker: None,
            cycle_period: DEFAULT_CYCLE_PERIOD,
        }
    }

    pub fn with_cycle_period(mut self, period: Duration) -> Self {
        self.cycle_period = period;
        self
    }

    /// Shared state handle, for clients living on other threads
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Run `f` with the state locked
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut lock_state(&self.state))
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the polling thread; does nothing if it is already running
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            debug!("Polling thread already running");
            return Ok(());
        }
        let mut poller = self.poller.take().ok_or(BrickError::PollerLost)?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, returned) = mpsc::channel();
        let state = Arc::clone(&self.state);
        let flag = Arc::clone(&running);
        let period = self.cycle_period;

        let spawned = thread::Builder::new()
            .name("brickpi-poll".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    poller.run_cycle(&state);
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                poller.reset_transport();
                // The receiver is gone only if the driver gave up waiting
                let _ = tx.send(poller);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err(BrickError::Io(e)),
        };
        self.worker = Some(Worker {
            running,
            handle,
            returned,
        });
        info!("Polling thread started");
        Ok(())
    }

    /// Stop the polling thread once its in-flight cycle completes
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.running.store(false, Ordering::Release);

        match worker.returned.recv_timeout(STOP_GRACE) {
            Ok(poller) => {
                if worker.handle.join().is_err() {
                    warn!("Polling thread panicked after its last cycle");
                }
                self.poller = Some(poller);
                info!("Polling thread stopped");
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Polling thread still busy after {:?}", STOP_GRACE);
                self.worker = Some(worker);
                Err(BrickError::StopTimeout(STOP_GRACE))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                Err(BrickError::PollerLost)
            }
        }
    }

    /// Run a single cycle on the caller's thread; the polling loop must be stopped
    pub fn poll_once(&mut self) -> Result<CycleReport> {
        if self.worker.is_some() {
            return Err(BrickError::PollingActive);
        }
        let poller = self.poller.as_mut().ok_or(BrickError::PollerLost)?;
        Ok(poller.run_cycle(&self.state))
    }

    /// Reprogram the logical address of `controller`; the polling loop must be stopped
    pub fn change_address(&mut self, controller: usize, new_address: u8) -> Result<()> {
        if self.worker.is_some() {
            return Err(BrickError::PollingActive);
        }
        let poller = self.poller.as_mut().ok_or(BrickError::PollerLost)?;
        poller.change_address(&self.state, controller, new_address)
    }
}

impl Drop for BrickPi {
    fn drop(&mut self) {
        // Safety measure: leave the motors stopped
        lock_state(&self.state).stop_all_motors();
        if let Err(e) = self.stop() {
            warn!("Failed to stop polling thread on drop: {}", e);
            return;
        }
        if let Some(poller) = self.poller.as_mut() {
            if !poller.run_cycle(&self.state).all_committed() {
                warn!("Motor stop not acknowledged by every controller");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::state::{MotorPort, SensorPort};
    use crate::brick::testing::{ScriptedTransport, reply, sent_with_tag};

    fn acknowledging() -> ScriptedTransport {
        // Raw ports with no encoder motion: 30 zero bits after the tag
        ScriptedTransport::new(|_, payload| match payload[0] {
            2 => Some(reply(&[2])),
            3 => Some(reply(&[3, 0, 0, 0, 0])),
            _ => None,
        })
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut brick = BrickPi::with_transport(Box::new(acknowledging()))
            .with_cycle_period(Duration::from_millis(1));
        brick.start().expect("start");
        assert!(brick.is_running());
        brick.start().expect("second start");
        assert!(brick.is_running());

        brick.stop().expect("stop");
        assert!(!brick.is_running());
        brick.stop().expect("second stop");
    }

    #[test]
    fn test_restart_after_stop() {
        let transport = acknowledging();
        let log = transport.sent_log();
        let mut brick = BrickPi::with_transport(Box::new(transport))
            .with_cycle_period(Duration::from_millis(1));

        brick.start().expect("start");
        thread::sleep(Duration::from_millis(20));
        brick.stop().expect("stop");
        let sent = log.lock().expect("sent log lock").len();
        assert!(sent > 0);

        brick.start().expect("restart");
        thread::sleep(Duration::from_millis(20));
        brick.stop().expect("stop again");
        assert!(log.lock().expect("sent log lock").len() > sent);
    }

    #[test]
    fn test_poll_once_and_motor_targets() {
        let transport = acknowledging();
        let log = transport.sent_log();
        let mut brick = BrickPi::with_transport(Box::new(transport));
        brick.with_state(|state| {
            state.set_motor_speed(MotorPort::B, 200);
            state.set_motor_enabled(MotorPort::B, true);
        });

        let report = brick.poll_once().expect("poll");
        assert!(report.all_committed());

        let values = sent_with_tag(&log, 3);
        // Port B's motor word follows port A's in the first request
        let request = &values[0].1;
        let word_b = (u32::from(request[2]) >> 4) | ((u32::from(request[3]) & 0x3F) << 4);
        assert_eq!(word_b, (200 << 2) | 1);
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut brick = BrickPi::with_transport(Box::new(acknowledging()))
            .with_cycle_period(Duration::from_millis(1));
        brick.start().expect("start");
        assert!(matches!(brick.poll_once(), Err(BrickError::PollingActive)));
        assert!(matches!(
            brick.change_address(0, 5),
            Err(BrickError::PollingActive)
        ));
        brick.stop().expect("stop");
        assert!(brick.poll_once().is_ok());
    }

    #[test]
    fn test_drop_stops_motors() {
        let transport = acknowledging();
        let log = transport.sent_log();
        let brick = BrickPi::with_transport(Box::new(transport));
        let state = brick.state();
        lock_state(&state).set_motor_speed(MotorPort::A, 100);
        lock_state(&state).set_motor_enabled(MotorPort::A, true);
        lock_state(&state).set_sensor_type(SensorPort::S1, crate::brick::SensorType::Touch);

        drop(brick);
        assert_eq!(lock_state(&state).motor(MotorPort::A).speed, 0);
        let values = sent_with_tag(&log, 3);
        // Last request to controller 0 carries disabled motors only
        let (_, last) = values
            .iter()
            .rev()
            .find(|(address, _)| *address == 1)
            .expect("request to controller 0");
        assert!(last[1..].iter().all(|&b| b == 0));
    }
}
