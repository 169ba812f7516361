// Byte transport to the sub-controllers
//
// The polling loop only needs "send a frame" and "wait for a reply frame with a
// deadline". The serial implementation talks to the board's UART; the simulated
// board in `sim.rs` implements the same trait.

use serialport::{self, DataBits, Parity, SerialPort, SerialPortType, StopBits};
use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::{BrickError, Result};
use super::frame::REPLY_HEADER_LEN;

/// The sub-controllers' UART runs at 500 kbaud, 8N1
pub const BAUD_RATE: u32 = 500_000;

/// Port name that asks for auto-detection
pub const AUTO_PORT: &str = "auto";

/// Device names the board's UART shows up under on a Raspberry Pi
const UART_NAMES: &[&str] = &["ttyAMA", "serial0", "ttyS0"];

pub trait Transport: Send {
    /// Send one encoded frame to the sub-controller at `address`
    fn send(&mut self, address: u8, frame: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for a reply frame, header included.
    ///
    /// Returns [`BrickError::Timeout`] when nothing at all arrived.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Drop any partially received data
    fn reset(&mut self) {}
}

/// Serial devices currently driven by this process
static CLAIMED_PORTS: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Exclusive use of a serial device name, released on drop
struct PortClaim {
    port_name: String,
}

impl PortClaim {
    fn acquire(port_name: &str) -> Result<Self> {
        let mut claimed = CLAIMED_PORTS.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(port_name.to_string()) {
            return Err(BrickError::PortBusy {
                port_name: port_name.to_string(),
            });
        }
        Ok(Self {
            port_name: port_name.to_string(),
        })
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        CLAIMED_PORTS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port_name);
    }
}

/// Transport over the board's serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    claim: PortClaim,
}

impl SerialTransport {
    /// Open `port_name`, or the first UART-like device when it is `"auto"`
    pub fn open(port_name: &str) -> Result<Self> {
        let true_name = if port_name == AUTO_PORT {
            guess_port()?
        } else {
            port_name.to_string()
        };

        let claim = PortClaim::acquire(&true_name)?;
        let port = serialport::new(&true_name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(10))
            .open()?;

        debug!("Opened {} @ {} baud", true_name, BAUD_RATE);
        Ok(Self { port, claim })
    }

    pub fn port_name(&self) -> &str {
        &self.claim.port_name
    }
}

/// A reply is complete once its header and the declared payload are in
fn frame_complete(received: &[u8]) -> bool {
    received.len() >= REPLY_HEADER_LEN
        && received.len() >= REPLY_HEADER_LEN + usize::from(received[1])
}

impl Transport for SerialTransport {
    fn send(&mut self, address: u8, frame: &[u8]) -> Result<()> {
        debug!("TX to {}: {:02X?}", address, frame);
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut received = Vec::new();
        let mut chunk = [0u8; 64];

        while !frame_complete(&received) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.port.set_timeout(deadline - now)?;
            match self.port.read(&mut chunk) {
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BrickError::Io(e)),
            }
        }

        if received.is_empty() {
            return Err(BrickError::Timeout);
        }
        debug!("RX: {:02X?}", received);
        Ok(received)
    }

    fn reset(&mut self) {
        if let Err(e) = self.port.clear(serialport::ClearBuffer::Input) {
            debug!("Failed to clear input buffer: {}", e);
        }
    }
}

fn guess_port() -> Result<String> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::Unknown | SerialPortType::PciPort => {
                UART_NAMES.iter().any(|name| info.port_name.contains(name))
            }
            SerialPortType::UsbPort(_) | SerialPortType::BluetoothPort => false,
        })
        .map(|info| info.port_name)
        .next()
        .ok_or(BrickError::NoSerialPort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_complete() {
        assert!(!frame_complete(&[]));
        assert!(!frame_complete(&[0x05]));
        assert!(frame_complete(&[0x00, 0x00]));
        assert!(!frame_complete(&[0x05, 0x02, 0x03]));
        assert!(frame_complete(&[0x05, 0x02, 0x03, 0x00]));
        assert!(frame_complete(&[0x05, 0x02, 0x03, 0x00, 0xFF]));
    }

    #[test]
    fn test_port_claim_is_exclusive() {
        let claim = PortClaim::acquire("/dev/test-claim").expect("first claim");
        assert!(matches!(
            PortClaim::acquire("/dev/test-claim"),
            Err(BrickError::PortBusy { .. })
        ));
        drop(claim);
        assert!(PortClaim::acquire("/dev/test-claim").is_ok());
    }
}
