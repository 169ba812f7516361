// Scripted transport for poll cycle tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::{BrickError, Result};
use super::frame::{decode_request, encode_reply};
use super::transport::Transport;

/// Answers a request `(address, payload)` with a raw reply frame, or nothing
pub type Responder = Box<dyn FnMut(u8, &[u8]) -> Option<Vec<u8>> + Send>;

/// Requests seen by a [`ScriptedTransport`], as `(address, payload)`
pub type SentLog = Arc<Mutex<Vec<(u8, Vec<u8>)>>>;

pub struct ScriptedTransport {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    sent: SentLog,
    resets: Arc<Mutex<usize>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(u8, &[u8]) -> Option<Vec<u8>> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(Mutex::new(0)),
        }
    }

    /// Transport that never answers
    pub fn silent() -> Self {
        Self::new(|_, _| None)
    }

    pub fn sent_log(&self) -> SentLog {
        Arc::clone(&self.sent)
    }

    pub fn reset_count(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.resets)
    }
}

/// Wrap a reply payload into a valid reply frame
pub fn reply(payload: &[u8]) -> Vec<u8> {
    encode_reply(payload).expect("reply payload fits a frame")
}

/// Payloads sent with message type `tag`, as `(address, payload)`
pub fn sent_with_tag(log: &SentLog, tag: u8) -> Vec<(u8, Vec<u8>)> {
    log.lock()
        .expect("sent log lock")
        .iter()
        .filter(|(_, payload)| payload.first() == Some(&tag))
        .cloned()
        .collect()
}

impl Transport for ScriptedTransport {
    fn send(&mut self, address: u8, frame: &[u8]) -> Result<()> {
        let (frame_address, payload) = decode_request(frame)?;
        assert_eq!(frame_address, address, "frame addressed elsewhere");
        self.sent
            .lock()
            .expect("sent log lock")
            .push((address, payload.to_vec()));
        if let Some(answer) = (self.responder)(address, payload) {
            self.pending.push_back(answer);
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        self.pending.pop_front().ok_or(BrickError::Timeout)
    }

    fn reset(&mut self) {
        self.pending.clear();
        *self.resets.lock().expect("reset counter lock") += 1;
    }
}
