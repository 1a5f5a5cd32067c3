//! Scripted serial link and frame helpers shared by the integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use stc_isp::framing::{checksum16, checksum8, Dialect, DIR_MCU};
use stc_isp::protocol::SessionConfig;
use stc_isp::serial::{Parity, SerialLink};

/// Session config with the wait intervals zeroed so scripted runs do not
/// sleep.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        pulse_interval: std::time::Duration::ZERO,
        baud_switch_delay: std::time::Duration::ZERO,
        ..SessionConfig::default()
    }
}

#[derive(Default)]
pub struct Inner {
    pub reads: VecDeque<u8>,
    pub written: Vec<u8>,
    pub baud_changes: Vec<u32>,
    pub parity_changes: Vec<Parity>,
}

/// Handle on the mock's state that survives moving the link into a machine.
#[derive(Clone, Default)]
pub struct MockState(Arc<Mutex<Inner>>);

impl MockState {
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.0.lock().unwrap().reads.extend(bytes.iter().copied());
    }

    /// Queue a canned MCU response packet under the given dialect.
    pub fn queue_packet(&self, dialect: Dialect, payload: &[u8]) {
        self.queue_bytes(&mcu_frame(dialect, payload));
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    pub fn baud_changes(&self) -> Vec<u32> {
        self.0.lock().unwrap().baud_changes.clone()
    }
}

/// [`SerialLink`] fed from a canned byte script.
///
/// Once the script runs dry every operation reports a broken pipe, which
/// ends the pulse loop instead of spinning forever.
pub struct MockLink {
    state: MockState,
}

impl MockLink {
    pub fn new() -> (Self, MockState) {
        let state = MockState::default();
        (Self { state: state.clone() }, state)
    }
}

impl SerialLink for MockLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.state.0.lock().unwrap().written.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self.state.0.lock().unwrap();
        if inner.reads.is_empty() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        for slot in buf.iter_mut() {
            match inner.reads.pop_front() {
                Some(b) => *slot = b,
                None => return Err(io::ErrorKind::TimedOut.into()),
            }
        }
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        self.state.0.lock().unwrap().baud_changes.push(baud);
        Ok(())
    }

    fn set_parity(&mut self, parity: Parity) -> io::Result<()> {
        self.state.0.lock().unwrap().parity_changes.push(parity);
        Ok(())
    }

    fn set_dtr(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }

    fn input_pending(&mut self) -> io::Result<bool> {
        let inner = self.state.0.lock().unwrap();
        if inner.reads.is_empty() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        Ok(true)
    }
}

/// Build an MCU->host frame for a canned payload.
pub fn mcu_frame(dialect: Dialect, payload: &[u8]) -> Vec<u8> {
    let mut frame = stc_isp::framing::encode(dialect, payload);
    frame[2] = DIR_MCU;
    let len = frame.len();
    match dialect.checksum_width {
        1 => frame[len - 2] = checksum8(&frame[2..len - 2]),
        _ => {
            let sum = checksum16(&frame[2..len - 3]);
            frame[len - 3] = (sum >> 8) as u8;
            frame[len - 2] = sum as u8;
        }
    }
    frame
}

/// Split the host-side byte stream back into packet payloads, skipping
/// pulses and raw nudge bytes.
pub fn host_payloads(dialect: Dialect, written: &[u8]) -> Vec<Vec<u8>> {
    let chk = dialect.checksum_width as usize;
    let mut payloads = Vec::new();
    let mut i = 0;
    while i + 5 <= written.len() {
        if written[i] == 0x46 && written[i + 1] == 0xB9 && written[i + 2] == 0x6A {
            let len = u16::from_be_bytes([written[i + 3], written[i + 4]]) as usize;
            let total = len + 2;
            if len >= 4 + chk && i + total <= written.len() {
                payloads.push(written[i + 5..i + len + 1 - chk].to_vec());
                i += total;
                continue;
            }
        }
        i += 1;
    }
    payloads
}
