//! STC8 series machine.
//!
//! Structurally the later-15 machine with a few deltas: flash commands are
//! always keyed, the trim nudge byte changed, the coarse challenge covers
//! a fourth trim range, and new parts ship without any factory calibration.
//! An uncalibrated part cannot measure its own clock, so programming one
//! requires an explicit trim target.

use crate::framing::Dialect;
use crate::models::McuModel;
use crate::options::{self, OptionCodec};
use crate::{Error, Result};

use super::{be16, choose_range, choose_trim, BslProtocol, Session, SessionConfig};

const PROGRAM_BLOCKSIZE: usize = 64;
const AUTH_KEY: [u8; 2] = [0x5a, 0xa5];
/// The STC8 BSL wants 0xFE nudges, not the 0x92 of the 15 series.
const TRIM_NUDGE: [u8; 4] = [0xfe, 0xfe, 0xfe, 0xfe];

pub struct Stc8 {
    session: Session,
    calibrated: bool,
    wakeup_freq: u16,
    trim_value: (u8, u8),
    trimmed_freq: u32,
}

impl Stc8 {
    pub fn new(link: Box<dyn crate::serial::SerialLink>, config: SessionConfig) -> Self {
        Self {
            session: Session::new(link, Dialect::B, config),
            calibrated: false,
            wakeup_freq: 0,
            trim_value: (0, 0),
            trimmed_freq: 0,
        }
    }

    fn initialize_status(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 39 {
            return Err(Error::proto("invalid status packet"));
        }
        self.session.magic = be16(packet, 20)?;

        // All-ones trim reference means the part left the factory without
        // calibration; its counter readings are meaningless then.
        self.calibrated = packet[1] != 0xff;
        let count = be16(packet, 13)?;
        self.session.clock_hz = if self.calibrated {
            count as f64 * self.session.handshake_baud as f64 / 2.0
        } else {
            0.0
        };

        self.wakeup_freq = be16(packet, 23)?;
        let version = packet[17];
        let minor = packet[22] & 0x0f;
        self.session.bsl_version = format!(
            "{}.{}.{}{}",
            version >> 4,
            version & 0x0f,
            minor,
            packet[18] as char
        );
        Ok(())
    }

    fn calibrate(&mut self) -> Result<()> {
        if !self.calibrated && self.session.trim_frequency <= 0.0 {
            return Err(Error::proto("frequency trimming unsuccessful"));
        }
        let user_speed = if self.session.trim_frequency > 0.0 {
            self.session.trim_frequency
        } else {
            self.session.clock_hz
        };
        let half_baud = self.session.handshake_baud as f64 / 2.0;
        let target_count = (user_speed / half_baud).round() as u32;

        self.session.progress.begin("Trimming frequency");

        // Round 1: three points in each of the four trim ranges.
        let mut challenge = vec![0x00, 12];
        challenge.extend_from_slice(&[0x00, 0x00, 0x80, 0x00, 0xff, 0x00]);
        challenge.extend_from_slice(&[0x00, 0x80, 0x80, 0x80, 0xff, 0x80]);
        challenge.extend_from_slice(&[0x00, 0xc0, 0x80, 0xc0, 0xff, 0xc0]);
        challenge.extend_from_slice(&[0x00, 0xff, 0x80, 0xff, 0xff, 0xff]);
        self.session.write_packet(&challenge)?;
        self.session.write_raw(&TRIM_NUDGE)?;
        let response = self.session.expect(0x00, "handshake")?;

        let Some(coarse) = choose_range(&challenge, &response, target_count) else {
            return Err(Error::proto("frequency trimming unsuccessful"));
        };

        // Round 2: twelve fine values around the estimate.
        let mut challenge = vec![0x00, 12];
        for i in coarse.0 - 5..coarse.0 + 7 {
            challenge.extend_from_slice(&[i as u8, coarse.1]);
        }
        self.session.write_packet(&challenge)?;
        self.session.write_raw(&TRIM_NUDGE)?;
        let response = self.session.expect(0x00, "handshake")?;

        let Some((pair, count)) = choose_trim(&challenge, &response, target_count) else {
            return Err(Error::proto("frequency trimming unsuccessful"));
        };
        self.trim_value = pair;
        self.trimmed_freq = (count as f64 * half_baud).round() as u32;
        self.session
            .progress
            .note(&format!("{:.3} MHz", self.trimmed_freq as f64 / 1e6));
        self.session.progress.done();

        // Programming runs at the trimmed frequency; derive the divisor
        // from it.
        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));
        let bauds = self.session.transfer_baud as f64 * 4.0;
        let divisor = 65535.0 - self.trimmed_freq as f64 / bauds;
        let mut packet = vec![0x01, pair.0, pair.1];
        packet.extend_from_slice(&(divisor as u16).to_be_bytes());
        packet.extend_from_slice(
            &((65535.0 - self.trimmed_freq as f64 / bauds * 1.5) as u16).to_be_bytes(),
        );
        packet.push(0x83);
        self.session.write_packet(&packet)?;
        self.session.expect(0x01, "handshake")?;
        self.session.switch_to_transfer_baud()?;
        Ok(())
    }
}

impl BslProtocol for Stc8 {
    fn connect(&mut self) -> Result<()> {
        let packet = self.session.sync_status(|s| {
            let mut packet = s.read_packet()?;
            if packet.first() == Some(&0x80) {
                s.write_packet(&[0x80])?;
                s.pulse()?;
                packet = s.read_packet()?;
            }
            if packet.first() != Some(&0x50) {
                return Err(Error::proto("incorrect magic in status packet"));
            }
            Ok(packet)
        })?;

        self.initialize_status(&packet)?;
        self.session.initialize_model();
        self.session.progress.line(&format!(
            "Target wakeup frequency: {:.3} KHz",
            self.wakeup_freq as f64 / 1000.0
        ));
        let mut msr = packet[9..12].to_vec();
        msr.extend_from_slice(&packet[15..17]);
        self.session.codec = Some(OptionCodec::new(options::stc8::OPTIONS, msr));
        self.session.report_options();
        Ok(())
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.session.apply_option(name, value)
    }

    fn handshake(&mut self) -> Result<()> {
        self.calibrate()?;

        let mut packet = vec![0x05, 0x00, 0x00];
        packet.extend_from_slice(&AUTH_KEY);
        self.session.write_packet(&packet)?;
        self.session.expect(0x05, "handshake")?;
        self.session.progress.done();
        Ok(())
    }

    fn erase_flash(&mut self, _erase_size: u32, _flash_size: u32) -> Result<()> {
        self.session.progress.begin("Erasing flash");
        let mut packet = vec![0x03, 0x00, 0x00];
        packet.extend_from_slice(&AUTH_KEY);
        self.session.write_packet(&packet)?;
        let response = self.session.expect(0x03, "erase")?;
        self.session.progress.done();

        if response.len() >= 8 {
            self.session.uid = Some(response[1..8].to_vec());
        }
        Ok(())
    }

    fn program_flash(&mut self, data: &[u8]) -> Result<()> {
        self.session
            .progress
            .begin(&format!("Writing {} bytes", data.len()));
        for (index, chunk) in data.chunks(PROGRAM_BLOCKSIZE).enumerate() {
            let addr = (index * PROGRAM_BLOCKSIZE) as u16;
            let first = index == 0;
            let mut packet = vec![if first { 0x22 } else { 0x02 }];
            packet.extend_from_slice(&addr.to_be_bytes());
            packet.extend_from_slice(&AUTH_KEY);
            packet.extend_from_slice(chunk);
            if packet.len() < PROGRAM_BLOCKSIZE + 5 {
                packet.resize(PROGRAM_BLOCKSIZE + 5, 0x00);
            }

            self.session.write_packet(&packet)?;
            let response = self.session.read_packet()?;
            if response.first() != Some(&0x02) || response.get(1) != Some(&0x54) {
                return Err(Error::proto("incorrect magic in write packet"));
            }
            self.session.progress.tick();
        }
        self.session.progress.done();
        Ok(())
    }

    fn program_options(&mut self) -> Result<()> {
        self.session.progress.begin("Setting options");
        let msr = self
            .session
            .codec
            .as_ref()
            .map(|c| c.msr().to_vec())
            .unwrap_or_default();
        if msr.len() < 5 {
            return Err(Error::proto("options not available before connect"));
        }

        let freq = self.trimmed_freq;
        let mut packet = vec![0x04, 0x00, 0x00];
        packet.extend_from_slice(&AUTH_KEY);
        packet.extend_from_slice(&[0xff; 23]);
        packet.extend_from_slice(&[
            (freq >> 24) as u8,
            0xff,
            (freq >> 16) as u8,
            0xff,
            (freq >> 8) as u8,
            0xff,
            freq as u8,
            0xff,
        ]);
        // Options proper, with the code/EEPROM split point alongside.
        packet.push(msr[3]);
        packet.push(msr[4]);
        packet.extend_from_slice(&[0xff; 26]);
        packet.push(self.trim_value.0);
        packet.push(self.trim_value.1.wrapping_add(0x3f));
        packet.extend_from_slice(&msr[0..3]);
        self.session.write_packet(&packet)?;
        let response = self.session.read_packet()?;
        if response.first() != Some(&0x04) || response.get(1) != Some(&0x54) {
            return Err(Error::proto("incorrect magic in option packet"));
        }
        self.session.progress.done();

        if self.session.uid.is_none() && response.len() >= 9 {
            self.session.uid = Some(response[2..9].to_vec());
        }
        self.session.report_uid();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect()
    }

    fn model(&self) -> Option<McuModel> {
        self.session.model
    }

    fn image_alignment(&self) -> usize {
        512
    }
}
