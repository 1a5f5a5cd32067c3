//! Later STC15 series machine.
//!
//! Calibration works over (trim adjust, trim range) pairs rather than a
//! flat 16-bit trim word, and the status packet may carry a factory
//! calibrated clock directly. Targets running from an external crystal
//! skip calibration entirely; the divisor is computed from the measured
//! clock and the factory trim pair is restored when options are written.
//!
//! Models without a hardware UART (magic prefix 0xF2) derive their baud
//! clock differently; the divisor drops the usual factor of four. That
//! prefix rule is only confirmed for registered parts, so unknown 0xF2
//! magics earn a warning.

use crate::framing::Dialect;
use crate::models::McuModel;
use crate::options::{self, OptionCodec};
use crate::{Error, Result};

use super::{
    be16, be32, bsl_version, choose_range, choose_trim, BslProtocol, Session, SessionConfig,
    PROGRAM_FREQ_HZ,
};

const PROGRAM_BLOCKSIZE: usize = 64;
/// Flash commands carry this authorization key since BSL 7.2.
const AUTH_KEY: [u8; 2] = [0x5a, 0xa5];
/// Raw nudge bytes sent between a trim challenge and its response.
const TRIM_NUDGE: [u8; 4] = [0x92, 0x92, 0x92, 0x92];

pub struct Stc15 {
    session: Session,
    bsl_version_byte: u8,
    external_clock: bool,
    /// Factory trim adjust for 24 MHz, range 0x40.
    freq_count_24: u8,
    wakeup_freq: u16,
    trim_value: (u8, u8),
    trimmed_freq: u32,
}

impl Stc15 {
    pub fn new(link: Box<dyn crate::serial::SerialLink>, config: SessionConfig) -> Self {
        Self {
            session: Session::new(link, Dialect::B, config),
            bsl_version_byte: 0,
            external_clock: false,
            freq_count_24: 0,
            wakeup_freq: 0,
            trim_value: (0, 0),
            trimmed_freq: 0,
        }
    }

    fn keyed(&self) -> bool {
        self.bsl_version_byte >= 0x72
    }

    fn initialize_status(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 22 {
            return Err(Error::proto("invalid status packet"));
        }
        self.session.magic = be16(packet, 20)?;

        // One status bit selects external-clock mode; the clock is then a
        // direct counter reading instead of the stored calibrated value.
        self.external_clock = packet[7] & 0x01 == 0;
        if self.external_clock {
            let count = be16(packet, 13)?;
            self.session.clock_hz = self.session.handshake_baud as f64 * count as f64;
        } else {
            self.session.clock_hz = be32(packet, 8)? as f64;
        }

        self.freq_count_24 = packet[4];
        self.wakeup_freq = be16(packet, 1)?;
        self.session.bsl_version = bsl_version(packet);
        self.bsl_version_byte = packet[17];

        if (self.session.magic >> 8) == 0xf2 && crate::models::find_model(self.session.magic).is_none()
        {
            log::warn!(
                "magic {:04X} is outside the registry; assuming no hardware UART for 0xF2 parts",
                self.session.magic
            );
        }
        Ok(())
    }

    /// Calibrate the user and programming frequencies, then switch rates.
    fn calibrate(&mut self) -> Result<()> {
        let user_speed = if self.session.trim_frequency > 0.0 {
            self.session.trim_frequency
        } else {
            self.session.clock_hz
        };
        let half_baud = self.session.handshake_baud as f64 / 2.0;
        let target_user_count = (user_speed / half_baud).round() as u32;
        let target_prog_count = (PROGRAM_FREQ_HZ / half_baud).round() as u32;

        self.session.progress.begin("Trimming frequency");

        // Round 1: three points in each of four trim ranges.
        let mut challenge = vec![0x00, 12];
        challenge.extend_from_slice(&[0x00, 0xc0, 0x80, 0xc0, 0xff, 0xc0]);
        challenge.extend_from_slice(&[0x00, 0x80, 0x80, 0x80, 0xff, 0x80]);
        challenge.extend_from_slice(&[0x00, 0x40, 0x80, 0x40, 0xff, 0x40]);
        challenge.extend_from_slice(&[0x00, 0x00, 0x80, 0x00, 0xc0, 0x00]);
        self.session.write_packet(&challenge)?;
        self.session.write_raw(&TRIM_NUDGE)?;
        let response = self.session.expect(0x00, "handshake")?;

        let user_trim = choose_range(&challenge, &response, target_user_count);
        let prog_trim = choose_range(&challenge, &response, target_prog_count);
        let (Some(user_trim), Some(prog_trim)) = (user_trim, prog_trim) else {
            return Err(Error::proto("frequency trimming unsuccessful"));
        };

        // Round 2: six fine values around each estimate.
        let mut challenge = vec![0x00, 12];
        for i in user_trim.0 - 3..user_trim.0 + 3 {
            challenge.extend_from_slice(&[i as u8, user_trim.1]);
        }
        for i in prog_trim.0 - 3..prog_trim.0 + 3 {
            challenge.extend_from_slice(&[i as u8, prog_trim.1]);
        }
        self.session.write_packet(&challenge)?;
        self.session.write_raw(&TRIM_NUDGE)?;
        let response = self.session.expect(0x00, "handshake")?;

        let user = choose_trim(&challenge, &response, target_user_count);
        let prog = choose_trim(&challenge, &response, target_prog_count);
        let (Some((user_pair, user_count)), Some((prog_pair, _))) = (user, prog) else {
            return Err(Error::proto("frequency trimming unsuccessful"));
        };
        self.trim_value = user_pair;
        self.trimmed_freq = (user_count as f64 * half_baud).round() as u32;
        self.session
            .progress
            .note(&format!("{:.3} MHz", self.trimmed_freq as f64 / 1e6));
        self.session.progress.done();

        // Switch to the programming frequency and the transfer rate. Models
        // without a hardware UART clock their soft UART differently.
        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));
        let bauds = if (self.session.magic >> 8) == 0xf2 {
            self.session.transfer_baud as f64
        } else {
            self.session.transfer_baud as f64 * 4.0
        };
        let mut packet = vec![0x01, prog_pair.0, prog_pair.1];
        packet.extend_from_slice(&((65535.0 - PROGRAM_FREQ_HZ / bauds) as u16).to_be_bytes());
        packet
            .extend_from_slice(&((65535.0 - PROGRAM_FREQ_HZ / bauds * 1.5) as u16).to_be_bytes());
        packet.push(0x83);
        self.session.write_packet(&packet)?;
        self.session.expect(0x01, "handshake")?;
        self.session.switch_to_transfer_baud()?;
        Ok(())
    }

    /// Direct divisor path for crystal-clocked targets.
    fn switch_baud_external(&mut self) -> Result<()> {
        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));
        let divisor = 65535.0 - self.session.clock_hz / self.session.transfer_baud as f64 / 4.0;
        let mut packet = vec![0x01, self.freq_count_24, 0x40];
        packet.extend_from_slice(&(divisor as u16).to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x00, 0x83]);
        self.session.write_packet(&packet)?;
        self.session.expect(0x01, "handshake")?;
        self.session.switch_to_transfer_baud()?;

        // Keep the factory 24 MHz trim so switching back to the RC
        // oscillator stays possible after programming.
        self.trim_value = (self.freq_count_24, 0x40);
        self.trimmed_freq = 24_000_000;
        Ok(())
    }
}

impl BslProtocol for Stc15 {
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
        let mut msr = packet[5..8].to_vec();
        msr.push(packet[12]);
        self.session.codec = Some(OptionCodec::new(options::stc15::OPTIONS, msr));
        self.session.report_options();
        Ok(())
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.session.apply_option(name, value)
    }

    fn handshake(&mut self) -> Result<()> {
        if self.external_clock {
            self.switch_baud_external()?;
        } else {
            self.calibrate()?;
        }

        // Prepare for flash operations at the new rate.
        let mut packet = vec![0x05];
        if self.keyed() {
            packet.extend_from_slice(&[0x00, 0x00]);
            packet.extend_from_slice(&AUTH_KEY);
        }
        self.session.write_packet(&packet)?;
        self.session.expect(0x05, "handshake")?;
        self.session.progress.done();
        Ok(())
    }

    fn erase_flash(&mut self, _erase_size: u32, _flash_size: u32) -> Result<()> {
        // This generation always erases everything.
        self.session.progress.begin("Erasing flash");
        let mut packet = vec![0x03, 0x00];
        if self.keyed() {
            packet.push(0x00);
            packet.extend_from_slice(&AUTH_KEY);
        }
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
            if self.keyed() {
                packet.extend_from_slice(&AUTH_KEY);
            }
            packet.extend_from_slice(chunk);
            if packet.len() < PROGRAM_BLOCKSIZE + 3 {
                packet.resize(PROGRAM_BLOCKSIZE + 3, 0x00);
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
        if msr.len() < 4 {
            return Err(Error::proto("options not available before connect"));
        }

        let freq = self.trimmed_freq;
        let mut packet = vec![0x04, 0x00, 0x00];
        if self.keyed() {
            packet.extend_from_slice(&AUTH_KEY);
        }
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
        packet.push(msr[3]);
        packet.extend_from_slice(&[0xff; 27]);
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
