//! STC89/90 series machine.
//!
//! The oldest supported generation: dialect A framing without parity, a
//! 16-bit BRT divisor, and a 6T/12T core mode bit that changes both the
//! clock computation and the UART sample rate.

use crate::framing::{checksum8, Dialect};
use crate::models::McuModel;
use crate::options::{self, OptionCodec};
use crate::{Error, Result};

use super::{
    be16, bsl_version, calculate_baud_brt16, erase_blocks, mean_freq_counter, BslProtocol,
    Session, SessionConfig,
};

const PROGRAM_BLOCKSIZE: usize = 128;

pub struct Stc89 {
    session: Session,
    cpu_6t: bool,
}

impl Stc89 {
    pub fn new(link: Box<dyn crate::serial::SerialLink>, config: SessionConfig) -> Self {
        Self {
            session: Session::new(link, Dialect::A, config),
            cpu_6t: false,
        }
    }

    fn initialize_status(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 22 {
            return Err(Error::proto("invalid status packet"));
        }
        self.session.magic = be16(packet, 20)?;
        self.cpu_6t = packet[19] & 1 == 0;

        let cpu_t = if self.cpu_6t { 6.0 } else { 12.0 };
        let counter = mean_freq_counter(packet, 8);
        self.session.clock_hz = self.session.handshake_baud as f64 * counter * cpu_t / 7.0;
        self.session.bsl_version = bsl_version(packet);
        Ok(())
    }
}

impl BslProtocol for Stc89 {
    fn connect(&mut self) -> Result<()> {
        let packet = self.session.sync_status(|s| {
            let packet = s.read_packet()?;
            if packet.first() != Some(&0x00) {
                return Err(Error::proto("incorrect magic in status packet"));
            }
            Ok(packet)
        })?;

        self.initialize_status(&packet)?;
        self.session.initialize_model();
        self.session.codec = Some(OptionCodec::new(options::stc89::OPTIONS, vec![packet[19]]));
        self.session.report_options();
        Ok(())
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.session.apply_option(name, value)
    }

    fn handshake(&mut self) -> Result<()> {
        let sample_rate = if self.cpu_6t { 16 } else { 32 };
        let params =
            calculate_baud_brt16(self.session.clock_hz, self.session.transfer_baud, sample_rate);
        let handshake_baud = self.session.handshake_baud;

        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));

        // Probe the new rate: command goes out at the old rate, the echo
        // comes back at the new one.
        self.session.progress.note("checking");
        let mut packet = vec![0x8f];
        packet.extend_from_slice(&params.brt.to_be_bytes());
        packet.extend_from_slice(&[
            0xff - (params.brt >> 8) as u8,
            params.brt_csum,
            params.delay,
            params.iap_wait,
        ]);
        self.session.write_packet(&packet)?;
        self.session.switch_to_transfer_baud()?;
        let response = self.session.read_packet()?;
        self.session.set_baud(handshake_baud)?;
        if response.first() != Some(&0x8f) {
            return Err(Error::proto("incorrect magic in handshake packet"));
        }

        // Commit.
        self.session.progress.note("setting");
        let mut packet = vec![0x8e];
        packet.extend_from_slice(&params.brt.to_be_bytes());
        packet.extend_from_slice(&[0xff - (params.brt >> 8) as u8, params.brt_csum, params.delay]);
        self.session.write_packet(&packet)?;
        self.session.switch_to_transfer_baud()?;
        self.session.expect(0x8e, "handshake")?;

        // Ping-pong at the new rate to prove the setting sticks.
        self.session.progress.note("testing");
        let mut packet = vec![0x80, 0x00, 0x00, 0x36, 0x01];
        packet.extend_from_slice(&self.session.magic.to_be_bytes());
        for _ in 0..4 {
            self.session.write_packet(&packet)?;
            self.session.expect(0x80, "handshake")?;
        }

        self.session.progress.done();
        Ok(())
    }

    fn erase_flash(&mut self, erase_size: u32, _flash_size: u32) -> Result<()> {
        let blocks = erase_blocks(erase_size);
        self.session
            .progress
            .begin(&format!("Erasing {blocks} blocks"));
        let packet = [0x84, blocks, 0x33, 0x33, 0x33, 0x33, 0x33, 0x33];
        self.session.write_packet(&packet)?;
        self.session.expect(0x80, "erase")?;
        self.session.progress.done();
        Ok(())
    }

    fn program_flash(&mut self, data: &[u8]) -> Result<()> {
        self.session
            .progress
            .begin(&format!("Writing {} bytes", data.len()));
        for (index, chunk) in data.chunks(PROGRAM_BLOCKSIZE).enumerate() {
            let addr = (index * PROGRAM_BLOCKSIZE) as u16;
            let mut packet = vec![0x00, 0x00, 0x00];
            packet.extend_from_slice(&addr.to_be_bytes());
            packet.extend_from_slice(&(PROGRAM_BLOCKSIZE as u16).to_be_bytes());
            packet.extend_from_slice(chunk);
            packet.resize(PROGRAM_BLOCKSIZE + 7, 0x00);
            let csum = checksum8(&packet[7..]);

            self.session.write_packet(&packet)?;
            let response = self.session.expect(0x80, "write")?;
            if response.get(1) != Some(&csum) {
                return Err(Error::proto("verification checksum mismatch"));
            }
            self.session.progress.tick();
        }
        self.session.progress.done();
        Ok(())
    }

    fn program_options(&mut self) -> Result<()> {
        self.session.progress.begin("Setting options");
        let msr = self.session.codec.as_ref().map(|c| c.msr()[0]).unwrap_or(0xff);
        let packet = [0x8d, msr, 0xff, 0xff, 0xff];
        self.session.write_packet(&packet)?;
        self.session.expect(0x8d, "option")?;
        self.session.progress.done();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect()
    }

    fn model(&self) -> Option<McuModel> {
        self.session.model
    }

    fn image_alignment(&self) -> usize {
        256
    }
}
