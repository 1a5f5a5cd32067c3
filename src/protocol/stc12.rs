//! STC10/11/12 series machine.
//!
//! First generation on dialect B: even parity, 16-bit frame checksums.
//! The handshake is initiated by the host with a 0x50 packet, the erase
//! ack may carry the 7-byte UID, and programming ends with an explicit
//! finalization exchange.

use crate::framing::{checksum8, Dialect};
use crate::models::McuModel;
use crate::options::{self, OptionCodec};
use crate::{Error, Result};

use super::{
    be16, bsl_version, calculate_baud_brt8, erase_blocks, mean_freq_counter, BslProtocol, Session,
    SessionConfig,
};

const PROGRAM_BLOCKSIZE: usize = 128;
const ERASE_COUNTDOWN: u8 = 0x0d;

pub struct Stc12 {
    session: Session,
}

impl Stc12 {
    pub fn new(link: Box<dyn crate::serial::SerialLink>, config: SessionConfig) -> Self {
        Self {
            session: Session::new(link, Dialect::B, config),
        }
    }

    fn initialize_status(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 27 {
            return Err(Error::proto("invalid status packet"));
        }
        self.session.magic = be16(packet, 20)?;
        let counter = mean_freq_counter(packet, 8);
        self.session.clock_hz = self.session.handshake_baud as f64 * counter * 12.0 / 7.0;
        self.session.bsl_version = bsl_version(packet);
        Ok(())
    }
}

impl BslProtocol for Stc12 {
    fn connect(&mut self) -> Result<()> {
        let packet = self.session.sync_status(|s| {
            let packet = s.read_packet()?;
            if packet.first() != Some(&0x50) {
                return Err(Error::proto("incorrect magic in status packet"));
            }
            Ok(packet)
        })?;

        self.initialize_status(&packet)?;
        self.session.initialize_model();
        self.session.codec = Some(OptionCodec::new(
            options::stc12::OPTIONS,
            packet[23..27].to_vec(),
        ));
        self.session.report_options();
        Ok(())
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.session.apply_option(name, value)
    }

    fn handshake(&mut self) -> Result<()> {
        let params = calculate_baud_brt8(self.session.clock_hz, self.session.transfer_baud)?;
        let handshake_baud = self.session.handshake_baud;

        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));

        // The MCU wants to see the handshake opened before any rate probing.
        let mut packet = vec![0x50, 0x00, 0x00, 0x36, 0x01];
        packet.extend_from_slice(&self.session.magic.to_be_bytes());
        self.session.write_packet(&packet)?;
        self.session.expect(0x8f, "handshake")?;

        self.session.progress.note("testing");
        let packet = [
            0x8f,
            0xc0,
            params.brt as u8,
            0x3f,
            params.brt_csum,
            params.delay,
            params.iap_wait,
        ];
        self.session.write_packet(&packet)?;
        self.session.switch_to_transfer_baud()?;
        let response = self.session.read_packet()?;
        self.session.set_baud(handshake_baud)?;
        if response.first() != Some(&0x8f) {
            return Err(Error::proto("incorrect magic in handshake packet"));
        }

        self.session.progress.note("setting");
        let packet = [0x8e, 0xc0, params.brt as u8, 0x3f, params.brt_csum, params.delay];
        self.session.write_packet(&packet)?;
        self.session.switch_to_transfer_baud()?;
        self.session.expect(0x84, "handshake")?;

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

    fn erase_flash(&mut self, erase_size: u32, flash_size: u32) -> Result<()> {
        let blocks = erase_blocks(erase_size);
        let size = erase_blocks(flash_size);
        self.session
            .progress
            .begin(&format!("Erasing {blocks} blocks"));
        let mut packet = vec![
            0x84, 0xff, 0x00, blocks, 0x00, 0x00, size, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        packet.extend((ERASE_COUNTDOWN + 1..=0x80).rev());
        self.session.write_packet(&packet)?;
        let response = self.session.expect(0x00, "erase")?;
        self.session.progress.done();

        // Some BSL revisions already return the UID here.
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
            let mut packet = vec![0x00, 0x00, 0x00];
            packet.extend_from_slice(&addr.to_be_bytes());
            packet.extend_from_slice(&(PROGRAM_BLOCKSIZE as u16).to_be_bytes());
            packet.extend_from_slice(chunk);
            packet.resize(PROGRAM_BLOCKSIZE + 7, 0x00);
            let csum = checksum8(&packet[7..]);

            self.session.write_packet(&packet)?;
            let response = self.session.expect(0x00, "write")?;
            if response.get(1) != Some(&csum) {
                return Err(Error::proto("verification checksum mismatch"));
            }
            self.session.progress.tick();
        }
        self.session.progress.done();

        self.session.progress.begin("Finishing write");
        let mut packet = vec![0x69, 0x00, 0x00, 0x36, 0x01];
        packet.extend_from_slice(&self.session.magic.to_be_bytes());
        self.session.write_packet(&packet)?;
        self.session.expect(0x8d, "finish")?;
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
        let mut packet = vec![0x8d];
        packet.extend_from_slice(&msr);
        packet.extend_from_slice(&[0xff; 12]);
        packet.extend_from_slice(&(self.session.clock_hz as u32).to_be_bytes());
        self.session.write_packet(&packet)?;
        let response = self.session.expect(0x50, "option")?;
        self.session.progress.done();

        // The UID arrives here when the erase ack did not carry it.
        if self.session.uid.is_none() && response.len() >= 25 {
            self.session.uid = Some(response[18..25].to_vec());
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
        256
    }
}
