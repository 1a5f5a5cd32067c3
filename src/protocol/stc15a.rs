//! Early STC15 series machine.
//!
//! First generation with a writable RC trim register. The handshake fuses
//! two rounds of trim calibration with the baud switch: a coarse
//! challenge spanning the trim range near the target, linear interpolation
//! across the bracketing samples, then eleven consecutive fine values. The
//! programming clock is calibrated alongside the user clock because flash
//! writes always run at the fixed 22.1184 MHz.

use crate::framing::{checksum8, Dialect};
use crate::models::McuModel;
use crate::options::{self, OptionCodec};
use crate::{Error, Result};

use super::{
    be16, bsl_version, erase_blocks, mean_freq_counter, BslProtocol, Session, SessionConfig,
    PROGRAM_FREQ_HZ,
};

const PROGRAM_BLOCKSIZE: usize = 64;
const ERASE_COUNTDOWN: u8 = 0x5e;

pub struct Stc15A {
    session: Session,
    trim_data: [u8; 7],
    freq_counter: f64,
}

impl Stc15A {
    pub fn new(link: Box<dyn crate::serial::SerialLink>, config: SessionConfig) -> Self {
        Self {
            session: Session::new(link, Dialect::B, config),
            trim_data: [0; 7],
            freq_counter: 0.0,
        }
    }

    fn initialize_status(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 58 {
            return Err(Error::proto("invalid status packet"));
        }
        self.session.magic = be16(packet, 20)?;
        let counter = mean_freq_counter(packet, 4);
        self.session.clock_hz = self.session.handshake_baud as f64 * counter * 12.0 / 7.0;
        self.session.bsl_version = bsl_version(packet);
        self.trim_data.copy_from_slice(&packet[51..58]);
        self.freq_counter = counter;
        Ok(())
    }

    /// Coarse trim challenge pairs for the band `frequency` falls into.
    fn trim_sequence(frequency: f64) -> &'static [u8] {
        if frequency < 7.5e6 {
            &[
                0x18, 0x00, 0x02, 0x00, 0x18, 0x80, 0x02, 0x00,
                0x18, 0x80, 0x02, 0x00, 0x18, 0xff, 0x02, 0x00,
            ]
        } else if frequency < 10e6 {
            &[
                0x18, 0x80, 0x02, 0x00, 0x18, 0xff, 0x02, 0x00,
                0x58, 0x00, 0x02, 0x00, 0x58, 0xff, 0x02, 0x00,
            ]
        } else if frequency < 15e6 {
            &[
                0x58, 0x00, 0x02, 0x00, 0x58, 0x80, 0x02, 0x00,
                0x58, 0x80, 0x02, 0x00, 0x58, 0xff, 0x02, 0x00,
            ]
        } else if frequency < 21e6 {
            &[
                0x58, 0x80, 0x02, 0x00, 0x58, 0xff, 0x02, 0x00,
                0x98, 0x00, 0x02, 0x00, 0x98, 0x80, 0x02, 0x00,
            ]
        } else if frequency < 31e6 {
            &[
                0x98, 0x00, 0x02, 0x00, 0x98, 0x80, 0x02, 0x00,
                0x98, 0x80, 0x02, 0x00, 0x98, 0xff, 0x02, 0x00,
            ]
        } else {
            &[
                0xd8, 0x00, 0x02, 0x00, 0xd8, 0x80, 0x02, 0x00,
                0xd8, 0x80, 0x02, 0x00, 0xd8, 0xb4, 0x02, 0x00,
            ]
        }
    }

    fn interpolate(pair_a: (u16, u16), pair_b: (u16, u16), count: f64) -> Result<f64> {
        let (trim_a, count_a) = (pair_a.0 as f64, pair_a.1 as f64);
        let (trim_b, count_b) = (pair_b.0 as f64, pair_b.1 as f64);
        if count_a == count_b {
            return Err(Error::proto("frequency trimming unsuccessful"));
        }
        let m = (trim_b - trim_a) / (count_b - count_a);
        let n = trim_a - m * count_a;
        Ok(m * count + n)
    }

    fn trim_pair(packet: &[u8], offset: usize) -> Result<(u16, u16)> {
        Ok((be16(packet, offset)?, be16(packet, offset + 2)?))
    }
}

impl BslProtocol for Stc15A {
    fn connect(&mut self) -> Result<()> {
        let packet = self.session.sync_status(|s| {
            let mut packet = s.read_packet()?;
            if packet.first() == Some(&0x80) {
                // BSL pings before it is willing to send status
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
        self.session.codec = Some(OptionCodec::new(
            options::stc15a::OPTIONS,
            packet[23..36].to_vec(),
        ));
        self.session.report_options();
        Ok(())
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.session.apply_option(name, value)
    }

    fn handshake(&mut self) -> Result<()> {
        let user_speed = if self.session.trim_frequency > 0.0 {
            self.session.trim_frequency
        } else {
            self.session.clock_hz
        };
        let user_count = (self.freq_counter * (user_speed / self.session.clock_hz)) as i64;
        let program_count =
            (self.freq_counter * (PROGRAM_FREQ_HZ / self.session.clock_hz)) as i64;

        self.session.progress.begin("Trimming frequency");
        let mut packet = vec![0x50, 0x00, 0x00, 0x36, 0x01];
        packet.extend_from_slice(&self.session.magic.to_be_bytes());
        self.session.write_packet(&packet)?;
        self.session.expect(0x8f, "handshake")?;

        // Round 1: coarse challenges around the user band, then two fixed
        // pairs to calibrate the programming frequency.
        let mut packet = vec![0x65];
        packet.extend_from_slice(&self.trim_data);
        packet.extend_from_slice(&[0xff, 0xff, 0x06, 0x06]);
        packet.extend_from_slice(Self::trim_sequence(user_speed));
        packet.extend_from_slice(&[0x98, 0x00, 0x02, 0x00, 0x98, 0x80, 0x02, 0x00]);
        self.session.write_packet(&packet)?;
        self.session.pulse()?;
        let response = self.session.expect(0x65, "handshake")?;
        if response.len() < 36 {
            return Err(Error::proto("frequency trimming unsuccessful"));
        }

        // Programming-frequency trim from the two dedicated samples.
        let program_trim = Self::interpolate(
            Self::trim_pair(&response, 28)?,
            Self::trim_pair(&response, 32)?,
            program_count as f64,
        )?
        .round() as i64;

        // Select the coarse window for the user frequency.
        let (trim_a, count_a) = Self::trim_pair(&response, 12)?;
        let (trim_b, count_b) = Self::trim_pair(&response, 16)?;
        let (trim_c, count_c) = Self::trim_pair(&response, 20)?;
        let (trim_d, count_d) = Self::trim_pair(&response, 24)?;
        let (window_a, window_b) =
            if count_c as i64 <= user_count && count_d as i64 >= user_count {
                ((trim_c, count_c), (trim_d, count_d))
            } else {
                ((trim_a, count_a), (trim_b, count_b))
            };
        let target_trim = Self::interpolate(window_a, window_b, user_count as f64)?.round() as i64;
        let trim_start = (target_trim - 5)
            .max(window_a.0 as i64)
            .min(window_b.0 as i64);

        // Round 2: eleven consecutive fine-trim values.
        let mut packet = vec![0x65];
        packet.extend_from_slice(&self.trim_data);
        packet.extend_from_slice(&[0xff, 0xff, 0x06, 0x0b]);
        for i in 0..11u16 {
            packet.extend_from_slice(&((trim_start as u16).wrapping_add(i)).to_be_bytes());
            packet.extend_from_slice(&[0x02, 0x00]);
        }
        self.session.write_packet(&packet)?;
        self.session.pulse()?;
        let response = self.session.expect(0x65, "handshake")?;

        let mut best_trim = 0u16;
        let mut best_count = u16::MAX;
        for i in 0..11 {
            let trim = be16(&response, 12 + 4 * i)?;
            let count = be16(&response, 14 + 4 * i)?;
            if (count as i64 - user_count).abs() < (best_count as i64 - user_count).abs() {
                best_trim = trim;
                best_count = count;
            }
        }
        let final_freq = best_count as f64 / self.freq_counter * self.session.clock_hz;
        self.session
            .progress
            .note(&format!("{:.3} MHz", final_freq / 1e6));
        self.session.progress.done();
        if let Some(codec) = self.session.codec.as_mut() {
            codec.set_trim_word(best_trim);
        }

        // Finally, move both sides to the transfer rate at the programming
        // frequency.
        self.session
            .progress
            .begin(&format!("Switching to {} baud", self.session.transfer_baud));
        let mut packet = vec![0x8e];
        packet.extend_from_slice(&(program_trim as u16).to_be_bytes());
        packet.push((230_400 / self.session.transfer_baud) as u8);
        packet.extend_from_slice(&[0xa1, 0x64, 0xb8, 0x00, 0x81, 0x20, 0xff, 0x00]);
        self.session.write_packet(&packet)?;
        self.session.switch_to_transfer_baud()?;
        self.session.expect(0x84, "handshake")?;
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
        packet.extend_from_slice(&[0xff; 6]);
        self.session.write_packet(&packet)?;
        self.session.expect(0x50, "option")?;
        self.session.progress.done();
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
