//! Firmware image loading and assembly.
//!
//! The flash image sent to the target is `code || padding || eeprom`,
//! padded to the family's block boundary. Overflow past the code segment
//! is allowed but warned about (it lands in the data area on most parts);
//! overflow past the whole part is truncated.

use std::fs;
use std::io;
use std::path::Path;

use crate::ihex::IntelHex;
use crate::models::McuModel;
use crate::Result;

/// Load a firmware image, decoding Intel HEX by file extension
/// (`.hex`, `.ihx`, `.ihex`); anything else is taken as raw binary.
pub fn load(path: &Path) -> Result<Vec<u8>> {
    let is_hex = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "hex" || e == "ihx" || e == "ihex"
        })
        .unwrap_or(false);

    if is_hex {
        let text = fs::read_to_string(path)?;
        let hex = IntelHex::read(&text).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Intel HEX file ({e})"),
            )
        })?;
        let data = hex.extract_data();
        log::info!("{} bytes (Intel HEX)", data.len());
        Ok(data)
    } else {
        let data = fs::read(path)?;
        log::info!("{} bytes (Binary)", data.len());
        Ok(data)
    }
}

/// Concatenate code and optional EEPROM data for one part and pad the
/// result to `alignment` bytes.
pub fn assemble(
    code: &[u8],
    eeprom: Option<&[u8]>,
    model: &McuModel,
    alignment: usize,
) -> Vec<u8> {
    let code_size = model.code as usize;
    let ee_size = model.eeprom as usize;

    let mut image = code.to_vec();
    if image.len() > code_size {
        log::warn!("code image overflows into eeprom segment");
    }
    if image.len() > code_size + ee_size {
        log::warn!("code image truncated");
        image.truncate(code_size + ee_size);
    }

    if let Some(eeprom) = eeprom {
        let mut eeprom = eeprom.to_vec();
        if eeprom.len() > ee_size {
            log::warn!("eeprom image truncated");
            eeprom.truncate(ee_size);
        }
        if image.len() < code_size {
            image.resize(code_size, 0x00);
        } else if image.len() > code_size {
            log::warn!("eeprom image overlaps code image");
            image.truncate(code_size);
        }
        image.extend_from_slice(&eeprom);
    }

    let remainder = image.len() % alignment;
    if remainder != 0 {
        image.resize(image.len() + alignment - remainder, 0x00);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(code: u32, eeprom: u32) -> McuModel {
        McuModel {
            name: "TEST",
            magic: 0x0000,
            total: code + eeprom,
            code,
            eeprom,
        }
    }

    #[test]
    fn pads_to_alignment() {
        let image = assemble(b"123456789", None, &model(8192, 0), 256);
        assert_eq!(image.len(), 256);
        assert_eq!(&image[..9], b"123456789");
        assert!(image[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn aligned_input_is_not_padded_further() {
        let image = assemble(&[0xaa; 512], None, &model(8192, 0), 512);
        assert_eq!(image.len(), 512);
    }

    #[test]
    fn truncates_past_total_capacity() {
        let image = assemble(&[0x55; 3000], None, &model(1024, 1024), 256);
        assert_eq!(image.len(), 2048);
    }

    #[test]
    fn eeprom_lands_at_code_boundary() {
        let image = assemble(&[0x11; 10], Some(&[0x22; 4]), &model(1024, 1024), 256);
        assert_eq!(image.len(), 1280);
        assert_eq!(image[9], 0x11);
        assert!(image[10..1024].iter().all(|&b| b == 0));
        assert_eq!(&image[1024..1028], &[0x22; 4]);
    }

    #[test]
    fn oversized_eeprom_is_cut() {
        let image = assemble(&[0x11; 4], Some(&[0x22; 2000]), &model(1024, 1024), 256);
        assert_eq!(image.len(), 2048);
        assert_eq!(image[1024 + 1023], 0x22);
    }
}
