//! Intel HEX reader cases.

use stc_isp::ihex::{HexError, IntelHex};

#[test]
fn reads_simple_data_records() {
    let hex = ":0B0010006164647265737320676170A7\n:00000001FF\n";
    let parsed = IntelHex::read(hex).unwrap();
    let data = parsed.extract_data();
    assert_eq!(data.len(), 0x10 + 11);
    assert!(data[..0x10].iter().all(|&b| b == 0));
    assert_eq!(&data[0x10..], b"address gap");
}

#[test]
fn segment_record_offsets_following_data() {
    // segment base 0x1000 -> paragraph 0x0100
    let hex = ":020000020100FB\n:02000000AABB99\n:00000001FF\n";
    let data = IntelHex::read(hex).unwrap().extract_data();
    assert_eq!(data.len(), 0x1002);
    assert_eq!(&data[0x1000..], &[0xaa, 0xbb]);
}

#[test]
fn linear_base_record_is_honored() {
    let hex = ":020000040001F9\n:0100000055AA\n:00000001FF\n";
    let data = IntelHex::read(hex).unwrap().extract_data();
    assert_eq!(data.len(), 0x10001);
    assert_eq!(data[0x10000], 0x55);
}

#[test]
fn start_records_are_recorded_not_applied() {
    let hex = ":0400000300001000E9\n:0100000042BD\n:00000001FF\n";
    let parsed = IntelHex::read(hex).unwrap();
    assert_eq!(parsed.start_address(), Some(0x1000));
    assert_eq!(parsed.extract_data(), vec![0x42]);

    let hex = ":0400000500001234B1\n:00000001FF\n";
    let parsed = IntelHex::read(hex).unwrap();
    assert_eq!(parsed.start_address(), Some(0x1234));
}

#[test]
fn rejects_bad_checksum() {
    let hex = ":0100000042BE\n:00000001FF\n";
    assert_eq!(IntelHex::read(hex).unwrap_err(), HexError::ChecksumMismatch);
}

#[test]
fn rejects_unknown_record_type() {
    let hex = ":01000006AA4F\n:00000001FF\n";
    assert!(matches!(
        IntelHex::read(hex).unwrap_err(),
        HexError::InvalidType(0x06)
    ));
}

#[test]
fn rejects_non_hex_garbage() {
    assert_eq!(
        IntelHex::read(":01zz0000AA00\n").unwrap_err(),
        HexError::BadHexData
    );
    assert_eq!(
        IntelHex::read("0100000042BD\n").unwrap_err(),
        HexError::BadLineStart
    );
}

#[test]
fn rejects_truncated_record() {
    assert_eq!(IntelHex::read(":04000000AA55\n").unwrap_err(), HexError::Truncated);
}

#[test]
fn data_after_eof_is_ignored() {
    let hex = ":0100000042BD\n:00000001FF\n:01000000FFxx\n";
    let data = IntelHex::read(hex).unwrap().extract_data();
    assert_eq!(data, vec![0x42]);
}

#[test]
fn adjacent_records_merge() {
    let hex = ":0300000041424337\n:030003004445462B\n:00000001FF\n";
    let data = IntelHex::read(hex).unwrap().extract_data();
    assert_eq!(data, b"ABCDEF");
}
