//! Whole programming cycles against canned BSL traces.

mod common;

use common::{host_payloads, MockLink, MockState};
use stc_isp::framing::{checksum8, Dialect};
use stc_isp::protocol::{self, FlashJob, ProtocolKind, SessionConfig};
use stc_isp::{CancelToken, Error};

const CODE: &[u8] = b"123456789";

fn job(code: &[u8]) -> FlashJob {
    FlashJob {
        code: Some(code.to_vec()),
        ..FlashJob::default()
    }
}

/// Checksum the write ack echoes for a programmed chunk.
fn chunk_csum(chunk: &[u8], blocksize: usize) -> u8 {
    let mut padded = chunk.to_vec();
    padded.resize(blocksize, 0x00);
    checksum8(&padded)
}

fn stc89_status() -> Vec<u8> {
    let mut status = vec![0x00];
    for _ in 0..8 {
        status.extend_from_slice(&[0x0a, 0x80]); // counter 2688 -> 11.0592 MHz
    }
    status.extend_from_slice(&[0x62, 0x43]); // BSL 6.2C
    status.push(0xfd); // 12T part, MSR byte
    status.extend_from_slice(&[0xf0, 0x02]); // STC89C/LE52RC
    status
}

#[test]
fn stc89_program_cycle() {
    let (link, state) = MockLink::new();
    let dialect = Dialect::A;
    state.queue_packet(dialect, &stc89_status());
    state.queue_packet(dialect, &[0x8f]);
    state.queue_packet(dialect, &[0x8e]);
    for _ in 0..4 {
        state.queue_packet(dialect, &[0x80]);
    }
    state.queue_packet(dialect, &[0x80]); // erase ack
    state.queue_packet(dialect, &[0x80, chunk_csum(CODE, 128)]);
    state.queue_packet(dialect, &[0x80, 0x00]);
    state.queue_packet(dialect, &[0x8d]); // options ack

    let mut proto =
        protocol::build(ProtocolKind::Stc89, Box::new(link), common::fast_config()).unwrap();
    protocol::run_session(proto.as_mut(), &job(CODE)).unwrap();

    let payloads = host_payloads(dialect, &state.written());
    let erase = payloads.iter().find(|p| p[0] == 0x84).expect("erase packet");
    assert_eq!(erase[1], 2, "9 bytes pad to 256, two 512-byte erase units");

    let writes: Vec<_> = payloads
        .iter()
        .filter(|p| p.len() == 135 && p[0..3] == [0, 0, 0])
        .collect();
    assert_eq!(writes.len(), 2);
    assert_eq!(&writes[0][3..7], &[0x00, 0x00, 0x00, 0x80]);
    assert_eq!(&writes[0][7..16], CODE);
    assert_eq!(payloads.last().unwrap(), &vec![0x82], "reset sent last");
}

#[test]
fn stc89_tolerates_missing_frame_start() {
    let (link, state) = MockLink::new();
    let frame = common::mcu_frame(Dialect::A, &stc89_status());
    state.queue_bytes(&frame[2..]); // BSL revision that omits 46 B9

    let mut proto =
        protocol::build(ProtocolKind::Stc89, Box::new(link), common::fast_config()).unwrap();
    protocol::run_session(proto.as_mut(), &FlashJob::default()).unwrap();

    assert_eq!(proto.model().unwrap().name, "STC89C/LE52RC");
}

fn stc12_status(msr: [u8; 4]) -> Vec<u8> {
    let mut status = vec![0x50];
    for _ in 0..8 {
        status.extend_from_slice(&[0x0a, 0x80]);
    }
    status.extend_from_slice(&[0x62, 0x44]); // BSL 6.2D
    status.push(0x00);
    status.extend_from_slice(&[0xd1, 0x7e]); // STC12C5A60S2
    status.push(0x00);
    status.extend_from_slice(&msr);
    status.push(0x00);
    status
}

fn queue_stc12_trace(state: &MockState, msr: [u8; 4]) {
    let dialect = Dialect::B;
    state.queue_packet(dialect, &stc12_status(msr));
    state.queue_packet(dialect, &[0x8f]); // handshake initiated
    state.queue_packet(dialect, &[0x8f]); // rate check echo
    state.queue_packet(dialect, &[0x84]); // rate committed
    for _ in 0..4 {
        state.queue_packet(dialect, &[0x80]);
    }
    state.queue_packet(dialect, &[0x00, 1, 2, 3, 4, 5, 6, 7]); // erase ack + UID
    state.queue_packet(dialect, &[0x00, chunk_csum(CODE, 128)]);
    state.queue_packet(dialect, &[0x00, 0x00]);
    state.queue_packet(dialect, &[0x8d]); // finish ack
    state.queue_packet(dialect, &[0x50]); // options ack
}

#[test]
fn stc12_program_cycle_finalizes() {
    let (link, state) = MockLink::new();
    queue_stc12_trace(&state, [0x3f, 0x80, 0xe5, 0xfd]);

    let mut proto =
        protocol::build(ProtocolKind::Stc12, Box::new(link), common::fast_config()).unwrap();
    protocol::run_session(proto.as_mut(), &job(CODE)).unwrap();

    let payloads = host_payloads(Dialect::B, &state.written());
    let finish_at = payloads.iter().position(|p| p[0] == 0x69).expect("finish packet");
    let last_write_at = payloads
        .iter()
        .rposition(|p| p.len() == 135 && p[0..3] == [0, 0, 0])
        .unwrap();
    assert!(finish_at > last_write_at, "0x69 goes out after the last chunk");
    assert_eq!(payloads.last().unwrap(), &vec![0x82]);
}

#[test]
fn stc12_option_override_touches_one_bit() {
    let (link, state) = MockLink::new();
    let msr = [0x3f, 0x80, 0xe5, 0xfd];
    queue_stc12_trace(&state, msr);

    let mut proto =
        protocol::build(ProtocolKind::Stc12, Box::new(link), common::fast_config()).unwrap();
    let mut job = job(CODE);
    job.options = vec![("clock_source".into(), "external".into())];
    protocol::run_session(proto.as_mut(), &job).unwrap();

    let payloads = host_payloads(Dialect::B, &state.written());
    let options = payloads
        .iter()
        .filter(|p| p[0] == 0x8d)
        .max_by_key(|p| p.len())
        .expect("option packet");
    // external clock source is bit 1 of MSR byte 1; everything else intact
    assert_eq!(&options[1..5], &[0x3f, 0x82, 0xe5, 0xfd]);
    assert!(options[5..17].iter().all(|&b| b == 0xff));
    // measured clock, big-endian, 11.0592 MHz
    assert_eq!(&options[17..21], &11_059_200u32.to_be_bytes());
}

fn stc15a_status() -> Vec<u8> {
    let mut status = vec![0u8; 58];
    status[0] = 0x50;
    for i in 0..4 {
        status[1 + 2 * i] = 0x0a;
        status[2 + 2 * i] = 0x80;
    }
    status[17] = 0x67;
    status[18] = b'E';
    status[20] = 0xf2;
    status[21] = 0x94; // STC15F104E
    status[23] = 0x10;
    status[24] = 0x47;
    status[25] = 0xdf;
    status[35] = 0xfc;
    status[51..58].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
    status
}

fn stc15a_trim_round1() -> Vec<u8> {
    let mut response = vec![0u8; 36];
    response[0] = 0x65;
    let pairs: [(u16, u16); 6] = [
        (0x5800, 2000),
        (0x5880, 2500),
        (0x5880, 2600),
        (0x58ff, 2800),
        (0x9800, 5000),
        (0x9880, 5500),
    ];
    for (i, (trim, count)) in pairs.iter().enumerate() {
        response[12 + 4 * i..14 + 4 * i].copy_from_slice(&trim.to_be_bytes());
        response[14 + 4 * i..16 + 4 * i].copy_from_slice(&count.to_be_bytes());
    }
    response
}

fn stc15a_trim_round2() -> Vec<u8> {
    let mut response = vec![0u8; 56];
    response[0] = 0x65;
    for i in 0..11u16 {
        let trim = 0x58b3 + i;
        let count = 2683 + i;
        response[12 + 4 * i as usize..14 + 4 * i as usize].copy_from_slice(&trim.to_be_bytes());
        response[14 + 4 * i as usize..16 + 4 * i as usize].copy_from_slice(&count.to_be_bytes());
    }
    response
}

#[test]
fn stc15a_program_runs_two_trim_rounds() {
    let (link, state) = MockLink::new();
    let dialect = Dialect::B;
    state.queue_packet(dialect, &stc15a_status());
    state.queue_packet(dialect, &[0x8f]);
    state.queue_packet(dialect, &stc15a_trim_round1());
    state.queue_packet(dialect, &stc15a_trim_round2());
    state.queue_packet(dialect, &[0x84]); // baud switched
    state.queue_packet(dialect, &[0x00, 9, 8, 7, 6, 5, 4, 3]); // erase ack + UID
    state.queue_packet(dialect, &[0x00, chunk_csum(CODE, 64)]);
    for _ in 0..7 {
        state.queue_packet(dialect, &[0x00, 0x00]);
    }
    state.queue_packet(dialect, &[0x8d]); // finish ack
    state.queue_packet(dialect, &[0x50]); // options ack

    let mut proto =
        protocol::build(ProtocolKind::Stc15A, Box::new(link), common::fast_config()).unwrap();
    protocol::run_session(proto.as_mut(), &job(CODE)).unwrap();

    let payloads = host_payloads(dialect, &state.written());
    let trims: Vec<_> = payloads.iter().filter(|p| p[0] == 0x65).collect();
    assert_eq!(trims.len(), 2, "coarse and fine trim rounds");
    // round 2 carries eleven consecutive fine-trim challenges
    assert_eq!(trims[1].len(), 1 + 7 + 4 + 11 * 4);
    assert_eq!(&trims[1][12..14], &0x58b3u16.to_be_bytes());
    // 64-byte blocks on this family
    assert!(payloads.iter().any(|p| p.len() == 71 && p[0..3] == [0, 0, 0]));
}

fn stc8_untrimmed_status() -> Vec<u8> {
    let mut status = vec![0u8; 39];
    status[0] = 0x50;
    status[1] = 0xff; // factory fresh, no calibration
    status[17] = 0x73;
    status[18] = b'S';
    status[20] = 0xf7;
    status[21] = 0xa1; // STC8F2K08S2
    status[22] = 0x09;
    status
}

#[test]
fn stc8_untrimmed_without_trim_target_fails() {
    let (link, state) = MockLink::new();
    state.queue_packet(Dialect::B, &stc8_untrimmed_status());

    let mut proto =
        protocol::build(ProtocolKind::Stc8, Box::new(link), common::fast_config()).unwrap();
    let err = protocol::run_session(proto.as_mut(), &job(CODE)).unwrap_err();
    assert!(
        err.to_string().contains("frequency trimming unsuccessful"),
        "got: {err}"
    );

    // nothing past the sync exchange may have been sent
    let payloads = host_payloads(Dialect::B, &state.written());
    assert!(payloads.iter().all(|p| p[0] != 0x03 && p[0] != 0x22));
}

#[test]
fn usb15_transport_is_rejected() {
    let (link, _state) = MockLink::new();
    let err =
        protocol::build(ProtocolKind::Usb15, Box::new(link), common::fast_config()).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn auto_detect_classifies_stc12() {
    let (mut link, state) = MockLink::new();
    state.queue_packet(Dialect::B, &stc12_status([0, 0, 0, 0]));

    let cancel = CancelToken::new();
    let mut progress = stc_isp::progress::SilentProgress;
    let kind = protocol::detect(&mut link, 2400, &cancel, &mut progress).unwrap();
    assert_eq!(kind, ProtocolKind::Stc12);
}

#[test]
fn auto_detect_classifies_stc89_without_frame_start() {
    let (mut link, state) = MockLink::new();
    let frame = common::mcu_frame(Dialect::A, &stc89_status());
    state.queue_bytes(&frame[2..]);

    let cancel = CancelToken::new();
    let mut progress = stc_isp::progress::SilentProgress;
    let kind = protocol::detect(&mut link, 2400, &cancel, &mut progress).unwrap();
    assert_eq!(kind, ProtocolKind::Stc89);
}

#[test]
fn auto_detect_shared_magic_picks_the_early15_machine() {
    // 0xF294 answers for both STC15F104W (later 15) and STC15F104E
    // (early 15); the early-15 trim handshake is the one auto must run.
    let (mut link, state) = MockLink::new();
    state.queue_packet(Dialect::B, &stc15a_status());

    let cancel = CancelToken::new();
    let mut progress = stc_isp::progress::SilentProgress;
    let kind = protocol::detect(&mut link, 2400, &cancel, &mut progress).unwrap();
    assert_eq!(kind, ProtocolKind::Stc15A);
}

#[test]
fn cancelled_session_reports_interrupted() {
    let (link, state) = MockLink::new();
    state.queue_bytes(&[0x00; 4]); // noise only, never a valid packet

    let cancel = CancelToken::new();
    cancel.cancel();
    let config = SessionConfig {
        cancel,
        ..common::fast_config()
    };
    let mut proto = protocol::build(ProtocolKind::Stc12, Box::new(link), config).unwrap();
    let err = protocol::run_session(proto.as_mut(), &job(CODE)).unwrap_err();
    assert!(matches!(err, Error::Interrupted));
}
