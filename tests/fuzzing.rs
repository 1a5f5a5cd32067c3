//! Robustness under corrupted and truncated BSL responses.
//!
//! Every family's canned trace is replayed with random bit flips and
//! truncation; a session may fail, but it must always return instead of
//! panicking or hanging.

mod common;

use common::MockLink;
use stc_isp::framing::Dialect;
use stc_isp::protocol::{self, FlashJob, ProtocolKind};

const ITERATIONS: u64 = 1000;
const BIT_FLIP_NUM: u64 = 5; // p = 0.005 per byte
const TRUNCATE_NUM: u64 = 10; // p = 0.01 per run
const P_DEN: u64 = 1000;

/// Small deterministic xorshift generator; fixed seeds keep failures
/// reproducible.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn chance(&mut self, num: u64, den: u64) -> bool {
        self.next() % den < num
    }
}

fn corrupt(stream: &[u8], rng: &mut Rng) -> Vec<u8> {
    let mut out = stream.to_vec();
    for byte in out.iter_mut() {
        if rng.chance(BIT_FLIP_NUM, P_DEN) {
            *byte ^= 1 << (rng.next() % 8);
        }
    }
    if rng.chance(TRUNCATE_NUM, P_DEN) && !out.is_empty() {
        out.truncate((rng.next() as usize) % out.len());
    }
    out
}

fn frame(dialect: Dialect, payload: &[u8]) -> Vec<u8> {
    common::mcu_frame(dialect, payload)
}

fn stc89_trace() -> Vec<u8> {
    let mut status = vec![0x00];
    for _ in 0..8 {
        status.extend_from_slice(&[0x0a, 0x80]);
    }
    status.extend_from_slice(&[0x62, 0x43, 0xfd, 0xf0, 0x02]);

    let mut trace = frame(Dialect::A, &status);
    trace.extend(frame(Dialect::A, &[0x8f]));
    trace.extend(frame(Dialect::A, &[0x8e]));
    for _ in 0..4 {
        trace.extend(frame(Dialect::A, &[0x80]));
    }
    trace.extend(frame(Dialect::A, &[0x80]));
    trace.extend(frame(Dialect::A, &[0x80, 0xdd]));
    trace.extend(frame(Dialect::A, &[0x80, 0x00]));
    trace.extend(frame(Dialect::A, &[0x8d]));
    trace
}

fn stc12_trace() -> Vec<u8> {
    let mut status = vec![0x50];
    for _ in 0..8 {
        status.extend_from_slice(&[0x0a, 0x80]);
    }
    status.extend_from_slice(&[0x62, 0x44, 0x00, 0xd1, 0x7e, 0x00]);
    status.extend_from_slice(&[0x3f, 0x80, 0xe5, 0xfd, 0x00]);

    let mut trace = frame(Dialect::B, &status);
    for ack in [0x8fu8, 0x8f, 0x84, 0x80, 0x80, 0x80, 0x80] {
        trace.extend(frame(Dialect::B, &[ack]));
    }
    trace.extend(frame(Dialect::B, &[0x00, 1, 2, 3, 4, 5, 6, 7]));
    trace.extend(frame(Dialect::B, &[0x00, 0xdd]));
    trace.extend(frame(Dialect::B, &[0x00, 0x00]));
    trace.extend(frame(Dialect::B, &[0x8d]));
    trace.extend(frame(Dialect::B, &[0x50]));
    trace
}

fn stc15a_trace() -> Vec<u8> {
    let mut status = vec![0u8; 58];
    status[0] = 0x50;
    for i in 0..4 {
        status[1 + 2 * i] = 0x0a;
        status[2 + 2 * i] = 0x80;
    }
    status[17] = 0x67;
    status[18] = b'E';
    status[20] = 0xf2;
    status[21] = 0x94;
    status[51..58].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7]);

    let mut round1 = vec![0u8; 36];
    round1[0] = 0x65;
    let pairs: [(u16, u16); 6] = [
        (0x5800, 2000),
        (0x5880, 2500),
        (0x5880, 2600),
        (0x58ff, 2800),
        (0x9800, 5000),
        (0x9880, 5500),
    ];
    for (i, (trim, count)) in pairs.iter().enumerate() {
        round1[12 + 4 * i..14 + 4 * i].copy_from_slice(&trim.to_be_bytes());
        round1[14 + 4 * i..16 + 4 * i].copy_from_slice(&count.to_be_bytes());
    }
    let mut round2 = vec![0u8; 56];
    round2[0] = 0x65;
    for i in 0..11usize {
        round2[12 + 4 * i..14 + 4 * i].copy_from_slice(&(0x58b3 + i as u16).to_be_bytes());
        round2[14 + 4 * i..16 + 4 * i].copy_from_slice(&(2683 + i as u16).to_be_bytes());
    }

    let mut trace = frame(Dialect::B, &status);
    trace.extend(frame(Dialect::B, &[0x8f]));
    trace.extend(frame(Dialect::B, &round1));
    trace.extend(frame(Dialect::B, &round2));
    trace.extend(frame(Dialect::B, &[0x84]));
    trace.extend(frame(Dialect::B, &[0x00, 9, 8, 7, 6, 5, 4, 3]));
    trace.extend(frame(Dialect::B, &[0x00, 0xdd]));
    for _ in 0..7 {
        trace.extend(frame(Dialect::B, &[0x00, 0x00]));
    }
    trace.extend(frame(Dialect::B, &[0x8d]));
    trace.extend(frame(Dialect::B, &[0x50]));
    trace
}

fn stc8_trace() -> Vec<u8> {
    let mut status = vec![0u8; 39];
    status[0] = 0x50;
    status[1] = 0xff;
    status[17] = 0x73;
    status[18] = b'S';
    status[20] = 0xf7;
    status[21] = 0xa1;
    status[22] = 0x09;
    frame(Dialect::B, &status)
}

fn fuzz_family(kind: ProtocolKind, trace: &[u8], seed_base: u64) {
    let job = FlashJob {
        code: Some(b"123456789".to_vec()),
        ..FlashJob::default()
    };
    for iteration in 0..ITERATIONS {
        let mut rng = Rng::new(seed_base.wrapping_mul(0x9e37_79b9).wrapping_add(iteration));
        let corrupted = corrupt(trace, &mut rng);

        let (link, state) = MockLink::new();
        state.queue_bytes(&corrupted);
        let mut proto = protocol::build(kind, Box::new(link), common::fast_config()).unwrap();
        // Any outcome but a panic or hang is acceptable here.
        let _ = protocol::run_session(proto.as_mut(), &job);
    }
}

#[test]
fn fuzzed_stc89_never_panics() {
    fuzz_family(ProtocolKind::Stc89, &stc89_trace(), 1);
}

#[test]
fn fuzzed_stc12_never_panics() {
    fuzz_family(ProtocolKind::Stc12, &stc12_trace(), 2);
}

#[test]
fn fuzzed_stc15a_never_panics() {
    fuzz_family(ProtocolKind::Stc15A, &stc15a_trace(), 3);
}

#[test]
fn fuzzed_stc8_never_panics() {
    fuzz_family(ProtocolKind::Stc8, &stc8_trace(), 4);
}
