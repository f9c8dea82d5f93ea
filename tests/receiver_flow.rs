//! End-to-end flow tests for the Franklin receiver path over an
//! in-memory board: program download, start, batch consumption, and the
//! recovery contract the assembly layer depends on.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use domsat_rx::error::Severity;
use domsat_rx::franklin::loader::{
    CLOCK_OFFSET, CONFIGURE_OK_OFFSET, IMAGE_HEADER_LEN, IMAGE_SIGNATURE, RESERVED_LEN,
};
use domsat_rx::franklin::{FranklinConfig, FranklinReceiver, IcpBoard, SharedBlock};
use domsat_rx::packet;
use domsat_rx::{ReadOutcome, RecvError};

/// Observable state of the fake board, shared with the test body.
#[derive(Default)]
struct BoardState {
    raw_mode: bool,
    message_mode: bool,
    resets: usize,
    shared: SharedBlock,
    mem: Vec<u8>,
    cursor: usize,
    batches: VecDeque<(Vec<u8>, Vec<u32>)>,
}

/// In-memory [`IcpBoard`]; clones share the same state.
#[derive(Clone)]
struct FakeBoard(Arc<Mutex<BoardState>>);

impl FakeBoard {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(BoardState {
            mem: vec![0u8; 64 * 1024],
            ..BoardState::default()
        })))
    }

    fn queue_batch(&self, data: Vec<u8>, offsets: Vec<u32>) {
        self.0.lock().unwrap().batches.push_back((data, offsets));
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.0.lock().unwrap()
    }
}

impl IcpBoard for FakeBoard {
    fn reset(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().resets += 1;
        Ok(())
    }

    fn set_raw_mode(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().raw_mode = true;
        Ok(())
    }

    fn set_message_mode(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().message_mode = true;
        Ok(())
    }

    fn set_timer_policy(&mut self, _ticks: u32) -> io::Result<()> {
        Ok(())
    }

    fn shared_block(&mut self) -> io::Result<SharedBlock> {
        Ok(self.0.lock().unwrap().shared)
    }

    fn set_shared_block(&mut self, block: &SharedBlock) -> io::Result<()> {
        self.0.lock().unwrap().shared = *block;
        Ok(())
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.0.lock().unwrap().cursor = offset as usize;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        let cursor = state.cursor;
        state.mem[cursor..cursor + block.len()].copy_from_slice(block);
        state.cursor += block.len();
        Ok(())
    }

    fn read_batch(&mut self, data: &mut [u8], offsets: &mut [u32]) -> io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        let Some((batch_data, batch_offsets)) = state.batches.pop_front() else {
            return Ok(0); // timeout case
        };
        data[..batch_data.len()].copy_from_slice(&batch_data);
        offsets[..batch_offsets.len()].copy_from_slice(&batch_offsets);
        Ok(batch_offsets.len())
    }
}

/// Writes a minimal valid program image to a unique temp file.
fn write_test_image(body: &[u8]) -> PathBuf {
    static SERIAL: AtomicUsize = AtomicUsize::new(0);
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed);

    let mut img = vec![0u8; IMAGE_HEADER_LEN];
    img[0..2].copy_from_slice(&IMAGE_SIGNATURE.to_le_bytes());
    img[8..10].copy_from_slice(&2u16.to_le_bytes()); // header: 2 paragraphs
    img[20..22].copy_from_slice(&0x0010u16.to_le_bytes()); // IP
    img[22..24].copy_from_slice(&0x0200u16.to_le_bytes()); // CS
    img.resize(32 + RESERVED_LEN as usize, 0);
    img.extend_from_slice(body);

    let path = std::env::temp_dir().join(format!(
        "domsat-rx-test-{}-{serial}.exe",
        std::process::id()
    ));
    std::fs::write(&path, img).unwrap();
    path
}

/// Appends one DCP message (header + payload + pad) to a batch image.
fn push_msg(data: &mut Vec<u8>, offsets: &mut Vec<u32>, flags: u16, num: u16, payload: &[u8]) {
    offsets.push(data.len() as u32);
    data.extend_from_slice(&flags.to_le_bytes());
    data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(&num.to_le_bytes());
    data.extend_from_slice(payload);
}

/// Builds an enabled receiver over a fake board with a shared handle.
fn enabled_receiver(image_body: &[u8]) -> (FranklinReceiver<FakeBoard>, FakeBoard) {
    let board = FakeBoard::new();
    let config = FranklinConfig {
        device: PathBuf::from("/dev/unused"),
        image: write_test_image(image_body),
    };
    let mut rx = FranklinReceiver::attach(config, board.clone());
    rx.enable().unwrap();
    (rx, board)
}

#[test]
fn enable_downloads_image_and_starts_program() {
    let body = b"ICP188 PROGRAM BODY";
    let (_rx, board) = enabled_receiver(body);
    let state = board.state();

    assert!(state.raw_mode);
    assert!(state.message_mode);
    // One reset from the download, one from the enable sequence.
    assert_eq!(state.resets, 2);

    // Jump vector from the image's CS:IP, ready flag raised.
    assert_eq!(state.shared.jump_vector, 0x0200_0010);
    assert_eq!(state.shared.ready, 1);

    // Body streamed past the reserved region.
    let start = RESERVED_LEN as usize;
    assert_eq!(&state.mem[start..start + body.len()], body);

    // Start record: a plausible year and 1-based day, then configure-ok.
    let year = u16::from_le_bytes([
        state.mem[CLOCK_OFFSET as usize],
        state.mem[CLOCK_OFFSET as usize + 1],
    ]);
    let day = u16::from_le_bytes([
        state.mem[CLOCK_OFFSET as usize + 2],
        state.mem[CLOCK_OFFSET as usize + 3],
    ]);
    assert!(year >= 2024);
    assert!((1..=366).contains(&day));
    assert_eq!(state.mem[CONFIGURE_OK_OFFSET as usize], 1);
}

#[test]
fn read_packet_synthesizes_canonical_header() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0, 0x1234, b"hello");
    board.queue_batch(data, offsets);

    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    let outcome = rx.read_packet(&mut out).unwrap();
    assert_eq!(outcome, ReadOutcome::Data(8 + 5));

    assert_eq!(&out[..4], &[0, 0, 0, 0]);
    assert_eq!(out[4] & packet::MORE_FRAGMENTS_BIT, 0);
    assert_eq!(out[5], 0x12);
    assert_eq!(out[6], 0x34);
    assert_eq!(out[7], 1);
    assert_eq!(&out[8..13], b"hello");
}

#[test]
fn empty_batch_read_is_no_data() {
    let (mut rx, _board) = enabled_receiver(b"p");
    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    assert_eq!(rx.read_packet(&mut out).unwrap(), ReadOutcome::NoData);
}

#[test]
fn flagged_message_is_skipped_and_next_call_proceeds() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0x8000, 7, b"bad");
    push_msg(&mut data, &mut offsets, 0, 8, b"good");
    board.queue_batch(data, offsets);

    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    let err = rx.read_packet(&mut out).unwrap_err();
    assert!(matches!(err, RecvError::FrameFlags { index: 0, .. }));
    assert_eq!(err.severity(), Severity::Recoverable);

    let outcome = rx.read_packet(&mut out).unwrap();
    assert_eq!(outcome, ReadOutcome::Data(8 + 4));
    assert_eq!(&out[5..7], &8u16.to_be_bytes());
}

#[test]
fn batch_corruption_resets_cache_and_next_read_refetches() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0, 1, b"abcdef");
    push_msg(&mut data, &mut offsets, 0, 2, b"ghij");
    // Lie about the first size so the gap check trips.
    data[2..4].copy_from_slice(&3u16.to_le_bytes());
    board.queue_batch(data, offsets);

    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    let err = rx.read_packet(&mut out).unwrap_err();
    assert!(matches!(err, RecvError::BatchCorruption { index: 0, .. }));
    assert_eq!(err.severity(), Severity::Recoverable);

    // The cache was dropped wholesale; with nothing queued the next call
    // performs a fresh underlying read and times out.
    assert_eq!(rx.read_packet(&mut out).unwrap(), ReadOutcome::NoData);
}

#[test]
fn short_caller_buffer_is_recoverable() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0, 1, &vec![0xAAu8; 100]);
    board.queue_batch(data, offsets);

    let mut out = [0u8; 32];
    let err = rx.read_packet(&mut out).unwrap_err();
    assert!(matches!(
        err,
        RecvError::ShortCallerBuffer { need: 108, have: 32 }
    ));
    assert_eq!(err.severity(), Severity::Recoverable);
}

#[test]
fn shutdown_flag_unblocks_reader() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0, 1, b"queued");
    board.queue_batch(data, offsets);

    rx.shutdown_flag().store(true, Ordering::Relaxed);
    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    // Shutdown wins over available data; nothing is consumed.
    assert_eq!(rx.read_packet(&mut out).unwrap(), ReadOutcome::NoData);
}

#[test]
fn disable_drops_cached_messages() {
    let (mut rx, board) = enabled_receiver(b"p");
    let (mut data, mut offsets) = (Vec::new(), Vec::new());
    push_msg(&mut data, &mut offsets, 0, 1, b"one");
    push_msg(&mut data, &mut offsets, 0, 2, b"two");
    board.queue_batch(data, offsets);

    let mut out = vec![0u8; packet::MAX_FRANKLIN_PACKET];
    assert!(matches!(
        rx.read_packet(&mut out).unwrap(),
        ReadOutcome::Data(_)
    ));

    rx.disable();
    let err = rx.read_packet(&mut out).unwrap_err();
    assert!(matches!(err, RecvError::NotEnabled));

    // Re-enable succeeds against the still-open board; the second cached
    // message is gone because the cache was reset.
    rx.enable().unwrap();
    assert_eq!(rx.read_packet(&mut out).unwrap(), ReadOutcome::NoData);
}
