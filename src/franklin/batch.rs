//! In-process cache for one batch read from the co-processor.
//!
//! The board's batch ioctl fills two parallel buffers: a byte buffer of
//! concatenated DCP messages and an offset array locating each message
//! within it. This module owns both buffers and consumes the batch one
//! validated message at a time, advancing a monotonic index until the
//! batch is exhausted and a fresh read refills it.
//!
//! ## Message layout
//!
//! Each cached message starts with a 6-byte header, all little-endian:
//!
//! ```text
//! ┌───────────┬───────────┬───────────┬─────────────┬────────┐
//! │ Flags (2) │ Size (2)  │ Num (2)   │ Payload ... │ Pad 0/1│
//! └───────────┴───────────┴───────────┴─────────────┴────────┘
//! ```
//!
//! Messages are packed back to back, with at most one alignment byte
//! between them. The consume path cross-checks each declared size against
//! the next offset; a mismatch means the whole batch is untrustworthy and
//! the cache resets itself.

use crate::error::RecvError;
use crate::packet::MAX_DCP_PAYLOAD;
use crate::trace::{debug, warn};

/// Maximum messages one underlying read can return.
pub const MSGS_PER_READ: usize = 1792;

/// Length of the per-message header inside the batch buffer.
pub const DCP_MSG_HEADER_LEN: usize = 6;

/// Capacity of the shared data buffer handed to the board.
pub const BATCH_BUF_LEN: usize = 256 * 1024;

/// Header flag bits that mark a message as errored on the board.
pub const ERROR_FLAG_MASK: u16 = 0xBF00;

/// Parsed per-message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcpMsgHeader {
    /// Board status bits; see [`ERROR_FLAG_MASK`].
    pub flags: u16,
    /// Declared payload length in bytes.
    pub size: u16,
    /// 16-bit message sequence number.
    pub num: u16,
}

impl DcpMsgHeader {
    /// Reads a header from the start of `buf`, or `None` if too short.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < DCP_MSG_HEADER_LEN {
            return None;
        }
        Some(Self {
            flags: u16::from_le_bytes([buf[0], buf[1]]),
            size: u16::from_le_bytes([buf[2], buf[3]]),
            num: u16::from_le_bytes([buf[4], buf[5]]),
        })
    }
}

/// Cache of one batch read, consumed front to back.
///
/// Invariant: `consumed <= available <= MSGS_PER_READ`. `consumed` only
/// moves forward within a batch and returns to zero exactly when the
/// cache refills or an integrity violation forces a reset.
pub struct MessageBatch {
    data: Vec<u8>,
    offsets: Vec<u32>,
    available: usize,
    consumed: usize,
    skipped: u64,
}

impl MessageBatch {
    /// Allocates an empty cache at full capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0u8; BATCH_BUF_LEN],
            offsets: vec![0u32; MSGS_PER_READ],
            available: 0,
            consumed: 0,
            skipped: 0,
        }
    }

    /// True when every cached message has been consumed (or none exist).
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.available
    }

    /// Messages available from the current underlying read.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available
    }

    /// Messages consumed from the current batch.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Messages skipped over the cache's lifetime (flagged or oversized).
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Empties the cache. The next read triggers a fresh underlying fetch.
    pub fn reset(&mut self) {
        self.available = 0;
        self.consumed = 0;
    }

    /// Resets the cache and exposes the raw buffers for the board to fill.
    pub fn refill_bufs(&mut self) -> (&mut [u8], &mut [u32]) {
        self.reset();
        (&mut self.data, &mut self.offsets)
    }

    /// Records how many messages the board wrote into the buffers.
    ///
    /// The board ABI caps the count at the offset array length it was
    /// handed; a driver reporting more cannot be trusted beyond that, so
    /// the count is clamped to [`MSGS_PER_READ`].
    pub fn set_available(&mut self, n: usize) {
        if n > MSGS_PER_READ {
            warn!(count = n, "franklin: board reported impossible batch count, clamping");
        }
        self.available = n.min(MSGS_PER_READ);
        self.consumed = 0;
    }

    /// Consumes the next cached message, validating it on the way out.
    ///
    /// Returns `Ok(None)` when the batch is exhausted. On success returns
    /// the message sequence number and payload slice.
    ///
    /// The index advances before validation, so recoverable per-message
    /// errors ([`RecvError::FrameFlags`], [`RecvError::Oversize`]) skip
    /// the bad message: the next call proceeds to the following entry.
    /// Structural violations ([`RecvError::Bounds`],
    /// [`RecvError::BatchCorruption`]) reset the whole cache instead.
    ///
    /// # Errors
    ///
    /// See above; all four variants are recoverable from the session's
    /// point of view ([`crate::error::Severity`]).
    pub fn take_next(&mut self) -> Result<Option<(u16, &[u8])>, RecvError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let index = self.consumed;
        self.consumed += 1;

        let offset = self.offsets[index] as usize;
        if offset > self.data.len() || offset + DCP_MSG_HEADER_LEN > self.data.len() {
            warn!(index, offset, "franklin: message offset out of bounds, dropping batch");
            self.reset();
            return Err(RecvError::Bounds {
                index,
                offset,
                capacity: self.data.len(),
            });
        }

        let header =
            DcpMsgHeader::parse(&self.data[offset..]).expect("header bounds checked above");

        if header.flags & ERROR_FLAG_MASK != 0 {
            self.skipped += 1;
            debug!(index, flags = header.flags, "franklin: board-flagged message skipped");
            return Err(RecvError::FrameFlags {
                index,
                flags: header.flags,
            });
        }

        let size = header.size as usize;
        if size > MAX_DCP_PAYLOAD {
            self.skipped += 1;
            warn!(index, size, "franklin: oversized message skipped");
            return Err(RecvError::Oversize {
                index,
                size,
                max: MAX_DCP_PAYLOAD,
            });
        }

        if offset + DCP_MSG_HEADER_LEN + size > self.data.len() {
            warn!(index, offset, size, "franklin: payload overruns buffer, dropping batch");
            self.reset();
            return Err(RecvError::Bounds {
                index,
                offset: offset + DCP_MSG_HEADER_LEN + size,
                capacity: self.data.len(),
            });
        }

        // Every message but the last must abut the next one, modulo a
        // single alignment byte. A larger or negative gap means the batch
        // structure cannot be trusted.
        if index + 1 < self.available {
            let next_offset = self.offsets[index + 1] as usize;
            let gap = next_offset as i64
                - offset as i64
                - DCP_MSG_HEADER_LEN as i64
                - size as i64;
            if gap != 0 && gap != 1 {
                let expected =
                    (next_offset as i64 - offset as i64 - DCP_MSG_HEADER_LEN as i64).max(0);
                warn!(
                    index,
                    declared = size,
                    expected,
                    "franklin: inter-message gap mismatch, dropping batch"
                );
                self.reset();
                return Err(RecvError::BatchCorruption {
                    index,
                    declared: size,
                    expected: expected as usize,
                    offset,
                    next_offset,
                    skipped: self.skipped,
                });
            }
        }

        let start = offset + DCP_MSG_HEADER_LEN;
        Ok(Some((header.num, &self.data[start..start + size])))
    }
}

impl Default for MessageBatch {
    fn default() -> Self {
        Self::new()
    }
}
