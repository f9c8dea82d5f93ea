//! Canonical packet shape shared by both receiver paths.
//!
//! ## Wire Format
//!
//! Every normalized packet starts with an 8-byte synthetic header:
//!
//! ```text
//! ┌──────────────┬─────────┬────────────┬─────────┬─────────────┐
//! │ Reserved (4) │ Ctrl(1) │ Seq BE (2) │ Frag(1) │ Payload ... │
//! └──────────────┴─────────┴────────────┴─────────┴─────────────┘
//! ```
//!
//! - Reserved bytes are always zero.
//! - Ctrl carries the "more fragments" bit ([`MORE_FRAGMENTS_BIT`]); this
//!   layer always clears it, since a board message is a whole fragment.
//! - Seq is the 16-bit message sequence number, big-endian.
//! - Frag is the fragment number; always [`FIRST_FRAGMENT`] here.
//!
//! The Franklin receiver synthesizes this header around every board message.
//! Sangoma HDLC frames already carry it on the wire, so that path returns
//! the board payload untouched.

/// Length of the synthetic packet header.
pub const HEADER_LEN: usize = 8;

/// Byte offset of the control byte within the header.
pub const CTRL_OFFSET: usize = 4;

/// Byte offset of the big-endian sequence number within the header.
pub const SEQ_OFFSET: usize = 5;

/// "More fragments follow" bit within the control byte.
pub const MORE_FRAGMENTS_BIT: u8 = 0x10;

/// Fragment number marking the first (and here, only) fragment.
pub const FIRST_FRAGMENT: u8 = 1;

/// Largest complete packet the Sangoma path delivers.
pub const MAX_SANGOMA_PACKET: usize = 512;

/// Largest payload a single DCP message may declare.
pub const MAX_DCP_PAYLOAD: usize = 15787;

/// Largest complete packet the Franklin path delivers.
pub const MAX_FRANKLIN_PACKET: usize = HEADER_LEN + MAX_DCP_PAYLOAD;

/// Writes a canonical packet (header + payload) into `out`.
///
/// Returns the total packet length, `HEADER_LEN + payload.len()`.
///
/// # Panics
///
/// Panics if `out` is shorter than the packet. Callers size their buffer
/// with [`MAX_FRANKLIN_PACKET`] and validate payload length first.
pub fn synthesize(seq: u16, payload: &[u8], out: &mut [u8]) -> usize {
    let total = HEADER_LEN + payload.len();
    assert!(out.len() >= total, "output buffer too small");

    out[..CTRL_OFFSET].fill(0);
    out[CTRL_OFFSET] = 0; // more-fragments bit cleared
    out[SEQ_OFFSET..SEQ_OFFSET + 2].copy_from_slice(&seq.to_be_bytes());
    out[HEADER_LEN - 1] = FIRST_FRAGMENT;
    out[HEADER_LEN..total].copy_from_slice(payload);
    total
}
