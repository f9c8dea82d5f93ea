//! Board-header framing rules for received Sangoma datagrams.
//!
//! Every datagram starts with a driver-supplied header in one of two
//! layouts: the 16-byte legacy layout or the 64-byte current one. Both
//! carry an error-flag byte first, a 2-byte timestamp, and reserved
//! padding; neither carries a version field. Unless the board is the A142
//! revision, two CRC bytes trail the payload.

/// Legacy driver header length.
pub const LEGACY_HEADER_LEN: usize = 16;

/// Current driver header length.
pub const CURRENT_HEADER_LEN: usize = 64;

/// Trailing CRC length on boards that deliver it.
pub const CRC_LEN: usize = 2;

/// Guesses the driver header length for a received datagram.
///
/// The current 64-byte layout zero-fills bytes 16..20, where the legacy
/// layout already carries payload. That is the only disambiguation the wire
/// offers. Known fragility: a legacy frame whose payload happens to begin
/// with four zero bytes is misclassified as a 64-byte header; there is no
/// version field to do better with.
#[must_use]
pub fn header_len(datagram: &[u8]) -> usize {
    if datagram.len() >= 20 && datagram[16..20].iter().all(|&b| b == 0) {
        CURRENT_HEADER_LEN
    } else {
        LEGACY_HEADER_LEN
    }
}

/// Extracts the payload from a received datagram, or `None` for frames the
/// caller should silently skip.
///
/// Skipped cases, per the board's best-effort contract:
/// - computed payload length would be zero or negative (short frame),
/// - the header's error-flag byte (byte 0) is nonzero.
#[must_use]
pub fn payload(datagram: &[u8], crc_absent: bool) -> Option<&[u8]> {
    let header = header_len(datagram);
    let crc = if crc_absent { 0 } else { CRC_LEN };
    if datagram.len() <= header + crc {
        return None;
    }
    if datagram[0] != 0 {
        return None;
    }
    Some(&datagram[header..datagram.len() - crc])
}
