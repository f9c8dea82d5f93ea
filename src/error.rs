//! Error taxonomy and read outcomes shared by both receiver paths.
//!
//! The reference hardware layer reported everything through one return code
//! (`len > 0` data, `0` no data, `-1` retry later, `-2` re-enable) plus a
//! process-wide error string. Here each operation returns a structured error
//! instead; [`RecvError::severity`] recovers the `-1`/`-2` distinction and
//! [`ReadOutcome`] covers the non-error cases, so a caller loop can branch
//! exactly the way the legacy assembly layer did.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::probe::ProbeError;

/// Non-error result of a single `read_packet` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A packet was written into the caller's buffer; `0` is never used.
    Data(usize),
    /// Timeout, short frame, or board-flagged frame. Not an error; the
    /// caller simply polls again.
    NoData,
}

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Confined to a single frame or one cached batch. Calling
    /// `read_packet` again is safe and will make progress (legacy `-1`).
    Recoverable,
    /// The transport session is gone. The caller must `disable` and
    /// re-`enable` before reading again (legacy `-2`).
    Fatal,
}

/// Errors from receiver lifecycle and read operations.
#[derive(Debug, Error)]
pub enum RecvError {
    /// The link protocol could not be chosen from the kernel version.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// No candidate interface name was accepted by the WANPIPE driver.
    #[error("no interface accepted bind on protocol {protocol}, tried {attempted:?}: {source}")]
    Bind {
        attempted: Vec<String>,
        protocol: i32,
        source: io::Error,
    },

    /// Raw socket operation failed.
    #[error("socket {op} failed: {source}")]
    Socket {
        op: &'static str,
        source: io::Error,
    },

    /// The poll woke up for a descriptor we never registered. The pending
    /// data is left unconsumed.
    #[error("readiness reported for an unexpected descriptor")]
    UnexpectedReadiness,

    /// Lifecycle violation: `enable` before `initialize`.
    #[error("receiver is not initialized")]
    NotInitialized,

    /// Lifecycle violation: `read_packet` outside the enabled state.
    #[error("receiver is not enabled")]
    NotEnabled,

    /// The co-processor device node could not be opened.
    #[error("cannot open DCP device {path:?}: {source}")]
    DeviceOpen { path: PathBuf, source: io::Error },

    /// An ioctl, seek, or write against the co-processor device failed.
    #[error("device {op} failed: {source}")]
    DeviceIo {
        op: &'static str,
        source: io::Error,
    },

    /// The co-processor image file could not be opened.
    #[error("cannot open image {path:?}: {source}")]
    ImageOpen { path: PathBuf, source: io::Error },

    /// Reading or seeking the co-processor image file failed.
    #[error("image read failed: {source}")]
    ImageIo { source: io::Error },

    /// The image header could not be read in full.
    #[error("image header truncated: read {got} of {need} bytes")]
    ImageFormat { need: usize, got: usize },

    /// The image header carries the wrong signature.
    #[error("bad image signature {found:#06x}")]
    ImageSignature { found: u16 },

    /// A cached message offset points outside the batch buffer. The cache
    /// has been reset; the next read fetches a fresh batch.
    #[error("message {index} offset {offset} outside batch buffer of {capacity} bytes")]
    Bounds {
        index: usize,
        offset: usize,
        capacity: usize,
    },

    /// The inter-message gap check failed: the cached batch is structurally
    /// corrupt. The cache has been reset; the next read fetches fresh.
    #[error(
        "batch corrupt at message {index}: declared size {declared}, should be {expected} \
         (offsets {offset}..{next_offset}, {skipped} messages skipped so far)"
    )]
    BatchCorruption {
        index: usize,
        declared: usize,
        expected: usize,
        offset: usize,
        next_offset: usize,
        skipped: u64,
    },

    /// The board flagged this single message in error. The cache index has
    /// already advanced past it.
    #[error("message {index} flagged in error (flags {flags:#06x})")]
    FrameFlags { index: usize, flags: u16 },

    /// A single message declares a size beyond the board maximum. Skipped.
    #[error("message {index} oversized: {size} > {max} bytes")]
    Oversize {
        index: usize,
        size: usize,
        max: usize,
    },

    /// The caller's buffer cannot hold the next packet. The message was
    /// consumed from the cache and is lost.
    #[error("caller buffer too small: need {need}, have {have}")]
    ShortCallerBuffer { need: usize, have: usize },
}

impl RecvError {
    /// Classifies this error for the caller's retry policy.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnexpectedReadiness
            | Self::Bounds { .. }
            | Self::BatchCorruption { .. }
            | Self::FrameFlags { .. }
            | Self::Oversize { .. }
            | Self::ShortCallerBuffer { .. } => Severity::Recoverable,
            Self::Probe(_)
            | Self::Bind { .. }
            | Self::Socket { .. }
            | Self::NotInitialized
            | Self::NotEnabled
            | Self::DeviceOpen { .. }
            | Self::DeviceIo { .. }
            | Self::ImageOpen { .. }
            | Self::ImageIo { .. }
            | Self::ImageFormat { .. }
            | Self::ImageSignature { .. } => Severity::Fatal,
        }
    }
}
