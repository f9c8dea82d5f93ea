//! Franklin receiver lifecycle and batch-consuming read path.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ReadOutcome, RecvError};
use crate::packet::{self, HEADER_LEN};
use crate::trace::{debug, info};

use super::batch::MessageBatch;
use super::board::{self, IcpBoard, IcpDevice};
use super::loader;

/// Configuration for the Franklin receiver.
#[derive(Debug, Clone)]
pub struct FranklinConfig {
    /// Board device node.
    pub device: PathBuf,
    /// Program image downloaded at `enable`.
    pub image: PathBuf,
}

impl Default for FranklinConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/icp188"),
            image: PathBuf::from("/usr/lib/domsat/icp188.exe"),
        }
    }
}

/// Receiver for the Franklin ICP188 co-processor board.
///
/// Lifecycle: [`initialize`](Self::initialize) →
/// [`enable`](Self::enable) → [`read_packet`](Self::read_packet) loop →
/// [`disable`](Self::disable) / [`close`](Self::close). Generic over
/// [`IcpBoard`] so tests can substitute an in-memory board via
/// [`attach`](Self::attach); production code uses the [`IcpDevice`]
/// default.
pub struct FranklinReceiver<B = IcpDevice> {
    config: FranklinConfig,
    shutdown: Arc<AtomicBool>,
    board: Option<B>,
    batch: MessageBatch,
    enabled: bool,
}

impl FranklinReceiver<IcpDevice> {
    /// Creates a receiver in the closed state.
    #[must_use]
    pub fn new(config: FranklinConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            board: None,
            batch: MessageBatch::new(),
            enabled: false,
        }
    }

    /// Opens the device node and applies the batch-read timeout policy.
    ///
    /// # Errors
    ///
    /// - [`RecvError::DeviceOpen`] if the device node cannot be opened.
    /// - [`RecvError::DeviceIo`] if the timer policy ioctl fails.
    pub fn initialize(&mut self) -> Result<(), RecvError> {
        let mut device =
            IcpDevice::open(&self.config.device).map_err(|e| RecvError::DeviceOpen {
                path: self.config.device.clone(),
                source: e,
            })?;
        device
            .set_timer_policy(board::poll_delay_ticks())
            .map_err(|e| RecvError::DeviceIo {
                op: "set timer policy",
                source: e,
            })?;
        info!(device = %self.config.device.display(), "franklin: device opened");
        self.board = Some(device);
        Ok(())
    }
}

impl<B: IcpBoard> FranklinReceiver<B> {
    /// Creates a receiver already holding an open board, in the
    /// initialized state. Used by tests and alternate board backends.
    #[must_use]
    pub fn attach(config: FranklinConfig, board: B) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            board: Some(board),
            batch: MessageBatch::new(),
            enabled: false,
        }
    }

    /// Returns the flag that makes an in-flight `read_packet` return
    /// `NoData` promptly when set.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Downloads the program image, resets the board, switches it to DCP
    /// message mode, and triggers program start.
    ///
    /// Partial failure is not rolled back; the board is left indeterminate
    /// and the caller retries with `disable` then `enable`.
    ///
    /// # Errors
    ///
    /// - [`RecvError::NotInitialized`] before `initialize`/`attach`.
    /// - [`RecvError::ImageOpen`] and the [`loader`] errors for the
    ///   download step.
    /// - [`RecvError::DeviceIo`] for the reset and mode switches.
    pub fn enable(&mut self) -> Result<(), RecvError> {
        let board = self.board.as_mut().ok_or(RecvError::NotInitialized)?;

        let mut image = File::open(&self.config.image).map_err(|e| RecvError::ImageOpen {
            path: self.config.image.clone(),
            source: e,
        })?;
        loader::load(&mut image, board)?;

        board.reset().map_err(|e| RecvError::DeviceIo {
            op: "reset",
            source: e,
        })?;
        board.set_message_mode().map_err(|e| RecvError::DeviceIo {
            op: "message mode",
            source: e,
        })?;
        loader::start(board)?;

        self.enabled = true;
        info!("franklin: enabled");
        Ok(())
    }

    /// Returns the next message as a canonical packet.
    ///
    /// Consumes the batch cache first; when it is exhausted, performs one
    /// underlying batch read. A zero-message read is the timeout case and
    /// yields [`ReadOutcome::NoData`]. Each returned packet is the 8-byte
    /// synthetic header (sequence number big-endian at bytes 5..7,
    /// fragment byte `1`) followed by the message payload.
    ///
    /// # Errors
    ///
    /// - [`RecvError::NotEnabled`] outside the enabled state.
    /// - Recoverable per-message and cache errors from
    ///   [`MessageBatch::take_next`]; calling again makes progress.
    /// - [`RecvError::DeviceIo`] (fatal) if the batch read itself fails.
    /// - [`RecvError::ShortCallerBuffer`] if `out` is smaller than the
    ///   packet; size it with [`packet::MAX_FRANKLIN_PACKET`].
    pub fn read_packet(&mut self, out: &mut [u8]) -> Result<ReadOutcome, RecvError> {
        if !self.enabled {
            return Err(RecvError::NotEnabled);
        }
        let board = self.board.as_mut().ok_or(RecvError::NotEnabled)?;

        if self.shutdown.load(Ordering::Relaxed) {
            debug!("franklin: shutdown requested, abandoning read");
            return Ok(ReadOutcome::NoData);
        }

        if self.batch.is_exhausted() {
            let (data, offsets) = self.batch.refill_bufs();
            let n = board
                .read_batch(data, offsets)
                .map_err(|e| RecvError::DeviceIo {
                    op: "batch read",
                    source: e,
                })?;
            self.batch.set_available(n);
            if n == 0 {
                return Ok(ReadOutcome::NoData); // underlying timeout
            }
            debug!(count = n, "franklin: batch refilled");
        }

        let Some((num, payload)) = self.batch.take_next()? else {
            return Ok(ReadOutcome::NoData);
        };
        let need = HEADER_LEN + payload.len();
        if need > out.len() {
            return Err(RecvError::ShortCallerBuffer {
                need,
                have: out.len(),
            });
        }
        let len = packet::synthesize(num, payload, out);
        Ok(ReadOutcome::Data(len))
    }

    /// Empties the batch cache and leaves the enabled state. Hardware is
    /// untouched; the device stays open for a later `enable`.
    pub fn disable(&mut self) {
        self.batch.reset();
        if self.enabled {
            self.enabled = false;
            info!("franklin: disabled");
        }
    }

    /// Closes the device handle unconditionally. Idempotent.
    pub fn close(&mut self) {
        self.board = None;
        self.enabled = false;
        self.batch.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    #[test]
    fn read_before_enable_is_fatal() {
        let mut rx = FranklinReceiver::new(FranklinConfig::default());
        let mut buf = [0u8; 64];
        let err = rx.read_packet(&mut buf).unwrap_err();
        assert!(matches!(err, RecvError::NotEnabled));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn enable_before_initialize_is_rejected() {
        let mut rx = FranklinReceiver::new(FranklinConfig::default());
        assert!(matches!(rx.enable(), Err(RecvError::NotInitialized)));
    }

    #[test]
    fn initialize_without_device_node_fails() {
        let mut rx = FranklinReceiver::new(FranklinConfig {
            device: PathBuf::from("/dev/nonexistent-icp188"),
            ..FranklinConfig::default()
        });
        let err = rx.initialize().unwrap_err();
        assert!(matches!(err, RecvError::DeviceOpen { .. }));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut rx = FranklinReceiver::new(FranklinConfig::default());
        rx.disable();
        rx.close();
        rx.close();
    }
}
