//! Franklin ICP188 co-processor receiver path.
//!
//! The Franklin board runs a downloaded program on its embedded processor
//! and hands complete DCP messages to the host through a batch-read ioctl.
//! This module owns the board device lifecycle, the one-shot program
//! download ([`loader`]), and the batch cache that turns one underlying
//! read into a sequence of validated canonical packets.

pub mod batch;
pub mod board;
pub mod loader;
pub mod receiver;

pub use batch::{DCP_MSG_HEADER_LEN, MSGS_PER_READ, MessageBatch};
pub use board::{IcpBoard, IcpDevice, SharedBlock};
pub use receiver::{FranklinConfig, FranklinReceiver};
