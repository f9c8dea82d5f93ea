//! Sangoma WAN adapter receiver path.
//!
//! The Sangoma board delivers DOMSAT frames as raw HDLC datagrams on a
//! WANPIPE socket. This module owns the socket lifecycle, the bounded
//! readiness wait, and the board-header framing rules that turn a received
//! datagram into a caller-visible packet.

pub mod frame;
pub mod receiver;
pub mod socket;

pub use receiver::{SangomaConfig, SangomaReceiver};
pub use socket::RawSocket;
