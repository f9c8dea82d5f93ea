//! DOMSAT broadcast frame acquisition and normalization.
//!
//! This crate is the hardware-interface layer between a DOMSAT receiver
//! board and the message-assembly layer above it. Two board families are
//! supported, each behind its own receiver type:
//!
//! - [`sangoma::SangomaReceiver`]: a Sangoma WAN adapter in raw HDLC mode,
//!   read through a raw socket bound to a WANPIPE link protocol.
//! - [`franklin::FranklinReceiver`]: a Franklin ICP188 co-processor board,
//!   read through a batch ioctl against its device node. Requires a one-time
//!   program download (see [`franklin::loader`]) before frames flow.
//!
//! Both receivers share the same lifecycle: `initialize` → `enable` →
//! `read_packet` loop → `disable`/`close`. `read_packet` is the only blocking
//! call; see [`error::ReadOutcome`] and [`error::Severity`] for how outcomes
//! map onto the caller's retry policy.
//!
//! The Franklin path rewrites each board message into the canonical packet
//! shape defined in [`packet`]; the Sangoma path hands back the board payload
//! unchanged, because its HDLC frames already carry that shape on the wire.
//! The asymmetry is deliberate and documented on each `read_packet`.

pub mod error;
pub mod franklin;
pub mod packet;
pub mod probe;
pub mod sangoma;

mod trace;

pub use error::{ReadOutcome, RecvError, Severity};
pub use trace::init_tracing;
