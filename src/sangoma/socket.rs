//! Raw WANPIPE socket wrapper.
//!
//! The WANPIPE driver speaks a nonstandard socket family whose number is
//! kernel-generation dependent (see [`crate::probe`]) and whose bind
//! address names an interface and a card rather than a network endpoint.
//! Neither std nor mio can express that family, so socket creation and
//! binding go through libc directly; readiness integration stays on mio
//! via [`SourceFd`].

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

use crate::probe::LinkProtocol;

/// Length of the interface and card name fields in the bind address.
pub const NAME_LEN: usize = 14;

/// Link protocol type carried in the bind address, big-endian on the wire.
pub const PROTO_TYPE: u16 = 0x17;

/// Bind address for a WANPIPE socket.
///
/// ```text
/// ┌────────────┬──────────────┬──────────────┬──────────────┐
/// │ Family (2) │ Iface (14)   │ Card (14)    │ Type BE (2)  │
/// └────────────┴──────────────┴──────────────┴──────────────┘
/// ```
#[repr(C)]
struct SockAddrWan {
    family: libc::sa_family_t,
    iface: [u8; NAME_LEN],
    card: [u8; NAME_LEN],
    proto_type: u16,
}

/// A nonblocking raw socket on the WANPIPE link protocol.
pub struct RawSocket {
    fd: OwnedFd,
    protocol: LinkProtocol,
}

impl RawSocket {
    /// Opens a raw socket on the probed link protocol, in nonblocking
    /// mode as mio sources must be.
    ///
    /// # Errors
    ///
    /// Returns the `socket(2)` error, typically `EAFNOSUPPORT` when the
    /// WANPIPE driver is not loaded.
    pub fn open(protocol: LinkProtocol) -> io::Result<Self> {
        // SAFETY: plain syscall; the returned fd is checked before adoption.
        let fd = unsafe { libc::socket(protocol.family(), libc::SOCK_RAW, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created socket we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // SAFETY: F_SETFL on an owned fd with a valid flag argument.
        let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, protocol })
    }

    /// Link protocol this socket was opened with.
    #[must_use]
    pub fn protocol(&self) -> LinkProtocol {
        self.protocol
    }

    /// Binds the socket to a driver interface and card.
    ///
    /// Names longer than [`NAME_LEN`] are truncated, matching the driver's
    /// fixed-width address fields.
    ///
    /// # Errors
    ///
    /// Returns the `bind(2)` error, typically `ENODEV` when the named
    /// interface does not exist on this card.
    pub fn bind(&self, iface: &str, card: &str) -> io::Result<()> {
        let addr = SockAddrWan {
            family: self.protocol.family() as libc::sa_family_t,
            iface: fixed_name(iface),
            card: fixed_name(card),
            proto_type: PROTO_TYPE.to_be(),
        };
        // SAFETY: addr is a properly initialized repr(C) struct and the
        // length passed matches its size.
        let rc = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                size_of::<SockAddrWan>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Receives one datagram, returning the number of bytes read.
    ///
    /// # Errors
    ///
    /// Returns the `recv(2)` error; `WouldBlock` when no datagram is
    /// queued, since the socket is nonblocking.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl AsFd for RawSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Source for RawSocket {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).deregister(registry)
    }
}

/// Truncates or zero-pads a name into a fixed driver address field.
fn fixed_name(name: &str) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}
