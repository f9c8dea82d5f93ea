//! Sangoma receiver lifecycle and read path.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token};

use crate::error::{ReadOutcome, RecvError};
use crate::probe::{self, LinkProtocol};
use crate::trace::{debug, info, warn};

use super::frame;
use super::socket::RawSocket;

/// Token the receiver's socket is registered under.
const SOCKET_TOKEN: Token = Token(0);

/// Upper bound on one `read_packet` wait.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll granularity; the shutdown flag is rechecked this often.
const POLL_SLICE: Duration = Duration::from_millis(250);

/// Largest datagram the driver delivers: 512 packet bytes plus the widest
/// driver header and CRC, rounded up.
const RECV_BUF_LEN: usize = 1024;

/// Primary interface name unless overridden.
pub const DEFAULT_INTERFACE: &str = "wp1_chdlc";

/// Fallback interface names tried in order after the primary. The second
/// one is only present on the A142 hardware revision, whose frames carry
/// no trailing CRC.
const FALLBACK_INTERFACES: [&str; 2] = ["wp1_chdlc0", "wp1a142_hdlc"];

/// Configuration for the Sangoma receiver.
#[derive(Debug, Clone)]
pub struct SangomaConfig {
    /// Primary interface name tried first at `enable`.
    pub interface: String,
    /// Card (router) name in the bind address.
    pub card: String,
}

impl Default for SangomaConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            card: "wanpipe1".to_string(),
        }
    }
}

/// Live socket state, present only between `enable` and `disable`.
struct Session {
    socket: RawSocket,
    poll: Poll,
    events: Events,
}

/// Receiver for the Sangoma WAN HDLC adapter.
///
/// Lifecycle: [`initialize`](Self::initialize) →
/// [`enable`](Self::enable) → [`read_packet`](Self::read_packet) loop →
/// [`disable`](Self::disable) / [`close`](Self::close). Not shareable
/// across threads; a second thread may only flip the shutdown flag from
/// [`shutdown_flag`](Self::shutdown_flag) to unblock a reader.
pub struct SangomaReceiver {
    config: SangomaConfig,
    shutdown: Arc<AtomicBool>,
    protocol: Option<LinkProtocol>,
    session: Option<Session>,
    recv_buf: Vec<u8>,
    crc_absent: bool,
}

impl SangomaReceiver {
    /// Creates a receiver in the closed state.
    #[must_use]
    pub fn new(config: SangomaConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            protocol: None,
            session: None,
            recv_buf: vec![0u8; RECV_BUF_LEN],
            crc_absent: false,
        }
    }

    /// Returns the flag that unblocks an in-flight `read_packet` when set.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Overrides the primary interface name. Takes effect on the next
    /// `enable`; pure mutation, no I/O.
    pub fn set_interface_name(&mut self, name: &str) {
        self.config.interface = name.to_string();
    }

    /// True if `enable` determined the board is the CRC-less A142 revision.
    #[must_use]
    pub fn crc_absent(&self) -> bool {
        self.crc_absent
    }

    /// Probes the kernel for the link protocol. Opens nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Probe`] if the kernel version cannot be parsed.
    pub fn initialize(&mut self) -> Result<(), RecvError> {
        let protocol = probe::probe_protocol()?;
        info!(?protocol, "sangoma: link protocol selected");
        self.protocol = Some(protocol);
        Ok(())
    }

    /// Opens the raw socket and binds it, trying the primary interface
    /// name and then the two fallbacks.
    ///
    /// # Errors
    ///
    /// - [`RecvError::NotInitialized`] before `initialize`.
    /// - [`RecvError::Socket`] if the socket cannot be created.
    /// - [`RecvError::Bind`] if no candidate interface accepts the bind.
    pub fn enable(&mut self) -> Result<(), RecvError> {
        let protocol = self.protocol.ok_or(RecvError::NotInitialized)?;
        let mut socket = RawSocket::open(protocol).map_err(|e| RecvError::Socket {
            op: "open",
            source: e,
        })?;

        let candidates = [
            self.config.interface.as_str(),
            FALLBACK_INTERFACES[0],
            FALLBACK_INTERFACES[1],
        ];
        let card = self.config.card.as_str();
        let chosen = bind_sequence(&candidates, |iface| socket.bind(iface, card)).map_err(
            |(attempted, source)| RecvError::Bind {
                attempted,
                protocol: protocol.family(),
                source,
            },
        )?;

        self.crc_absent = crc_absent_after_bind(&candidates, chosen);
        info!(
            iface = candidates[chosen],
            crc_absent = self.crc_absent,
            "sangoma: bound"
        );

        let poll = Poll::new().map_err(|e| RecvError::Socket {
            op: "poll create",
            source: e,
        })?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
            .map_err(|e| RecvError::Socket {
                op: "register",
                source: e,
            })?;

        self.session = Some(Session {
            socket,
            poll,
            events: Events::with_capacity(4),
        });
        Ok(())
    }

    /// Waits up to five seconds for a frame and copies its payload into
    /// `out`.
    ///
    /// Unlike the Franklin path, no synthetic header is added: Sangoma
    /// HDLC frames already carry the canonical packet shape on the wire,
    /// so the board payload is handed back verbatim. Callers that consume
    /// both receiver types branch on board type, as the assembly layer
    /// always has.
    ///
    /// Returns [`ReadOutcome::NoData`] on timeout, shutdown request, short
    /// frames, and board-flagged frames.
    ///
    /// # Errors
    ///
    /// - [`RecvError::NotEnabled`] outside the enabled state.
    /// - [`RecvError::UnexpectedReadiness`] (recoverable) if the poll wakes
    ///   for a foreign descriptor; nothing is consumed.
    /// - [`RecvError::Socket`] (fatal) on poll or receive failure.
    pub fn read_packet(&mut self, out: &mut [u8]) -> Result<ReadOutcome, RecvError> {
        let Some(session) = self.session.as_mut() else {
            return Err(RecvError::NotEnabled);
        };
        let Session {
            socket,
            poll,
            events,
        } = session;

        let received = recv_deadline(
            poll,
            events,
            &self.shutdown,
            READ_TIMEOUT,
            &mut self.recv_buf,
            |buf| socket.recv(buf),
        )?;
        let Some(n) = received else {
            return Ok(ReadOutcome::NoData);
        };

        let Some(payload) = frame::payload(&self.recv_buf[..n], self.crc_absent) else {
            debug!(len = n, "sangoma: skipping short or flagged frame");
            return Ok(ReadOutcome::NoData);
        };
        if payload.len() > out.len() {
            warn!(
                len = payload.len(),
                cap = out.len(),
                "sangoma: dropping frame larger than caller buffer"
            );
            return Ok(ReadOutcome::NoData);
        }
        out[..payload.len()].copy_from_slice(payload);
        Ok(ReadOutcome::Data(payload.len()))
    }

    /// Releases the socket, returning to the initialized state. Idempotent.
    pub fn disable(&mut self) {
        if self.session.take().is_some() {
            info!("sangoma: disabled");
        }
    }

    /// Releases everything. Idempotent; a later `initialize` starts fresh.
    pub fn close(&mut self) {
        self.session = None;
        self.protocol = None;
        self.crc_absent = false;
    }
}

/// Receives one datagram within `timeout`, rechecking `shutdown` every
/// poll slice. `Ok(None)` is a timeout or a shutdown request.
///
/// `recv` is attempted before every poll: the epoll backend behind mio is
/// edge-triggered, so a datagram queued behind an already-consumed one
/// never raises a fresh event. Consumption, not event delivery, decides
/// readiness; `WouldBlock` is the signal to wait.
fn recv_deadline<F>(
    poll: &mut Poll,
    events: &mut Events,
    shutdown: &AtomicBool,
    timeout: Duration,
    buf: &mut [u8],
    mut recv: F,
) -> Result<Option<usize>, RecvError>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("sangoma: shutdown requested, abandoning wait");
            return Ok(None);
        }

        match recv(buf) {
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(RecvError::Socket {
                    op: "recv",
                    source: e,
                });
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        let slice = POLL_SLICE.min(deadline - now);
        match poll.poll(events, Some(slice)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(RecvError::Socket {
                    op: "poll",
                    source: e,
                });
            }
        }
        if let Some(event) = events.iter().next() {
            if event.token() != SOCKET_TOKEN {
                return Err(RecvError::UnexpectedReadiness);
            }
        }
    }
}

/// True when the interface that bound is the A142 name, which is always
/// the last candidate tried. A142 frames carry no trailing CRC bytes.
fn crc_absent_after_bind(candidates: &[&str], chosen: usize) -> bool {
    chosen + 1 == candidates.len()
}

/// Tries `bind` against each candidate in order, returning the index of
/// the first that succeeds, or every attempted name plus the last error.
fn bind_sequence<F>(
    candidates: &[&str],
    mut bind: F,
) -> Result<usize, (Vec<String>, io::Error)>
where
    F: FnMut(&str) -> io::Result<()>,
{
    let mut last_err = io::Error::from(io::ErrorKind::NotFound);
    for (i, name) in candidates.iter().enumerate() {
        match bind(name) {
            Ok(()) => return Ok(i),
            Err(e) => {
                debug!(iface = *name, error = %e, "sangoma: bind attempt failed");
                last_err = e;
            }
        }
    }
    let attempted = candidates.iter().map(|s| (*s).to_string()).collect();
    Err((attempted, last_err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    #[test]
    fn bind_sequence_stops_at_first_success() {
        let mut tried = Vec::new();
        let idx = bind_sequence(&["a", "b", "c"], |name| {
            tried.push(name.to_string());
            if name == "b" {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        })
        .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(tried, ["a", "b"]);
    }

    #[test]
    fn third_candidate_marks_crc_absent() {
        // The receiver flags crc_absent exactly when the last fallback is
        // the one that binds.
        let candidates = ["a", "b", "c"];
        let idx = bind_sequence(&candidates, |name| {
            if name == "c" {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        })
        .unwrap();
        assert_eq!(idx, 2);
        assert!(crc_absent_after_bind(&candidates, idx));
    }

    #[test]
    fn earlier_candidates_keep_crc_expected() {
        let candidates = ["a", "b", "c"];
        assert!(!crc_absent_after_bind(&candidates, 0));
        assert!(!crc_absent_after_bind(&candidates, 1));
    }

    #[test]
    fn all_failures_report_every_attempt() {
        let (attempted, _) = bind_sequence(&["a", "b", "c"], |_| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();
        assert_eq!(attempted, ["a", "b", "c"]);
    }

    #[test]
    fn read_before_enable_is_fatal() {
        let mut rx = SangomaReceiver::new(SangomaConfig::default());
        let mut buf = [0u8; 64];
        let err = rx.read_packet(&mut buf).unwrap_err();
        assert!(matches!(err, RecvError::NotEnabled));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn enable_before_initialize_is_rejected() {
        let mut rx = SangomaReceiver::new(SangomaConfig::default());
        assert!(matches!(rx.enable(), Err(RecvError::NotInitialized)));
    }

    #[test]
    fn enable_without_hardware_fails_fatally() {
        // No WANPIPE driver in a test environment: socket creation or
        // every bind attempt fails, both of which are session-fatal.
        let mut rx = SangomaReceiver::new(SangomaConfig::default());
        rx.initialize().unwrap();
        let err = rx.enable().unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut rx = SangomaReceiver::new(SangomaConfig::default());
        rx.disable();
        rx.close();
        rx.close();
    }

    #[test]
    fn set_interface_name_is_pure_mutation() {
        let mut rx = SangomaReceiver::new(SangomaConfig::default());
        rx.set_interface_name("wp9_custom");
        assert_eq!(rx.config.interface, "wp9_custom");
    }

    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixDatagram;

    use mio::unix::SourceFd;

    /// Registered nonblocking datagram pair, wired the way `enable` wires
    /// the WANPIPE socket.
    fn registered_pair() -> (Poll, Events, UnixDatagram, UnixDatagram) {
        let (tx, rx) = UnixDatagram::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        let poll = Poll::new().unwrap();
        poll.registry()
            .register(&mut SourceFd(&rx.as_raw_fd()), SOCKET_TOKEN, Interest::READABLE)
            .unwrap();
        (poll, Events::with_capacity(4), tx, rx)
    }

    #[test]
    fn queued_datagrams_drain_without_fresh_events() {
        let (mut poll, mut events, tx, rx) = registered_pair();
        tx.send(b"frame-one").unwrap();
        tx.send(b"frame-two").unwrap();

        let shutdown = AtomicBool::new(false);
        let mut buf = [0u8; 64];
        let n = recv_deadline(
            &mut poll,
            &mut events,
            &shutdown,
            Duration::from_secs(1),
            &mut buf,
            |b| rx.recv(b),
        )
        .unwrap()
        .unwrap();
        assert_eq!(&buf[..n], b"frame-one");

        // The second datagram was queued behind the first and raises no
        // new readiness event; consumption has to find it anyway.
        let n = recv_deadline(
            &mut poll,
            &mut events,
            &shutdown,
            Duration::from_secs(1),
            &mut buf,
            |b| rx.recv(b),
        )
        .unwrap()
        .unwrap();
        assert_eq!(&buf[..n], b"frame-two");
    }

    #[test]
    fn empty_socket_times_out_with_no_data() {
        let (mut poll, mut events, _tx, rx) = registered_pair();
        let shutdown = AtomicBool::new(false);
        let mut buf = [0u8; 64];
        let got = recv_deadline(
            &mut poll,
            &mut events,
            &shutdown,
            Duration::from_millis(50),
            &mut buf,
            |b| rx.recv(b),
        )
        .unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn shutdown_preempts_queued_data() {
        let (mut poll, mut events, tx, rx) = registered_pair();
        tx.send(b"pending").unwrap();

        let shutdown = AtomicBool::new(true);
        let mut buf = [0u8; 64];
        let got = recv_deadline(
            &mut poll,
            &mut events,
            &shutdown,
            Duration::from_secs(5),
            &mut buf,
            |b| rx.recv(b),
        )
        .unwrap();
        assert_eq!(got, None);
    }
}
