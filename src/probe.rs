//! Kernel protocol probe for the Sangoma path.
//!
//! The WANPIPE driver changed its link protocol number between kernel
//! generations: kernels before 2.4 expose the legacy number, everything
//! newer exposes the modern one. The probe reads the running kernel's
//! release string once at `initialize` time and picks accordingly. It is a
//! pure function of the version string and touches nothing else.

use thiserror::Error;

/// Link-layer protocol number used when opening the raw WANPIPE socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LinkProtocol {
    /// Kernels older than 2.4.
    Legacy = 24,
    /// Kernels 2.4 and newer.
    Modern = 25,
}

impl LinkProtocol {
    /// Raw protocol/family number passed to `socket(2)`.
    #[must_use]
    pub const fn family(self) -> i32 {
        self as i32
    }
}

/// The kernel version string could not be turned into a protocol choice.
#[derive(Debug, Error)]
#[error("cannot parse kernel release `{release}` as major.minor")]
pub struct ProbeError {
    /// The release string as reported by the kernel.
    pub release: String,
}

/// Reads the kernel release via `uname(2)` and selects the link protocol.
///
/// # Errors
///
/// Returns [`ProbeError`] if the release string is not a dotted version.
pub fn probe_protocol() -> Result<LinkProtocol, ProbeError> {
    let uts = rustix::system::uname();
    let release = uts.release().to_string_lossy();
    select_protocol(&release)
}

/// Selects the link protocol from a `major.minor[.patch][-suffix]` string.
///
/// # Errors
///
/// Returns [`ProbeError`] if the first two dotted components are not
/// numeric.
pub fn select_protocol(release: &str) -> Result<LinkProtocol, ProbeError> {
    let err = || ProbeError {
        release: release.to_string(),
    };

    let mut parts = release.split('.');
    let major: u32 = parts.next().and_then(leading_number).ok_or_else(err)?;
    let minor: u32 = parts.next().and_then(leading_number).ok_or_else(err)?;

    if major < 2 || (major == 2 && minor < 4) {
        Ok(LinkProtocol::Legacy)
    } else {
        Ok(LinkProtocol::Modern)
    }
}

/// Parses the leading decimal digits of `s`, tolerating suffixes like
/// the `0-91-generic` in `5.15.0-91-generic`.
fn leading_number(s: &str) -> Option<u32> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}
