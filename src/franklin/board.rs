//! Co-processor board access.
//!
//! [`IcpBoard`] is the seam between receiver/loader logic and the board's
//! ioctl surface. The driver structures exchanged here are a fixed external
//! ABI; beyond the fields the loader and receiver need, they are treated as
//! a black box. [`IcpDevice`] is the real implementation over the device
//! node; tests substitute in-memory boards.

use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::Path;

/// Shared control block exchanged with the board driver.
///
/// Fixed 32-byte driver ABI. The loader writes the program's start jump
/// vector and the ready flag; everything else is reserved.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedBlock {
    /// Start address as a `segment:offset` pair, segment in the high word.
    pub jump_vector: u32,
    /// Nonzero once the program image is fully downloaded.
    pub ready: u8,
    reserved: [u8; 27],
}

/// Timer policy argument for the batch-read timeout.
#[repr(C)]
struct TimerPolicy {
    mode: u32,
    ticks: u32,
}

/// Poll mode "always, with delay between polls".
const POLL_ALWAYS_WITH_DELAY: u32 = 2;

/// Batch-read request handed to the driver: parallel offset array plus a
/// shared data buffer, both caller-owned.
#[repr(C)]
struct BatchReadRequest {
    capacity: u32,
    count: u32,
    offsets: *mut u32,
    data: *mut u8,
    data_len: u32,
}

/// Ioctl request codes for the board driver, Linux `_IO` encoding with
/// type `'F'`.
mod ioc {
    use super::{BatchReadRequest, SharedBlock, TimerPolicy};

    const TYPE: libc::c_ulong = b'F' as libc::c_ulong;
    const NONE: libc::c_ulong = 0;
    const WRITE: libc::c_ulong = 1;
    const READ: libc::c_ulong = 2;

    const fn code(dir: libc::c_ulong, nr: libc::c_ulong, size: usize) -> libc::c_ulong {
        (dir << 30) | ((size as libc::c_ulong) << 16) | (TYPE << 8) | nr
    }

    pub const RESET: libc::c_ulong = code(NONE, 0, 0);
    pub const RAW_MODE: libc::c_ulong = code(NONE, 1, 0);
    pub const MSG_MODE: libc::c_ulong = code(NONE, 2, 0);
    pub const SET_TIMER: libc::c_ulong = code(WRITE, 3, size_of::<TimerPolicy>());
    pub const GET_SHARED: libc::c_ulong = code(READ, 4, size_of::<SharedBlock>());
    pub const SET_SHARED: libc::c_ulong = code(WRITE, 5, size_of::<SharedBlock>());
    pub const READ_BATCH: libc::c_ulong = code(READ | WRITE, 6, size_of::<BatchReadRequest>());
}

/// Batch-read poll delay: a tenth of the OS clock tick rate, at least one
/// tick.
#[must_use]
pub fn poll_delay_ticks() -> u32 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let hz = if hz > 0 { hz as u32 } else { 100 };
    (hz / 10).max(1)
}

/// The co-processor's control and transfer surface.
///
/// All methods mirror one driver operation; implementations report raw
/// `io::Error`s and leave classification to the caller.
pub trait IcpBoard {
    /// Hardware reset.
    fn reset(&mut self) -> io::Result<()>;
    /// Raw (download) mode, required before streaming an image.
    fn set_raw_mode(&mut self) -> io::Result<()>;
    /// DCP message mode, required before batch reads.
    fn set_message_mode(&mut self) -> io::Result<()>;
    /// Applies the batch-read timeout policy.
    fn set_timer_policy(&mut self, ticks: u32) -> io::Result<()>;
    /// Reads the shared control block.
    fn shared_block(&mut self) -> io::Result<SharedBlock>;
    /// Writes the shared control block.
    fn set_shared_block(&mut self, block: &SharedBlock) -> io::Result<()>;
    /// Positions the board-memory cursor for the next write.
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    /// Writes raw bytes at the current cursor.
    fn write_block(&mut self, block: &[u8]) -> io::Result<()>;
    /// Fetches one message batch. `Ok(0)` is the timeout case, not an
    /// error; `offsets[..n]` locate the returned messages inside `data`.
    fn read_batch(&mut self, data: &mut [u8], offsets: &mut [u32]) -> io::Result<usize>;
}

/// The real board behind its device node.
pub struct IcpDevice {
    file: std::fs::File,
}

impl IcpDevice {
    /// Opens the board's device node read-write.
    ///
    /// # Errors
    ///
    /// Returns the `open(2)` error, typically `ENOENT` when the board
    /// driver is not present.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    fn ioctl(&self, request: libc::c_ulong, arg: *mut libc::c_void) -> io::Result<()> {
        // SAFETY: request codes and argument layouts match the driver ABI
        // declared above; arg outlives the call.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl IcpBoard for IcpDevice {
    fn reset(&mut self) -> io::Result<()> {
        self.ioctl(ioc::RESET, std::ptr::null_mut())
    }

    fn set_raw_mode(&mut self) -> io::Result<()> {
        self.ioctl(ioc::RAW_MODE, std::ptr::null_mut())
    }

    fn set_message_mode(&mut self) -> io::Result<()> {
        self.ioctl(ioc::MSG_MODE, std::ptr::null_mut())
    }

    fn set_timer_policy(&mut self, ticks: u32) -> io::Result<()> {
        let mut policy = TimerPolicy {
            mode: POLL_ALWAYS_WITH_DELAY,
            ticks,
        };
        self.ioctl(
            ioc::SET_TIMER,
            std::ptr::from_mut(&mut policy).cast::<libc::c_void>(),
        )
    }

    fn shared_block(&mut self) -> io::Result<SharedBlock> {
        let mut block = SharedBlock::default();
        self.ioctl(
            ioc::GET_SHARED,
            std::ptr::from_mut(&mut block).cast::<libc::c_void>(),
        )?;
        Ok(block)
    }

    fn set_shared_block(&mut self, block: &SharedBlock) -> io::Result<()> {
        let mut copy = *block;
        self.ioctl(
            ioc::SET_SHARED,
            std::ptr::from_mut(&mut copy).cast::<libc::c_void>(),
        )
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        self.file.write_all(block)
    }

    fn read_batch(&mut self, data: &mut [u8], offsets: &mut [u32]) -> io::Result<usize> {
        let mut req = BatchReadRequest {
            capacity: offsets.len() as u32,
            count: 0,
            offsets: offsets.as_mut_ptr(),
            data: data.as_mut_ptr(),
            data_len: data.len() as u32,
        };
        self.ioctl(
            ioc::READ_BATCH,
            std::ptr::from_mut(&mut req).cast::<libc::c_void>(),
        )?;
        Ok(req.count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_block_matches_driver_abi() {
        assert_eq!(size_of::<SharedBlock>(), 32);
    }

    #[test]
    fn ioctl_codes_are_distinct() {
        let codes = [
            ioc::RESET,
            ioc::RAW_MODE,
            ioc::MSG_MODE,
            ioc::SET_TIMER,
            ioc::GET_SHARED,
            ioc::SET_SHARED,
            ioc::READ_BATCH,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn poll_delay_is_at_least_one_tick() {
        assert!(poll_delay_ticks() >= 1);
    }

    #[test]
    fn missing_device_node_fails_open() {
        assert!(IcpDevice::open(Path::new("/dev/nonexistent-icp188")).is_err());
    }
}
