//! One-shot program download and start for the co-processor.
//!
//! The board boots idle; before any frame reception the host must stream
//! an executable image into board memory and release the program from its
//! wait loop. The image is a fixed external artifact: a 28-byte header
//! carrying a signature, image length words, the header size in 16-byte
//! paragraphs, and the initial `CS:IP` pair, then a 1056-byte reserved
//! region past the end of the header, then the program body.

use std::io::{Read, Seek, SeekFrom};

use chrono::{Datelike, Timelike, Utc};

use crate::error::RecvError;
use crate::trace::{debug, info};

use super::board::IcpBoard;

/// Fixed image header length.
pub const IMAGE_HEADER_LEN: usize = 28;

/// Expected image signature ("MZ" executable format).
pub const IMAGE_SIGNATURE: u16 = 0x5A4D;

/// Reserved region between the image header and the program body. The
/// same region in board memory holds the clock and configuration block.
pub const RESERVED_LEN: u64 = 1056;

/// Transfer block size while streaming the body.
pub const LOAD_BLOCK_LEN: usize = 512;

/// Board-memory offset of the start clock record.
pub const CLOCK_OFFSET: u64 = 0x400;

/// Board-memory offset of the configure-ok flag that releases the
/// program from its wait loop.
pub const CONFIGURE_OK_OFFSET: u64 = 0x40F;

/// Parsed image header fields the loader needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// File signature; must equal [`IMAGE_SIGNATURE`].
    pub signature: u16,
    /// Bytes used in the image's final 512-byte page.
    pub last_page_len: u16,
    /// Image length in 512-byte pages.
    pub page_count: u16,
    /// Header size in 16-byte paragraphs.
    pub header_paras: u16,
    /// Initial instruction pointer.
    pub initial_ip: u16,
    /// Initial code segment, relative to the load segment.
    pub initial_cs: u16,
}

impl ImageHeader {
    /// Reads and validates the fixed header from the start of an image.
    ///
    /// # Errors
    ///
    /// - [`RecvError::ImageFormat`] if fewer than 28 bytes could be read.
    /// - [`RecvError::ImageSignature`] on a signature mismatch.
    /// - [`RecvError::ImageIo`] on a read failure.
    pub fn parse(r: &mut impl Read) -> Result<Self, RecvError> {
        let mut buf = [0u8; IMAGE_HEADER_LEN];
        let mut got = 0;
        while got < IMAGE_HEADER_LEN {
            match r.read(&mut buf[got..]) {
                Ok(0) => {
                    return Err(RecvError::ImageFormat {
                        need: IMAGE_HEADER_LEN,
                        got,
                    });
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecvError::ImageIo { source: e }),
            }
        }

        let word = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let header = Self {
            signature: word(0),
            last_page_len: word(2),
            page_count: word(4),
            header_paras: word(8),
            initial_ip: word(20),
            initial_cs: word(22),
        };
        if header.signature != IMAGE_SIGNATURE {
            return Err(RecvError::ImageSignature {
                found: header.signature,
            });
        }
        Ok(header)
    }

    /// Start address for the shared control block: `CS` in the high word,
    /// `IP` in the low word.
    #[must_use]
    pub fn jump_vector(&self) -> u32 {
        (u32::from(self.initial_cs) << 16) | u32::from(self.initial_ip)
    }

    /// File offset where the header ends and the reserved region begins.
    #[must_use]
    pub fn header_end(&self) -> u64 {
        u64::from(self.header_paras) * 16
    }
}

/// Downloads a program image to the board.
///
/// Puts the board in raw/reset mode, writes the start jump vector into the
/// shared control block, skips the reserved region on both the image and
/// the board, streams the body in [`LOAD_BLOCK_LEN`] chunks, and finally
/// raises the ready flag. No rollback on failure: the board is left in an
/// indeterminate state and the caller retries via `disable`/`enable`.
///
/// # Errors
///
/// - [`RecvError::ImageFormat`] / [`RecvError::ImageSignature`] /
///   [`RecvError::ImageIo`] for image problems.
/// - [`RecvError::DeviceIo`] for any board ioctl, seek, or write failure.
pub fn load<R, B>(image: &mut R, board: &mut B) -> Result<(), RecvError>
where
    R: Read + Seek,
    B: IcpBoard + ?Sized,
{
    board.set_raw_mode().map_err(|e| RecvError::DeviceIo {
        op: "raw mode",
        source: e,
    })?;
    board.reset().map_err(|e| RecvError::DeviceIo {
        op: "reset",
        source: e,
    })?;

    let header = ImageHeader::parse(image)?;
    debug!(
        jump_vector = header.jump_vector(),
        pages = header.page_count,
        "franklin: image header parsed"
    );

    let mut shared = board.shared_block().map_err(|e| RecvError::DeviceIo {
        op: "get shared block",
        source: e,
    })?;
    shared.jump_vector = header.jump_vector();
    board
        .set_shared_block(&shared)
        .map_err(|e| RecvError::DeviceIo {
            op: "set shared block",
            source: e,
        })?;

    image
        .seek(SeekFrom::Start(header.header_end() + RESERVED_LEN))
        .map_err(|e| RecvError::ImageIo { source: e })?;
    board.seek_to(RESERVED_LEN).map_err(|e| RecvError::DeviceIo {
        op: "seek",
        source: e,
    })?;

    let mut block = [0u8; LOAD_BLOCK_LEN];
    loop {
        let n = match image.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RecvError::ImageIo { source: e }),
        };
        board
            .write_block(&block[..n])
            .map_err(|e| RecvError::DeviceIo {
                op: "write",
                source: e,
            })?;
    }

    shared.ready = 1;
    board
        .set_shared_block(&shared)
        .map_err(|e| RecvError::DeviceIo {
            op: "set ready flag",
            source: e,
        })?;

    info!("franklin: program image downloaded");
    Ok(())
}

/// Releases the downloaded program from its wait loop.
///
/// Writes the current UTC clock record (year, 1-based day of year, hour,
/// minute) at [`CLOCK_OFFSET`], then a nonzero configure-ok byte at
/// [`CONFIGURE_OK_OFFSET`].
///
/// # Errors
///
/// Returns [`RecvError::DeviceIo`] if either seek/write fails.
pub fn start<B: IcpBoard + ?Sized>(board: &mut B) -> Result<(), RecvError> {
    let now = Utc::now();
    start_at(
        board,
        now.year() as u16,
        now.ordinal() as u16,
        now.hour() as u8,
        now.minute() as u8,
    )
}

/// [`start`] with an explicit clock record; the board wants the 1-based
/// day number.
pub fn start_at(
    board: &mut (impl IcpBoard + ?Sized),
    year: u16,
    day_of_year: u16,
    hour: u8,
    minute: u8,
) -> Result<(), RecvError> {
    let mut record = [0u8; 6];
    record[0..2].copy_from_slice(&year.to_le_bytes());
    record[2..4].copy_from_slice(&day_of_year.to_le_bytes());
    record[4] = hour;
    record[5] = minute;

    let dev_err = |op: &'static str| move |e: std::io::Error| RecvError::DeviceIo { op, source: e };

    board.seek_to(CLOCK_OFFSET).map_err(dev_err("seek clock"))?;
    board.write_block(&record).map_err(dev_err("write clock"))?;
    board
        .seek_to(CONFIGURE_OK_OFFSET)
        .map_err(dev_err("seek configure-ok"))?;
    board.write_block(&[1]).map_err(dev_err("write configure-ok"))?;

    info!(year, day_of_year, hour, minute, "franklin: program started");
    Ok(())
}
