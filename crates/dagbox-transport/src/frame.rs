//! Length-prefixed multipart framing for stream-backed endpoints.
//!
//! Each message is one frame: a big-endian `u32` part count followed by
//! every part as a `u32` length and its bytes. Frames are written in one
//! sequence of buffered writes and flushed, so a well-behaved peer only
//! ever observes complete messages.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::stream::ConnStream;
use crate::Part;

/// Upper bound on parts per message.
const MAX_PARTS: u32 = 1024;
/// Upper bound on a single part's size.
const MAX_PART_BYTES: u32 = 16 * 1024 * 1024;

/// Result of attempting to read one frame from a connection.
pub(crate) enum ReadOutcome {
    /// A complete frame arrived.
    Frame(Vec<Part>),
    /// The peer closed the connection between frames.
    Eof,
    /// The socket is shutting down; the partial frame, if any, is
    /// discarded.
    Shutdown,
}

/// Reads one frame, polling the shutdown flag whenever the stream's read
/// timeout elapses.
///
/// The stream must have a read timeout configured; without one the reader
/// thread could never observe shutdown.
pub(crate) fn read_frame(
    stream: &mut ConnStream,
    shutdown: &AtomicBool,
) -> io::Result<ReadOutcome> {
    let mut count_buf = [0_u8; 4];
    match fill(stream, &mut count_buf, shutdown, true)? {
        FillOutcome::Filled => {}
        FillOutcome::Eof => return Ok(ReadOutcome::Eof),
        FillOutcome::Shutdown => return Ok(ReadOutcome::Shutdown),
    }
    let count = u32::from_be_bytes(count_buf);
    if count > MAX_PARTS {
        return Err(invalid_frame("part count exceeds limit"));
    }

    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut len_buf = [0_u8; 4];
        match fill(stream, &mut len_buf, shutdown, false)? {
            FillOutcome::Filled => {}
            FillOutcome::Eof => unreachable!("eof is an error mid-frame"),
            FillOutcome::Shutdown => return Ok(ReadOutcome::Shutdown),
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_PART_BYTES {
            return Err(invalid_frame("part size exceeds limit"));
        }

        let mut part = vec![0_u8; len as usize];
        match fill(stream, &mut part, shutdown, false)? {
            FillOutcome::Filled => parts.push(part),
            FillOutcome::Eof => unreachable!("eof is an error mid-frame"),
            FillOutcome::Shutdown => return Ok(ReadOutcome::Shutdown),
        }
    }

    Ok(ReadOutcome::Frame(parts))
}

/// Writes one frame and flushes it.
pub(crate) fn write_frame(stream: &mut impl Write, parts: &[Part]) -> io::Result<()> {
    let count = u32::try_from(parts.len()).map_err(|_| invalid_frame("too many parts"))?;
    if count > MAX_PARTS {
        return Err(invalid_frame("part count exceeds limit"));
    }

    stream.write_all(&count.to_be_bytes())?;
    for part in parts {
        let len = u32::try_from(part.len()).map_err(|_| invalid_frame("part too large"))?;
        if len > MAX_PART_BYTES {
            return Err(invalid_frame("part size exceeds limit"));
        }
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(part)?;
    }
    stream.flush()
}

enum FillOutcome {
    Filled,
    Eof,
    Shutdown,
}

/// Fills the buffer completely, retrying across read timeouts and
/// interrupts.
///
/// A clean EOF is only acceptable before the first byte of a frame
/// (`eof_ok` true); anywhere else it reports an unexpected-eof error.
fn fill(
    stream: &mut ConnStream,
    buf: &mut [u8],
    shutdown: &AtomicBool,
    eof_ok: bool,
) -> io::Result<FillOutcome> {
    let mut offset = 0;
    while offset < buf.len() {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(FillOutcome::Shutdown);
        }
        match stream.read(&mut buf[offset..]) {
            Ok(0) => {
                if eof_ok && offset == 0 {
                    return Ok(FillOutcome::Eof);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                ));
            }
            Ok(read) => offset += read,
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut
                    || error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(FillOutcome::Filled)
}

fn invalid_frame(reason: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}
