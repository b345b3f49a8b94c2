//! Incremental RESP frame splitter.
//!
//! [`split_frame`] is fed a growing byte buffer and re-invoked as more bytes
//! arrive; it reports how many bytes form the next complete frame without
//! assuming whole-datagram delivery.  `Ok(None)` means "need more data", not
//! an error.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed array header")]
    BadArrayHeader,
    #[error("malformed bulk length")]
    BadBulkLength,
}

/// Caps on attacker-supplied length headers.  Generous for any real client,
/// small enough that the declared counts can never overflow arithmetic below
/// or pin the connection waiting for data that will never come.
const MAX_ARRAY_ELEMENTS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Find the next complete frame at the start of `buf`.
///
/// Returns `Ok(Some((consumed, frame)))` where `frame` is the full byte span
/// of the frame including its framing, `Ok(None)` when the buffer does not
/// yet hold a complete frame, or an error for an unrecoverable header.
///
/// Three frame shapes are recognised:
/// - a RESP array of bulk strings (`*N\r\n($len\r\n<bytes>\r\n){N}`), complete
///   once `2N+1` CRLF-delimited segments are present;
/// - a single top-level bulk string (`$len\r\n<bytes>\r\n`), complete once
///   `len` payload bytes plus the trailing CRLF are present;
/// - an inline line terminated by `\r\n` (covers bare commands like `PING`).
///
/// With `at_eof` set, a non-empty residual with no recognisable terminator is
/// emitted as a final frame so an ungraceful disconnect does not drop data.
pub fn split_frame(buf: &[u8], at_eof: bool) -> Result<Option<(usize, &[u8])>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let complete = match buf[0] {
        b'*' => split_array(buf)?,
        b'$' => split_bulk(buf)?,
        _ => find_crlf(buf).map(|i| i + 2),
    };

    match complete {
        Some(end) => Ok(Some((end, &buf[..end]))),
        None if at_eof => Ok(Some((buf.len(), buf))),
        None => Ok(None),
    }
}

/// Array frame: the header declares N elements, each expected to be a bulk
/// string contributing two CRLF-delimited segments.  The frame is complete at
/// the (2N+1)th CRLF.
fn split_array(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    let Some(header_end) = find_crlf(buf) else {
        return Ok(None);
    };
    let count: usize = parse_int(&buf[1..header_end]).ok_or(FrameError::BadArrayHeader)?;
    if count > MAX_ARRAY_ELEMENTS {
        return Err(FrameError::BadArrayHeader);
    }

    let mut pos = header_end + 2;
    for _ in 0..2 * count {
        match find_crlf(&buf[pos..]) {
            Some(i) => pos += i + 2,
            None => return Ok(None),
        }
    }
    Ok(Some(pos))
}

/// Single bulk string: wait for the declared byte count plus the trailing
/// CRLF.  Whether those trailing two bytes really are CRLF is left to the
/// decoder; the splitter goes by total length alone.
fn split_bulk(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    let Some(header_end) = find_crlf(buf) else {
        return Ok(None);
    };
    let len: usize = parse_int(&buf[1..header_end]).ok_or(FrameError::BadBulkLength)?;
    if len > MAX_BULK_LEN {
        return Err(FrameError::BadBulkLength);
    }

    let total = header_end + 2 + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_int(digits: &[u8]) -> Option<usize> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
