//! Wire framing codec: message header, product header, and acknowledgement.
//!
//! Three fixed-length, all-ASCII-decimal framings make up the protocol
//! (spec §4.1). Unlike the teacher's `Message::to_bytes`/`from_bytes`
//! (which hands off to `bincode` for a Rust-internal format), this wire
//! format is externally specified byte-for-byte, so encoding is done by
//! hand with plain byte slicing and `write!`.

use thiserror::Error;

use crate::defaults::{ACK_MSG_LEN, MAX_PROD_SEQNO, MAX_PROD_SIZE, MSG_HDR_LEN, PROD_HDR_LEN};

/// Errors produced while formatting or parsing wire frames.
///
/// These are the "protocol violation" conditions from spec §7: callers
/// match on the variant to decide whether the connection is fatally
/// broken (most cases) or simply malformed input to reject up front.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("buffer too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("bad terminator in header")]
    BadTerminator,
    #[error("bad mnemonic, expected \"BI\"")]
    BadMnemonic,
    #[error("product size {0} out of range [1, {MAX_PROD_SIZE}]")]
    SizeOutOfRange(u64),
    #[error("seqno {0} out of range [0, {MAX_PROD_SEQNO}]")]
    SeqnoOutOfRange(u32),
    #[error("unknown ack code {0:?}")]
    UnknownAckCode(u8),
}

/// Mnemonic literal that follows the size field in the message header.
const MNEMONIC: &[u8; 2] = b"BI";
/// Sentinel byte that opens the product header.
const SENTINEL: u8 = 0x01;
/// The `\r\r\n` terminator used throughout the wire format.
const CRCRLF: &[u8; 3] = b"\r\r\n";

/// Combined length of the message header plus the product header: the
/// fixed-size prefix that always precedes a product body on the wire.
pub const HEADER_LEN: usize = MSG_HDR_LEN + PROD_HDR_LEN;

/// Decoded contents of a message header + product header pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Size of the product header plus body, in bytes.
    pub size: u64,
    pub seqno: u32,
    pub queue_time: i64,
}

/// Format the 10-byte message header followed by the 22-byte product
/// header into `out[0..HEADER_LEN]`.
///
/// `size` is the byte count of the product header plus body (i.e. what
/// goes out on the wire after the 10-byte message header), and must be in
/// `[1, MAX_PROD_SIZE]`. `seqno` must be in `[0, MAX_PROD_SEQNO]`.
pub fn format_header(
    out: &mut [u8],
    size: u64,
    seqno: u32,
    queue_time: i64,
) -> Result<(), FramingError> {
    if out.len() < HEADER_LEN {
        return Err(FramingError::Truncated {
            need: HEADER_LEN,
            got: out.len(),
        });
    }
    if size == 0 || size > MAX_PROD_SIZE {
        return Err(FramingError::SizeOutOfRange(size));
    }
    if seqno > MAX_PROD_SEQNO {
        return Err(FramingError::SeqnoOutOfRange(seqno));
    }

    // Message header: %.8d%.2s. `size` already denotes product-header+body,
    // so the message header's 8-digit field is exactly `size`.
    out[0..8].copy_from_slice(format!("{:08}", size).as_bytes());
    out[8..10].copy_from_slice(MNEMONIC);

    // Product header: \x01\r\r\n%.5d%.10ld\r\r\n
    out[10] = SENTINEL;
    out[11..14].copy_from_slice(CRCRLF);
    out[14..19].copy_from_slice(format!("{:05}", seqno).as_bytes());
    out[19..29].copy_from_slice(format!("{:010}", queue_time).as_bytes());
    out[29..32].copy_from_slice(CRCRLF);

    Ok(())
}

/// Parse a message header + product header from the front of `buf`.
///
/// Requires at least [`HEADER_LEN`] bytes. `size` in the returned
/// [`ParsedHeader`] is the declared byte count of product header + body
/// that follows on the wire (i.e. callers must read that many more bytes,
/// this header already having been consumed).
pub fn parse_header(buf: &[u8]) -> Result<ParsedHeader, FramingError> {
    if buf.len() < HEADER_LEN {
        return Err(FramingError::Truncated {
            need: HEADER_LEN,
            got: buf.len(),
        });
    }

    if &buf[8..10] != MNEMONIC {
        return Err(FramingError::BadMnemonic);
    }
    let size: u64 = std::str::from_utf8(&buf[0..8])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FramingError::BadTerminator)?;

    if buf[10] != SENTINEL || &buf[11..14] != CRCRLF || &buf[29..32] != CRCRLF {
        return Err(FramingError::BadTerminator);
    }

    let seqno: u32 = std::str::from_utf8(&buf[14..19])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FramingError::BadTerminator)?;
    let queue_time: i64 = std::str::from_utf8(&buf[19..29])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(FramingError::BadTerminator)?;

    if size == 0 || size > MAX_PROD_SIZE {
        return Err(FramingError::SizeOutOfRange(size));
    }
    if seqno > MAX_PROD_SEQNO {
        return Err(FramingError::SeqnoOutOfRange(seqno));
    }

    Ok(ParsedHeader {
        size,
        seqno,
        queue_time,
    })
}

/// Single-character acknowledgement code carried in the 6-byte ack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Ok,
    Fail,
    Retry,
}

impl AckCode {
    fn to_byte(self) -> u8 {
        match self {
            AckCode::Ok => b'K',
            AckCode::Fail => b'F',
            AckCode::Retry => b'R',
        }
    }

    fn from_byte(b: u8) -> Result<Self, FramingError> {
        match b {
            b'K' => Ok(AckCode::Ok),
            b'F' => Ok(AckCode::Fail),
            b'R' => Ok(AckCode::Retry),
            other => Err(FramingError::UnknownAckCode(other)),
        }
    }
}

/// Format a 6-byte ack frame: `%5d%c`.
pub fn format_ack(out: &mut [u8], seqno: u32, code: AckCode) -> Result<(), FramingError> {
    if out.len() < ACK_MSG_LEN {
        return Err(FramingError::Truncated {
            need: ACK_MSG_LEN,
            got: out.len(),
        });
    }
    if seqno > MAX_PROD_SEQNO {
        return Err(FramingError::SeqnoOutOfRange(seqno));
    }
    out[0..5].copy_from_slice(format!("{:5}", seqno).as_bytes());
    out[5] = code.to_byte();
    Ok(())
}

/// Parse a 6-byte ack frame, requiring exactly [`ACK_MSG_LEN`] bytes.
pub fn parse_ack(buf: &[u8]) -> Result<(u32, AckCode), FramingError> {
    if buf.len() != ACK_MSG_LEN {
        return Err(FramingError::Truncated {
            need: ACK_MSG_LEN,
            got: buf.len(),
        });
    }
    let seqno: u32 = std::str::from_utf8(&buf[0..5])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(FramingError::BadTerminator)?;
    let code = AckCode::from_byte(buf[5])?;
    Ok((seqno, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_for_valid_inputs() {
        let mut buf = [0u8; HEADER_LEN];
        format_header(&mut buf, 1234, 42, 1_700_000_000).unwrap();
        let parsed = parse_header(&buf).unwrap();
        assert_eq!(parsed.size, 1234);
        assert_eq!(parsed.seqno, 42);
        assert_eq!(parsed.queue_time, 1_700_000_000);
    }

    #[test]
    fn header_round_trips_at_seqno_boundaries() {
        for seqno in [0, 1, MAX_PROD_SEQNO] {
            let mut buf = [0u8; HEADER_LEN];
            format_header(&mut buf, 1, seqno, 0).unwrap();
            assert_eq!(parse_header(&buf).unwrap().seqno, seqno);
        }
    }

    #[test]
    fn format_rejects_oversized_product() {
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(
            format_header(&mut buf, MAX_PROD_SIZE + 1, 0, 0),
            Err(FramingError::SizeOutOfRange(MAX_PROD_SIZE + 1))
        );
    }

    #[test]
    fn format_rejects_zero_size() {
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(
            format_header(&mut buf, 0, 0, 0),
            Err(FramingError::SizeOutOfRange(0))
        );
    }

    #[test]
    fn format_rejects_seqno_over_max() {
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(
            format_header(&mut buf, 1, MAX_PROD_SEQNO + 1, 0),
            Err(FramingError::SeqnoOutOfRange(MAX_PROD_SEQNO + 1))
        );
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let buf = [0u8; HEADER_LEN - 1];
        assert_eq!(
            parse_header(&buf),
            Err(FramingError::Truncated {
                need: HEADER_LEN,
                got: HEADER_LEN - 1
            })
        );
    }

    #[test]
    fn parse_rejects_bad_mnemonic() {
        let mut buf = [0u8; HEADER_LEN];
        format_header(&mut buf, 10, 0, 0).unwrap();
        buf[8] = b'X';
        assert_eq!(parse_header(&buf), Err(FramingError::BadMnemonic));
    }

    #[test]
    fn parse_rejects_bad_terminator() {
        let mut buf = [0u8; HEADER_LEN];
        format_header(&mut buf, 10, 0, 0).unwrap();
        buf[10] = 0;
        assert_eq!(parse_header(&buf), Err(FramingError::BadTerminator));
    }

    #[test]
    fn ack_round_trips() {
        let mut buf = [0u8; ACK_MSG_LEN];
        format_ack(&mut buf, 7, AckCode::Retry).unwrap();
        assert_eq!(parse_ack(&buf).unwrap(), (7, AckCode::Retry));
    }

    #[test]
    fn ack_rejects_unknown_code() {
        let mut buf = [0u8; ACK_MSG_LEN];
        format_ack(&mut buf, 7, AckCode::Ok).unwrap();
        buf[5] = b'Z';
        assert_eq!(parse_ack(&buf), Err(FramingError::UnknownAckCode(b'Z')));
    }

    #[test]
    fn ack_rejects_wrong_length() {
        let buf = [0u8; ACK_MSG_LEN - 1];
        assert_eq!(
            parse_ack(&buf),
            Err(FramingError::Truncated {
                need: ACK_MSG_LEN,
                got: ACK_MSG_LEN - 1
            })
        );
    }
}
