//! WMO heading scanner.
//!
//! Parses the six-field WMO heading `TTAAII CCCC DDHHMM [BBB] [NNNXXX]`
//! from the start of a product body, for routing and logging (spec §4.9,
//! GLOSSARY). The original C parser (`wmo.c`) is a single function with
//! deeply nested conditionals trying every spacing irregularity inline;
//! per DESIGN NOTES §9 ("table-drive rather than nest conditionals") this
//! port instead tries a small ordered list of byte-pattern matchers for
//! the TTAAII field, each expressed as an independent function, and a
//! straight-line scan for the remaining fields.

use crate::defaults::{WMO_NNNXXX_LEN, WMO_NNNXXX_MIN_LEN};

/// Parsed WMO heading fields. Any field may be empty if not present or
/// not matched; only `ttaaii`, `cccc`, and `ddhhmm` are required for a
/// heading to be considered parsed at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WmoHeading {
    pub ttaaii: String,
    pub cccc: String,
    pub ddhhmm: String,
    pub bbb: String,
    pub nnnxxx: String,
}

impl WmoHeading {
    pub fn is_empty(&self) -> bool {
        self.ttaaii.is_empty()
    }
}

/// A candidate match for the TTAAII field: given the scan position,
/// either returns the 6-character TTAAII string and how many input bytes
/// it consumed, or `None` if the pattern doesn't apply here.
type TtaaiiMatcher = fn(&[u8]) -> Option<(String, usize)>;

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic()
}
fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}
fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace()
}
fn is_alnum(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

/// `TTAAII ` — both `ii` digits present, followed by space or a letter
/// (the start of CCCC).
fn match_ttaaii_full(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 7 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_alpha(w[3])
        && is_digit(w[4])
        && is_digit(w[5])
        && (is_space(w[6]) || is_alpha(w[6]))
    {
        Some((String::from_utf8_lossy(&w[0..6]).into_owned(), 6))
    } else {
        None
    }
}

/// `TTAAI C` — only the first `i` digit present, second slot is a space
/// that's implicitly `0`.
fn match_ttaaii_short_i(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 7 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_alpha(w[3])
        && is_digit(w[4])
        && is_space(w[5])
        && (is_space(w[6]) || is_alpha(w[6]))
    {
        let mut s = String::from_utf8_lossy(&w[0..4]).into_owned();
        s.push('0');
        s.push(w[4] as char);
        return Some((s, 5));
    }
    None
}

/// `TTAA I ` — both `ii` slots present but the first is a space.
fn match_ttaaii_space_then_digit(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 7 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_alpha(w[3])
        && is_space(w[4])
        && is_digit(w[5])
        && (is_space(w[6]) || is_alpha(w[6]))
    {
        let mut s = String::from_utf8_lossy(&w[0..4]).into_owned();
        s.push('0');
        s.push(w[5] as char);
        return Some((s, 6));
    }
    None
}

/// `TTAAIC` — first `i` digit present, second slot is itself a letter
/// (the start of CCCC with no separating space at all).
fn match_ttaaii_no_space(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 6 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_alpha(w[3])
        && is_digit(w[4])
        && is_alpha(w[5])
    {
        let mut s = String::from_utf8_lossy(&w[0..4]).into_owned();
        s.push('0');
        s.push(w[4] as char);
        return Some((s, 5));
    }
    None
}

/// `TTA#II ` — a digit in the A2 slot (some agencies encode this way).
fn match_ttaaii_digit_a2(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 7 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_digit(w[3])
        && is_digit(w[4])
        && is_digit(w[5])
        && (is_space(w[6]) || is_alpha(w[6]))
    {
        Some((String::from_utf8_lossy(&w[0..6]).into_owned(), 6))
    } else {
        None
    }
}

/// Fallback: `TTAA CCCC DDHHMM` with no `ii` at all — assume `ii = 00`.
fn match_ttaa_bare(w: &[u8]) -> Option<(String, usize)> {
    if w.len() < 10 {
        return None;
    }
    if is_alpha(w[0])
        && is_alpha(w[1])
        && is_alpha(w[2])
        && is_alpha(w[3])
        && is_space(w[4])
        && is_alpha(w[5])
        && is_alpha(w[6])
        && is_alpha(w[7])
        && is_alpha(w[8])
        && is_space(w[9])
    {
        let mut s = String::from_utf8_lossy(&w[0..4]).into_owned();
        s.push_str("00");
        return Some((s, 4));
    }
    None
}

const TTAAII_MATCHERS: &[TtaaiiMatcher] = &[
    match_ttaaii_full,
    match_ttaaii_short_i,
    match_ttaaii_space_then_digit,
    match_ttaaii_digit_a2,
    match_ttaaii_no_space,
];

/// Scan `buf` for a WMO heading and return what could be parsed.
///
/// Returns `Ok` with whatever fields were matched (possibly an
/// all-empty heading) unless not even the required TTAAII/CCCC/DDHHMM
/// triple can be found, in which case `Err(())` is returned (mirroring
/// the C original's `-1` return, which callers treat as "no heading" and
/// proceed anyway — parsing is for routing/logging, not correctness).
pub fn parse_wmo(buf: &[u8]) -> Result<WmoHeading, ()> {
    let mut heading = WmoHeading::default();
    let mut pos = 0usize;
    let mut found = false;

    'scan: while pos + 6 < buf.len() {
        let window = &buf[pos..];
        for matcher in TTAAII_MATCHERS {
            if let Some((ttaaii, consumed)) = matcher(window) {
                heading.ttaaii = ttaaii;
                pos += consumed;
                found = true;
                break 'scan;
            }
        }
        if buf[pos..].starts_with(b"\r\r\n") {
            break;
        }
        pos += 1;
    }

    if !found {
        // Fallback scan for the bare `TTAA CCCC DDHHMM` form.
        let mut p = 0usize;
        while p + 10 <= buf.len() {
            if let Some((ttaaii, consumed)) = match_ttaa_bare(&buf[p..]) {
                heading.ttaaii = ttaaii;
                pos = p + consumed;
                found = true;
                break;
            }
            if buf[p..].starts_with(b"\r\r\n") {
                return Err(());
            }
            p += 1;
        }
        if !found {
            return Err(());
        }
    }

    // Skip spaces before CCCC.
    while pos < buf.len() && is_space(buf[pos]) {
        pos += 1;
    }

    if pos + 4 > buf.len()
        || !is_alpha(buf[pos])
        || !is_alnum(buf[pos + 1])
        || !is_alpha(buf[pos + 2])
        || !is_alnum(buf[pos + 3])
    {
        // No usable CCCC: return what we have so far.
        return Ok(heading);
    }
    heading.cccc = String::from_utf8_lossy(&buf[pos..pos + 4]).into_owned();
    pos += 4;

    let mut spaces = 0usize;
    while pos < buf.len() && is_space(buf[pos]) {
        pos += 1;
        spaces += 1;
    }

    // DDHHMM: try 6-digit, then 4-digit+space (HHMM only), then a
    // leading-zero-as-space 5-digit form.
    if pos + 6 <= buf.len() && buf[pos..pos + 6].iter().all(|&b| is_digit(b)) {
        heading.ddhhmm = String::from_utf8_lossy(&buf[pos..pos + 6]).into_owned();
        pos += 6;
    } else if pos + 5 <= buf.len()
        && buf[pos..pos + 4].iter().all(|&b| is_digit(b))
        && is_space(buf[pos + 4])
    {
        heading.ddhhmm = format!("{}00", String::from_utf8_lossy(&buf[pos..pos + 4]));
        pos += 4;
    } else if spaces > 1
        && pos + 5 <= buf.len()
        && buf[pos..pos + 5].iter().all(|&b| is_digit(b))
    {
        heading.ddhhmm = format!("0{}", String::from_utf8_lossy(&buf[pos..pos + 5]));
        pos += 5;
    }

    if pos < buf.len() && buf[pos] == b'Z' {
        pos += 1;
    }

    // Optional BBB: a short alpha run followed by whitespace, before the
    // CRCRLF terminator.
    while pos < buf.len() {
        let b = buf[pos];
        if b == b'\r' || b == b'\n' {
            break;
        } else if is_alpha(b) {
            if !heading.bbb.is_empty() {
                return Ok(heading);
            }
            let mut len = 1;
            while pos + len < buf.len() && len < 3 && is_alpha(buf[pos + len]) {
                len += 1;
            }
            if pos + len < buf.len() && is_space(buf[pos + len]) {
                heading.bbb = String::from_utf8_lossy(&buf[pos..pos + len]).into_owned();
                pos += len;
            } else {
                return Ok(heading);
            }
        } else if is_space(b) {
            pos += 1;
        } else {
            return Ok(heading);
        }
    }

    while pos < buf.len() && is_space(buf[pos]) {
        pos += 1;
    }

    // Optional NNNXXX line: an alnum run on its own line.
    let mut len = 1;
    while pos + len < buf.len() && len < WMO_NNNXXX_LEN && is_alnum(buf[pos + len]) {
        len += 1;
    }
    if len >= WMO_NNNXXX_MIN_LEN {
        let mut i = len;
        while pos + i < buf.len() {
            let b = buf[pos + i];
            if b == b'\r' || b == b'\n' {
                heading.nnnxxx = String::from_utf8_lossy(&buf[pos..pos + len]).into_owned();
                break;
            }
            if !is_space(b) {
                break;
            }
            i += 1;
        }
    }

    Ok(heading)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_heading() {
        let body = b"FTUS43 KWBC 261200\r\r\nTESTNNN\r\r\nbody follows";
        let h = parse_wmo(body).unwrap();
        assert_eq!(h.ttaaii, "FTUS43");
        assert_eq!(h.cccc, "KWBC");
        assert_eq!(h.ddhhmm, "261200");
    }

    #[test]
    fn parses_heading_with_bbb() {
        let body = b"FTUS43 KWBC 261200 RRA\r\r\n";
        let h = parse_wmo(body).unwrap();
        assert_eq!(h.ttaaii, "FTUS43");
        assert_eq!(h.bbb, "RRA");
    }

    #[test]
    fn missing_second_i_digit_defaults_to_zero_padding() {
        // Second 'i' digit is missing (just a space), so it's treated as 0.
        let body = b"FTUS1 KWBC 261200\r\r\n";
        let h = parse_wmo(body).unwrap();
        assert_eq!(h.ttaaii, "FTUS01");
    }

    #[test]
    fn bare_ttaa_with_no_ii_at_all() {
        let body = b"FTUS KWBC 261200\r\r\n";
        let h = parse_wmo(body).unwrap();
        assert_eq!(h.ttaaii, "FTUS00");
    }

    #[test]
    fn garbage_returns_err() {
        let body = b"\r\r\n";
        assert!(parse_wmo(body).is_err());
    }

    #[test]
    fn empty_heading_is_empty() {
        let h = WmoHeading::default();
        assert!(h.is_empty());
    }
}
