//! Default configuration values and wire-format constants.
//!
//! Mirrors the `DFLT_*` / `MAX_*` / field-length `#define`s from the
//! original C `client.h`, `server.h`, and `share.h`.

use std::time::Duration;

/// Default socket timeout for connect/send/recv operations.
pub const TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default poll interval when the input queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Default sliding-window size (max outstanding, unacknowledged products).
pub const WINDOW_SIZE: usize = 100;
/// Default queue refresh/resort interval.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(20);
/// Default max send retries per product (`-1` disables the cap).
pub const MAX_RETRY: i64 = 3;
/// Default maximum number of items polled/sorted per queue refresh.
pub const MAX_QUEUE_LEN: usize = 2000;
/// Default circular sent/fail directory capacity.
pub const SENT_COUNT: usize = 1000;

/// UDP/TCP discard port; used as a test/benchmark affordance (§4.4).
pub const DISCARD_PORT: u16 = 9;

pub const INPUT_SUBDIR_NAME: &str = "input";
pub const SENT_SUBDIR_NAME: &str = "sent";
pub const FAIL_SUBDIR_NAME: &str = "fail";

pub const DEFAULT_LISTEN_PORT: u16 = 53000;
pub const DEFAULT_BUFSIZE: usize = 32 * 1024;
pub const SERVER_MAX_BUFSIZE: usize = 1024 * 1024;
pub const SERVER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const SERVER_DEFAULT_MAX_WORKER: usize = 99;

/// Wire format field lengths (§4.1).
pub const MSG_HDR_LEN: usize = 10;
pub const PROD_HDR_LEN: usize = 22;
pub const ACK_MSG_LEN: usize = 6;

/// Field lengths for the WMO heading (§GLOSSARY).
pub const WMO_TTAAII_LEN: usize = 6;
pub const WMO_CCCC_LEN: usize = 4;
pub const WMO_DDHHMM_LEN: usize = 6;
pub const WMO_BBB_LEN: usize = 3;
pub const WMO_NNNXXX_LEN: usize = 6;
pub const WMO_NNNXXX_MIN_LEN: usize = 4;

pub const SOURCE_MAX_LEN: usize = 32;
pub const HOSTNAME_MAX_LEN: usize = 64;

/// Largest size field representable in the 8-digit message header, minus
/// the product header that rides along with it.
pub const MAX_PROD_SIZE: u64 = 99_999_999 - PROD_HDR_LEN as u64;
/// Largest seqno representable in the 5-digit seqno field.
pub const MAX_PROD_SEQNO: u32 = 99_999;

/// CCB (Communications Control Block) framing prefix detection (§9).
pub const CCB_FLAG_BYTE: usize = 0;
pub const CCB_LENGTH_BYTE: usize = 1;
pub const CCB_FLAG_VAL: u8 = 0x40;
pub const CCB_LENGTH_MASK: u8 = 0x3f;
pub const CCB_MIN_HDR_LEN: usize = 24;
pub const CCB_MAX_HDR_LEN: usize = 1024;

pub const CONN_MSG_START: &str = "CONNECTION MESSAGE";
pub const SOURCE_ID: &str = "SOURCE";
pub const REMOTE_ID: &str = "REMOTE";
pub const LINK_ID: &str = "LINK";

/// Zero-length files younger than this are assumed mid-write (§4.2).
pub const ZERO_LEN_GRACE: Duration = Duration::from_secs(3);

/// Short backoff for transient filesystem errors (§7).
pub const SHORT_RETRY_SLEEP: Duration = Duration::from_secs(3);
/// Long backoff for transient filesystem errors that persist (§7).
pub const LONG_RETRY_SLEEP: Duration = Duration::from_secs(30);
/// Recovery sleep after repeated connect/input failures (§4.3 step 7).
pub const RECOVERY_SLEEP: Duration = Duration::from_secs(20);
/// Number of consecutive failures before the recovery sleep kicks in.
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

pub const DEFAULT_FILE_PERMS: u32 = 0o666;
/// Permission mask toggled on when `-P` (toggle-perms) publication is enabled.
pub const PUBLIC_FILE_PERMS: u32 = 0o444;
