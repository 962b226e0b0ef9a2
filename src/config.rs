//! CLI parsing (via `clap` derive) and the internal config structs both
//! binaries run on, converted from the parsed args exactly the way the
//! teacher converts `Args` into `BenchmarkConfiguration`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;

use crate::defaults;
use crate::poller::InputDir;

/// Reproduces clap v3's default coloring under clap v4's styling API.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Parse a plain duration string like "10s", "5m", "1h", "500ms", or a
/// bare number (seconds assumed).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };
    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {num_str}"))?;
    if num < 0.0 {
        return Err("duration cannot be negative".to_string());
    }
    Ok(match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => unreachable!(),
    })
}

/// Parse a TTL with a single-letter unit suffix: `s`econds, `m`inutes,
/// `h`ours, `d`ays (spec.md §6's `-l ttl[smhd]`).
pub fn parse_ttl(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("ttl cannot be empty".to_string());
    }
    let (num_str, multiplier) = match s.chars().last().unwrap() {
        's' => (&s[..s.len() - 1], 1u64),
        'm' => (&s[..s.len() - 1], 60),
        'h' => (&s[..s.len() - 1], 3600),
        'd' => (&s[..s.len() - 1], 86_400),
        c if c.is_ascii_digit() => (s, 1),
        _ => return Err(format!("unknown ttl unit in {s}")),
    };
    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in ttl: {num_str}"))?;
    Ok(Duration::from_secs(num * multiplier))
}

/// Command-line arguments for `prodxfer-client`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct ClientArgs {
    /// Server port to connect to
    #[arg(short = 'p', long, default_value_t = defaults::DEFAULT_LISTEN_PORT, help_heading = "Connection")]
    pub port: u16,

    /// Server host to connect to (repeatable for failover; "null" means
    /// loopback on the discard port)
    #[arg(short = 'n', long = "host", help_heading = "Connection", required = true, num_args = 1..)]
    pub hosts: Vec<String>,

    /// Socket connect/send/recv timeout
    #[arg(short = 't', long = "timeout", value_parser = parse_duration, default_value = "5m", help_heading = "Connection")]
    pub socket_timeout: Duration,

    /// Poll interval when the input queue is empty
    #[arg(short = 'i', long = "poll-interval", value_parser = parse_duration, default_value = "3s", help_heading = "Polling")]
    pub poll_interval: Duration,

    /// Per-product time-to-live, e.g. "30m", "2h", "1d"
    #[arg(short = 'l', long = "ttl", value_parser = parse_ttl, help_heading = "Polling")]
    pub ttl: Option<Duration>,

    /// Sliding-window size (max outstanding unacknowledged products)
    #[arg(short = 'w', long = "window", default_value_t = defaults::WINDOW_SIZE, help_heading = "Protocol")]
    pub window: usize,

    /// Max send retries per product, -1 for unlimited
    #[arg(short = 'r', long = "max-retry", default_value_t = defaults::MAX_RETRY, help_heading = "Protocol")]
    pub max_retry: i64,

    /// Socket buffer size in bytes
    #[arg(short = 'b', long = "buffer-size", default_value_t = defaults::DEFAULT_BUFSIZE, help_heading = "Protocol")]
    pub buffer_size: usize,

    /// WMO heading to send as the connection message
    #[arg(short = 'c', long = "connection-wmo", help_heading = "Protocol")]
    pub connection_wmo: Option<String>,

    /// Source identifier advertised in the connection message
    #[arg(short = 's', long = "source-id", help_heading = "Protocol")]
    pub source_id: Option<String>,

    /// Run in the foreground with debug output instead of daemonizing
    #[arg(short = 'd', long = "debug-foreground", help_heading = "Diagnostics")]
    pub debug_foreground: bool,

    /// Increase log verbosity (repeatable: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Diagnostics")]
    pub verbose: u8,

    /// Keep archived (non-rotated-away) product log files
    #[arg(short = 'a', long = "archive-logs", help_heading = "Diagnostics")]
    pub archive_logs: bool,

    /// Strip a leading CCB framing prefix from each product, if present
    #[arg(short = 'x', long = "strip-ccb", help_heading = "Protocol")]
    pub strip_ccb: bool,

    /// Input spool directory (repeatable; first given is highest priority)
    #[arg(short = 'D', long = "indir", help_heading = "Filesystem", required = true, num_args = 1..)]
    pub input_dirs: Vec<PathBuf>,

    /// Withhold the single most recently modified file each poll, across
    /// all input directories, until a newer one arrives
    #[arg(short = 'L', long = "wait-last-file", help_heading = "Polling")]
    pub wait_last_file: bool,

    /// Interval between full queue rebuilds
    #[arg(short = 'I', long = "refresh-interval", value_parser = parse_duration, default_value = "20s", help_heading = "Polling")]
    pub refresh_interval: Duration,

    /// Maximum number of items considered per queue refresh
    #[arg(short = 'Q', long = "max-queue-len", default_value_t = defaults::MAX_QUEUE_LEN, help_heading = "Polling")]
    pub max_queue_len: usize,

    /// Directory successfully sent products are filed into (bounded circular)
    #[arg(short = 'S', long = "sent-dir", help_heading = "Filesystem")]
    pub sent_dir: Option<PathBuf>,

    /// Capacity of the sent directory
    #[arg(short = 'N', long = "sent-count", default_value_t = defaults::SENT_COUNT, help_heading = "Filesystem")]
    pub sent_count: usize,

    /// Directory permanently failed products are filed into (bounded circular)
    #[arg(short = 'F', long = "fail-dir", help_heading = "Filesystem")]
    pub fail_dir: Option<PathBuf>,

    /// Directory detailed and product log files are written under
    #[arg(short = 'P', long = "log-dir", help_heading = "Diagnostics")]
    pub log_dir: Option<PathBuf>,
}

/// Internal config built from [`ClientArgs`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port: u16,
    pub hosts: Vec<String>,
    pub socket_timeout: Duration,
    pub poll_interval: Duration,
    /// `None` means no TTL discard (spec.md's `queue_ttl = 0`).
    pub ttl: Option<Duration>,
    pub window: usize,
    pub max_retry: i64,
    pub buffer_size: usize,
    pub connection_wmo: Option<String>,
    pub source_id: String,
    pub debug_foreground: bool,
    pub verbose: u8,
    pub archive_logs: bool,
    pub strip_ccb: bool,
    pub input_dirs: Vec<InputDir>,
    pub wait_last_file: bool,
    pub refresh_interval: Duration,
    pub max_queue_len: usize,
    pub sent_dir: PathBuf,
    pub sent_count: usize,
    pub fail_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl TryFrom<&ClientArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: &ClientArgs) -> Result<Self> {
        if args.hosts.is_empty() {
            bail!("at least one -n host is required");
        }
        if args.input_dirs.is_empty() {
            bail!("at least one -D input directory is required");
        }
        if args.window == 0 {
            bail!("-w window must be at least 1");
        }

        let cwd = std::env::current_dir()?;
        let ndirs = args.input_dirs.len();
        let input_dirs = args
            .input_dirs
            .iter()
            .enumerate()
            .map(|(i, path)| InputDir {
                path: path.clone(),
                priority: (ndirs - i) as i32,
            })
            .collect();

        Ok(Self {
            port: args.port,
            hosts: args.hosts.clone(),
            socket_timeout: args.socket_timeout,
            poll_interval: args.poll_interval,
            ttl: args.ttl,
            window: args.window,
            max_retry: args.max_retry,
            buffer_size: args.buffer_size,
            connection_wmo: args.connection_wmo.clone(),
            source_id: args.source_id.clone().unwrap_or_else(default_source_id),
            debug_foreground: args.debug_foreground,
            verbose: args.verbose,
            archive_logs: args.archive_logs,
            strip_ccb: args.strip_ccb,
            input_dirs,
            wait_last_file: args.wait_last_file,
            refresh_interval: args.refresh_interval,
            max_queue_len: args.max_queue_len,
            sent_dir: args
                .sent_dir
                .clone()
                .unwrap_or_else(|| cwd.join(defaults::SENT_SUBDIR_NAME)),
            sent_count: args.sent_count,
            fail_dir: args
                .fail_dir
                .clone()
                .unwrap_or_else(|| cwd.join(defaults::FAIL_SUBDIR_NAME)),
            log_dir: args.log_dir.clone(),
        })
    }
}

/// Command-line arguments for `prodxfer-server`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = defaults::DEFAULT_LISTEN_PORT, help_heading = "Connection")]
    pub port: u16,

    /// Maximum concurrent worker connections, 0 handles one connection inline
    #[arg(short = 'w', long = "max-workers", default_value_t = defaults::SERVER_DEFAULT_MAX_WORKER, help_heading = "Connection")]
    pub max_workers: usize,

    /// Per-connection socket read timeout
    #[arg(short = 't', long = "timeout", value_parser = parse_duration, default_value = "30m", help_heading = "Connection")]
    pub socket_timeout: Duration,

    /// Socket buffer size in bytes
    #[arg(short = 'b', long = "buffer-size", default_value_t = defaults::DEFAULT_BUFSIZE, help_heading = "Protocol")]
    pub buffer_size: usize,

    /// Expected WMO heading on the connection message, if any is required
    #[arg(short = 'c', long = "connection-wmo", help_heading = "Protocol")]
    pub connection_wmo: Option<String>,

    /// Output spool directory products are persisted into
    #[arg(short = 'D', long = "outdir", help_heading = "Filesystem", required = true)]
    pub output_dir: PathBuf,

    /// Overwrite an existing output file with the same name instead of erroring
    #[arg(short = 'O', long = "overwrite", help_heading = "Filesystem")]
    pub overwrite: bool,

    /// Toggle output file permissions to world-readable after a successful write
    #[arg(short = 'P', long = "toggle-perms", help_heading = "Filesystem")]
    pub toggle_perms: bool,

    /// Run in the foreground with debug output instead of daemonizing
    #[arg(short = 'd', long = "debug-foreground", help_heading = "Diagnostics")]
    pub debug_foreground: bool,

    /// Directory detailed and product log files are written under
    #[arg(short = 'l', long = "log-dir", help_heading = "Diagnostics")]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Diagnostics")]
    pub verbose: u8,

    /// Keep archived (non-rotated-away) product log files
    #[arg(short = 'a', long = "archive-logs", help_heading = "Diagnostics")]
    pub archive_logs: bool,

    /// Source tag recorded in the product log for this server instance
    #[arg(short = 's', long = "source-tag", help_heading = "Protocol")]
    pub source_tag: Option<String>,
}

/// Internal config built from [`ServerArgs`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_workers: usize,
    pub socket_timeout: Duration,
    pub buffer_size: usize,
    pub connection_wmo: Option<String>,
    pub output_dir: PathBuf,
    pub overwrite: bool,
    pub toggle_perms: bool,
    pub debug_foreground: bool,
    pub log_dir: Option<PathBuf>,
    pub verbose: u8,
    pub archive_logs: bool,
    pub source_tag: Option<String>,
}

impl TryFrom<&ServerArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &ServerArgs) -> Result<Self> {
        if args.buffer_size == 0 || args.buffer_size > defaults::SERVER_MAX_BUFSIZE {
            bail!(
                "-b buffer-size must be in (0, {}]",
                defaults::SERVER_MAX_BUFSIZE
            );
        }
        Ok(Self {
            port: args.port,
            max_workers: args.max_workers,
            socket_timeout: args.socket_timeout,
            buffer_size: args.buffer_size,
            connection_wmo: args.connection_wmo.clone(),
            output_dir: args.output_dir.clone(),
            overwrite: args.overwrite,
            toggle_perms: args.toggle_perms,
            debug_foreground: args.debug_foreground,
            log_dir: args.log_dir.clone(),
            verbose: args.verbose,
            archive_logs: args.archive_logs,
            source_tag: args.source_tag.clone(),
        })
    }
}

/// Truncated hostname, used as the default `-s source-id` when the user
/// doesn't supply one.
fn default_source_id() -> String {
    let hostname = hostname_lossy();
    hostname.chars().take(defaults::SOURCE_MAX_LEN).collect()
}

fn hostname_lossy() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_units_and_bare_numbers() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn parse_duration_rejects_empty_and_negative() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn parse_ttl_accepts_smhd_suffixes() {
        assert_eq!(parse_ttl("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_ttl("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_ttl("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_ttl("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn parse_ttl_rejects_unknown_unit() {
        assert!(parse_ttl("10x").is_err());
    }

    #[test]
    fn first_indir_gets_highest_priority() {
        let args = ClientArgs::parse_from([
            "prodxfer-client",
            "-n", "serverhost",
            "-D", "/spool/high",
            "-D", "/spool/low",
        ]);
        let cfg = ClientConfig::try_from(&args).unwrap();
        assert_eq!(cfg.input_dirs[0].path, PathBuf::from("/spool/high"));
        assert!(cfg.input_dirs[0].priority > cfg.input_dirs[1].priority);
    }

    #[test]
    fn client_config_defaults_sent_and_fail_dirs_under_cwd() {
        let args = ClientArgs::parse_from([
            "prodxfer-client",
            "-n", "serverhost",
            "-D", "/spool/in",
        ]);
        let cfg = ClientConfig::try_from(&args).unwrap();
        assert!(cfg.sent_dir.ends_with(defaults::SENT_SUBDIR_NAME));
        assert!(cfg.fail_dir.ends_with(defaults::FAIL_SUBDIR_NAME));
    }

    #[test]
    fn server_config_rejects_oversized_buffer() {
        let mut args = ServerArgs::parse_from([
            "prodxfer-server",
            "-D", "/spool/out",
        ]);
        args.buffer_size = defaults::SERVER_MAX_BUFSIZE + 1;
        assert!(ServerConfig::try_from(&args).is_err());
    }
}
