//! Shared tracing setup for both binaries: a colorized stdout layer, a
//! detailed file layer, and a dedicated product-log layer for the
//! one-line-per-disposition records a site operator greps over.

use std::fmt;
use std::path::Path;

use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Target used by product lifecycle events (queued/sent/acked/failed),
/// so they can be split into their own file independent of the
/// verbosity-controlled general log.
pub const PRODUCT_LOG_TARGET: &str = "prodxfer::productlog";

/// Colorizes the whole line by level, without timestamps or level tags,
/// for the console-facing layer.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Guards that must be kept alive for the process lifetime for
/// non-blocking file appenders to keep flushing.
pub struct LogGuards {
    _detail: Option<tracing_appender::non_blocking::WorkerGuard>,
    _product: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// `verbosity` follows the `-v`/`-vv` convention (0 = info, 1 = debug,
/// 2+ = trace). `log_file` is `None` for stderr-only, `Some("stderr")`
/// likewise, or `Some(path)` to roll daily log files at that path.
/// `product_log_file`, if given, receives one line per product
/// disposition regardless of `verbosity`.
pub fn init(
    verbosity: u8,
    quiet: bool,
    log_file: Option<&str>,
    product_log_file: Option<&str>,
) -> LogGuards {
    let log_level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let (detailed_log_layer, detail_guard) = match log_file {
        Some("stderr") | None => (
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(log_level)
                .boxed(),
            None,
        ),
        Some(path_str) => {
            let log_path = Path::new(path_str);
            let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
            let log_filename = log_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("prodxfer.log"));
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            (
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking_writer)
                    .with_ansi(false)
                    .with_filter(log_level)
                    .boxed(),
                Some(guard),
            )
        }
    };

    let stdout_log = if !quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    let (product_layer, product_guard) = match product_log_file {
        Some(path_str) => {
            let log_path = Path::new(path_str);
            let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
            let log_filename = log_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("product.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking_writer)
                        .with_ansi(false)
                        .with_target(false)
                        .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                            meta.target() == PRODUCT_LOG_TARGET
                        })),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .with(product_layer)
        .init();

    LogGuards {
        _detail: detail_guard,
        _product: product_guard,
    }
}
