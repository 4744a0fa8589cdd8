//! Logger configuration and structured output formatting.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width of the `[LEVEL]` column including padding.
const LEVEL_FIELD_WIDTH: usize = 8;

/// Visible width of the `file:line` column including padding.
const FILE_LINE_FIELD_WIDTH: usize = 22;

/// Configure and initialize the application's logging system.
///
/// Structured line format:
///
/// ```text
/// Mar 15 24 02:30:45 PM | [INFO]  | dispatcher.rs:120    | Dispatched GET /echo
/// ```
///
/// Level filtering follows `RUST_LOG` (default `info`); `NO_COLOR` disables
/// the colored level column. Call once during startup.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let filter = env::var("RUST_LOG")
        .ok()
        .and_then(|raw| raw.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    Builder::new()
        .format(move |buf, record| {
            let level_plain = format!("[{}]", record.level());
            let level_display = if no_color {
                level_plain.clone()
            } else {
                let color = match record.level() {
                    log::Level::Error => "\x1b[31m",
                    log::Level::Warn => "\x1b[33m",
                    log::Level::Info => "\x1b[32m",
                    log::Level::Debug => "\x1b[34m",
                    log::Level::Trace => "\x1b[35m",
                };
                format!("{}{}\x1b[0m", color, level_plain)
            };

            let level_padding = LEVEL_FIELD_WIDTH.saturating_sub(level_plain.len()).max(1);

            let file = record.file().unwrap_or("unknown");
            let file = file.rsplit('/').next().unwrap_or(file);
            let file_line = format!("{}:{}", file, record.line().unwrap_or(0));
            let file_line_padding = FILE_LINE_FIELD_WIDTH
                .saturating_sub(file_line.len())
                .max(1);

            writeln!(
                buf,
                "{} | {}{}| {}{}| {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                " ".repeat(level_padding),
                file_line,
                " ".repeat(file_line_padding),
                record.args(),
            )
        })
        .filter_level(filter)
        .init();
}
