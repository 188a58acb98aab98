use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use std::path::PathBuf;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    Layer,
};

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub dir: PathBuf,
    /// Lowers the console floor for non-`task_result` targets from ERROR to INFO.
    pub verbose: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            verbose: false,
        }
    }
}

pub fn setup_logger(config: &LoggerConfig) -> Option<WorkerGuard> {
    std::fs::create_dir_all(&config.dir).ok();

    // Hourly rotation keeps individual files small on long runs.
    let file_appender = tracing_appender::rolling::hourly(&config.dir, "app");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for task_result, WARN for others
    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target("task_result", tracing::Level::INFO)
        .with_default(tracing::Level::WARN);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let console_default = if config.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::ERROR
    };
    let console_filter = tracing_subscriber::filter::Targets::new()
        .with_target("task_result", tracing::Level::INFO)
        .with_default(console_default);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    if tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    // Caller must keep the guard alive or buffered lines are lost.
    Some(guard)
}

/// Minimal stdout subscriber for `--quiet` runs.
pub fn setup_quiet_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Paints outcome keywords in a console line.
pub fn colorize(msg: &str) -> String {
    let painted = [
        ("SUCCESS", Color::LightGreen),
        ("COOLDOWN", Color::LightYellow),
        ("SKIPPED", Color::LightYellow),
        ("FAILED", Color::LightRed),
    ];

    for (word, color) in painted {
        if msg.contains(word) {
            let style = Style::new().fg(color).bold();
            return msg.replace(word, &style.paint(word).to_string());
        }
    }
    msg.to_string()
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);

        let time = Local::now().format("%H:%M:%S");
        writeln!(writer, "[{}] {}", time, colorize(&msg_visitor.message))
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] ", timestamp, level)?;

        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);
        writeln!(writer, "{}", msg_visitor.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_leaves_plain_lines_alone() {
        assert_eq!(colorize("logging in"), "logging in");
    }

    #[test]
    fn test_colorize_paints_keywords() {
        let line = colorize("[001] 0xabc COOLDOWN until tomorrow");
        assert!(line.contains("\u{1b}["));
        assert!(line.contains("COOLDOWN"));
    }
}
