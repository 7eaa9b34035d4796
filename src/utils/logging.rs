use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::CONFIG;

pub const TIMING_TARGET: &str = "bot.timing";
pub const AUDIT_TARGET: &str = "bot.audit";

pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn general_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target(AUDIT_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("sqlx", LevelFilter::WARN)
}

fn only_target(target: &'static str) -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(target, LevelFilter::INFO)
}

/// Stdout plus daily-rolling plain and JSON-lines files under `logs/`:
/// `bot.*` for general logs, `timing.*` for call durations, `audit.*` for funds events.
pub fn init_logging() -> LoggingGuards {
    let logs_dir = Path::new("logs");
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(6);
    let mut writer = |file_name: &str| {
        let appender = tracing_appender::rolling::daily(logs_dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        writer
    };
    let file_writer = writer("bot.log");
    let json_file_writer = writer("bot.jsonl");
    let timing_writer = writer("timing.log");
    let json_timing_writer = writer("timing.jsonl");
    let audit_writer = writer("audit.log");
    let json_audit_writer = writer("audit.jsonl");

    let general = general_filter(parse_log_level(&CONFIG.log_level));
    let timing = only_target(TIMING_TARGET);
    let audit = only_target(AUDIT_TARGET);
    // Audit lines are also worth seeing on the console.
    let stdout_filter = general.clone().with_target(AUDIT_TARGET, LevelFilter::INFO);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(general.clone());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_file_writer)
        .with_filter(general);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(timing_writer)
        .with_ansi(false)
        .with_filter(timing.clone());
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_timing_writer)
        .with_filter(timing);
    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(audit_writer)
        .with_ansi(false)
        .with_filter(audit.clone());
    let json_audit_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_audit_writer)
        .with_filter(audit);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(json_file_layer)
        .with(timing_layer)
        .with(json_timing_layer)
        .with(audit_layer)
        .with(json_audit_layer)
        .init();

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_leniently() {
        assert_eq!(parse_log_level(" WARNING "), LevelFilter::WARN);
        assert_eq!(parse_log_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_log_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn side_targets_stay_out_of_general_logs() {
        let general = general_filter(LevelFilter::DEBUG);
        assert!(!general.would_enable(TIMING_TARGET, &tracing::Level::INFO));
        assert!(!general.would_enable(AUDIT_TARGET, &tracing::Level::WARN));
        assert!(general.would_enable("photo_style_menu_bot::session", &tracing::Level::DEBUG));
        assert!(only_target(AUDIT_TARGET).would_enable(AUDIT_TARGET, &tracing::Level::WARN));
    }
}
