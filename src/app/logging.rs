//! Tracing subscriber setup, custom formatters, dynamic log level reload.

use anyhow::{anyhow, Result};
use tracing_subscriber::{reload, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

// Global reload handle for dynamic log level changes
pub type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
pub static RELOAD_HANDLE: std::sync::OnceLock<ReloadHandle> = std::sync::OnceLock::new();

/// Map a user-facing level name to an `EnvFilter` directive. "critical" is an alias for error.
pub fn filter_for(level: &str) -> Option<&'static str> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" => Some("error"),
        _ => None,
    }
}

/// Level priority: flag, then `LOG_LEVEL`, then config, then info.
pub fn resolve_filter(flag: Option<&str>, env: Option<&str>, config: Option<&str>) -> Result<&'static str> {
    if let Some(level) = flag {
        return filter_for(level).ok_or_else(|| {
            anyhow!("Invalid log level '{}'. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL", level)
        });
    }
    Ok([env, config]
        .into_iter()
        .flatten()
        .find_map(filter_for)
        .unwrap_or("info"))
}

// Custom time formatter for logs: "YYYY-MM-DD HH:MM:SS" (local time)
pub struct LocalTimeFormatter;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

// Custom event formatter for logs: "YYYY-MM-DD HH:MM:SS [LEVEL] message"
pub struct CustomEventFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CustomEventFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use tracing_subscriber::fmt::time::FormatTime;

        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, " ")?;

        let level = event.metadata().level();
        if writer.has_ansi_escapes() {
            let level_color = match *level {
                tracing::Level::TRACE => "\x1b[2m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}[{}]\x1b[0m ", level_color, level)?;
        } else {
            write!(writer, "[{}] ", level)?;
        }

        // Message plus structured fields (port=, pwm=, ...)
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize the tracing subscriber with reload capability.
pub fn init_tracing(filter: &str) {
    use std::io::IsTerminal;
    use tracing_subscriber::prelude::*;

    let env_filter = EnvFilter::new(filter);
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
                .event_format(CustomEventFormat),
        )
        .init();

    // Store reload handle in the global static for signal handler access
    let _ = RELOAD_HANDLE.set(reload_handle);
}

/// Swap the active filter. No-op before `init_tracing`.
pub fn reload_level(level: &str) -> Result<&'static str> {
    let filter = filter_for(level).unwrap_or("info");
    if let Some(handle) = RELOAD_HANDLE.get() {
        handle
            .reload(EnvFilter::new(filter))
            .map_err(|e| anyhow!("Failed to reload log level: {}", e))?;
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_maps_to_error() {
        assert_eq!(filter_for("CRITICAL"), Some("error"));
        assert_eq!(filter_for(" Debug "), Some("debug"));
        assert_eq!(filter_for("verbose"), None);
    }

    #[test]
    fn flag_beats_env_beats_config() {
        assert_eq!(resolve_filter(Some("trace"), Some("warn"), Some("error")).unwrap(), "trace");
        assert_eq!(resolve_filter(None, Some("warn"), Some("error")).unwrap(), "warn");
        assert_eq!(resolve_filter(None, None, Some("ERROR")).unwrap(), "error");
        assert_eq!(resolve_filter(None, None, None).unwrap(), "info");
    }

    #[test]
    fn bad_flag_is_an_error_but_bad_env_falls_through() {
        assert!(resolve_filter(Some("loud"), None, None).is_err());
        assert_eq!(resolve_filter(None, Some("loud"), Some("debug")).unwrap(), "debug");
    }
}
