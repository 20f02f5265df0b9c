//! Tracing setup
//!
//! JSON to stdout for collectors, plus a plain `timestamp LEVEL: message`
//! log file for people tailing it on the host.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter, Layer};
use watch_lib::TIMESTAMP_FORMAT;

/// Formats events as `YYYY-mm-dd HH:MM:SS LEVEL: message`, dropping fields
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFormat;

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S, N> FormatEvent<S, N> for PlainFormat
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
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "{} {}: {}",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            event.metadata().level(),
            visitor.message
        )
    }
}

/// Plain-text layer appending to `path`
pub fn file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
    }

    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    Ok(tracing_fmt::layer()
        .event_format(PlainFormat)
        .with_ansi(false)
        .with_writer(Mutex::new(file)))
}

/// Install the global subscriber
pub fn init(log_file: &Path) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_fmt::layer().json())
        .with(file_layer(log_file)?)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
