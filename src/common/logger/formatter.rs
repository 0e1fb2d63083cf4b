use core::fmt as core_fmt;

use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext, FormattedFields,
        format::{FormatEvent, FormatFields, Writer},
    },
    registry::LookupSpan,
};

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[1;31m",
        Level::WARN => "\x1b[1;33m",
        Level::INFO => "\x1b[1;32m",
        Level::DEBUG => "\x1b[1;34m",
        Level::TRACE => "\x1b[1;35m",
    }
}

/// One line per event:
/// `12:00:01.250 DEBUG dubmix::mix::muxer:142 mix > message`.
///
/// Spans are listed outermost first, each with its recorded fields, so every
/// line logged during a run carries the `mix` span.
pub struct MixLogFormatter {
    ansi: bool,
}

impl MixLogFormatter {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }

    fn paint<'a>(&self, code: &'a str) -> &'a str {
        if self.ansi { code } else { "" }
    }
}

impl<S, N> FormatEvent<S, N> for MixLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let meta = event.metadata();
        let (dim, reset) = (self.paint(DIM), self.paint(RESET));

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        match now.format(TIMESTAMP) {
            Ok(stamp) => write!(writer, "{dim}{stamp}{reset} ")?,
            Err(_) => write!(writer, "{dim}--:--:--.---{reset} ")?,
        }

        write!(
            writer,
            "{}{:<5}{} ",
            self.paint(level_color(meta.level())),
            meta.level(),
            reset
        )?;

        write!(writer, "{dim}{}", meta.target())?;
        if let Some(line) = meta.line() {
            write!(writer, ":{line}")?;
        }
        write!(writer, "{reset} ")?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions
                    .get::<FormattedFields<N>>()
                    .filter(|fields| !fields.is_empty())
                {
                    write!(writer, "{{{fields}}}")?;
                }
                write!(writer, " ")?;
            }
        }

        write!(writer, "> ")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
