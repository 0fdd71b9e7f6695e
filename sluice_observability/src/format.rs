//! Compact, colored log lines for terminals.
//!
//! Lines look like `INFO  14:03:12.087 message key=value span_field=1 target`.
use std::fmt::{self, Write as _};

use nu_ansi_term::{Color, Style};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    span,
};
use tracing_subscriber::{
    field::RecordFields,
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactFormat;

impl<S, N> FormatEvent<S, N> for CompactFormat
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
        let metadata = event.metadata();
        let ansi = writer.has_ansi_escapes();

        write_level(&mut writer, metadata.level(), ansi)?;
        write_time(&mut writer, ansi)?;

        ctx.format_fields(writer.by_ref(), event)?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };
                if !fields.is_empty() {
                    write!(writer, " {fields}")?;
                }
            }
        }

        if ansi {
            write!(writer, " {}", Style::new().dimmed().paint(metadata.target()))?;
        } else {
            write!(writer, " {}", metadata.target())?;
        }

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for CompactFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, false);
        fields.record(&mut visitor);
        visitor.result
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let needs_separator = !current.fields.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), needs_separator);
        fields.record(&mut visitor);
        visitor.result
    }
}

fn write_level(writer: &mut Writer<'_>, level: &Level, ansi: bool) -> fmt::Result {
    let (name, color) = match *level {
        Level::TRACE => ("TRACE", Color::Purple),
        Level::DEBUG => ("DEBUG", Color::Blue),
        Level::INFO => ("INFO", Color::Green),
        Level::WARN => ("WARN", Color::Yellow),
        Level::ERROR => ("ERROR", Color::Red),
    };

    if ansi {
        write!(writer, "{} ", color.bold().paint(format!("{name:<5}")))
    } else {
        write!(writer, "{name:<5} ")
    }
}

fn write_time(writer: &mut Writer<'_>, ansi: bool) -> fmt::Result {
    let now = OffsetDateTime::now_utc();
    let Ok(timestamp) = now.format(TIME_FORMAT) else {
        return writer.write_str("--:--:--.--- ");
    };

    if ansi {
        write!(writer, "{} ", Style::new().dimmed().paint(timestamp))
    } else {
        write!(writer, "{timestamp} ")
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    needs_separator: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, needs_separator: bool) -> Self {
        Self {
            writer,
            needs_separator,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if std::mem::replace(&mut self.needs_separator, true) {
            " "
        } else {
            ""
        }
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"));
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let separator = self.separator();
        let name = field.name();

        self.result = if name == "message" {
            write!(self.writer, "{separator}{value:?}")
        } else if self.writer.has_ansi_escapes() {
            let color = if name == "error" {
                Color::Red
            } else {
                Color::Cyan
            };
            write!(
                self.writer,
                "{separator}{}={}",
                Style::new().italic().paint(name),
                color.paint(format!("{value:?}"))
            )
        } else {
            write!(self.writer, "{separator}{name}={value:?}")
        };
    }
}
