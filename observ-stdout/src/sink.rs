use crate::transform::LogLine;
use observ::error::{SinkError, SinkResult};
use observ::logs::{Entry, Level, Sink};
use std::fmt;
use std::io::{self, Write};

const RESET: &str = "\x1b[0m";

fn color(level: Level) -> &'static str {
    match level {
        Level::Debug => "\x1b[37m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
    }
}

/// A [`Sink`] that writes one JSON object per entry per line.
///
/// Each batch is serialized into memory first and written with a single
/// `write_all`, so lines of one batch are never interleaved with output of
/// other writers holding the same stream.
pub struct JsonSink<W: Write + Send = io::Stdout> {
    writer: W,
    colors: bool,
    is_closed: bool,
}

impl JsonSink<io::Stdout> {
    /// A sink writing to standard output without colors.
    pub fn stdout() -> Self {
        JsonSink::new(io::stdout())
    }
}

impl Default for JsonSink<io::Stdout> {
    fn default() -> Self {
        JsonSink::stdout()
    }
}

impl<W: Write + Send> JsonSink<W> {
    /// A sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        JsonSink {
            writer,
            colors: false,
            is_closed: false,
        }
    }

    /// Wraps every line in an ANSI color chosen by level.
    pub fn with_colors(self, colors: bool) -> Self {
        JsonSink { colors, ..self }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Whether [`Sink::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    fn render(&self, batch: &[Entry]) -> Result<Vec<u8>, SinkError> {
        let mut out = Vec::with_capacity(batch.len() * 128);
        for entry in batch {
            if self.colors {
                out.extend_from_slice(color(entry.level()).as_bytes());
            }
            serde_json::to_writer(&mut out, &LogLine::from(entry))
                .map_err(|err| SinkError::InternalFailure(err.to_string()))?;
            if self.colors {
                out.extend_from_slice(RESET.as_bytes());
            }
            out.push(b'\n');
        }
        Ok(out)
    }
}

impl<W: Write + Send> fmt::Debug for JsonSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSink")
            .field("colors", &self.colors)
            .field("is_closed", &self.is_closed)
            .finish()
    }
}

impl<W: Write + Send> Sink for JsonSink<W> {
    fn write(&mut self, batch: &[Entry]) -> SinkResult {
        if self.is_closed {
            return Err(SinkError::AlreadyClosed);
        }
        if batch.is_empty() {
            return Ok(());
        }
        let out = self.render(batch)?;
        self.writer.write_all(&out)?;
        Ok(())
    }

    fn flush(&mut self) -> SinkResult {
        if self.is_closed {
            return Ok(());
        }
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> SinkResult {
        if self.is_closed {
            return Ok(());
        }
        self.is_closed = true;
        self.writer.flush()?;
        Ok(())
    }
}
