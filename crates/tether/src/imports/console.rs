//! `putcharStdout` / `putcharStderr`: line-buffered guest console output and
//! the sinks that receive finished lines.

use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

use strum::Display;

use crate::{config::ConsoleMode, marshal::char_from_code};

/// Guest output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives complete guest console lines.
///
/// Implement this trait to capture or redirect guest output. Lines arrive
/// without their terminating newline.
pub trait ConsoleSink {
    fn line(&self, stream: Stream, line: &str);
}

/// Default sink: one `tracing` event per line under the `tether::guest`
/// target, `info` for stdout and `error` for stderr.
#[derive(Debug, Default)]
pub struct LogConsole;

impl ConsoleSink for LogConsole {
    fn line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => tracing::info!(target: "tether::guest", "{line}"),
            Stream::Stderr => tracing::error!(target: "tether::guest", "{line}"),
        }
    }
}

/// Writes lines to the process's stdout and stderr.
#[derive(Debug, Default)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn line(&self, stream: Stream, line: &str) {
        let written = match stream {
            Stream::Stdout => writeln!(io::stdout(), "{line}"),
            Stream::Stderr => writeln!(io::stderr(), "{line}"),
        };
        if let Err(err) = written {
            tracing::warn!(%stream, error = %err, "failed to write guest console line");
        }
    }
}

/// Ignores all output.
#[derive(Debug, Default)]
pub struct NoConsole;

impl ConsoleSink for NoConsole {
    fn line(&self, _stream: Stream, _line: &str) {}
}

/// Collects lines in memory.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to the bridge.
#[derive(Debug, Clone, Default)]
pub struct CollectConsole(Rc<RefCell<Vec<(Stream, String)>>>);

impl CollectConsole {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line collected so far, in arrival order.
    #[must_use]
    pub fn lines(&self) -> Vec<(Stream, String)> {
        self.0.borrow().clone()
    }

    /// Lines written to one stream.
    #[must_use]
    pub fn stream(&self, stream: Stream) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl ConsoleSink for CollectConsole {
    fn line(&self, stream: Stream, line: &str) {
        self.0.borrow_mut().push((stream, line.to_owned()));
    }
}

/// Sink for a configured [`ConsoleMode`].
#[must_use]
pub fn sink_for(mode: ConsoleMode) -> Rc<dyn ConsoleSink> {
    match mode {
        ConsoleMode::Log => Rc::new(LogConsole),
        ConsoleMode::Stdio => Rc::new(StdConsole),
        ConsoleMode::Silent => Rc::new(NoConsole),
    }
}

const NEWLINE: u16 = 10;

/// Character-at-a-time console shim behind `putcharStdout` / `putcharStderr`.
///
/// Each stream buffers UTF-16 code units until a newline arrives, then
/// decodes the line and hands it to the sink.
pub struct ConsoleShim {
    sink: Rc<dyn ConsoleSink>,
    stdout: RefCell<Vec<u16>>,
    stderr: RefCell<Vec<u16>>,
}

impl ConsoleShim {
    pub fn new(sink: Rc<dyn ConsoleSink>) -> Self {
        Self {
            sink,
            stdout: RefCell::new(Vec::new()),
            stderr: RefCell::new(Vec::new()),
        }
    }

    fn buffer(&self, stream: Stream) -> &RefCell<Vec<u16>> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    /// Accepts one code unit from the guest.
    pub fn putchar(&self, stream: Stream, code: i32) {
        let unit = char_from_code(code);
        if unit != NEWLINE {
            self.buffer(stream).borrow_mut().push(unit);
            return;
        }
        let units = std::mem::take(&mut *self.buffer(stream).borrow_mut());
        self.sink.line(stream, &String::from_utf16_lossy(&units));
    }

    /// Emits whatever is buffered without waiting for a newline.
    pub fn flush(&self) {
        for stream in [Stream::Stdout, Stream::Stderr] {
            let units = std::mem::take(&mut *self.buffer(stream).borrow_mut());
            if !units.is_empty() {
                self.sink.line(stream, &String::from_utf16_lossy(&units));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn put(shim: &ConsoleShim, stream: Stream, text: &str) {
        for unit in text.encode_utf16() {
            shim.putchar(stream, i32::from(unit));
        }
    }

    #[test]
    fn newline_flushes_one_line() {
        let collect = CollectConsole::new();
        let shim = ConsoleShim::new(Rc::new(collect.clone()));
        put(&shim, Stream::Stdout, "hello");
        assert!(collect.lines().is_empty());
        put(&shim, Stream::Stdout, "\nworld\n");
        assert_eq!(collect.stream(Stream::Stdout), vec!["hello".to_owned(), "world".to_owned()]);
    }

    #[test]
    fn streams_buffer_independently() {
        let collect = CollectConsole::new();
        let shim = ConsoleShim::new(Rc::new(collect.clone()));
        put(&shim, Stream::Stdout, "out");
        put(&shim, Stream::Stderr, "err\n");
        put(&shim, Stream::Stdout, "\n");
        assert_eq!(
            collect.lines(),
            vec![(Stream::Stderr, "err".to_owned()), (Stream::Stdout, "out".to_owned())]
        );
    }

    #[test]
    fn surrogate_pairs_decode_across_units() {
        let collect = CollectConsole::new();
        let shim = ConsoleShim::new(Rc::new(collect.clone()));
        put(&shim, Stream::Stdout, "π 😀\n");
        assert_eq!(collect.stream(Stream::Stdout), vec!["π 😀".to_owned()]);
    }

    #[test]
    fn flush_emits_partial_lines() {
        let collect = CollectConsole::new();
        let shim = ConsoleShim::new(Rc::new(collect.clone()));
        put(&shim, Stream::Stderr, "partial");
        shim.flush();
        shim.flush();
        assert_eq!(collect.stream(Stream::Stderr), vec!["partial".to_owned()]);
    }
}
