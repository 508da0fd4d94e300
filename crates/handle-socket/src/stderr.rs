//! Stderr passthrough.
//!
//! Bytes from a socket's stderr channel are split into lines and handed to
//! a [`LogSink`]. Nothing here can fail or apply backpressure.

use memchr::memchr;

/// Receives complete lines read from a stderr channel.
pub trait LogSink {
    fn log_line(&mut self, line: &str);
}

impl<F> LogSink for F
where
    F: FnMut(&str),
{
    fn log_line(&mut self, line: &str) {
        self(line);
    }
}

/// Emits each line as an `info` event on target `handle_socket::stderr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log_line(&mut self, line: &str) {
        tracing::info!(target: "handle_socket::stderr", "{line}");
    }
}

/// Line assembler for stderr data.
pub struct StderrLog {
    partial: Vec<u8>,
    limit: usize,
    sink: Box<dyn LogSink>,
}

impl std::fmt::Debug for StderrLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StderrLog")
            .field("partial", &self.partial.len())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl StderrLog {
    pub fn new(limit: usize, sink: Box<dyn LogSink>) -> Self {
        Self {
            partial: Vec::new(),
            limit: limit.max(1),
            sink,
        }
    }

    /// Feed bytes in; returns the number of lines emitted.
    pub fn push(&mut self, mut data: &[u8]) -> usize {
        let mut emitted = 0;
        while let Some(pos) = memchr(b'\n', data) {
            self.partial.extend_from_slice(&data[..pos]);
            self.emit();
            emitted += 1;
            data = &data[pos + 1..];
        }
        self.partial.extend_from_slice(data);
        if self.partial.len() >= self.limit {
            self.emit();
            emitted += 1;
        }
        emitted
    }

    /// Bytes of an unterminated line held back.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Discard any unterminated line.
    pub fn clear(&mut self) {
        self.partial.clear();
    }

    fn emit(&mut self) {
        let line = String::from_utf8_lossy(&self.partial);
        self.sink.log_line(line.trim_end());
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collector(limit: usize) -> (StderrLog, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&lines);
        let log = StderrLog::new(
            limit,
            Box::new(move |line: &str| sink.borrow_mut().push(line.to_string())),
        );
        (log, lines)
    }

    #[test]
    fn splits_lines_and_strips_trailing_whitespace() {
        let (mut log, lines) = collector(1024);
        assert_eq!(log.push(b"one\r\ntwo  \nthr"), 2);
        assert_eq!(*lines.borrow(), vec!["one", "two"]);
        assert_eq!(log.pending(), 3);
        assert_eq!(log.push(b"ee\n"), 1);
        assert_eq!(lines.borrow()[2], "three");
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn long_partial_line_is_flushed() {
        let (mut log, lines) = collector(4);
        assert_eq!(log.push(b"abc"), 0);
        assert_eq!(log.push(b"def"), 1);
        assert_eq!(*lines.borrow(), vec!["abcdef"]);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let (mut log, lines) = collector(64);
        log.push(b"bad \xff byte\n");
        assert_eq!(lines.borrow()[0], "bad \u{fffd} byte");
    }

    #[test]
    fn clear_discards_partial_line() {
        let (mut log, lines) = collector(64);
        log.push(b"half");
        log.clear();
        log.push(b"\n");
        assert_eq!(*lines.borrow(), vec![""]);
    }
}
