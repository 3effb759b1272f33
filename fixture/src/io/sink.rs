//! Character output sinks.
//!
//! The engine writes diagnostics one byte at a time. Production runs use
//! [`StdoutSink`]; tests capture output with [`BufferSink`].

use std::cell::RefCell;
use std::io::{Stdout, Write};
use std::rc::Rc;

use tracing::warn;

/// Destination for the engine's single-character output stream.
pub trait OutputSink {
    fn put_char(&mut self, ch: u8);

    fn put_str(&mut self, text: &str) {
        for byte in text.bytes() {
            self.put_char(byte);
        }
    }

    fn flush(&mut self) {}
}

/// Writes to the process's standard output.
pub struct StdoutSink {
    out: Stdout,
    write_failed: bool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: std::io::stdout(),
            write_failed: false,
        }
    }

    fn report(&mut self, err: std::io::Error) {
        // Warn once per sink.
        if !self.write_failed {
            warn!(error = %err, "stdout write failed");
            self.write_failed = true;
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutSink {
    fn put_char(&mut self, ch: u8) {
        if let Err(err) = self.out.write_all(&[ch]) {
            self.report(err);
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.out.flush() {
            self.report(err);
        }
    }
}

/// In-memory sink. Clones share the same buffer, so a test can keep one
/// handle while the context owns another.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.bytes.borrow_mut().clear();
    }
}

impl OutputSink for BufferSink {
    fn put_char(&mut self, ch: u8) {
        self.bytes.borrow_mut().push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_clones_share_contents() {
        let handle = BufferSink::new();
        let mut sink: Box<dyn OutputSink> = Box::new(handle.clone());
        sink.put_str("ab");
        sink.put_char(b'c');
        assert_eq!(handle.contents(), "abc");
        handle.clear();
        assert_eq!(handle.contents(), "");
    }
}
