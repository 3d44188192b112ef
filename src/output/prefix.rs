//! Line-buffered writer that labels every line of output.
//!
//! Many repositories stream subprocess output at the same time. Each
//! invocation gets its own [`PrefixWriter`], which only ever hands complete
//! lines to the shared sink, so lines from different repositories interleave
//! but never tear.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// A clonable handle on one underlying writer.
///
/// Each `write` call is forwarded whole while the lock is held.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        SharedSink {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl std::fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSink")
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

/// Writes each complete line to `inner` as `<prefix> <line>\n`.
///
/// A trailing partial line is held until a newline arrives or the writer is
/// flushed; [`Write::flush`] terminates it with a newline. Dropping the writer
/// flushes it.
pub struct PrefixWriter<W: Write> {
    inner: W,
    prefix: String,
    pending: Vec<u8>,
}

impl<W: Write> PrefixWriter<W> {
    /// An empty `prefix` writes lines unchanged.
    pub fn new(inner: W, prefix: impl Into<String>) -> Self {
        PrefixWriter {
            inner,
            prefix: prefix.into(),
            pending: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(self.prefix.len() + line.len() + 2);
        if !self.prefix.is_empty() {
            out.extend_from_slice(self.prefix.as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(line);
        out.push(b'\n');
        // One write per line keeps a shared sink from splitting it.
        self.inner.write_all(&out)
    }
}

impl<W: Write> Write for PrefixWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = self.pending[start..end].to_vec();
            self.emit(&line)?;
            start = end + 1;
        }
        self.pending.drain(..start);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for PrefixWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
