//! Output capture
//!
//! A running process has two pipe readers (stdout and stderr) that deliver
//! data concurrently. Both write through one [`OutputMux`], which applies
//! each write to the log, the stream's own buffer and the combined buffer
//! under a single lock.

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::info;

/// Which pipe a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Everything a process wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub combined: Vec<u8>,
}

/// Guarded fan-out of process output, shared by both pipe readers
#[derive(Clone)]
pub struct OutputMux {
    name: Arc<str>,
    buffers: Arc<Mutex<CapturedOutput>>,
}

impl OutputMux {
    pub fn new(name: &str) -> Self {
        OutputMux {
            name: Arc::from(name),
            buffers: Arc::new(Mutex::new(CapturedOutput::default())),
        }
    }

    /// Writer handle for one stream
    pub fn writer(&self, stream: Stream) -> StreamWriter {
        StreamWriter {
            mux: self.clone(),
            stream,
        }
    }

    /// Apply one chunk atomically to the log and both buffers
    pub fn record(&self, stream: Stream, chunk: &[u8]) {
        let mut buffers = self.buffers.lock();

        let text = String::from_utf8_lossy(chunk);
        let line: &str = &text;
        info!(stream = %stream, "[{}] {}", self.name, line.strip_suffix('\n').unwrap_or(line));

        match stream {
            Stream::Stdout => buffers.stdout.extend_from_slice(chunk),
            Stream::Stderr => buffers.stderr.extend_from_slice(chunk),
        }
        buffers.combined.extend_from_slice(chunk);
    }

    /// Move the captured buffers out, leaving the mux empty
    pub fn take(&self) -> CapturedOutput {
        std::mem::take(&mut *self.buffers.lock())
    }
}

/// `io::Write` adapter feeding one stream into an [`OutputMux`]
pub struct StreamWriter {
    mux: OutputMux,
    stream: Stream,
}

impl io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mux.record(self.stream, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
