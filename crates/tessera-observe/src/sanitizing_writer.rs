//! `MakeWriter` adapter that scrubs secrets from formatted log lines.
//!
//! The fmt layer asks for a fresh writer per event and writes the formatted
//! line into it. `SanitizingWriter` buffers those bytes and, on flush or
//! drop, passes the line through the shared `SecretSanitizer` before handing
//! it to the inner writer.

use std::io::{self, Write};
use std::sync::Arc;

use tessera_core::security::sanitizer::SecretSanitizer;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
    sanitizer: Arc<SecretSanitizer>,
}

impl<M> SanitizingMakeWriter<M> {
    pub fn new(inner: M, sanitizer: Arc<SecretSanitizer>) -> Self {
        Self { inner, sanitizer }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for SanitizingMakeWriter<M> {
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            inner: self.inner.make_writer(),
            sanitizer: Arc::clone(&self.sanitizer),
            buffer: Vec::new(),
        }
    }
}

pub struct SanitizingWriter<W: Write> {
    inner: W,
    sanitizer: Arc<SecretSanitizer>,
    buffer: Vec<u8>,
}

impl<W: Write> SanitizingWriter<W> {
    fn emit(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let clean = self.sanitizer.sanitize(&String::from_utf8_lossy(&self.buffer));
        self.buffer.clear();
        self.inner.write_all(clean.as_bytes())
    }
}

impl<W: Write> Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = self.emit();
    }
}
