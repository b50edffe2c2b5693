//! Minimal stream contract, grounded in `examples/original_source/src/util/stream.h`:
//! `read`/`getc`/`ungetc`/`eof`/`putc`/`close`. The full reader/parser surface that
//! consumes a stream is out of scope for this runtime core; only the contract a host
//! embedding needs to hand the core a source of characters survives.

use std::cell::RefCell;
use std::io::{self, Read, Write};

/// A pushback-capable character source/sink a [`crate::Runtime`] embedding can read
/// NSE source from or write output to.
pub trait Stream {
    fn getc(&mut self) -> Option<u8>;
    fn ungetc(&mut self, byte: u8);
    fn eof(&self) -> bool;
    fn putc(&mut self, byte: u8) -> io::Result<()>;
}

/// Wraps any [`Read`] + [`Write`] in a one-byte-pushback buffer (`ungetc`), the way the
/// source's stream implementation layers pushback over a raw file descriptor.
pub struct BufferedStream<T> {
    inner: T,
    pushback: RefCell<Option<u8>>,
    eof: RefCell<bool>,
}

impl<T> BufferedStream<T> {
    pub fn new(inner: T) -> Self {
        BufferedStream {
            inner,
            pushback: RefCell::new(None),
            eof: RefCell::new(false),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Stream for BufferedStream<T> {
    fn getc(&mut self) -> Option<u8> {
        if let Some(b) = self.pushback.borrow_mut().take() {
            return Some(b);
        }
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf) {
            Ok(0) => {
                *self.eof.borrow_mut() = true;
                None
            }
            Ok(_) => Some(buf[0]),
            Err(_) => {
                *self.eof.borrow_mut() = true;
                None
            }
        }
    }

    fn ungetc(&mut self, byte: u8) {
        *self.pushback.borrow_mut() = Some(byte);
        *self.eof.borrow_mut() = false;
    }

    fn eof(&self) -> bool {
        *self.eof.borrow() && self.pushback.borrow().is_none()
    }

    fn putc(&mut self, _byte: u8) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not writable",
        ))
    }
}

/// An in-memory byte buffer stream, used for tests and for reading NSE source held in
/// a `String`/`Vec<u8>` already in memory.
pub struct BufferStream {
    data: Vec<u8>,
    pos: usize,
    pushback: Option<u8>,
}

impl BufferStream {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        BufferStream {
            data: data.into(),
            pos: 0,
            pushback: None,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.data
    }
}

impl Stream for BufferStream {
    fn getc(&mut self) -> Option<u8> {
        if let Some(b) = self.pushback.take() {
            return Some(b);
        }
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn ungetc(&mut self, byte: u8) {
        self.pushback = Some(byte);
    }

    fn eof(&self) -> bool {
        self.pushback.is_none() && self.pos >= self.data.len()
    }

    fn putc(&mut self, byte: u8) -> io::Result<()> {
        self.data.push(byte);
        Ok(())
    }
}

impl Write for BufferStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_stream_reads_back_what_it_was_given() {
        let mut s = BufferStream::new(b"ab".to_vec());
        assert_eq!(s.getc(), Some(b'a'));
        assert_eq!(s.getc(), Some(b'b'));
        assert!(!s.eof());
        assert_eq!(s.getc(), None);
        assert!(s.eof());
    }

    #[test]
    fn ungetc_replays_the_pushed_back_byte_and_clears_eof() {
        let mut s = BufferStream::new(b"a".to_vec());
        assert_eq!(s.getc(), Some(b'a'));
        assert!(s.eof());
        s.ungetc(b'a');
        assert!(!s.eof());
        assert_eq!(s.getc(), Some(b'a'));
    }

    #[test]
    fn putc_appends_and_is_visible_to_written() {
        let mut s = BufferStream::new(Vec::new());
        s.putc(b'x').unwrap();
        s.putc(b'y').unwrap();
        assert_eq!(s.written(), b"xy");
    }
}
