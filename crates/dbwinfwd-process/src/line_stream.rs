//! Newline-delimited line reader over an arbitrary byte source.
//!
//! Lines are split strictly on LF (0x0A). The LF is removed; a CR that
//! precedes it stays in the line, so joining the returned lines with `\n`
//! reproduces the input byte for byte (a trailing `\n` at EOF excepted).
//! A final fragment without a terminator is returned only if non-empty.

use std::io::{self, Read};

const DEFAULT_READ_SIZE: usize = 4096;

/// Single-consumer line reader. Takes the byte source by value, so no other
/// reader can observe the bytes it consumes.
pub struct LineStream<R> {
    reader: R,
    buf: Vec<u8>,
    /// Start of the unconsumed region in `buf`.
    pos: usize,
    read_size: usize,
    eof: bool,
}

impl<R: Read> LineStream<R> {
    pub fn new(reader: R) -> Self {
        Self::with_read_size(reader, DEFAULT_READ_SIZE)
    }

    /// Like [`LineStream::new`] with a custom size for each underlying read.
    pub fn with_read_size(reader: R, read_size: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            pos: 0,
            read_size: read_size.max(1),
            eof: false,
        }
    }

    /// Return the next line without its LF, or `None` once the source is
    /// exhausted. Blocks until a LF arrives or the source reports EOF.
    pub fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        // buf[pos..pos + searched] is known to hold no LF.
        let mut searched = 0;
        loop {
            let pending = &self.buf[self.pos..];
            if let Some(offset) = pending[searched..].iter().position(|&b| b == b'\n') {
                let end = self.pos + searched + offset;
                let line = self.buf[self.pos..end].to_vec();
                self.pos = end + 1;
                return Ok(Some(line));
            }
            searched = pending.len();

            if self.eof {
                if searched == 0 {
                    return Ok(None);
                }
                let line = self.buf[self.pos..].to_vec();
                self.pos = self.buf.len();
                return Ok(Some(line));
            }

            self.compact();
            self.fill()?;
        }
    }

    /// Bytes held back as a partial line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Give back the underlying reader. Buffered bytes are discarded.
    pub fn into_inner(self) -> R {
        self.reader
    }

    // ------------------------------------------------------------------
    // internal
    // ------------------------------------------------------------------

    /// Drop already-returned bytes from the front of the buffer.
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + self.read_size, 0);
        loop {
            match self.reader.read(&mut self.buf[start..]) {
                Ok(n) => {
                    self.buf.truncate(start + n);
                    if n == 0 {
                        self.eof = true;
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        }
    }
}

impl<R: Read> Iterator for LineStream<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
