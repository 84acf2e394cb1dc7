//! Blocking line input

use std::io::BufRead;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("end of input")]
    EndOfInput,

    #[error("failed to read line")]
    Read(#[from] std::io::Error),
}

/// Reads one line at a time, without its terminator
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Block until a full line is available.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Result<String, InputError> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Err(InputError::EndOfInput);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(String::from_utf8_lossy(&self.buf).into_owned())
    }
}
