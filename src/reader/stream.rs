//! Byte stream with single-byte pushback, the reader's input interface.

use std::io::BufRead;

use crate::error::Result;

pub struct CharStream<R> {
    input: R,
    pushback: Option<u8>,
}

impl<R: BufRead> CharStream<R> {
    pub fn new(input: R) -> Self {
        CharStream {
            input,
            pushback: None,
        }
    }

    /// Next byte without consuming it. `None` at end of input.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.pushback {
            return Ok(Some(b));
        }
        let buf = self.input.fill_buf()?;
        Ok(buf.first().copied())
    }

    /// Consume and return the next byte.
    pub fn get(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let b = {
            let buf = self.input.fill_buf()?;
            buf.first().copied()
        };
        if b.is_some() {
            self.input.consume(1);
        }
        Ok(b)
    }

    /// Push one byte back; the next `get` or `peek` returns it.
    pub fn unget(&mut self, byte: u8) {
        debug_assert!(self.pushback.is_none(), "only one byte of pushback");
        self.pushback = Some(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn get_and_peek() {
        let mut s = CharStream::new(Cursor::new("ab"));
        assert_eq!(s.peek().unwrap(), Some(b'a'));
        assert_eq!(s.get().unwrap(), Some(b'a'));
        assert_eq!(s.get().unwrap(), Some(b'b'));
        assert_eq!(s.get().unwrap(), None);
    }

    #[test]
    fn unget_restores_the_byte() {
        let mut s = CharStream::new(Cursor::new("xy"));
        let b = s.get().unwrap().unwrap();
        s.unget(b);
        assert_eq!(s.get().unwrap(), Some(b'x'));
        assert_eq!(s.get().unwrap(), Some(b'y'));
    }
}
