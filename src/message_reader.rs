use crate::error::FramingError;
use bytes::Buf;
use bytes_varint::VarIntSupport;

/// Cursor over the payload of a received datagram, mirroring `MessageWriter`.
///
/// A reader never copies: sub-readers returned by `read_message` and windows returned
///  by `slice` borrow the same underlying datagram bytes. All reads past the end fail
///  with `Underflow`; a failed read does not advance the cursor.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
    tag: Option<u8>,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> MessageReader<'a> {
        MessageReader {
            buf,
            pos: 0,
            tag: None,
        }
    }

    /// the tag of the sub-message this reader is scoped to, `None` at the top level
    pub fn tag(&self) -> Option<u8> {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// true iff at least `expected` payload bytes remain to be read
    pub fn has_bytes(&self, expected: usize) -> bool {
        self.remaining() >= expected
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        if self.remaining() < n {
            return Err(FramingError::Underflow);
        }
        let taken = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(taken)
    }

    pub fn read_bool(&mut self) -> Result<bool, FramingError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, FramingError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, FramingError> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, FramingError> {
        Ok(self.take(2)?.get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, FramingError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, FramingError> {
        Ok(self.take(4)?.get_i32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, FramingError> {
        Ok(self.take(4)?.get_f32_le())
    }

    pub fn read_packed_u32(&mut self) -> Result<u32, FramingError> {
        let mut rest = &self.buf[self.pos..];
        let before = rest.len();
        let value = rest
            .try_get_u32_varint()
            .map_err(|_| FramingError::Underflow)?;
        self.pos += before - rest.len();
        Ok(value)
    }

    pub fn read_packed_i32(&mut self) -> Result<i32, FramingError> {
        Ok(self.read_packed_u32()? as i32)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        self.take(n)
    }

    /// packed length prefix followed by that many raw bytes
    pub fn read_bytes_and_size(&mut self) -> Result<&'a [u8], FramingError> {
        let rollback = self.pos;
        let len = self.read_packed_u32()? as usize;
        match self.take(len) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.pos = rollback;
                Err(e)
            }
        }
    }

    pub fn read_string(&mut self) -> Result<String, FramingError> {
        let bytes = self.read_bytes_and_size()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FramingError::InvalidUtf8)
    }

    /// consume one length-prefixed sub-message, returning a reader scoped to its body
    pub fn read_message(&mut self) -> Result<MessageReader<'a>, FramingError> {
        let rollback = self.pos;
        let len = self.read_u16()? as usize;
        let tag = match self.read_u8() {
            Ok(tag) => tag,
            Err(e) => {
                self.pos = rollback;
                return Err(e);
            }
        };
        match self.take(len) {
            Ok(body) => Ok(MessageReader {
                buf: body,
                pos: 0,
                tag: Some(tag),
            }),
            Err(e) => {
                self.pos = rollback;
                Err(e)
            }
        }
    }

    /// non-consuming window over this reader's bytes starting at `offset`
    pub fn slice(&self, offset: usize) -> Result<MessageReader<'a>, FramingError> {
        if offset > self.buf.len() {
            return Err(FramingError::Underflow);
        }
        Ok(MessageReader {
            buf: &self.buf[offset..],
            pos: 0,
            tag: self.tag,
        })
    }
}
