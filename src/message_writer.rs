use crate::buffers::buffer_pool::BufferPool;
use crate::buffers::fixed_buffer::FixedBuf;
use crate::error::FramingError;
use crate::packet_header::{PacketHeader, SendOption};
use bytes::BufMut;
use bytes_varint::VarIntSupportMut;
use std::sync::Arc;

/// number of bytes the packed encoding of a value occupies: max(1, ceil(bits/7))
pub(crate) fn packed_len(value: u32) -> usize {
    if value == 0 {
        1
    } else {
        (32 - value.leading_zeros() as usize).div_ceil(7)
    }
}

/// Builder for a single outbound datagram.
///
/// The writer rents a fixed-capacity buffer from the pool for its whole lifetime and
///  returns it on drop. Construction writes the datagram header for the chosen send
///  option; for acknowledged kinds the two message id bytes are reserved as zero and
///  back-patched by the reliable channel when the datagram is registered for sending.
///
/// Sub-messages are length-prefixed and may nest: `start_message` records the current
///  position on a stack, `end_message` back-patches the 16-bit little-endian length of
///  everything written since (excluding the length field and tag themselves), and
///  `cancel_message` discards the unfinished sub-message entirely. All payload integers
///  are little-endian; only the message id in the header is big-endian.
pub struct MessageWriter {
    pool: Arc<BufferPool>,
    buf: Option<FixedBuf>,
    send_option: SendOption,
    message_starts: Vec<usize>,
}

impl MessageWriter {
    pub fn new(pool: Arc<BufferPool>, send_option: SendOption) -> MessageWriter {
        let mut buf = pool.get_from_pool();
        PacketHeader::new(send_option, send_option.is_acknowledged().then_some(0)).ser(&mut buf);

        MessageWriter {
            pool,
            buf: Some(buf),
            send_option,
            message_starts: Vec::new(),
        }
    }

    fn buf(&self) -> &FixedBuf {
        self.buf.as_ref().expect("buffer is present until drop")
    }

    fn buf_mut(&mut self) -> &mut FixedBuf {
        self.buf.as_mut().expect("buffer is present until drop")
    }

    pub fn send_option(&self) -> SendOption {
        self.send_option
    }

    /// high-water mark of the frame built so far, header included
    pub fn length(&self) -> usize {
        self.buf().len()
    }

    pub fn header_len(&self) -> usize {
        if self.send_option.is_acknowledged() {
            3
        } else {
            1
        }
    }

    /// the framed datagram built so far
    pub fn bytes(&self) -> &[u8] {
        self.buf().as_ref()
    }

    /// number of sub-messages currently open
    pub fn message_depth(&self) -> usize {
        self.message_starts.len()
    }

    /// reset the writer for reuse, re-framing the header for the given send option
    pub fn clear(&mut self, send_option: SendOption) {
        self.send_option = send_option;
        self.message_starts.clear();
        let buf = self.buf_mut();
        buf.clear();
        PacketHeader::new(send_option, send_option.is_acknowledged().then_some(0)).ser(buf);
    }

    pub(crate) fn patch_message_id(&mut self, message_id: u16) {
        assert!(
            self.send_option.is_acknowledged(),
            "only acknowledged kinds carry a message id"
        );
        PacketHeader::patch_message_id(self.buf_mut().as_mut(), message_id);
    }

    fn ensure(&self, required: usize) -> Result<(), FramingError> {
        let remaining = self.buf().capacity() - self.buf().len();
        if required > remaining {
            return Err(FramingError::BufferOverflow {
                required,
                remaining,
            });
        }
        Ok(())
    }

    pub fn start_message(&mut self, tag: u8) -> Result<(), FramingError> {
        self.ensure(3)?;
        let start = self.buf().len();
        self.message_starts.push(start);

        let buf = self.buf_mut();
        buf.put_u16_le(0); // length placeholder, patched in end_message
        buf.put_u8(tag);
        Ok(())
    }

    pub fn end_message(&mut self) -> Result<(), FramingError> {
        let start = self.message_starts.pop().ok_or(FramingError::Unbalanced)?;
        let body_len = self.buf().len() - start - 3;
        self.buf_mut().as_mut()[start..start + 2].copy_from_slice(&(body_len as u16).to_le_bytes());
        Ok(())
    }

    /// discard the innermost open sub-message, rewinding position and length to its start
    pub fn cancel_message(&mut self) -> Result<(), FramingError> {
        let start = self.message_starts.pop().ok_or(FramingError::Unbalanced)?;
        self.buf_mut().truncate(start);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), FramingError> {
        self.write_u8(value as u8)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), FramingError> {
        self.ensure(1)?;
        self.buf_mut().put_u8(value);
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<(), FramingError> {
        self.ensure(1)?;
        self.buf_mut().put_i8(value);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), FramingError> {
        self.ensure(2)?;
        self.buf_mut().put_u16_le(value);
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), FramingError> {
        self.ensure(2)?;
        self.buf_mut().put_i16_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), FramingError> {
        self.ensure(4)?;
        self.buf_mut().put_u32_le(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), FramingError> {
        self.ensure(4)?;
        self.buf_mut().put_i32_le(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), FramingError> {
        self.ensure(4)?;
        self.buf_mut().put_f32_le(value);
        Ok(())
    }

    /// 7-bit groups, little-endian, continuation bit 0x80 on all bytes except the last
    pub fn write_packed_u32(&mut self, value: u32) -> Result<(), FramingError> {
        self.ensure(packed_len(value))?;
        self.buf_mut().put_u32_varint(value);
        Ok(())
    }

    /// packs the two's-complement bit pattern - negative values always occupy five bytes
    pub fn write_packed_i32(&mut self, value: i32) -> Result<(), FramingError> {
        self.write_packed_u32(value as u32)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        self.ensure(bytes.len())?;
        self.buf_mut().put_slice(bytes);
        Ok(())
    }

    pub fn write_bytes_and_size(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        self.ensure(packed_len(bytes.len() as u32) + bytes.len())?;
        let buf = self.buf_mut();
        buf.put_u32_varint(bytes.len() as u32);
        buf.put_slice(bytes);
        Ok(())
    }

    /// UTF-8 bytes prefixed by their packed length
    pub fn write_string(&mut self, value: &str) -> Result<(), FramingError> {
        self.write_bytes_and_size(value.as_bytes())
    }
}

impl Drop for MessageWriter {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.return_to_pool(buf);
        }
    }
}
