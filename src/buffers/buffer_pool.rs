use crate::buffers::fixed_buffer::FixedBuf;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Pool of fixed-size framing buffers. Renting is lock-then-pop; a rented buffer is
///  returned cleared and is discarded if the pool is already at capacity.
pub struct BufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<FixedBuf>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> BufferPool {
        BufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn get_from_pool(&self) -> FixedBuf {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        FixedBuf::new(self.buf_size)
    }

    pub fn return_to_pool(&self, mut buffer: FixedBuf) {
        assert_eq!(
            buffer.capacity(),
            self.buf_size,
            "returned buffer does not have the regular capacity of {} bytes",
            self.buf_size
        );

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        } else {
            debug!("pool is full: discarding returned buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_rented_buffer_is_cleared() {
        let pool = BufferPool::new(10, 10);

        let mut buf = FixedBuf::new(10);
        buf.put_u8(1);
        buf.put_u8(2);

        pool.return_to_pool(buf);

        let rented = pool.get_from_pool();
        assert_eq!(rented.as_ref(), b"");
        assert_eq!(rented.capacity(), 10);
    }

    #[test]
    fn test_pool_discards_above_capacity() {
        let pool = BufferPool::new(10, 1);

        pool.return_to_pool(FixedBuf::new(10));
        pool.return_to_pool(FixedBuf::new(10));

        assert_eq!(pool.buffers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_pool_creates_buffers() {
        let pool = BufferPool::new(7, 1);
        assert_eq!(pool.get_from_pool().capacity(), 7);
    }
}
