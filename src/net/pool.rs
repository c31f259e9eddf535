//! Outbound buffer pool
//!
//! Snapshot and packet writers acquire their buffer here. A [`PooledBuffer`]
//! returns itself to the pool when dropped, so a buffer is released on every
//! exit path, including early returns and `?` propagation.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::net::buffer::PacketBuffer;

/// Buffers that grew beyond this are dropped instead of pooled
const MAX_POOLED_CAPACITY: usize = 16 * 1024;

/// Initial capacity of freshly allocated buffers
const DEFAULT_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Default)]
struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    outstanding: AtomicUsize,
}

/// Thread-safe pool of outbound packet buffers
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool with `size` pre-allocated buffers
    pub fn new(size: usize) -> Self {
        let free = (0..size)
            .map(|_| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a buffer, allocating when the pool is empty
    pub fn acquire(&self) -> PooledBuffer {
        let bytes = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY));
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buffer: PacketBuffer::wrap(bytes),
            pool: self.inner.clone(),
        }
    }

    /// Number of idle buffers in the pool
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of buffers currently acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }
}

/// A packet buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: PacketBuffer,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Copy out the written bytes for the transport; the buffer itself
    /// goes back to the pool when `self` drops.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl Deref for PooledBuffer {
    type Target = PacketBuffer;

    fn deref(&self) -> &PacketBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
        let mut bytes = std::mem::take(&mut self.buffer).into_inner();
        if bytes.capacity() <= MAX_POOLED_CAPACITY {
            bytes.clear();
            self.pool.free.lock().push(bytes);
        }
    }
}
