//! Buffer Pool
//!
//! Bounded free list of sample vectors. Decodes write into recycled storage
//! instead of allocating a fresh `Vec<f32>` per chunk; played and evicted
//! buffers hand their storage back here.

use crate::audio::types::DecodedBuffer;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Reuse statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Vectors currently held
    pub available: usize,
    /// Acquisitions served from the free list
    pub reused: u64,
    /// Acquisitions that had to allocate
    pub allocated: u64,
}

/// Bounded pool of reusable sample buffers
pub struct BufferPool {
    free: Mutex<Vec<Vec<f32>>>,
    max_size: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl BufferPool {
    /// Create an empty pool holding at most `max_size` vectors
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Take a cleared vector, allocating if the pool is empty
    pub fn acquire(&self) -> Vec<f32> {
        match self.free.lock().pop() {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    /// Return a vector; dropped if the pool is full
    pub fn release(&self, mut buf: Vec<f32>) {
        // Zero-capacity vectors are worthless to keep
        if buf.capacity() == 0 {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_size {
            free.push(buf);
        }
    }

    /// Return a decoded buffer's storage
    pub fn release_buffer(&self, buffer: DecodedBuffer) {
        self.release(buffer.into_samples());
    }

    /// Drop every pooled vector
    pub fn clear(&self) {
        let mut free = self.free.lock();
        let dropped = free.len();
        free.clear();
        free.shrink_to_fit();
        if dropped > 0 {
            debug!("Buffer pool cleared ({} buffers released)", dropped);
        }
    }

    /// Number of vectors currently available
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    /// True if no vectors are available
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Snapshot of reuse statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.len(),
            reused: self.reused.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }
}
