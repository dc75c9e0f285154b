//! Bounded playback queue
//!
//! FIFO of decoded buffers waiting for the scheduler. Bounded two ways:
//! by entry count and by estimated memory (`rate × channels × duration × 4`).
//! After every mutation both `len() ≤ max_count` and
//! `estimated_bytes() ≤ max_memory_bytes` hold.
//!
//! Overflow evicts the oldest entries. Evicted storage goes back to the
//! [`BufferPool`].
//!
//! The queue itself is not synchronized; the engine shares it as
//! [`SharedQueue`] and keeps critical sections short.

use crate::audio::types::DecodedBuffer;
use crate::playback::buffer_pool::BufferPool;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Entries kept by an emergency cleanup
pub const EMERGENCY_KEEP: usize = 5;

/// Queue shared between the decode pipeline, scheduler and recovery
pub type SharedQueue = Arc<Mutex<PlaybackQueue>>;

/// One queued buffer
#[derive(Debug)]
pub struct QueueEntry {
    pub buffer: DecodedBuffer,
    pub enqueued_at: Instant,
    estimated_bytes: u64,
}

/// Bounded FIFO of decoded buffers
pub struct PlaybackQueue {
    entries: VecDeque<QueueEntry>,
    pool: Arc<BufferPool>,
    max_count: usize,
    max_memory_bytes: u64,
    estimated_bytes: u64,
    evicted: u64,
}

impl PlaybackQueue {
    /// Create an empty queue
    pub fn new(max_count: usize, max_memory_bytes: u64, pool: Arc<BufferPool>) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_count),
            pool,
            max_count: max_count.max(1),
            max_memory_bytes,
            estimated_bytes: 0,
            evicted: 0,
        }
    }

    /// Wrap in the shared handle used across the engine
    pub fn shared(self) -> SharedQueue {
        Arc::new(Mutex::new(self))
    }

    /// Append a buffer, evicting from the head to make room.
    ///
    /// Returns false (and recycles the storage) if the buffer alone exceeds
    /// the memory budget.
    pub fn enqueue(&mut self, buffer: DecodedBuffer) -> bool {
        let bytes = buffer.estimated_bytes();
        if bytes > self.max_memory_bytes {
            warn!(
                "Refusing buffer #{}: {} bytes exceeds memory budget of {} bytes",
                buffer.sequence, bytes, self.max_memory_bytes
            );
            self.pool.release_buffer(buffer);
            return false;
        }

        while self.estimated_bytes + bytes > self.max_memory_bytes {
            if !self.evict_head() {
                break;
            }
        }
        while self.entries.len() >= self.max_count {
            if !self.evict_head() {
                break;
            }
        }

        self.estimated_bytes += bytes;
        self.entries.push_back(QueueEntry {
            buffer,
            enqueued_at: Instant::now(),
            estimated_bytes: bytes,
        });
        true
    }

    /// Remove and return the oldest buffer
    pub fn dequeue(&mut self) -> Option<DecodedBuffer> {
        let entry = self.entries.pop_front()?;
        self.estimated_bytes = self.estimated_bytes.saturating_sub(entry.estimated_bytes);
        Some(entry.buffer)
    }

    /// Number of queued buffers
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total queued audio in seconds
    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.buffer.duration).sum()
    }

    /// Drain every entry into the buffer pool
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            self.pool.release_buffer(entry.buffer);
        }
        self.estimated_bytes = 0;
    }

    /// Keep only the most recent entries and empty the buffer pool.
    ///
    /// Returns the number of entries discarded.
    pub fn emergency_cleanup(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(EMERGENCY_KEEP);
        for entry in self.entries.drain(..excess) {
            self.estimated_bytes = self.estimated_bytes.saturating_sub(entry.estimated_bytes);
        }
        self.evicted += excess as u64;
        self.pool.clear();
        warn!(
            "Emergency cleanup: discarded {} buffers, {} remain",
            excess,
            self.entries.len()
        );
        excess
    }

    /// Apply a new count limit, evicting from the head if necessary
    pub fn set_max_count(&mut self, max_count: usize) {
        self.max_count = max_count.max(1);
        while self.entries.len() > self.max_count {
            self.evict_head();
        }
        debug!("Queue max count set to {}", self.max_count);
    }

    /// Current count limit
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Memory budget in bytes
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    /// Estimated memory of all queued buffers
    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }

    /// Fill ratio by count (0.0..=1.0)
    pub fn occupancy(&self) -> f64 {
        self.entries.len() as f64 / self.max_count as f64
    }

    /// Fill ratio by estimated memory (0.0..=1.0)
    pub fn memory_occupancy(&self) -> f64 {
        if self.max_memory_bytes == 0 {
            return 1.0;
        }
        self.estimated_bytes as f64 / self.max_memory_bytes as f64
    }

    /// Buffers evicted by overflow or emergency cleanup
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Buffer pool backing this queue
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn evict_head(&mut self) -> bool {
        match self.entries.pop_front() {
            Some(entry) => {
                self.estimated_bytes = self.estimated_bytes.saturating_sub(entry.estimated_bytes);
                self.evicted += 1;
                debug!("Evicted buffer #{} from queue head", entry.buffer.sequence);
                self.pool.release_buffer(entry.buffer);
                true
            }
            None => false,
        }
    }
}
