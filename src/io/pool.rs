// src/io/pool.rs
//
// Bounded pool of reusable event accumulators shared by the serial parser
// (producer) and the TCP sender (consumer).
//
// Buffers move by value between the free set, the ready set and their current
// owner, so a buffer can only ever be in one place. The two sets are locked
// independently: the producer touches free (acquire) and ready (release), the
// consumer touches ready (acquire) and free (release), and neither lock is held
// while the other is taken.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Buffers allocated up front when the pool is created.
const PREALLOC: usize = 1;

/// Initial capacity of a freshly allocated accumulator.
const BUFFER_CAPACITY: usize = 1024;

struct FreeSet {
    buffers: VecDeque<Vec<u8>>,
    /// Total buffers created by this pool, wherever they currently are
    allocated: usize,
}

/// Bounded pool of byte accumulators split into a free set and a ready set.
pub struct BufferPool {
    limit: usize,
    free: Mutex<FreeSet>,
    ready: Mutex<VecDeque<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool that will never hold more than `limit` buffers.
    pub fn new(limit: usize) -> Self {
        let prealloc = PREALLOC.min(limit);
        let buffers = (0..prealloc)
            .map(|_| Vec::with_capacity(BUFFER_CAPACITY))
            .collect();

        Self {
            limit,
            free: Mutex::new(FreeSet {
                buffers,
                allocated: prealloc,
            }),
            ready: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of buffers created so far.
    pub fn allocated(&self) -> usize {
        self.free.lock().map(|f| f.allocated).unwrap_or(self.limit)
    }

    /// Take a buffer from the free set, allocating a new one while under the limit.
    /// Returns `None` when every buffer is in use.
    pub fn acquire_free(&self) -> Option<Vec<u8>> {
        let mut free = self.free.lock().ok()?;

        if let Some(buf) = free.buffers.pop_front() {
            return Some(buf);
        }

        if free.allocated < self.limit {
            free.allocated += 1;
            tlog!("[pool] alloc {}", free.allocated);
            return Some(Vec::with_capacity(BUFFER_CAPACITY));
        }

        None
    }

    /// Take the oldest buffer from the ready set.
    pub fn acquire_ready(&self) -> Option<Vec<u8>> {
        self.ready.lock().ok()?.pop_front()
    }

    /// Empty a buffer and return it to the free set.
    pub fn release_to_free(&self, mut buf: Vec<u8>) {
        buf.clear();
        if let Ok(mut free) = self.free.lock() {
            free.buffers.push_back(buf);
        }
    }

    /// Queue a completed buffer for sending.
    pub fn release_to_ready(&self, buf: Vec<u8>) {
        if let Ok(mut ready) = self.ready.lock() {
            ready.push_back(buf);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_free_allocates_up_to_limit() {
        let pool = BufferPool::new(3);
        let a = pool.acquire_free();
        let b = pool.acquire_free();
        let c = pool.acquire_free();
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(pool.allocated(), 3);

        // Every buffer is out, cap reached
        assert!(pool.acquire_free().is_none());
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn test_release_to_free_makes_buffer_reusable() {
        let pool = BufferPool::new(1);
        let mut buf = pool.acquire_free().unwrap();
        buf.extend_from_slice(&[1, 2, 3]);
        assert!(pool.acquire_free().is_none());

        pool.release_to_free(buf);
        let again = pool.acquire_free().unwrap();
        assert!(again.is_empty());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_ready_set_is_fifo() {
        let pool = BufferPool::new(4);
        for tag in 1..=3u8 {
            let mut buf = pool.acquire_free().unwrap();
            buf.push(tag);
            pool.release_to_ready(buf);
        }

        assert_eq!(pool.acquire_ready(), Some(vec![1]));
        assert_eq!(pool.acquire_ready(), Some(vec![2]));
        assert_eq!(pool.acquire_ready(), Some(vec![3]));
        assert_eq!(pool.acquire_ready(), None);
    }

    #[test]
    fn test_ready_buffers_still_count_against_limit() {
        let pool = BufferPool::new(2);
        pool.release_to_ready(pool.acquire_free().unwrap());
        pool.release_to_ready(pool.acquire_free().unwrap());
        assert!(pool.acquire_free().is_none());

        let sent = pool.acquire_ready().unwrap();
        pool.release_to_free(sent);
        assert!(pool.acquire_free().is_some());
    }

    #[test]
    fn test_concurrent_handoff_preserves_order_and_limit() {
        let pool = Arc::new(BufferPool::new(4));
        let (tx, rx) = std::sync::mpsc::sync_channel::<()>(4);

        let consumer_pool = pool.clone();
        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for () in rx {
                let buf = consumer_pool.acquire_ready().unwrap();
                seen.push(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
                consumer_pool.release_to_free(buf);
            }
            seen
        });

        for n in 0..500u32 {
            let mut buf = loop {
                match pool.acquire_free() {
                    Some(b) => break b,
                    None => std::thread::yield_now(),
                }
            };
            buf.extend_from_slice(&n.to_le_bytes());
            pool.release_to_ready(buf);
            tx.send(()).unwrap();
            assert!(pool.allocated() <= 4);
        }
        drop(tx);

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..500).collect::<Vec<_>>());
    }
}
