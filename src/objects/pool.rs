// Opportunistic buffer pools
// Frequently allocated backing storage (array vectors, frame stacks and
// local tables) is recycled through per-type free-lists. Pool access is
// strictly try_lock: contention falls through to plain allocation or
// deallocation, so pooling never blocks an interpreter thread.

use parking_lot::Mutex;

pub struct BufferPool<T> {
    entries: Mutex<Vec<T>>,
    max_entries: usize,
}

impl<T> BufferPool<T> {
    pub const fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    /// Takes a recycled buffer if the pool lock is free and the pool is
    /// non-empty.
    pub fn acquire(&self) -> Option<T> {
        self.entries.try_lock()?.pop()
    }

    /// Returns a buffer to the pool. The buffer must already be cleared;
    /// it is dropped when the lock is contended or the pool is full.
    pub fn release(&self, buffer: T) {
        if let Some(mut entries) = self.entries.try_lock() {
            if entries.len() < self.max_entries {
                entries.push(buffer);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_are_reused() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        assert!(pool.acquire().is_none());

        let mut buffer = Vec::with_capacity(32);
        buffer.push(1);
        buffer.clear();
        pool.release(buffer);
        assert_eq!(pool.len(), 1);

        let recycled = pool.acquire().expect("pool should hand the buffer back");
        assert!(recycled.is_empty());
        assert!(recycled.capacity() >= 32);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn full_pool_drops_excess_buffers() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(2);
        pool.release(Vec::new());
        pool.release(Vec::new());
        pool.release(Vec::new());
        assert_eq!(pool.len(), 2);
    }
}
