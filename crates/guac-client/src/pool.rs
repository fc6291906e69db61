//! Integer index pools backing layer, buffer, and stream allocation.
//!
//! A pool hands out increasing integers until its minimum pre-allocation is
//! exhausted, and only then begins reusing released indices. The buffer pool
//! keeps this minimum high so that a just-disposed buffer index is not
//! immediately handed back out, which would serialize draws against the
//! remote display's garbage collection of the old surface.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Minimum pre-allocation of the per-session buffer pool.
pub const BUFFER_POOL_INITIAL_SIZE: i32 = 1024;

pub struct IndexPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    next: i32,
    active: i32,
    min_size: i32,
    free: VecDeque<i32>,
}

impl IndexPool {
    pub fn new(min_size: i32) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                next: 0,
                active: 0,
                min_size,
                free: VecDeque::new(),
            }),
        }
    }

    /// Returns the next available index. Released indices are reused only
    /// once `min_size` distinct indices have been handed out.
    pub fn next(&self) -> i32 {
        let mut inner = self.inner.lock();
        inner.active += 1;
        if inner.next < inner.min_size {
            let value = inner.next;
            inner.next += 1;
            return value;
        }
        match inner.free.pop_front() {
            Some(value) => value,
            None => {
                let value = inner.next;
                inner.next += 1;
                value
            }
        }
    }

    /// Returns an index to the pool for eventual reuse.
    pub fn release(&self, value: i32) {
        let mut inner = self.inner.lock();
        inner.active -= 1;
        inner.free.push_back(value);
    }

    /// Number of indices currently handed out.
    pub fn active(&self) -> i32 {
        self.inner.lock().active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_indices_are_sequential() {
        let pool = IndexPool::new(0);
        assert_eq!(pool.next(), 0);
        assert_eq!(pool.next(), 1);
        assert_eq!(pool.next(), 2);
        assert_eq!(pool.active(), 3);
    }

    #[test]
    fn released_index_reused_when_min_size_zero() {
        let pool = IndexPool::new(0);
        let a = pool.next();
        pool.release(a);
        assert_eq!(pool.next(), a);
    }

    #[test]
    fn reuse_deferred_until_min_size_exceeded() {
        let pool = IndexPool::new(4);
        let first = pool.next();
        pool.release(first);
        // Pre-allocation not exhausted: fresh indices keep coming.
        assert_eq!(pool.next(), 1);
        assert_eq!(pool.next(), 2);
        assert_eq!(pool.next(), 3);
        // Now the released index may come back.
        assert_eq!(pool.next(), first);
    }
}
