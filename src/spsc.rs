// src/spsc.rs
//! Single-producer single-consumer lock-free ring queue.
//!
//! Correctness relies on the SPSC constraint: exactly one thread pushes
//! and exactly one thread pops for the lifetime of the queue. The write
//! index is published with release ordering and observed with acquire
//! ordering on the read side, so a popped value is always fully written.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(align(64))]
struct Al64<T>(T);

pub struct SpscQueue<T> {
    buf: Vec<UnsafeCell<MaybeUninit<T>>>,
    mask: usize,
    head: Al64<AtomicUsize>, // producer-owned write index
    tail: Al64<AtomicUsize>, // consumer-owned read index
}

unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Fixed capacity, rounded up to the next power of two. Queues are
    /// sized to the worst case at construction and never grow.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(2);
        let mut v = Vec::with_capacity(cap);
        for _ in 0..cap {
            v.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            buf: v,
            mask: cap - 1,
            head: Al64(AtomicUsize::new(0)),
            tail: Al64(AtomicUsize::new(0)),
        }
    }

    /// Reserve-and-publish in one step. Returns the value back on a full
    /// queue; core data-plane callers treat that as fatal since capacity
    /// covers the worst case.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head.wrapping_sub(tail) > self.mask {
            return Err(value);
        }
        let idx = head & self.mask;
        unsafe {
            (*self.buf[idx].get()).write(value);
        }
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Peek-and-consume in one step; `None` when empty.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let idx = tail & self.mask;
        let v = unsafe { (*self.buf[idx].get()).assume_init_read() };
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(v)
    }

    /// Slot-count size as (write − read). Racy by nature; exact only from
    /// the producer or consumer thread.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        // Drain remaining initialized slots so T's destructor runs.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order_and_wraparound() {
        let q = SpscQueue::new(4);
        for round in 0u64..10 {
            for i in 0..4 {
                q.push(round * 4 + i).unwrap();
            }
            assert!(q.push(999).is_err(), "push past capacity must fail");
            for i in 0..4 {
                assert_eq!(q.pop(), Some(round * 4 + i));
            }
            assert_eq!(q.pop(), None);
        }
    }

    #[test]
    fn len_tracks_write_minus_read() {
        let q = SpscQueue::new(8);
        assert!(q.is_empty());
        q.push(1u32).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.len(), 2);
        q.pop();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn cross_thread_handoff() {
        const N: u64 = 100_000;
        let q = Arc::new(SpscQueue::new(1024));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                for i in 0..N {
                    let mut v = i;
                    loop {
                        match q.push(v) {
                            Ok(()) => break,
                            Err(back) => v = back,
                        }
                    }
                }
            })
        };
        let mut next = 0u64;
        while next < N {
            if let Some(v) = q.pop() {
                assert_eq!(v, next);
                next += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
    }
}
