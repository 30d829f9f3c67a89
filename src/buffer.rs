//! Per-stream bounded frame buffer.
//!
//! Slot accounting uses two semaphores: `free_slots` (room left) and `used_slots`
//! (frames ready). Producers and consumers each pass through their own exclusion
//! gate, so one capture loop and one processing loop run concurrently, while
//! `clear` only proceeds when it can take both gates without waiting.
//!
//! Lock order: gate, then queue, then semaphore state. No semaphore wait happens
//! while the queue lock is held.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use crate::frame::Frame;
use crate::semaphore::{Interrupted, Semaphore};

/// Fixed-capacity blocking FIFO of frames for one stream.
pub struct BoundedFrameBuffer<T = Frame> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    free_slots: Semaphore,
    used_slots: Semaphore,
    add_gate: Mutex<()>,
    get_gate: Mutex<()>,
}

impl<T> BoundedFrameBuffer<T> {
    /// Create a buffer holding at most `capacity` frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configuration validation rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame buffer capacity must be at least 1");
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            free_slots: Semaphore::new(capacity),
            used_slots: Semaphore::new(0),
            add_gate: Mutex::new(()),
            get_gate: Mutex::new(()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame.
    ///
    /// With `overwrite_if_full == false` this blocks until a slot is free. With
    /// `overwrite_if_full == true` it never blocks: on a full buffer the oldest
    /// unread frame is evicted and returned.
    ///
    /// A blocked call returns `Err(Interrupted)` after `wake_all`; the frame is dropped.
    pub fn add(&self, frame: T, overwrite_if_full: bool) -> Result<Option<T>, Interrupted> {
        let _gate = lock_gate(&self.add_gate);

        if overwrite_if_full {
            // Take the free slot under the queue lock: `get` returns its slot under the
            // same lock, so "no free slot" implies the queue holds `capacity` frames.
            let mut queue = self.queue();
            let evicted = if self.free_slots.try_acquire() {
                self.used_slots.release();
                None
            } else {
                queue.pop_front()
            };
            queue.push_back(frame);
            return Ok(evicted);
        }

        self.free_slots.acquire()?;
        self.queue().push_back(frame);
        self.used_slots.release();
        Ok(None)
    }

    /// Remove and return the oldest frame, blocking while the buffer is empty.
    ///
    /// A blocked call returns `Err(Interrupted)` after `wake_all`.
    pub fn get(&self) -> Result<T, Interrupted> {
        let _gate = lock_gate(&self.get_gate);
        self.used_slots.acquire()?;
        Ok(self.take_front())
    }

    /// Remove the oldest frame if one is ready and no other `get` is in flight.
    ///
    /// Used during shutdown to free one slot for a producer blocked on a full buffer.
    pub fn try_get(&self) -> Option<T> {
        let _gate = try_lock_gate(&self.get_gate)?;
        if !self.used_slots.try_acquire() {
            return None;
        }
        Some(self.take_front())
    }

    fn take_front(&self) -> T {
        let mut queue = self.queue();
        let frame = queue
            .pop_front()
            .expect("frame buffer used-slot count out of sync with queue");
        self.free_slots.release();
        frame
    }

    /// Drop every buffered frame and restore full capacity.
    ///
    /// Returns `false` without waiting if an `add` or `get` is in progress (including
    /// one blocked on its semaphore), and `false` if the buffer is already empty.
    pub fn clear(&self) -> bool {
        let Some(_add_gate) = try_lock_gate(&self.add_gate) else {
            return false;
        };
        let Some(_get_gate) = try_lock_gate(&self.get_gate) else {
            return false;
        };

        let mut queue = self.queue();
        if queue.is_empty() {
            return false;
        }
        queue.clear();
        // Both gates are held, so nothing else touches the slot counters right now.
        self.used_slots.reset(0);
        self.free_slots.reset(self.capacity);
        true
    }

    /// Interrupt any `add` or `get` currently blocked on this buffer.
    pub fn wake_all(&self) {
        self.free_slots.wake_all();
        self.used_slots.wake_all();
    }

    pub fn size(&self) -> usize {
        self.queue().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> std::fmt::Debug for BoundedFrameBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedFrameBuffer")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

fn lock_gate(gate: &Mutex<()>) -> MutexGuard<'_, ()> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

fn try_lock_gate(gate: &Mutex<()>) -> Option<MutexGuard<'_, ()>> {
    match gate.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn drain(buf: &BoundedFrameBuffer<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(v) = buf.try_get() {
            out.push(v);
        }
        out
    }

    #[test]
    fn returns_frames_in_fifo_order() {
        let buf = BoundedFrameBuffer::new(4);
        for i in 1..=4 {
            assert_eq!(buf.add(i, false), Ok(None));
        }
        assert!(buf.is_full());
        assert_eq!(buf.size(), 4);
        for i in 1..=4 {
            assert_eq!(buf.get(), Ok(i));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn overwrite_mode_evicts_oldest() {
        let buf = BoundedFrameBuffer::new(3);
        for i in 1..=3 {
            buf.add(i, true).unwrap();
        }
        assert_eq!(buf.add(4, true), Ok(Some(1)));
        assert_eq!(buf.size(), 3);
        assert_eq!(drain(&buf), vec![2, 3, 4]);
    }

    #[test]
    fn overwrite_mode_below_capacity_keeps_everything() {
        let buf = BoundedFrameBuffer::new(3);
        assert_eq!(buf.add(1, true), Ok(None));
        assert_eq!(buf.add(2, true), Ok(None));
        assert_eq!(drain(&buf), vec![1, 2]);
    }

    #[test]
    fn clear_on_empty_buffer_reports_false() {
        let buf: BoundedFrameBuffer<u32> = BoundedFrameBuffer::new(2);
        assert!(!buf.clear());
    }

    #[test]
    fn clear_restores_capacity() {
        let buf = BoundedFrameBuffer::new(2);
        buf.add(1, false).unwrap();
        buf.add(2, false).unwrap();
        assert!(buf.clear());
        assert!(buf.is_empty());

        // Full capacity is available again without blocking.
        assert!(buf.free_slots.available() == 2);
        assert!(buf.used_slots.available() == 0);
        buf.add(3, false).unwrap();
        buf.add(4, false).unwrap();
        assert_eq!(drain(&buf), vec![3, 4]);
    }

    #[test]
    fn clear_fails_while_get_is_blocked() {
        let buf: Arc<BoundedFrameBuffer<u32>> = Arc::new(BoundedFrameBuffer::new(2));
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let buf = buf.clone();
            thread::spawn(move || tx.send(buf.get()).unwrap())
        };
        thread::sleep(Duration::from_millis(100));

        // The consumer holds the get gate while parked.
        assert!(!buf.clear());

        buf.add(9, false).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(9));
        consumer.join().unwrap();
    }

    #[test]
    fn wake_all_interrupts_blocked_get() {
        let buf: Arc<BoundedFrameBuffer<u32>> = Arc::new(BoundedFrameBuffer::new(1));
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let buf = buf.clone();
            thread::spawn(move || tx.send(buf.get()).unwrap())
        };
        thread::sleep(Duration::from_millis(100));
        buf.wake_all();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(Interrupted)
        );
        consumer.join().unwrap();

        // Buffer is still usable afterwards.
        buf.add(1, false).unwrap();
        assert_eq!(buf.get(), Ok(1));
    }

    #[test]
    fn try_get_on_empty_returns_none() {
        let buf: BoundedFrameBuffer<u32> = BoundedFrameBuffer::new(1);
        assert_eq!(buf.try_get(), None);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_rejected() {
        let _ = BoundedFrameBuffer::<u32>::new(0);
    }
}
