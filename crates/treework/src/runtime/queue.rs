use std::fmt;

use thiserror::Error;

use crate::synca::SpinLock;

/// Error returned when pushing onto a full [`BoundedWorkQueue`],
/// handing the rejected item back to the caller.
#[derive(Debug, Error)]
#[error("bounded work queue is full")]
pub struct QueueFull<T: fmt::Debug>(pub T);

impl<T: fmt::Debug> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

struct Ring<T> {
    // one unused slot distinguishes full from empty
    buffer: Box<[Option<T>]>,
    front: usize,
    back: usize,
}

impl<T> Ring<T> {
    fn slots(&self) -> usize {
        self.buffer.len()
    }

    fn is_empty(&self) -> bool {
        self.front == self.back
    }

    fn is_full(&self) -> bool {
        (self.back + 1) % self.slots() == self.front
    }

    fn len(&self) -> usize {
        if self.back >= self.front {
            self.back - self.front
        } else {
            self.slots() - (self.front - self.back)
        }
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.buffer[self.front].take();
        self.front = (self.front + 1) % self.slots();
        item
    }

    fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.back = (self.back + self.slots() - 1) % self.slots();
        self.buffer[self.back].take()
    }
}

/// The bounded deque holding a worker's ready tasks.
///
/// A single spinlock protects the ring; the owning worker pushes and
/// pops at the back while thieves take the oldest (and thus coarsest)
/// work from the front. `try_pop_front` refuses instead of spinning
/// when the lock is contended, so a thief never waits on a busy victim.
pub struct BoundedWorkQueue<T> {
    ring: SpinLock<Ring<T>>,
    capacity: usize,
}

impl<T> BoundedWorkQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue needs a non-zero capacity");
        let mut buffer = Vec::with_capacity(capacity + 1);
        buffer.resize_with(capacity + 1, || None);
        Self {
            ring: SpinLock::new(Ring {
                buffer: buffer.into_boxed_slice(),
                front: 0,
                back: 0,
            }),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    /// Pushes an item at the front, failing when the queue is full.
    pub fn push_front(&self, item: T) -> Result<(), QueueFull<T>>
    where
        T: fmt::Debug,
    {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return Err(QueueFull(item));
        }
        let slots = ring.slots();
        ring.front = (ring.front + slots - 1) % slots;
        let front = ring.front;
        ring.buffer[front] = Some(item);
        Ok(())
    }

    /// Pushes an item at the back, failing when the queue is full.
    pub fn push_back(&self, item: T) -> Result<(), QueueFull<T>>
    where
        T: fmt::Debug,
    {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return Err(QueueFull(item));
        }
        let back = ring.back;
        ring.buffer[back] = Some(item);
        ring.back = (back + 1) % ring.slots();
        Ok(())
    }

    pub fn pop_front(&self) -> Option<T> {
        self.ring.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.ring.lock().pop_back()
    }

    /// Non-blocking front pop: refuses when the lock is contended.
    pub fn try_pop_front(&self) -> Option<T> {
        self.ring.try_lock()?.pop_front()
    }

    /// Non-blocking back pop: refuses when the lock is contended.
    pub fn try_pop_back(&self) -> Option<T> {
        self.ring.try_lock()?.pop_back()
    }
}

impl<T> fmt::Debug for BoundedWorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        write!(
            f,
            "BoundedWorkQueue[{}/{}, {} - {}]",
            ring.len(),
            self.capacity,
            ring.front,
            ring.back
        )
    }
}

#[cfg(test)]
mod test_queue {
    use super::*;

    #[test]
    fn basic() {
        let queue: BoundedWorkQueue<i32> = BoundedWorkQueue::new(3);

        assert!(queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(0, queue.len());

        assert!(queue.push_front(12).is_ok());
        assert!(!queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(1, queue.len());

        assert_eq!(Some(12), queue.pop_front());
        assert!(queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(0, queue.len());

        assert!(queue.push_front(12).is_ok());
        assert!(!queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(1, queue.len());

        assert_eq!(Some(12), queue.pop_back());
    }

    #[test]
    fn size() {
        let queue: BoundedWorkQueue<i32> = BoundedWorkQueue::new(3);

        assert_eq!(0, queue.len());
        queue.push_front(1).unwrap();
        assert_eq!(1, queue.len());
        queue.push_front(1).unwrap();
        assert_eq!(2, queue.len());
        queue.push_front(1).unwrap();
        assert_eq!(3, queue.len());

        for _ in 0..10 {
            queue.pop_front();
            assert_eq!(2, queue.len());
            queue.pop_front();
            assert_eq!(1, queue.len());

            queue.push_front(1).unwrap();
            assert_eq!(2, queue.len());
            queue.push_front(1).unwrap();
            assert_eq!(3, queue.len());
        }
    }

    #[test]
    fn order() {
        let queue: BoundedWorkQueue<i32> = BoundedWorkQueue::new(3);

        // fill the queue in the front
        assert!(!queue.is_full());
        assert!(queue.push_front(1).is_ok());
        assert!(!queue.is_full());
        assert!(queue.push_front(2).is_ok());
        assert!(!queue.is_full());
        assert!(queue.push_front(3).is_ok());
        assert!(queue.is_full());
        assert!(queue.push_front(4).is_err());
        assert!(queue.is_full());

        // pop in the back
        assert_eq!(Some(1), queue.pop_back());
        assert_eq!(Some(2), queue.pop_back());
        assert_eq!(Some(3), queue.pop_back());
        assert!(queue.is_empty());

        // fill the queue in the front again
        assert!(queue.push_front(1).is_ok());
        assert!(queue.push_front(2).is_ok());
        assert!(queue.push_front(3).is_ok());
        assert!(queue.push_front(4).is_err());

        // pop in the front
        assert_eq!(Some(3), queue.pop_front());
        assert_eq!(Some(2), queue.pop_front());
        assert_eq!(Some(1), queue.pop_front());
        assert!(queue.is_empty());

        // fill the queue in the back
        assert!(queue.push_back(1).is_ok());
        assert!(queue.push_back(2).is_ok());
        assert!(queue.push_back(3).is_ok());
        assert!(queue.push_back(4).is_err());

        // pop in the front
        assert_eq!(Some(1), queue.pop_front());
        assert_eq!(Some(2), queue.pop_front());
        assert_eq!(Some(3), queue.pop_front());
        assert!(queue.is_empty());

        // fill the queue in the back again
        assert!(queue.push_back(1).is_ok());
        assert!(queue.push_back(2).is_ok());
        assert!(queue.push_back(3).is_ok());
        assert!(queue.push_back(4).is_err());

        // pop in the back
        assert_eq!(Some(3), queue.pop_back());
        assert_eq!(Some(2), queue.pop_back());
        assert_eq!(Some(1), queue.pop_back());
        assert!(queue.is_empty());
    }

    #[test]
    fn rejected_items_come_back() {
        let queue: BoundedWorkQueue<String> = BoundedWorkQueue::new(1);
        queue.push_back("kept".to_string()).unwrap();
        let rejected = queue.push_back("bounced".to_string()).unwrap_err();
        assert_eq!("bounced", rejected.into_inner());
    }
}
