use std::sync::atomic::{AtomicUsize, Ordering};

use super::Waiter;

/// An optimistic read/write lock built on a single version word.
///
/// Readers take a [`ReadLease`] (a snapshot of the version), perform
/// their reads and then [`validate`](OptimisticReadWriteLock::validate)
/// the lease: if the version is unchanged and no writer is active, the
/// read observed a consistent snapshot. A reader holding a valid lease
/// may attempt to upgrade to a writer; losing the upgrade race means
/// another writer won and the read must restart.
///
/// An odd version marks an active writer.
pub struct OptimisticReadWriteLock {
    version: AtomicUsize,
}

/// The version snapshot handed to a reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLease(usize);

impl Default for OptimisticReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticReadWriteLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: AtomicUsize::new(0),
        }
    }

    /// Starts a read operation, spinning past any active writer.
    pub fn start_read(&self) -> ReadLease {
        let mut waiter = Waiter::new();
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version % 2 == 0 {
                return ReadLease(version);
            }
            waiter.relax();
        }
    }

    /// Returns true when the read covered by the lease observed a
    /// consistent snapshot.
    #[must_use]
    pub fn validate(&self, lease: ReadLease) -> bool {
        self.version.load(Ordering::Acquire) == lease.0
    }

    /// Attempts to turn a read lease into write access. Failure means
    /// another writer interfered and the caller must restart its read.
    pub fn try_upgrade_to_write(&self, lease: ReadLease) -> bool {
        self.version
            .compare_exchange(lease.0, lease.0 + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquires write access, spinning until no other writer is active.
    pub fn start_write(&self) {
        let mut waiter = Waiter::new();
        loop {
            let lease = self.start_read();
            if self.try_upgrade_to_write(lease) {
                return;
            }
            waiter.relax();
        }
    }

    /// Ends a write operation, publishing the new version.
    pub fn end_write(&self) {
        let version = self.version.fetch_add(1, Ordering::Release);
        assert!(version % 2 == 1, "end_write without an active writer");
    }
}

#[cfg(test)]
mod test_rwlock {
    use super::*;

    #[test]
    fn read_only() {
        let lock = OptimisticReadWriteLock::new();

        // simulate a successful read operation
        for _ in 0..10_000 {
            let lease = lock.start_read();
            assert!(lock.validate(lease));
        }
    }

    #[test]
    fn read_write() {
        let lock = OptimisticReadWriteLock::new();

        // a read upgraded to a write, repeatedly
        for _ in 0..10_000 {
            let lease = lock.start_read();
            assert!(lock.try_upgrade_to_write(lease));
            lock.end_write();
        }
    }

    #[test]
    fn read_write_interleaving() {
        let lock = OptimisticReadWriteLock::new();

        let lease_a = lock.start_read();
        let lease_b = lock.start_read();

        // only one of the two readers may win the upgrade
        assert!(lock.try_upgrade_to_write(lease_a));
        assert!(!lock.try_upgrade_to_write(lease_b));

        lock.end_write();

        // the interfered read must restart before upgrading
        assert!(!lock.validate(lease_b));
        let lease_b = lock.start_read();

        assert!(lock.try_upgrade_to_write(lease_b));
        lock.end_write();
    }
}
