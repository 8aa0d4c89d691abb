use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{self, AtomicU64};

/// Allocator for process-wide root identifiers.
static NEXT_ROOT: AtomicU64 = AtomicU64::new(0);

/// An identifier of tasks. Each task is either a root task, created by
/// an initial spawn, or a child task created through the splitting of
/// its parent; the identifier traces this parent/child relationship as
/// a bit path below the root, one bit per split, `0` for the left and
/// `1` for the right child.
///
/// E.g. a parent task id `T-12.0.1` has the children `T-12.0.1.0` and
/// `T-12.0.1.1`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    root: u64,
    path: u64,
    length: u8,
}

impl TaskId {
    /// Creates the id of a new root task, drawing a fresh root number.
    pub fn fresh_root() -> Self {
        Self::new_root(NEXT_ROOT.fetch_add(1, atomic::Ordering::Relaxed))
    }

    #[must_use]
    pub fn new_root(root: u64) -> Self {
        Self {
            root,
            path: 0,
            length: 0,
        }
    }

    // -- observers --

    #[must_use]
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Depth below the root, i.e. the number of splits recorded in the
    /// path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.length as usize
    }

    // -- utility functions --

    #[must_use]
    pub fn is_parent_of(&self, child: &TaskId) -> bool {
        self.root == child.root
            && self.length < child.length
            && self.path == child.path >> (child.length - self.length)
    }

    #[must_use]
    pub fn left_child(&self) -> TaskId {
        assert!(
            (self.length as usize) < u64::BITS as usize,
            "task id path exhausted at depth {}",
            self.length
        );
        TaskId {
            root: self.root,
            path: self.path << 1,
            length: self.length + 1,
        }
    }

    #[must_use]
    pub fn right_child(&self) -> TaskId {
        let mut id = self.left_child();
        id.path += 1;
        id
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        // order by root first
        if self.root != other.root {
            return self.root.cmp(&other.root);
        }

        // compare the common prefix of both paths
        let min_len = self.length.min(other.length);
        let prefix_a = self.path >> (self.length - min_len);
        let prefix_b = other.path >> (other.length - min_len);

        if prefix_a == prefix_b {
            // one is a prefix of the other, the shorter comes first
            return self.length.cmp(&other.length);
        }

        prefix_a.cmp(&prefix_b)
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.root)?;
        for position in (0..self.length).rev() {
            write!(f, ".{}", (self.path >> position) & 1)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test_task_id {
    use super::*;

    #[test]
    fn child_derivation() {
        let root = TaskId::new_root(12);
        assert_eq!("T-12", root.to_string());

        let left = root.left_child();
        let right = root.right_child();
        assert_eq!("T-12.0", left.to_string());
        assert_eq!("T-12.1", right.to_string());

        assert_eq!("T-12.1.0", right.left_child().to_string());
        assert_eq!("T-12.1.1", right.right_child().to_string());

        assert_eq!(0, root.depth());
        assert_eq!(1, left.depth());
        assert_eq!(2, left.left_child().depth());
    }

    #[test]
    fn parent_relation() {
        let a = TaskId::new_root(7);
        let left = a.left_child();
        let right = a.right_child();

        assert!(a.is_parent_of(&left));
        assert!(a.is_parent_of(&right));
        assert!(a.is_parent_of(&left.right_child()));

        assert!(!a.is_parent_of(&a));
        assert!(!left.is_parent_of(&right));
        assert!(!left.is_parent_of(&a));

        // transitivity across two levels
        assert!(left.is_parent_of(&left.left_child().left_child()));

        // different roots are never related
        let b = TaskId::new_root(8);
        assert!(!a.is_parent_of(&b.left_child()));
    }

    #[test]
    fn ordering() {
        let root = TaskId::new_root(3);
        let left = root.left_child();
        let right = root.right_child();

        // parents come before their children, left before right
        assert!(root < left);
        assert!(root < right);
        assert!(left < right);
        assert!(left.right_child() < right);
        assert!(left < left.left_child());
        assert!(left.left_child() < left.right_child());

        // roots dominate the order
        assert!(right < TaskId::new_root(4));

        // strictness
        assert_eq!(root.cmp(&root), std::cmp::Ordering::Equal);
        assert!(!(left < left));
    }

    #[test]
    fn fresh_roots_are_distinct() {
        let a = TaskId::fresh_root();
        let b = TaskId::fresh_root();
        assert_ne!(a.root(), b.root());
        assert!(a < b || b < a);
    }
}
