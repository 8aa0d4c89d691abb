use std::fmt;

use crate::treeture::TaskReference;

/// The set of predecessors a task waits on before becoming ready.
#[derive(Default)]
pub struct Dependencies {
    list: Vec<TaskReference>,
}

impl Dependencies {
    /// The empty set: a task carrying it is immediately ready.
    #[must_use]
    pub fn none() -> Self {
        Self { list: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn add(&mut self, reference: TaskReference) {
        self.list.push(reference);
    }

    /// True once every predecessor has completed. Each predecessor is
    /// itself monotone, so this check is idempotent.
    pub(crate) fn all_done(&self) -> bool {
        self.list.iter().all(TaskReference::is_done)
    }

    pub(crate) fn clear(&mut self) {
        self.list.clear();
    }
}

impl FromIterator<TaskReference> for Dependencies {
    fn from_iter<I: IntoIterator<Item = TaskReference>>(iter: I) -> Self {
        Self {
            list: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list.iter()).finish()
    }
}

/// Builds a dependency set from predecessor references.
pub fn after<I>(references: I) -> Dependencies
where
    I: IntoIterator<Item = TaskReference>,
{
    references.into_iter().collect()
}
