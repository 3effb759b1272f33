//! Bounded stack of temporary value substitutions.
//!
//! A test patches a location (typically a function pointer or a global used
//! as a seam) with [`PatchStack::set`]; the runner calls
//! [`PatchStack::undo_all`] after every test, restoring prior values in
//! reverse order.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr;

use tracing::debug;

/// Number of patches a test may hold at once unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 50;

/// Returned by [`PatchStack::set`] when no slot is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFull;

struct PatchEntry {
    location: usize,
    restore: Box<dyn FnOnce()>,
}

/// Fixed-capacity LIFO of {location, prior value} entries.
pub struct PatchStack {
    entries: Vec<PatchEntry>,
    capacity: usize,
}

impl PatchStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget all entries without restoring them.
    pub fn init(&mut self) {
        self.entries.clear();
    }

    /// Write `value` to `location`, remembering the value it replaces.
    ///
    /// When the stack is full nothing is written and `value` is dropped.
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `T` from this call
    /// until the entry is restored by [`undo_all`](Self::undo_all) or
    /// discarded by [`init`](Self::init), and nothing else may hold a
    /// reference to it while the stack does.
    pub unsafe fn set<T: 'static>(&mut self, location: *mut T, value: T) -> Result<(), StackFull> {
        if self.entries.len() >= self.capacity {
            return Err(StackFull);
        }
        // SAFETY: upheld by the caller.
        let prior = unsafe { ptr::replace(location, value) };
        let restore = move || {
            // SAFETY: the caller keeps `location` valid until restore runs.
            drop(unsafe { ptr::replace(location, prior) });
        };
        self.entries.push(PatchEntry {
            location: location as usize,
            restore: Box::new(restore),
        });
        Ok(())
    }

    /// Restore every patched location, most recent first.
    ///
    /// Returns how many entries were restored; a second call returns 0.
    pub fn undo_all(&mut self) -> usize {
        let restored = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            debug!(location = entry.location, "restoring patched location");
            (entry.restore)();
        }
        restored
    }
}

impl Default for PatchStack {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for PatchStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locations: Vec<usize> = self.entries.iter().map(|entry| entry.location).collect();
        f.debug_struct("PatchStack")
            .field("capacity", &self.capacity)
            .field("locations", &locations)
            .finish()
    }
}
