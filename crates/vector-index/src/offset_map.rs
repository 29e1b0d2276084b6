//! Bidirectional document id <-> engine offset bookkeeping with tombstones.
//!
//! Offsets mirror the physical append order of the ANN engine: offset `n` is
//! the `n`-th vector ever appended. They are never reused. Deleting a document
//! only flips the tombstone bit of its offset; the engine keeps the vector
//! until the next rebuild.

use crate::error::{IndexError, Result};
use std::collections::{HashMap, HashSet};
use std::ops::Range;

#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    doc_ids: Vec<String>,
    offsets: HashMap<String, usize>,
    tombstones: Vec<bool>,
    tombstoned: usize,
}

impl OffsetMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `document_id` to the next offset.
    ///
    /// A document whose previous offset is tombstoned may be bound again; it
    /// moves to the new offset and the old one stays dead.
    pub fn assign(&mut self, document_id: &str) -> Result<usize> {
        self.ensure_assignable(document_id)?;
        Ok(self.push(document_id))
    }

    /// Checks that `document_ids` could be bound starting at `expected_start`.
    pub fn check_batch<S: AsRef<str>>(
        &self,
        document_ids: &[S],
        expected_start: usize,
    ) -> Result<()> {
        if expected_start != self.total_assigned() {
            return Err(IndexError::Engine(format!(
                "offset map holds {} offsets but the engine appended at {expected_start}",
                self.total_assigned()
            )));
        }

        let mut seen = HashSet::with_capacity(document_ids.len());
        for id in document_ids {
            let id = id.as_ref();
            if !seen.insert(id) {
                return Err(IndexError::DuplicateOffset(id.to_string()));
            }
            self.ensure_assignable(id)?;
        }
        Ok(())
    }

    /// Binds a whole engine append at once.
    ///
    /// `expected_start` must be the engine size before the append. Every id is
    /// checked before anything is recorded, so a failed call leaves the map
    /// untouched.
    pub fn assign_batch<S: AsRef<str>>(
        &mut self,
        document_ids: &[S],
        expected_start: usize,
    ) -> Result<Range<usize>> {
        self.check_batch(document_ids, expected_start)?;
        for id in document_ids {
            self.push(id.as_ref());
        }
        Ok(expected_start..self.total_assigned())
    }

    /// Marks the live offset of `document_id` as deleted.
    ///
    /// Returns `false` when the id is unknown or already tombstoned.
    pub fn tombstone(&mut self, document_id: &str) -> bool {
        let Some(&offset) = self.offsets.get(document_id) else {
            return false;
        };
        match self.tombstones.get_mut(offset) {
            Some(dead) if !*dead => {
                *dead = true;
                self.tombstoned += 1;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_live(&self, offset: usize) -> bool {
        self.tombstones.get(offset).is_some_and(|dead| !dead)
    }

    #[must_use]
    pub fn is_live_id(&self, document_id: &str) -> bool {
        self.offset_of(document_id)
            .is_some_and(|offset| self.is_live(offset))
    }

    #[must_use]
    pub fn offset_of(&self, document_id: &str) -> Option<usize> {
        self.offsets.get(document_id).copied()
    }

    #[must_use]
    pub fn document_id(&self, offset: usize) -> Option<&str> {
        self.doc_ids.get(offset).map(String::as_str)
    }

    #[must_use]
    pub fn total_assigned(&self) -> usize {
        self.doc_ids.len()
    }

    #[must_use]
    pub const fn tombstoned_count(&self) -> usize {
        self.tombstoned
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.total_assigned() - self.tombstoned
    }

    fn ensure_assignable(&self, document_id: &str) -> Result<()> {
        if self.is_live_id(document_id) {
            return Err(IndexError::DuplicateOffset(document_id.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, document_id: &str) -> usize {
        let offset = self.doc_ids.len();
        self.doc_ids.push(document_id.to_string());
        self.tombstones.push(false);
        self.offsets.insert(document_id.to_string(), offset);
        offset
    }
}
