use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ExamTable;
use crate::models::ExamKey;

/// Bookmarked question indices per exam. Stored as sorted arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkLedger(ExamTable<BTreeSet<usize>>);

impl BookmarkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_added(&self, key: &ExamKey, index: usize) -> Self {
        Self(self.0.with_updated(key, |marks| {
            let mut marks = marks.cloned().unwrap_or_default();
            marks.insert(index);
            Some(marks)
        }))
    }

    pub fn with_removed(&self, key: &ExamKey, index: usize) -> Self {
        Self(self.0.with_updated(key, |marks| {
            let mut marks = marks.cloned()?;
            marks.remove(&index);
            (!marks.is_empty()).then_some(marks)
        }))
    }

    pub fn with_toggled(&self, key: &ExamKey, index: usize) -> Self {
        if self.contains(key, index) {
            self.with_removed(key, index)
        } else {
            self.with_added(key, index)
        }
    }

    pub fn contains(&self, key: &ExamKey, index: usize) -> bool {
        self.0.get(key).is_some_and(|marks| marks.contains(&index))
    }

    pub fn indices(&self, key: &ExamKey) -> Vec<usize> {
        self.0
            .get(key)
            .map(|marks| marks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count_all(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}
