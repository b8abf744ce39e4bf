//! Per-exam ledgers: wrong-answer counts, bookmarks and last scores.
//!
//! Each ledger is an immutable value. Updates go through `with_*`
//! functions that return a new ledger and leave the original untouched;
//! [`LedgerStore`] handles reading and writing them.

pub mod bookmarks;
pub mod scores;
pub mod store;
pub mod wrong_answers;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ExamKey;

pub use bookmarks::BookmarkLedger;
pub use scores::{ScoreBook, ScoreRecord};
pub use store::LedgerStore;
pub use wrong_answers::WrongAnswerLedger;

/// `domain -> subtype -> instance -> V`, with empty levels pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExamTable<V>(BTreeMap<String, BTreeMap<String, BTreeMap<String, V>>>);

impl<V> Default for ExamTable<V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<V: Clone> ExamTable<V> {
    pub fn get(&self, key: &ExamKey) -> Option<&V> {
        self.0
            .get(&key.domain)?
            .get(&key.subtype)?
            .get(&key.instance.to_string())
    }

    /// Copy of the table with the slot for `key` replaced by `update`'s
    /// result. Returning `None` removes the slot.
    pub fn with_updated(&self, key: &ExamKey, update: impl FnOnce(Option<&V>) -> Option<V>) -> Self {
        let mut next = self.0.clone();
        let instance = key.instance.to_string();
        let replacement = update(self.get(key));

        let subtypes = next.entry(key.domain.clone()).or_default();
        let instances = subtypes.entry(key.subtype.clone()).or_default();
        match replacement {
            Some(value) => {
                instances.insert(instance, value);
            }
            None => {
                instances.remove(&instance);
            }
        }
        if instances.is_empty() {
            subtypes.remove(&key.subtype);
        }
        if subtypes.is_empty() {
            next.remove(&key.domain);
        }
        Self(next)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0
            .values()
            .flat_map(|subtypes| subtypes.values())
            .flat_map(|instances| instances.values())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
