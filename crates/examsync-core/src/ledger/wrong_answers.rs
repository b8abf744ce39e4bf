use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ExamTable;
use crate::models::ExamKey;

/// How many times each question of each exam was answered wrong.
///
/// Counts are always positive; a count that reaches zero is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrongAnswerLedger(ExamTable<BTreeMap<usize, u32>>);

impl WrongAnswerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_increment(&self, key: &ExamKey, index: usize) -> Self {
        Self(self.0.with_updated(key, |counts| {
            let mut counts = counts.cloned().unwrap_or_default();
            *counts.entry(index).or_insert(0) += 1;
            Some(counts)
        }))
    }

    pub fn with_decrement(&self, key: &ExamKey, index: usize) -> Self {
        Self(self.0.with_updated(key, |counts| {
            let mut counts = counts.cloned()?;
            match counts.get(&index).copied() {
                Some(n) if n > 1 => {
                    counts.insert(index, n - 1);
                }
                _ => {
                    counts.remove(&index);
                }
            }
            (!counts.is_empty()).then_some(counts)
        }))
    }

    pub fn with_removed(&self, key: &ExamKey, index: usize) -> Self {
        Self(self.0.with_updated(key, |counts| {
            let mut counts = counts.cloned()?;
            counts.remove(&index);
            (!counts.is_empty()).then_some(counts)
        }))
    }

    pub fn count_for(&self, key: &ExamKey, index: usize) -> u32 {
        self.0
            .get(key)
            .and_then(|counts| counts.get(&index))
            .copied()
            .unwrap_or(0)
    }

    /// Question indices of one exam with a positive count, ascending.
    pub fn indices(&self, key: &ExamKey) -> Vec<usize> {
        self.0
            .get(key)
            .map(|counts| counts.iter().filter(|(_, n)| **n > 0).map(|(i, _)| *i).collect())
            .unwrap_or_default()
    }

    /// Number of questions, across all exams, with a positive count.
    pub fn count_all_wrong_answers(&self) -> usize {
        self.0
            .values()
            .map(|counts| counts.values().filter(|n| **n > 0).count())
            .sum()
    }
}
