use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExamTable;
use crate::models::ExamKey;

/// Result of the most recent completed attempt at an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub grade: u32,
    pub total: u32,
    #[serde(rename = "recordedAtIso")]
    pub recorded_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.grade) * 100.0 / f64::from(self.total)
        }
    }
}

/// Last score per exam. A new score replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreBook(ExamTable<ScoreRecord>);

impl ScoreBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(&self, key: &ExamKey, record: ScoreRecord) -> Self {
        Self(self.0.with_updated(key, |_| Some(record)))
    }

    pub fn get(&self, key: &ExamKey) -> Option<&ScoreRecord> {
        self.0.get(key)
    }
}
