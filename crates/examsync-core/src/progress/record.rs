use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{OptionKey, Question};

/// Records saved longer ago than this are not offered for resume.
pub const RESUME_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub selected_option: OptionKey,
    pub is_correct: bool,
}

impl Answer {
    pub fn for_question(question: &Question, selected: OptionKey) -> Self {
        Self {
            selected_option: selected,
            is_correct: question.is_correct(selected),
        }
    }
}

/// Live state of an exam session, as the exam view holds it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub current_index: usize,
    pub user_answers: Vec<Option<Answer>>,
    pub visited: BTreeSet<usize>,
    pub time_remaining_seconds: u32,
    pub revealed: Vec<bool>,
    /// Only for randomized sessions, which can't re-derive their questions.
    pub embedded_questions: Option<Vec<Question>>,
}

impl SessionState {
    /// A fresh session positioned on the first question.
    pub fn new(question_count: usize, time_limit_seconds: u32) -> Self {
        Self {
            current_index: 0,
            user_answers: vec![None; question_count],
            visited: BTreeSet::from([0]),
            time_remaining_seconds: time_limit_seconds,
            revealed: vec![false; question_count],
            embedded_questions: None,
        }
    }

    /// A fresh randomized session carrying its own questions.
    pub fn new_random(questions: Vec<Question>, time_limit_seconds: u32) -> Self {
        let mut state = Self::new(questions.len(), time_limit_seconds);
        state.embedded_questions = Some(questions);
        state
    }

    pub fn question_count(&self) -> usize {
        self.user_answers.len()
    }

    /// Move to `index` and mark it visited. Out-of-range moves are ignored.
    pub fn go_to(&mut self, index: usize) {
        if index < self.question_count() {
            self.current_index = index;
            self.visited.insert(index);
        }
    }

    pub fn answer(&mut self, index: usize, answer: Answer) {
        if let Some(slot) = self.user_answers.get_mut(index) {
            *slot = Some(answer);
        }
    }

    pub fn reveal(&mut self, index: usize) {
        if let Some(flag) = self.revealed.get_mut(index) {
            *flag = true;
        }
    }

    pub fn answered_count(&self) -> usize {
        self.user_answers.iter().filter(|a| a.is_some()).count()
    }
}

/// Why a stored record can't be resumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressDefect {
    #[error("exam has no questions")]
    NoQuestions,

    #[error("current index {index} outside 0..{count}")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("{found} answers for {expected} questions")]
    AnswerCount { found: usize, expected: usize },

    #[error("{found} reveal flags for {expected} questions")]
    RevealedCount { found: usize, expected: usize },

    #[error("randomized session without embedded questions")]
    MissingEmbeddedQuestions,

    #[error("{found} embedded questions for {expected} expected")]
    EmbeddedCount { found: usize, expected: usize },
}

/// Persisted snapshot of one exam session.
///
/// `visited` is stored as a sorted, de-duplicated array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub current_index: usize,
    pub user_answers: Vec<Option<Answer>>,
    pub visited: BTreeSet<usize>,
    pub time_remaining_seconds: u32,
    pub revealed: Vec<bool>,
    #[serde(rename = "savedAtIso")]
    pub saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_questions: Option<Vec<Question>>,
}

impl ProgressRecord {
    pub fn from_state(state: SessionState, saved_at: DateTime<Utc>) -> Self {
        Self {
            current_index: state.current_index,
            user_answers: state.user_answers,
            visited: state.visited,
            time_remaining_seconds: state.time_remaining_seconds,
            revealed: state.revealed,
            saved_at,
            embedded_questions: state.embedded_questions,
        }
    }

    pub fn into_state(self) -> SessionState {
        SessionState {
            current_index: self.current_index,
            user_answers: self.user_answers,
            visited: self.visited,
            time_remaining_seconds: self.time_remaining_seconds,
            revealed: self.revealed,
            embedded_questions: self.embedded_questions,
        }
    }

    /// Structural check against the exam this record claims to belong to.
    pub fn check(&self, expected_questions: usize, is_random: bool) -> Result<(), ProgressDefect> {
        if expected_questions == 0 {
            return Err(ProgressDefect::NoQuestions);
        }
        if self.current_index >= expected_questions {
            return Err(ProgressDefect::IndexOutOfRange {
                index: self.current_index,
                count: expected_questions,
            });
        }
        if self.user_answers.len() != expected_questions {
            return Err(ProgressDefect::AnswerCount {
                found: self.user_answers.len(),
                expected: expected_questions,
            });
        }
        if self.revealed.len() != expected_questions {
            return Err(ProgressDefect::RevealedCount {
                found: self.revealed.len(),
                expected: expected_questions,
            });
        }
        if is_random {
            match &self.embedded_questions {
                None => return Err(ProgressDefect::MissingEmbeddedQuestions),
                Some(questions) if questions.is_empty() => {
                    return Err(ProgressDefect::MissingEmbeddedQuestions)
                }
                Some(questions) if questions.len() != expected_questions => {
                    return Err(ProgressDefect::EmbeddedCount {
                        found: questions.len(),
                        expected: expected_questions,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self, expected_questions: usize, is_random: bool) -> bool {
        self.check(expected_questions, is_random).is_ok()
    }

    /// Saved less than `RESUME_WINDOW_HOURS` before `now`.
    pub fn is_recent_at(&self, now: DateTime<Utc>) -> bool {
        now - self.saved_at < Duration::hours(RESUME_WINDOW_HOURS)
    }
}
