use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fewest options a question may offer.
pub const MIN_OPTIONS: usize = 2;

/// Most options a question may offer.
pub const MAX_OPTIONS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuestionError {
    #[error("question {id} has {count} options, expected 2..=4")]
    OptionCount { id: i64, count: usize },

    #[error("question {id} has option D without option C")]
    OptionGap { id: i64 },

    #[error("question {id} marks option {key} correct but only has {count} options")]
    CorrectKeyOutOfRange { id: i64, key: OptionKey, count: usize },
}

/// Answer slot of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionKey {
    #[serde(rename = "a", alias = "A")]
    A,
    #[serde(rename = "b", alias = "B")]
    B,
    #[serde(rename = "c", alias = "C")]
    C,
    #[serde(rename = "d", alias = "D")]
    D,
}

impl OptionKey {
    pub const ALL: [OptionKey; MAX_OPTIONS] = [OptionKey::A, OptionKey::B, OptionKey::C, OptionKey::D];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptionKey::A => "a",
            OptionKey::B => "b",
            OptionKey::C => "c",
            OptionKey::D => "d",
        };
        f.write_str(s)
    }
}

/// A multiple-choice question with two to four options.
///
/// On the wire a question is a flat object with `optionA`..`optionD`, where
/// the last two are optional. Payloads that don't form a contiguous list of
/// options, or whose correct key points past the last option, are rejected
/// during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionWire", into = "QuestionWire")]
pub struct Question {
    pub id: i64,
    pub text: String,
    options: Vec<String>,
    correct: OptionKey,
}

impl Question {
    pub fn new(
        id: i64,
        text: impl Into<String>,
        options: Vec<String>,
        correct: OptionKey,
    ) -> Result<Self, QuestionError> {
        let count = options.len();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&count) {
            return Err(QuestionError::OptionCount { id, count });
        }
        if correct.index() >= count {
            return Err(QuestionError::CorrectKeyOutOfRange { id, key: correct, count });
        }
        Ok(Self {
            id,
            text: text.into(),
            options,
            correct,
        })
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn option(&self, key: OptionKey) -> Option<&str> {
        self.options.get(key.index()).map(String::as_str)
    }

    /// Option keys this question actually offers, in order.
    pub fn keys(&self) -> impl Iterator<Item = OptionKey> + '_ {
        OptionKey::ALL.iter().copied().take(self.options.len())
    }

    pub fn correct(&self) -> OptionKey {
        self.correct
    }

    pub fn is_correct(&self, key: OptionKey) -> bool {
        key == self.correct
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionWire {
    id: i64,
    text: String,
    option_a: String,
    option_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    option_c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    option_d: Option<String>,
    correct_option_key: OptionKey,
}

/// Blank optional options are stored as empty strings by some writers.
fn non_blank(option: Option<String>) -> Option<String> {
    option.filter(|s| !s.trim().is_empty())
}

impl TryFrom<QuestionWire> for Question {
    type Error = QuestionError;

    fn try_from(wire: QuestionWire) -> Result<Self, Self::Error> {
        let mut options = vec![wire.option_a, wire.option_b];
        match (non_blank(wire.option_c), non_blank(wire.option_d)) {
            (Some(c), Some(d)) => {
                options.push(c);
                options.push(d);
            }
            (Some(c), None) => options.push(c),
            (None, Some(_)) => return Err(QuestionError::OptionGap { id: wire.id }),
            (None, None) => {}
        }
        Question::new(wire.id, wire.text, options, wire.correct_option_key)
    }
}

impl From<Question> for QuestionWire {
    fn from(q: Question) -> Self {
        let mut options = q.options.into_iter();
        QuestionWire {
            id: q.id,
            text: q.text,
            option_a: options.next().unwrap_or_default(),
            option_b: options.next().unwrap_or_default(),
            option_c: options.next(),
            option_d: options.next(),
            correct_option_key: q.correct,
        }
    }
}
