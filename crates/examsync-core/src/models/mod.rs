//! Data models for exam content.
//!
//! - `Question`, `OptionKey`: a single multiple-choice question
//! - `ExamKey`, `ExamInstance`: coordinates of one exam
//! - `DataStructure`: the nested domain → subtype → instance → questions tree

pub mod dataset;
pub mod exam;
pub mod question;

pub use dataset::DataStructure;
pub use exam::{ExamInstance, ExamKey};
pub use question::{OptionKey, Question, QuestionError};
