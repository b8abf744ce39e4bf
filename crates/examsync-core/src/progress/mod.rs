//! Per-exam progress persistence.
//!
//! An in-progress exam is saved as a [`ProgressRecord`] under its
//! [`ExamKey`](crate::models::ExamKey) so it can be resumed after a restart.
//! Records are replaced whole on every save. A record that fails
//! validation, or is older than a day, should not be offered for resume;
//! nothing is purged automatically.

pub mod record;
pub mod store;

pub use record::{Answer, ProgressDefect, ProgressRecord, SessionState, RESUME_WINDOW_HOURS};
pub use store::ProgressStore;
