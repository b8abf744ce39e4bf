//! Bundled baseline dataset.
//!
//! The baseline ships inside the binary and is the last resort when neither
//! the remote source nor the cache can answer. It is parsed once, on first
//! use, and never changes afterwards.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::models::DataStructure;

const BASELINE_JSON: &str = include_str!("../data/baseline.json");

static BASELINE: OnceLock<Arc<DataStructure>> = OnceLock::new();

fn parse_baseline() -> DataStructure {
    match serde_json::from_str::<DataStructure>(BASELINE_JSON) {
        Ok(data) => {
            debug!(
                exams = data.exam_count(),
                questions = data.question_count(),
                "Loaded bundled baseline"
            );
            data
        }
        Err(e) => {
            warn!(error = %e, "Bundled baseline is unreadable, using an empty dataset");
            DataStructure::default()
        }
    }
}

/// The shared, immutable baseline.
pub fn baseline() -> Arc<DataStructure> {
    BASELINE.get_or_init(|| Arc::new(parse_baseline())).clone()
}
