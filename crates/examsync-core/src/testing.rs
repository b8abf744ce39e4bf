//! Shared test doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::RemoteSource;
use crate::models::{DataStructure, ExamInstance, ExamKey, OptionKey, Question};

pub(crate) fn question(id: i64) -> Question {
    Question::new(
        id,
        format!("Question {}", id),
        vec!["yes".into(), "no".into(), "maybe".into(), "never".into()],
        OptionKey::C,
    )
    .unwrap()
}

pub(crate) fn questions(count: usize) -> Vec<Question> {
    (1..=count as i64).map(question).collect()
}

/// A one-exam dataset, distinguishable from the bundled baseline.
pub(crate) fn remote_data() -> DataStructure {
    let mut data = DataStructure::new();
    data.insert(&ExamKey::new("remote", "live", ExamInstance::Ordinal(1)), questions(3));
    data
}

/// Remote source with a call counter, a failure switch and an optional gate
/// that holds every fetch until released.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
    pub gate: Option<Arc<Notify>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let source = Self::default();
        source.failing.store(true, Ordering::SeqCst);
        source
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn pass(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("server unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn fetch_structure(&self) -> Result<DataStructure> {
        self.pass().await?;
        Ok(remote_data())
    }

    async fn fetch_questions(&self, key: &ExamKey) -> Result<Vec<Question>> {
        self.pass().await?;
        match remote_data().questions(key) {
            Some(questions) => Ok(questions.to_vec()),
            None => bail!("no such exam: {}", key),
        }
    }
}

/// Let spawned tasks run to their next suspension point.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
