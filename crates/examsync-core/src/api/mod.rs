//! Remote data source.
//!
//! The rest of the crate only sees the [`RemoteSource`] trait: a call that
//! either returns the nested question structure or fails. [`ApiClient`] is
//! the HTTP implementation.

pub mod client;
pub mod error;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DataStructure, ExamKey, Question};

pub use client::ApiClient;
pub use error::ApiError;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the whole dataset.
    async fn fetch_structure(&self) -> Result<DataStructure>;

    /// Fetch the questions of one concrete exam.
    async fn fetch_questions(&self, key: &ExamKey) -> Result<Vec<Question>>;
}
