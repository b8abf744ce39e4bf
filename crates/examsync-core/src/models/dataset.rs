use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExamInstance, ExamKey, Question};

type Instances = BTreeMap<String, Vec<Question>>;
type Subtypes = BTreeMap<String, Instances>;

/// The full exam dataset: `domain → subtype → instance → questions`.
///
/// Serialized transparently as the nested object the remote source and the
/// bundled baseline both use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStructure(BTreeMap<String, Subtypes>);

impl DataStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|subtypes| {
            subtypes
                .values()
                .all(|instances| instances.values().all(Vec::is_empty))
        })
    }

    /// Insert (or replace) the questions of one concrete exam.
    pub fn insert(&mut self, key: &ExamKey, questions: Vec<Question>) {
        self.0
            .entry(key.domain.clone())
            .or_default()
            .entry(key.subtype.clone())
            .or_default()
            .insert(key.instance.to_string(), questions);
    }

    /// Questions of a concrete exam. Randomized instances have no stored
    /// questions and always return `None`.
    pub fn questions(&self, key: &ExamKey) -> Option<&[Question]> {
        if key.is_random() {
            return None;
        }
        self.0
            .get(&key.domain)?
            .get(&key.subtype)?
            .get(&key.instance.to_string())
            .map(Vec::as_slice)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn subtypes(&self, domain: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(domain)
            .into_iter()
            .flat_map(|subtypes| subtypes.keys().map(String::as_str))
    }

    /// Every concrete exam in the dataset. Instance ids that aren't
    /// ordinals are skipped.
    pub fn exam_keys(&self) -> Vec<ExamKey> {
        let mut keys = Vec::new();
        for (domain, subtypes) in &self.0 {
            for (subtype, instances) in subtypes {
                for instance in instances.keys() {
                    match instance.parse::<ExamInstance>() {
                        Ok(parsed @ ExamInstance::Ordinal(_)) => {
                            keys.push(ExamKey::new(domain.clone(), subtype.clone(), parsed));
                        }
                        _ => debug!(domain = %domain, subtype = %subtype, instance = %instance, "Skipping non-ordinal instance"),
                    }
                }
            }
        }
        keys
    }

    pub fn exam_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|subtypes| subtypes.values())
            .map(|instances| instances.len())
            .sum()
    }

    pub fn question_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|subtypes| subtypes.values())
            .flat_map(|instances| instances.values())
            .map(Vec::len)
            .sum()
    }

    /// Draw a randomized exam of up to `count` questions from every
    /// instance of `domain/subtype`.
    ///
    /// The result is what a `"random"` session embeds in its progress
    /// record, since it cannot be re-derived later.
    pub fn random_exam<R: Rng + ?Sized>(
        &self,
        domain: &str,
        subtype: &str,
        count: usize,
        rng: &mut R,
    ) -> Vec<Question> {
        let pool: Vec<&Question> = self
            .0
            .get(domain)
            .and_then(|subtypes| subtypes.get(subtype))
            .map(|instances| instances.values().flatten().collect())
            .unwrap_or_default();

        pool.choose_multiple(rng, count)
            .map(|q| (*q).clone())
            .collect()
    }
}
