//! Answer counters.
//!
//! Per-template tallies of accepted answers for the current run of scenes,
//! feeding the rejection-sampling gates. Counters are seeded with the
//! template's answer domain so unseen answers count as zero.

use std::collections::BTreeMap;

use questgen_model::{Metadata, OutputType, Template};
use tracing::debug;

use crate::config::CounterConfig;
use crate::error::EngineError;
use crate::evaluator::Answer;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerCounters {
    seed: Vec<Answer>,
    counts: BTreeMap<Answer, u64>,
}

impl AnswerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters seeded with `answers`, all at zero.
    pub fn with_answers(answers: impl IntoIterator<Item = Answer>) -> Self {
        let seed: Vec<Answer> = answers.into_iter().collect();
        let counts = seed.iter().cloned().map(|a| (a, 0)).collect();
        Self { seed, counts }
    }

    /// Seed from an output type:
    ///
    /// - boolean: `true`, `false`
    /// - integer: `0..integer_answers`
    /// - attribute-typed: the attribute's value domain
    /// - object-typed: nothing; answers are registered as they appear
    pub fn for_output(
        output: &OutputType,
        metadata: &Metadata,
        config: &CounterConfig,
    ) -> Result<Self, EngineError> {
        let counters = match output {
            OutputType::Bool => Self::with_answers([Answer::Bool(true), Answer::Bool(false)]),
            OutputType::Integer => Self::with_answers((0..config.integer_answers).map(Answer::Integer)),
            OutputType::Attribute(attribute) => Self::with_answers(
                metadata
                    .values(attribute)?
                    .iter()
                    .cloned()
                    .map(Answer::Text),
            ),
            OutputType::Object | OutputType::ObjectSet => Self::new(),
        };
        Ok(counters)
    }

    /// Seed from the output type of the template's final operation.
    pub fn for_template(
        template: &Template,
        metadata: &Metadata,
        config: &CounterConfig,
    ) -> Result<Self, EngineError> {
        let op = template.final_op();
        match metadata.output_type(&op) {
            Some(output) => Self::for_output(&output, metadata, config),
            None => {
                debug!(op = %op, "final operation has no declared output type; counting lazily");
                Ok(Self::new())
            }
        }
    }

    pub fn count(&self, answer: &Answer) -> u64 {
        self.counts.get(answer).copied().unwrap_or(0)
    }

    /// Make `answer` known with a zero count if it is not yet.
    pub fn register(&mut self, answer: &Answer) {
        self.counts.entry(answer.clone()).or_insert(0);
    }

    pub fn record(&mut self, answer: &Answer) {
        *self.counts.entry(answer.clone()).or_insert(0) += 1;
    }

    /// Back to the seeded answers, all at zero.
    pub fn reset(&mut self) {
        self.counts = self.seed.iter().cloned().map(|a| (a, 0)).collect();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Answer, u64)> {
        self.counts.iter().map(|(a, &c)| (a, c))
    }

    /// All counts, ascending.
    pub fn sorted_counts(&self) -> Vec<u64> {
        let mut counts: Vec<u64> = self.counts.values().copied().collect();
        counts.sort_unstable();
        counts
    }

    /// Counts of every answer other than `answer`, ascending.
    pub fn peer_counts(&self, answer: &Answer) -> Vec<u64> {
        let mut counts: Vec<u64> = self
            .counts
            .iter()
            .filter(|(a, _)| *a != answer)
            .map(|(_, &c)| c)
            .collect();
        counts.sort_unstable();
        counts
    }
}

/// Answer counters and usage counts for a set of templates.
#[derive(Debug, Clone)]
pub struct CounterBook<K> {
    usage: BTreeMap<K, u64>,
    answers: BTreeMap<K, AnswerCounters>,
}

impl<K> Default for CounterBook<K> {
    fn default() -> Self {
        Self {
            usage: BTreeMap::new(),
            answers: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> CounterBook<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: K, counters: AnswerCounters) {
        self.usage.insert(key.clone(), 0);
        self.answers.insert(key, counters);
    }

    pub fn answers(&self, key: &K) -> Option<&AnswerCounters> {
        self.answers.get(key)
    }

    pub fn answers_mut(&mut self, key: &K) -> Option<&mut AnswerCounters> {
        self.answers.get_mut(key)
    }

    pub fn usage(&self, key: &K) -> u64 {
        self.usage.get(key).copied().unwrap_or(0)
    }

    pub fn record_usage(&mut self, key: &K) {
        *self.usage.entry(key.clone()).or_insert(0) += 1;
    }

    /// Keys ordered by ascending usage, ties broken by key.
    pub fn keys_by_usage(&self) -> Vec<K> {
        let mut keys: Vec<(u64, &K)> = self.usage.iter().map(|(k, &n)| (n, k)).collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k.clone()).collect()
    }

    pub fn reset(&mut self) {
        self.usage.values_mut().for_each(|n| *n = 0);
        self.answers.values_mut().for_each(AnswerCounters::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seeds_follow_output_type() {
        let meta = Metadata::from_json_value(json!({
            "attributes": { "color": { "placeholder": "<C>", "values": ["red", "blue"] } }
        }))
        .expect("metadata");
        let config = CounterConfig::default();

        let ints = AnswerCounters::for_output(&OutputType::Integer, &meta, &config).expect("ints");
        assert_eq!(ints.len(), 10);
        assert_eq!(ints.count(&Answer::Integer(9)), 0);

        let colors =
            AnswerCounters::for_output(&OutputType::Attribute("color".into()), &meta, &config)
                .expect("colors");
        assert_eq!(colors.len(), 2);

        assert!(AnswerCounters::for_output(&OutputType::Attribute("size".into()), &meta, &config)
            .is_err());
        assert!(AnswerCounters::for_output(&OutputType::Object, &meta, &config)
            .expect("objects")
            .is_empty());
    }

    #[test]
    fn reset_drops_lazy_answers() {
        let mut counters = AnswerCounters::with_answers([Answer::Bool(true), Answer::Bool(false)]);
        counters.record(&Answer::Bool(true));
        counters.register(&Answer::Object(3));
        assert_eq!(counters.len(), 3);
        assert_eq!(counters.peer_counts(&Answer::Bool(false)), vec![0, 1]);

        counters.reset();
        assert_eq!(counters.len(), 2);
        assert_eq!(counters.count(&Answer::Bool(true)), 0);
    }

    #[test]
    fn book_orders_keys_by_usage() {
        let mut book = CounterBook::new();
        book.insert(("a.json", 0), AnswerCounters::new());
        book.insert(("a.json", 1), AnswerCounters::new());
        book.insert(("b.json", 0), AnswerCounters::new());
        book.record_usage(&("a.json", 0));

        assert_eq!(
            book.keys_by_usage(),
            vec![("a.json", 1), ("b.json", 0), ("a.json", 0)]
        );
        book.reset();
        assert_eq!(book.usage(&("a.json", 0)), 0);
    }
}
