//! Rejection-sampling gates.
//!
//! A complete instantiation is only accepted if its answer is not already
//! running ahead of the others for this template:
//!
//! - leader gate: the count may not exceed `leader_ratio` times a reference
//!   peer count, picked `max(floor(leader_fraction * answers), min_leader_rank)`
//!   places from the top of the other answers' sorted counts;
//! - median gate: the count may not exceed `median_ratio` times the median of
//!   all counts, with the median floored at `median_floor`.

use std::fmt;

use crate::config::SamplingConfig;
use crate::counters::AnswerCounters;
use crate::evaluator::Answer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingVerdict {
    Accept,
    LeaderGap { count: u64, reference: u64 },
    MedianGap { count: u64, median: u64 },
}

impl SamplingVerdict {
    pub fn is_accept(self) -> bool {
        matches!(self, SamplingVerdict::Accept)
    }
}

impl fmt::Display for SamplingVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingVerdict::Accept => f.write_str("accepted"),
            SamplingVerdict::LeaderGap { count, reference } => {
                write!(f, "answer count {count} leads reference count {reference}")
            }
            SamplingVerdict::MedianGap { count, median } => {
                write!(f, "answer count {count} runs ahead of median {median}")
            }
        }
    }
}

pub fn check(counters: &AnswerCounters, answer: &Answer, config: &SamplingConfig) -> SamplingVerdict {
    let count = counters.count(answer);

    let peers = counters.peer_counts(answer);
    if !peers.is_empty() {
        let rank = ((config.leader_fraction * counters.len() as f64).floor() as usize)
            .max(config.min_leader_rank)
            .max(1);
        let reference = peers[peers.len().saturating_sub(rank)];
        if count as f64 > config.leader_ratio * reference as f64 {
            return SamplingVerdict::LeaderGap { count, reference };
        }
    }

    let all = counters.sorted_counts();
    if !all.is_empty() {
        let median = all[all.len() / 2].max(config.median_floor);
        if count as f64 > config.median_ratio * median as f64 {
            return SamplingVerdict::MedianGap { count, median };
        }
    }

    SamplingVerdict::Accept
}
