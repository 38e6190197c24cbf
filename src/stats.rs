use std::fmt;

use crate::labels::Match;

/// Per image summary of an anchor labelling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl MatchStats {
    pub fn from_labels(labels: &[Match]) -> Self {
        labels
            .iter()
            .fold(MatchStats::default(), |mut stats, label| {
                match label {
                    Match::Positive => stats.positive += 1,
                    Match::Negative => stats.negative += 1,
                    Match::Neutral => stats.neutral += 1,
                }
                stats
            })
    }

    /// Number of anchors that take part in the loss.
    pub fn sampled(&self) -> usize {
        self.positive + self.negative
    }

    pub fn total(&self) -> usize {
        self.sampled() + self.neutral
    }
}

impl fmt::Display for MatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P:{:<6}N:{:<6}Z:{:<6}A:{}",
            self.positive,
            self.negative,
            self.neutral,
            self.total()
        )
    }
}
