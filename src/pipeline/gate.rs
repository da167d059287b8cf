//! Pass / retry / exhausted decision over a [`QualityScore`].

use crate::pipeline::quality::QualityScore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal or transitional state reached after one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Passed,
    Retrying,
    Exhausted,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateState::Passed => "PASSED",
            GateState::Retrying => "RETRYING",
            GateState::Exhausted => "EXHAUSTED",
        })
    }
}

/// Outcome of one gate evaluation.
///
/// `should_retry` implies `!passed && retry_count < max_retries`, and
/// `passed` implies `!should_retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub should_retry: bool,
    pub retry_count: u32,
    pub retries_exhausted: bool,
}

impl GateDecision {
    pub fn state(&self) -> GateState {
        if self.passed {
            GateState::Passed
        } else if self.should_retry {
            GateState::Retrying
        } else {
            GateState::Exhausted
        }
    }
}

/// Threshold plus retry budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub threshold: f64,
    pub max_retries: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            max_retries: 2,
        }
    }
}

impl QualityGate {
    pub fn new(threshold: f64, max_retries: u32) -> Self {
        Self {
            threshold,
            max_retries,
        }
    }

    /// Evaluate a score reached after `retry_count` retries. A score equal
    /// to the threshold passes.
    pub fn evaluate(&self, score: &QualityScore, retry_count: u32) -> GateDecision {
        let passed = score.overall >= self.threshold;
        GateDecision {
            passed,
            should_retry: !passed && retry_count < self.max_retries,
            retry_count,
            retries_exhausted: retry_count >= self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_example_passes() {
        let gate = QualityGate::default();
        let d = gate.evaluate(&QualityScore::from_parts(0.9, 0.95, 0.9), 0);
        assert!(d.passed);
        assert!(!d.should_retry);
        assert_eq!(d.state(), GateState::Passed);
    }

    #[test]
    fn exact_threshold_passes() {
        let gate = QualityGate::new(0.5, 2);
        let score = QualityScore {
            completeness: 0.5,
            structure: 0.5,
            confidence: 0.5,
            overall: 0.5,
        };
        assert!(gate.evaluate(&score, 0).passed);
    }

    #[test]
    fn failing_score_retries_until_budget() {
        let gate = QualityGate::default();
        let low = QualityScore::zero();
        assert_eq!(gate.evaluate(&low, 0).state(), GateState::Retrying);
        assert_eq!(gate.evaluate(&low, 1).state(), GateState::Retrying);
        let last = gate.evaluate(&low, 2);
        assert_eq!(last.state(), GateState::Exhausted);
        assert!(last.retries_exhausted);
        assert!(!last.should_retry);
    }

    #[test]
    fn zero_budget_exhausts_immediately() {
        let gate = QualityGate::new(0.85, 0);
        assert_eq!(gate.evaluate(&QualityScore::zero(), 0).state(), GateState::Exhausted);
    }

    #[test]
    fn decision_invariants_hold() {
        let gate = QualityGate::default();
        for overall in [0.0, 0.5, 0.849, 0.85, 0.99] {
            for retry in 0..4 {
                let score = QualityScore {
                    completeness: 0.0,
                    structure: 0.0,
                    confidence: 0.0,
                    overall,
                };
                let d = gate.evaluate(&score, retry);
                if d.should_retry {
                    assert!(!d.passed && d.retry_count < gate.max_retries);
                }
                if d.passed {
                    assert!(!d.should_retry);
                }
                assert_eq!(d, gate.evaluate(&score, retry));
            }
        }
    }
}
