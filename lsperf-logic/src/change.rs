//! Change Aggregation
//!
//! Folds per-metric significance into one verdict per comparison, and
//! per-comparison verdicts into one verdict per run.

use crate::compare::ComparedMetric;
use crate::significance::Significance;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Direction of a change, as a two-bit set
///
/// `SAME` is the empty set; `MIXED` is `WORSE | BETTER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverallChange(u8);

impl OverallChange {
    /// Nothing notable
    pub const SAME: OverallChange = OverallChange(0);
    /// At least one regression
    pub const WORSE: OverallChange = OverallChange(0b01);
    /// At least one improvement
    pub const BETTER: OverallChange = OverallChange(0b10);
    /// Regressions and improvements
    pub const MIXED: OverallChange = OverallChange(0b11);

    /// Contains a regression
    pub fn is_worse(self) -> bool {
        self.0 & Self::WORSE.0 != 0
    }

    /// Contains an improvement
    pub fn is_better(self) -> bool {
        self.0 & Self::BETTER.0 != 0
    }

    /// Label used in reports
    pub fn label(self) -> &'static str {
        match self {
            Self::WORSE => "worse",
            Self::BETTER => "better",
            Self::MIXED => "mixed",
            _ => "same",
        }
    }
}

impl BitOr for OverallChange {
    type Output = OverallChange;

    fn bitor(self, rhs: OverallChange) -> OverallChange {
        OverallChange(self.0 | rhs.0)
    }
}

impl BitOrAssign for OverallChange {
    fn bitor_assign(&mut self, rhs: OverallChange) {
        self.0 |= rhs.0;
    }
}

impl From<Significance> for OverallChange {
    fn from(significance: Significance) -> Self {
        match significance {
            Significance::Warning | Significance::Alert => OverallChange::WORSE,
            Significance::Awesome => OverallChange::BETTER,
        }
    }
}

impl std::fmt::Display for OverallChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Verdict for one before/after comparison
pub fn overall_change_for_single_comparison(metrics: &[ComparedMetric]) -> OverallChange {
    metrics
        .iter()
        .filter_map(|m| m.significance)
        .fold(OverallChange::SAME, |acc, s| acc | OverallChange::from(s))
}

/// Verdict across comparisons; `None` when there was nothing to compare.
pub fn overall_change_for_comparisons(changes: &[OverallChange]) -> Option<OverallChange> {
    changes.iter().copied().reduce(|a, b| a | b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::metric;

    fn compared(significance: Option<Significance>) -> ComparedMetric {
        ComparedMetric {
            metric: metric("Type count").unwrap(),
            before: Some(1.0),
            after: Some(1.0),
            percent_diff: Some(0.0),
            significance,
        }
    }

    const ALL: [OverallChange; 4] = [
        OverallChange::SAME,
        OverallChange::WORSE,
        OverallChange::BETTER,
        OverallChange::MIXED,
    ];

    #[test]
    fn test_single_comparison() {
        assert_eq!(overall_change_for_single_comparison(&[]), OverallChange::SAME);
        assert_eq!(
            overall_change_for_single_comparison(&[compared(None)]),
            OverallChange::SAME
        );
        assert_eq!(
            overall_change_for_single_comparison(&[
                compared(None),
                compared(Some(Significance::Warning)),
            ]),
            OverallChange::WORSE
        );
        assert_eq!(
            overall_change_for_single_comparison(&[compared(Some(Significance::Awesome))]),
            OverallChange::BETTER
        );
        assert_eq!(
            overall_change_for_single_comparison(&[
                compared(Some(Significance::Alert)),
                compared(Some(Significance::Awesome)),
            ]),
            OverallChange::MIXED
        );
    }

    #[test]
    fn test_no_comparisons_is_no_verdict() {
        assert_eq!(overall_change_for_comparisons(&[]), None);
        assert_eq!(
            overall_change_for_comparisons(&[OverallChange::SAME]),
            Some(OverallChange::SAME)
        );
        assert_eq!(
            overall_change_for_comparisons(&[OverallChange::WORSE, OverallChange::BETTER]),
            Some(OverallChange::MIXED)
        );
    }

    #[test]
    fn test_aggregation_is_associative_and_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a | b, b | a);
                for c in ALL {
                    assert_eq!((a | b) | c, a | (b | c));
                    assert_eq!(
                        overall_change_for_comparisons(&[a, b, c]),
                        overall_change_for_comparisons(&[c, a, b])
                    );
                }
            }
        }
    }

    #[test]
    fn test_mixed_absorbs() {
        for change in ALL {
            assert_eq!(change | OverallChange::MIXED, OverallChange::MIXED);
            assert_eq!(change | OverallChange::SAME, change);
        }
        assert!(OverallChange::MIXED.is_worse() && OverallChange::MIXED.is_better());
        assert!(!OverallChange::SAME.is_worse() && !OverallChange::SAME.is_better());
    }

    #[test]
    fn test_labels() {
        let labels: Vec<String> = ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(labels, vec!["same", "worse", "better", "mixed"]);
    }
}
