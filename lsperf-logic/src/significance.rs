//! Significance Rules
//!
//! A rule is a base classifier wrapped by an ordered list of modifiers. The
//! modifiers fold over the base: `modifiers[0]` wraps the base rule,
//! `modifiers[1]` wraps that, and so on, so the last modifier runs first.

use lsperf_report::PackageBenchmarkSummary;
use serde::{Deserialize, Serialize};

/// How notable a change is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    /// Worse by more than the warning threshold
    Warning,
    /// Worse by more than the alert threshold
    Alert,
    /// Better by more than the awesome threshold
    Awesome,
}

/// What to do when a proportional rule's reference metric has no usable value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingReferencePolicy {
    /// Judge the raw percent difference as if there were no reference
    #[default]
    UseUnnormalized,
    /// Report no significance at all
    Suppress,
}

/// Thresholds shared by every rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    /// Percent-diff rules: regression above this is a warning
    pub warning_threshold: f64,
    /// Percent-diff rules: regression above this is an alert
    pub alert_threshold: f64,
    /// Percent-diff rules: improvement below this is awesome
    pub awesome_threshold: f64,
    /// Order-of-magnitude rules: ratio at or above this is a warning
    pub warning_multiple: f64,
    /// Order-of-magnitude rules: ratio at or above this is an alert
    pub alert_multiple: f64,
    /// Order-of-magnitude rules: ratio at or below this is awesome
    pub awesome_multiple: f64,
    /// Behavior when a proportional reference is missing
    pub missing_reference: MissingReferencePolicy,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.2,
            alert_threshold: 1.0,
            awesome_threshold: -0.2,
            warning_multiple: 5.0,
            alert_multiple: 10.0,
            awesome_multiple: 0.5,
            missing_reference: MissingReferencePolicy::UseUnnormalized,
        }
    }
}

impl SignificanceConfig {
    /// Check threshold ordering
    pub fn validate(&self) -> Result<(), String> {
        if !(self.awesome_threshold < 0.0
            && self.warning_threshold > 0.0
            && self.warning_threshold <= self.alert_threshold)
        {
            return Err(format!(
                "thresholds must satisfy awesome < 0 < warning <= alert (got {}, {}, {})",
                self.awesome_threshold, self.warning_threshold, self.alert_threshold
            ));
        }
        if !(0.0 < self.awesome_multiple
            && self.awesome_multiple < 1.0
            && 1.0 < self.warning_multiple
            && self.warning_multiple <= self.alert_multiple)
        {
            return Err(format!(
                "multiples must satisfy 0 < awesome < 1 < warning <= alert (got {}, {}, {})",
                self.awesome_multiple, self.warning_multiple, self.alert_multiple
            ));
        }
        Ok(())
    }
}

/// Extracts a metric value from a summary
pub type ValueExtractor = fn(&PackageBenchmarkSummary) -> Option<f64>;

/// `(after - before) / before`, undefined when `before` is zero.
pub fn percent_diff(before: f64, after: f64) -> Option<f64> {
    if before == 0.0 {
        None
    } else {
        Some((after - before) / before)
    }
}

/// Everything a rule may look at for one metric
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub percent_diff: f64,
    pub before_value: f64,
    pub after_value: f64,
    pub before: &'a PackageBenchmarkSummary,
    pub after: &'a PackageBenchmarkSummary,
}

/// Innermost classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseRule {
    /// Thresholds on the relative change
    PercentDiff,
    /// Thresholds on the after/before ratio
    OrderOfMagnitude,
    /// Informational metric, never significant
    Insignificant,
}

impl BaseRule {
    /// Classify a percent difference
    pub fn judge(self, percent_diff: f64, config: &SignificanceConfig) -> Option<Significance> {
        match self {
            BaseRule::PercentDiff => {
                if percent_diff > config.alert_threshold {
                    Some(Significance::Alert)
                } else if percent_diff > config.warning_threshold {
                    Some(Significance::Warning)
                } else if percent_diff < config.awesome_threshold {
                    Some(Significance::Awesome)
                } else {
                    None
                }
            }
            BaseRule::OrderOfMagnitude => {
                let ratio = 1.0 + percent_diff;
                if ratio >= config.alert_multiple {
                    Some(Significance::Alert)
                } else if ratio >= config.warning_multiple {
                    Some(Significance::Warning)
                } else if ratio <= config.awesome_multiple {
                    Some(Significance::Awesome)
                } else {
                    None
                }
            }
            BaseRule::Insignificant => None,
        }
    }
}

/// A stage wrapping the rule built so far
#[derive(Debug, Clone, Copy)]
pub enum Modifier {
    /// Nothing is significant while the after value is below `min`
    Floor { min: f64 },
    /// Judge the change relative to the change in a reference metric
    ProportionalTo {
        reference: ValueExtractor,
        reference_name: &'static str,
    },
}

impl Modifier {
    /// Apply this stage around `inner`
    pub fn apply(
        &self,
        observation: &Observation<'_>,
        config: &SignificanceConfig,
        inner: impl Fn(&Observation<'_>) -> Option<Significance>,
    ) -> Option<Significance> {
        match *self {
            Modifier::Floor { min } => {
                if observation.after_value < min {
                    None
                } else {
                    inner(observation)
                }
            }
            Modifier::ProportionalTo {
                reference,
                reference_name,
            } => {
                let reference_diff = reference(observation.before)
                    .zip(reference(observation.after))
                    .and_then(|(before, after)| percent_diff(before, after));

                let Some(reference_diff) = reference_diff else {
                    tracing::debug!(reference = reference_name, "reference metric unavailable");
                    return match config.missing_reference {
                        MissingReferencePolicy::UseUnnormalized => inner(observation),
                        MissingReferencePolicy::Suppress => None,
                    };
                };

                let adjusted = Observation {
                    percent_diff: observation.percent_diff - reference_diff,
                    ..*observation
                };
                match inner(&adjusted) {
                    // Normalizing may only confirm an improvement, never invent one
                    Some(Significance::Awesome)
                        if inner(observation) != Some(Significance::Awesome) =>
                    {
                        None
                    }
                    verdict => verdict,
                }
            }
        }
    }
}

/// A base rule plus its modifier stack
#[derive(Debug, Clone, Copy)]
pub struct SignificanceRule {
    pub base: BaseRule,
    pub modifiers: &'static [Modifier],
}

impl SignificanceRule {
    /// Rule without modifiers
    pub const fn plain(base: BaseRule) -> Self {
        Self {
            base,
            modifiers: &[],
        }
    }

    /// Rule with modifiers, applied in order
    pub const fn with(base: BaseRule, modifiers: &'static [Modifier]) -> Self {
        Self { base, modifiers }
    }

    /// Evaluate the full rule
    pub fn evaluate(
        &self,
        observation: &Observation<'_>,
        config: &SignificanceConfig,
    ) -> Option<Significance> {
        self.evaluate_stage(self.modifiers.len(), observation, config)
    }

    /// Evaluate the base wrapped by only the first `depth` modifiers
    pub fn evaluate_stage(
        &self,
        depth: usize,
        observation: &Observation<'_>,
        config: &SignificanceConfig,
    ) -> Option<Significance> {
        match depth.checked_sub(1).and_then(|i| self.modifiers.get(i)) {
            None => self.base.judge(observation.percent_diff, config),
            Some(modifier) => modifier.apply(observation, config, |o| {
                self.evaluate_stage(depth - 1, o, config)
            }),
        }
    }
}
