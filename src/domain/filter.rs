//! Filter Engine
//!
//! Threshold profiles ("new", "graduated", "trending", ...) and the pure
//! function that judges a candidate against one. Evaluation stops at the
//! first failing constraint; unknown values always fail.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::candidate::{Candidate, Metric};

/// Reason reported for a candidate that passes every constraint
pub const PASSED: &str = "passed";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Profile '{profile}': {metric} threshold must be a finite non-negative number, got {value}")]
    InvalidThreshold {
        profile: String,
        metric: &'static str,
        value: f64,
    },

    #[error("Profile '{profile}': {metric} minimum {min} exceeds maximum {max}")]
    InvertedRange {
        profile: String,
        metric: &'static str,
        min: f64,
        max: f64,
    },

    #[error("Profile '{0}' has no constraints")]
    Empty(String),
}

/// Bound on a single metric. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Min(f64),
    Max(f64),
    Range { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    TooLow,
    TooHigh,
    Unknown,
}

impl Constraint {
    fn check(&self, value: Option<f64>) -> Result<(), Violation> {
        let value = match value {
            Some(v) if !v.is_nan() => v,
            _ => return Err(Violation::Unknown),
        };
        match *self {
            Constraint::Min(min) if value < min => Err(Violation::TooLow),
            Constraint::Max(max) if value > max => Err(Violation::TooHigh),
            Constraint::Range { min, .. } if value < min => Err(Violation::TooLow),
            Constraint::Range { max, .. } if value > max => Err(Violation::TooHigh),
            _ => Ok(()),
        }
    }

    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match *self {
            Constraint::Min(min) => (Some(min), None),
            Constraint::Max(max) => (None, Some(max)),
            Constraint::Range { min, max } => (Some(min), Some(max)),
        }
    }
}

/// Pass/fail result with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub passed: bool,
    pub reason: String,
}

impl FilterVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: PASSED.to_string(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }

    pub fn into_tuple(self) -> (bool, String) {
        (self.passed, self.reason)
    }
}

/// Named, immutable set of metric constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterProfile {
    name: String,
    /// Sorted in `Metric` evaluation order
    constraints: Vec<(Metric, Constraint)>,
}

impl FilterProfile {
    pub fn builder(name: impl Into<String>) -> FilterProfileBuilder {
        FilterProfileBuilder {
            name: name.into(),
            bounds: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constraints(&self) -> &[(Metric, Constraint)] {
        &self.constraints
    }

    pub fn constraint(&self, metric: Metric) -> Option<Constraint> {
        self.constraints
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, c)| *c)
    }

    /// True if the profile filters on the drop from the all-time high
    pub fn needs_price_history(&self) -> bool {
        self.constraint(Metric::PriceDipPct).is_some()
    }

    /// True if any constraint demands a strictly positive minimum
    pub fn has_positive_minimum(&self) -> bool {
        self.constraints
            .iter()
            .any(|(_, c)| matches!(c.bounds().0, Some(min) if min > 0.0))
    }
}

/// Collects bounds per metric; a min and a max on the same metric become a range
#[derive(Debug, Clone)]
pub struct FilterProfileBuilder {
    name: String,
    bounds: BTreeMap<Metric, (Option<f64>, Option<f64>)>,
}

impl FilterProfileBuilder {
    pub fn min(mut self, metric: Metric, value: f64) -> Self {
        self.bounds.entry(metric).or_default().0 = Some(value);
        self
    }

    pub fn max(mut self, metric: Metric, value: f64) -> Self {
        self.bounds.entry(metric).or_default().1 = Some(value);
        self
    }

    pub fn range(self, metric: Metric, min: f64, max: f64) -> Self {
        self.min(metric, min).max(metric, max)
    }

    /// Set an optional minimum; `None` leaves the metric untouched
    pub fn min_opt(self, metric: Metric, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.min(metric, v),
            None => self,
        }
    }

    pub fn max_opt(self, metric: Metric, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.max(metric, v),
            None => self,
        }
    }

    pub fn build(self) -> Result<FilterProfile, ProfileError> {
        let mut constraints = Vec::with_capacity(self.bounds.len());

        for (metric, (min, max)) in self.bounds {
            for value in [min, max].into_iter().flatten() {
                if !value.is_finite() || value < 0.0 {
                    return Err(ProfileError::InvalidThreshold {
                        profile: self.name.clone(),
                        metric: metric.label(),
                        value,
                    });
                }
            }

            let constraint = match (min, max) {
                (Some(min), Some(max)) if min > max => {
                    return Err(ProfileError::InvertedRange {
                        profile: self.name.clone(),
                        metric: metric.label(),
                        min,
                        max,
                    })
                }
                (Some(min), Some(max)) => Constraint::Range { min, max },
                (Some(min), None) => Constraint::Min(min),
                (None, Some(max)) => Constraint::Max(max),
                (None, None) => continue,
            };
            constraints.push((metric, constraint));
        }

        if constraints.is_empty() {
            return Err(ProfileError::Empty(self.name));
        }

        Ok(FilterProfile {
            name: self.name,
            constraints,
        })
    }
}

/// Judge a candidate against a profile
pub fn apply(candidate: &Candidate, profile: &FilterProfile) -> FilterVerdict {
    for (metric, constraint) in &profile.constraints {
        match constraint.check(candidate.metrics.get(*metric)) {
            Ok(()) => continue,
            Err(Violation::TooLow) => return FilterVerdict::fail(format!("{} too low", metric.label())),
            Err(Violation::TooHigh) => return FilterVerdict::fail(format!("{} too high", metric.label())),
            Err(Violation::Unknown) => return FilterVerdict::fail(format!("{} unknown", metric.label())),
        }
    }
    FilterVerdict::pass()
}
