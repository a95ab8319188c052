//! Estimated-speedup classification and composition.
//!
//! Every actionable finding carries an improvement estimate. A **local**
//! estimate only speaks about the part of the kernel the rule observed. A
//! **global** estimate is scaled against a ceiling that an ancestor rule
//! established for the whole kernel, which is how fine-grained findings add
//! up to one end-to-end estimate without double counting.
//!
//! How a local observation combines with a ceiling depends on the rule:
//!
//! - [`Combinator::Min`]: the local issue is capped by the parent's envelope,
//!   `min(local, ceiling)`.
//! - [`Combinator::Product`]: the global impact is the local rate scaled by
//!   the parent's share, `local * ceiling`.
//!
//! Both are monotonic in each argument and stay within `[0, 100]` percent for
//! inputs in `[0, 1]`. Inputs outside that range are clamped; a NaN is passed
//! through untouched since it signals a defect in the rule itself.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scope of an improvement estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedupType {
    /// Bounded only by the rule's own observation.
    Local,
    /// Normalized against an ancestor's ceiling for the whole kernel.
    Global,
}

impl fmt::Display for SpeedupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedupType::Local => write!(f, "local"),
            SpeedupType::Global => write!(f, "global"),
        }
    }
}

/// How a local fraction combines with a parent-supplied ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Combinator {
    Min,
    Product,
}

impl Combinator {
    /// Combine two fractions in `[0, 1]` into a global fraction.
    pub fn combine(self, local: f64, ceiling: f64) -> f64 {
        let local = clamp_fraction(local);
        let ceiling = clamp_fraction(ceiling);
        match self {
            Combinator::Min => local.min(ceiling),
            Combinator::Product => local * ceiling,
        }
    }
}

/// A classified improvement estimate in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speedup {
    kind: SpeedupType,
    percent: f64,
}

impl Speedup {
    /// Local estimate from the fraction of the rule's own scope that is
    /// recoverable.
    pub fn local(fraction: f64) -> Self {
        Speedup {
            kind: SpeedupType::Local,
            percent: clamp_fraction(fraction) * 100.0,
        }
    }

    /// Local estimate that is additionally capped by an upper bound derived
    /// from parent context, when one is known.
    pub fn local_capped(fraction: f64, cap: Option<f64>) -> Self {
        match cap {
            Some(cap) => Self::local(clamp_fraction(fraction).min(clamp_fraction(cap))),
            None => Self::local(fraction),
        }
    }

    /// Global estimate for a rule that can state the kernel-wide fraction
    /// directly (e.g. a tail effect that idles the whole device).
    pub fn global(fraction: f64) -> Self {
        Speedup {
            kind: SpeedupType::Global,
            percent: clamp_fraction(fraction) * 100.0,
        }
    }

    /// Global estimate when an ancestor established a `ceiling`, local
    /// otherwise.
    ///
    /// ```
    /// use kerneldiag::{Combinator, Speedup, SpeedupType};
    ///
    /// let with_parent = Speedup::compose(0.4, Some(0.3), Combinator::Min);
    /// assert_eq!(with_parent.kind(), SpeedupType::Global);
    /// assert!((with_parent.percent() - 30.0).abs() < 1e-9);
    ///
    /// let without_parent = Speedup::compose(0.4, None, Combinator::Min);
    /// assert_eq!(without_parent.kind(), SpeedupType::Local);
    /// ```
    pub fn compose(local: f64, ceiling: Option<f64>, combinator: Combinator) -> Self {
        match ceiling {
            Some(ceiling) => Self::global(combinator.combine(local, ceiling)),
            None => Self::local(local),
        }
    }

    pub fn kind(&self) -> SpeedupType {
        self.kind
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// The estimate as a fraction in `[0, 1]`, suitable for forwarding to
    /// child rules as a weight.
    pub fn fraction(&self) -> f64 {
        self.percent / 100.0
    }
}

impl fmt::Display for Speedup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}% ({})", self.percent, self.kind)
    }
}

/// Clamp to `[0, 1]`, leaving NaN untouched.
pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        value
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `part / whole`, or `0.0` when `whole` is not positive.
pub fn ratio_or_zero(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_local() {
        let s = Speedup::local(0.2);
        assert_eq!(s.kind(), SpeedupType::Local);
        assert_abs_diff_eq!(s.percent(), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_local_is_bounded() {
        assert_abs_diff_eq!(Speedup::local(1.7).percent(), 100.0);
        assert_abs_diff_eq!(Speedup::local(-0.3).percent(), 0.0);
    }

    #[test]
    fn test_local_capped() {
        let s = Speedup::local_capped(0.7, Some(0.25));
        assert_eq!(s.kind(), SpeedupType::Local);
        assert_abs_diff_eq!(s.percent(), 25.0, epsilon = 1e-9);
        assert_abs_diff_eq!(Speedup::local_capped(0.7, None).percent(), 70.0, epsilon = 1e-9);
    }

    #[test]
    fn test_compose_min_and_product() {
        let min = Speedup::compose(0.4, Some(0.3), Combinator::Min);
        assert_eq!(min.kind(), SpeedupType::Global);
        assert_abs_diff_eq!(min.percent(), 30.0, epsilon = 1e-9);

        let product = Speedup::compose(0.4, Some(0.5), Combinator::Product);
        assert_abs_diff_eq!(product.percent(), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nan_passes_through() {
        assert!(Speedup::local(f64::NAN).percent().is_nan());
    }

    #[test]
    fn test_ratio_or_zero() {
        assert_eq!(ratio_or_zero(3.0, 0.0), 0.0);
        assert_abs_diff_eq!(ratio_or_zero(1.0, 4.0), 0.25);
    }
}
