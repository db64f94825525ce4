//! Anonymization progress estimate.
//!
//! Progress blends two ratios: how much of the denominated balance has been
//! mixed (weight 80) and how much of the target amount is fully anonymized
//! (weight 20). The blend is computed over exact integer fractions and
//! rounded half up.

use std::fmt;

use crate::config::MixingConfig;
use crate::interface::WalletSnapshot;
use crate::types::COIN;

const DENOMINATED_WEIGHT: u128 = 80;
const ANONYMIZED_WEIGHT: u128 = 20;

/// A ratio capped at one.
#[derive(Copy, Clone, Debug)]
struct Part {
    num: u128,
    den: u128,
}

impl Part {
    const ZERO: Part = Part {
        num: 0,
        den: 1,
    };
    const ONE: Part = Part {
        num: 1,
        den: 1,
    };

    fn capped(num: u64, den: u64) -> Part {
        if den == 0 {
            Part::ZERO
        } else if num >= den {
            Part::ONE
        } else {
            Part {
                num: num as u128,
                den: den as u128,
            }
        }
    }

    fn is_one(&self) -> bool {
        self.num == self.den
    }
}

/// Whether `p/q >= r/s`, compared by continued-fraction expansion so no
/// product of the operands is ever formed. `q` and `s` must be non-zero.
fn fraction_ge(p: u128, q: u128, r: u128, s: u128) -> bool {
    let (a, b) = (p / q, r / s);
    if a != b {
        return a > b;
    }
    let (p, r) = (p % q, r % s);
    if r == 0 {
        return true;
    }
    if p == 0 {
        return false;
    }
    // p/q >= r/s  <=>  s/r >= q/p
    fraction_ge(s, r, q, p)
}

/// Completion estimate in `0..=100`.
///
/// `target_rounds` does not enter the blend: the rounds requirement is
/// already folded into `anonymized`. Returns `None` when there is no target
/// to measure against (`target == 0`).
pub fn estimate(
    denominated: u64,
    normalized_anonymized: u64,
    anonymized: u64,
    target: u64,
    _target_rounds: u32,
) -> Option<u8> {
    if target == 0 {
        return None;
    }

    let denom_part = Part::capped(normalized_anonymized, denominated);
    let anon_part = Part::capped(anonymized, target);

    // Whole points and leftover fraction of each weighted part.
    let (b, d) = (denom_part.den, anon_part.den);
    let (q1, r1) = ((DENOMINATED_WEIGHT * denom_part.num) / b, (DENOMINATED_WEIGHT * denom_part.num) % b);
    let (q2, r2) = ((ANONYMIZED_WEIGHT * anon_part.num) / d, (ANONYMIZED_WEIGHT * anon_part.num) % d);

    // Round half up: r1/b + r2/d lies in [0, 2), so count the thresholds 1/2 and 3/2.
    let reaches = |k: u128| {
        let needed = k * d;
        let have = 2 * r2;
        needed <= have || fraction_ge(r1, b, needed - have, 2 * d)
    };
    let rounded = q1 + q2 + u128::from(reaches(1)) + u128::from(reaches(3));
    Some(rounded.min(100) as u8)
}

/// Progress as shown to the user, including the reasons no estimate exists.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressReport {
    /// The wallet holds nothing.
    NoInputs,
    /// Denominated coins are unconfirmed; progress is recalculated once they confirm.
    AwaitingConfirmation,
    /// Nothing to anonymize.
    NoTarget,
    Estimate {
        percent: u8,
        average_rounds: f64,
        target_rounds: u32,
    },
}

impl ProgressReport {
    /// Evaluate progress for a wallet snapshot.
    pub fn evaluate(snapshot: &WalletSnapshot, config: &MixingConfig) -> Self {
        if snapshot.balance == 0 {
            return ProgressReport::NoInputs;
        }
        if snapshot.unconfirmed_denominated > 0 {
            return ProgressReport::AwaitingConfirmation;
        }

        let mut target = config.anonymize_amount.saturating_mul(COIN).min(snapshot.balance);
        if target == 0 {
            return ProgressReport::NoTarget;
        }

        let denominated = snapshot.denominated;
        if denominated > 0
            && Part::capped(snapshot.normalized_anonymized, denominated).is_one()
            && target > denominated
        {
            target = denominated;
        }

        match estimate(
            denominated,
            snapshot.normalized_anonymized,
            snapshot.anonymized,
            target,
            config.rounds,
        ) {
            Some(percent) => ProgressReport::Estimate {
                percent,
                average_rounds: snapshot.average_rounds,
                target_rounds: config.rounds,
            },
            None => ProgressReport::NoTarget,
        }
    }

    /// The estimate, if one exists.
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressReport::Estimate {
                percent,
                ..
            } => Some(*percent),
            _ => None,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressReport::NoInputs => write!(f, "No inputs detected"),
            ProgressReport::AwaitingConfirmation => write!(
                f,
                "Found unconfirmed denominated outputs, will wait till they confirm to recalculate."
            ),
            ProgressReport::NoTarget => write!(f, "Nothing to anonymize"),
            ProgressReport::Estimate {
                percent,
                average_rounds,
                target_rounds,
            } => write!(
                f,
                "Progress: {}%, inputs have an average of {} of {} rounds",
                percent, average_rounds, target_rounds
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> WalletSnapshot {
        WalletSnapshot {
            balance: 10 * COIN,
            denominated: 10 * COIN,
            unconfirmed_denominated: 0,
            anonymized: 0,
            normalized_anonymized: 0,
            average_rounds: 0.0,
            locked: false,
        }
    }

    #[test]
    fn test_no_denominated_balance_uses_anonymized_part_only() {
        let t = 1_000;
        for y in [0u64, 1, 25, 250, 499, 500, 999, 1_000, 5_000] {
            let expected = ((20 * y.min(t) * 2 + t) / (2 * t)) as u8;
            assert_eq!(estimate(0, 123, y, t, 4), Some(expected), "y = {}", y);
        }
        assert_eq!(estimate(0, 0, 25, 1_000, 2), Some(1));
    }

    #[test]
    fn test_fully_mixed_is_100() {
        for d in [1u64, COIN, 1_000 * COIN, u64::MAX / 4] {
            assert_eq!(estimate(d, d, d, d, 8), Some(100));
        }
    }

    #[test]
    fn test_bounds() {
        let values = [0u64, 1, 7, COIN, 3 * COIN, 1_000 * COIN, u64::MAX];
        for &d in &values {
            for &n in &values {
                for &a in &values {
                    for &t in &values[1..] {
                        let p = estimate(d, n, a, t, 2).unwrap();
                        assert!(p <= 100);
                    }
                }
            }
        }
    }

    #[test]
    fn test_near_one_parts_at_full_width() {
        let max = u64::MAX;
        assert_eq!(estimate(max, max - 1, max - 1, max, 2), Some(100));
        assert_eq!(estimate(max, max / 2, max / 2, max, 2), Some(50));
        assert_eq!(estimate(max, 1, 1, max, 2), Some(0));
        // 80 * 1/2 + 20 * 1/8 = 42.5 with denominators near the top of the range
        assert_eq!(estimate(max - 1, (max - 1) / 2, (max - 7) / 8, max - 7, 2), Some(43));
    }

    #[test]
    fn test_rounds_half_up() {
        // 80 * 1/2 + 20 * 1/8 = 42.5
        assert_eq!(estimate(2, 1, 1, 8, 2), Some(43));
        // 80 * 1/3 = 26.67
        assert_eq!(estimate(3, 1, 0, 8, 2), Some(27));
    }

    #[test]
    fn test_zero_target_has_no_estimate() {
        assert_eq!(estimate(10, 5, 5, 0, 2), None);
    }

    #[test]
    fn test_rounds_do_not_change_the_blend() {
        for r in [0, 1, 2, 16] {
            assert_eq!(estimate(10, 10, 10, 10, r), Some(100));
            assert_eq!(estimate(2, 1, 1, 8, r), Some(43));
        }
    }

    #[test]
    fn test_report_preconditions() {
        let config = MixingConfig::default();

        let mut empty = snapshot();
        empty.balance = 0;
        assert_eq!(ProgressReport::evaluate(&empty, &config), ProgressReport::NoInputs);
        assert_eq!(ProgressReport::NoInputs.to_string(), "No inputs detected");

        let mut pending = snapshot();
        pending.unconfirmed_denominated = COIN;
        assert_eq!(ProgressReport::evaluate(&pending, &config), ProgressReport::AwaitingConfirmation);
    }

    #[test]
    fn test_report_caps_target_to_denominated_when_mixed() {
        let config = MixingConfig::default().with_anonymize_amount(1_000).with_rounds(2);
        let mut wallet = snapshot();
        wallet.balance = 20 * COIN;
        wallet.denominated = 10 * COIN;
        wallet.normalized_anonymized = 10 * COIN;
        wallet.anonymized = 10 * COIN;
        wallet.average_rounds = 2.0;

        let report = ProgressReport::evaluate(&wallet, &config);
        assert_eq!(report.percent(), Some(100));
        assert_eq!(report.to_string(), "Progress: 100%, inputs have an average of 2 of 2 rounds");
    }

    #[test]
    fn test_report_partial_progress() {
        let config = MixingConfig::default().with_anonymize_amount(1_000).with_rounds(2);
        let mut wallet = snapshot();
        wallet.normalized_anonymized = 5 * COIN;
        // target = min(1000, 10) coins; 80 * 0.5 + 0 = 40
        assert_eq!(ProgressReport::evaluate(&wallet, &config).percent(), Some(40));
    }
}
