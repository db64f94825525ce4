//! Automatic re-entry into mixing rounds.

use std::fmt;

use tracing::{debug, info};

use crate::config::MixingConfig;
use crate::interface::WalletSnapshot;
use crate::pool::PoolState;
use crate::types::{COIN, format_amount};

/// Outcome of one scheduling decision. `Display` is the text shown as the
/// last automatic-denomination result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerDecision {
    Unavailable(&'static str),
    Disabled,
    Busy(PoolState),
    RetryBudgetExhausted {
        failures: u32,
    },
    Syncing,
    WalletLocked,
    BelowMinimumBalance {
        minimum: u64,
    },
    WaitingForConfirmations,
    TargetReached,
    RoundLimitReached {
        rounds: u32,
    },
    /// Join a round, spending at most `max_amount` base units.
    Start {
        max_amount: u64,
    },
}

impl SchedulerDecision {
    pub fn is_start(&self) -> bool {
        matches!(self, SchedulerDecision::Start { .. })
    }
}

impl fmt::Display for SchedulerDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerDecision::Unavailable(mode) => write!(f, "Mixing is disabled in {}", mode),
            SchedulerDecision::Disabled => write!(f, "Mixing is disabled"),
            SchedulerDecision::Busy(state) => write!(f, "Mixing round in progress ({})", state),
            SchedulerDecision::RetryBudgetExhausted {
                failures,
            } => write!(f, "Mixing paused after {} failed attempts", failures),
            SchedulerDecision::Syncing => write!(f, "Waiting for the chain to sync"),
            SchedulerDecision::WalletLocked => write!(f, "Wallet is locked"),
            SchedulerDecision::BelowMinimumBalance {
                minimum,
            } => write!(f, "Mixing requires at least {} to use", format_amount(*minimum)),
            SchedulerDecision::WaitingForConfirmations => {
                write!(f, "Found unconfirmed denominated outputs, will wait till they confirm")
            }
            SchedulerDecision::TargetReached => write!(f, "Target amount is anonymized"),
            SchedulerDecision::RoundLimitReached {
                rounds,
            } => write!(f, "All inputs have completed {} rounds", rounds),
            SchedulerDecision::Start {
                max_amount,
            } => write!(f, "Mixing in progress, up to {}", format_amount(*max_amount)),
        }
    }
}

/// Inputs to a scheduling decision.
#[derive(Debug)]
pub struct SchedulerContext<'a> {
    pub config: &'a MixingConfig,
    pub state: PoolState,
    pub enabled: bool,
    pub initial_block_download: bool,
    pub snapshot: &'a WalletSnapshot,
}

/// Decides when a new round should start and tracks the automatic retry budget.
#[derive(Debug)]
pub struct AutoDenominateScheduler {
    max_retries: u32,
    failures: u32,
    paused: bool,
    armed: bool,
}

impl AutoDenominateScheduler {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            failures: 0,
            paused: false,
            armed: false,
        }
    }

    /// Decide whether to start a round.
    pub fn evaluate(&self, ctx: &SchedulerContext<'_>) -> SchedulerDecision {
        let config = ctx.config;
        let wallet = ctx.snapshot;

        if config.lite_mode {
            return SchedulerDecision::Unavailable("lite mode");
        }
        if config.masternode_mode {
            return SchedulerDecision::Unavailable("masternode mode");
        }
        if !ctx.enabled {
            return SchedulerDecision::Disabled;
        }
        if ctx.state != PoolState::Idle {
            return SchedulerDecision::Busy(ctx.state);
        }
        if self.paused {
            return SchedulerDecision::RetryBudgetExhausted {
                failures: self.failures,
            };
        }
        if ctx.initial_block_download {
            return SchedulerDecision::Syncing;
        }
        if wallet.locked {
            return SchedulerDecision::WalletLocked;
        }
        if wallet.balance < config.min_balance {
            return SchedulerDecision::BelowMinimumBalance {
                minimum: config.min_balance,
            };
        }
        if wallet.unconfirmed_denominated > 0 {
            return SchedulerDecision::WaitingForConfirmations;
        }

        let target = config.anonymize_amount.saturating_mul(COIN).min(wallet.balance);
        let remaining = target.saturating_sub(wallet.anonymized);
        if remaining == 0 {
            return SchedulerDecision::TargetReached;
        }
        if wallet.denominated > 0 && wallet.average_rounds >= f64::from(config.rounds) {
            return SchedulerDecision::RoundLimitReached {
                rounds: config.rounds,
            };
        }

        SchedulerDecision::Start {
            max_amount: remaining,
        }
    }

    /// A round completed; the failure streak ends.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// A round failed. Returns whether another automatic attempt is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_retries {
            if !self.paused {
                info!("Mixing failed {} times in a row, pausing until started again", self.failures);
            }
            self.paused = true;
            false
        } else {
            debug!("Mixing attempt failed ({}/{})", self.failures, self.max_retries);
            true
        }
    }

    /// Request an evaluation on the next tick.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Consume a pending evaluation request.
    pub fn take_armed(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }

    /// The user started mixing by hand: clear the failure streak.
    pub fn resume(&mut self) {
        self.failures = 0;
        self.paused = false;
    }

    /// Forget all scheduling state.
    pub fn reset(&mut self) {
        self.resume();
        self.armed = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(balance: u64) -> WalletSnapshot {
        WalletSnapshot {
            balance,
            denominated: 0,
            unconfirmed_denominated: 0,
            anonymized: 0,
            normalized_anonymized: 0,
            average_rounds: 0.0,
            locked: false,
        }
    }

    fn decide(
        scheduler: &AutoDenominateScheduler,
        config: &MixingConfig,
        snapshot: &WalletSnapshot,
    ) -> SchedulerDecision {
        scheduler.evaluate(&SchedulerContext {
            config,
            state: PoolState::Idle,
            enabled: true,
            initial_block_download: false,
            snapshot,
        })
    }

    #[test]
    fn test_minimum_balance_floor() {
        let scheduler = AutoDenominateScheduler::new(3);
        let config = MixingConfig::default();

        let decision = decide(&scheduler, &config, &wallet(COIN));
        assert_eq!(
            decision,
            SchedulerDecision::BelowMinimumBalance {
                minimum: 149_000_000
            }
        );
        assert_eq!(decision.to_string(), "Mixing requires at least 1.49 to use");

        assert!(decide(&scheduler, &config, &wallet(149_000_000)).is_start());
    }

    #[test]
    fn test_target_is_capped_by_balance_and_anonymized() {
        let scheduler = AutoDenominateScheduler::new(3);
        let config = MixingConfig::default().with_anonymize_amount(5);

        let mut snapshot = wallet(20 * COIN);
        snapshot.anonymized = 2 * COIN;
        assert_eq!(
            decide(&scheduler, &config, &snapshot),
            SchedulerDecision::Start {
                max_amount: 3 * COIN
            }
        );

        snapshot.anonymized = 5 * COIN;
        assert_eq!(decide(&scheduler, &config, &snapshot), SchedulerDecision::TargetReached);
    }

    #[test]
    fn test_unconfirmed_denominated_backoff() {
        let scheduler = AutoDenominateScheduler::new(3);
        let mut snapshot = wallet(10 * COIN);
        snapshot.unconfirmed_denominated = COIN;
        assert_eq!(
            decide(&scheduler, &MixingConfig::default(), &snapshot),
            SchedulerDecision::WaitingForConfirmations
        );
    }

    #[test]
    fn test_round_limit() {
        let scheduler = AutoDenominateScheduler::new(3);
        let config = MixingConfig::default().with_rounds(2);
        let mut snapshot = wallet(10 * COIN);
        snapshot.denominated = 10 * COIN;
        snapshot.average_rounds = 2.0;
        assert_eq!(
            decide(&scheduler, &config, &snapshot),
            SchedulerDecision::RoundLimitReached {
                rounds: 2
            }
        );
    }

    #[test]
    fn test_retry_budget_pauses_until_resumed() {
        let mut scheduler = AutoDenominateScheduler::new(2);
        let config = MixingConfig::default();
        let snapshot = wallet(10 * COIN);

        assert!(scheduler.record_failure());
        assert!(!scheduler.record_failure());
        assert!(scheduler.is_paused());
        assert_eq!(
            decide(&scheduler, &config, &snapshot),
            SchedulerDecision::RetryBudgetExhausted {
                failures: 2
            }
        );

        scheduler.resume();
        assert!(decide(&scheduler, &config, &snapshot).is_start());
    }

    #[test]
    fn test_success_clears_streak() {
        let mut scheduler = AutoDenominateScheduler::new(2);
        scheduler.record_failure();
        scheduler.record_success();
        assert!(scheduler.record_failure());
        assert_eq!(scheduler.failures(), 1);
    }

    #[test]
    fn test_modes_and_state_gate_everything() {
        let scheduler = AutoDenominateScheduler::new(3);
        let snapshot = wallet(10 * COIN);

        let lite = MixingConfig::default().with_lite_mode(true);
        assert_eq!(decide(&scheduler, &lite, &snapshot), SchedulerDecision::Unavailable("lite mode"));

        let config = MixingConfig::default();
        let busy = scheduler.evaluate(&SchedulerContext {
            config: &config,
            state: PoolState::Signing,
            enabled: true,
            initial_block_download: false,
            snapshot: &snapshot,
        });
        assert_eq!(busy, SchedulerDecision::Busy(PoolState::Signing));
    }

    #[test]
    fn test_armed_flag_is_consumed() {
        let mut scheduler = AutoDenominateScheduler::new(3);
        assert!(!scheduler.take_armed());
        scheduler.arm();
        assert!(scheduler.take_armed());
        assert!(!scheduler.take_armed());
    }
}
