//! Configuration for the mixing service.

use std::time::Duration;

use mix_network::Network;

use crate::denomination::{DEFAULT_DENOMINATIONS, DenominationCatalog};
use crate::error::ConfigError;
use crate::signing::SigningPolicy;

/// Named amount/rounds combinations offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixingPreset {
    /// 1000 coins, 2 rounds.
    Basic,
    /// 1000 coins, 8 rounds.
    High,
    /// 1000 coins, 16 rounds.
    Maximum,
}

impl MixingPreset {
    /// `(amount in coins, rounds)` of the preset.
    pub fn values(self) -> (u64, u32) {
        match self {
            MixingPreset::Basic => (1000, 2),
            MixingPreset::High => (1000, 8),
            MixingPreset::Maximum => (1000, 16),
        }
    }
}

/// Configuration for the mixing service.
#[derive(Debug, Clone)]
pub struct MixingConfig {
    /// Network the wallet runs on.
    pub network: Network,

    /// Whether automatic mixing is switched on.
    pub enabled: bool,

    /// Lite mode disables mixing entirely.
    pub lite_mode: bool,

    /// Coordinator nodes do not mix their own coins.
    pub masternode_mode: bool,

    /// Amount to keep anonymized, in whole coins.
    pub anonymize_amount: u64,

    /// Mixing rounds each coin should complete.
    pub rounds: u32,

    /// Entries that fill a session.
    pub max_pool_transactions: usize,

    /// Fewest entries a round may finish with after dropping stalled signers.
    pub min_participants: usize,

    /// Smallest wallet balance mixing can be started with, in base units.
    pub min_balance: u64,

    /// Fee carried by every denominated coin, in base units.
    pub relay_fee: u64,

    /// Denomination ladder, smallest first, in base units.
    pub denominations: Vec<u64>,

    // Timers
    /// Interval between service ticks.
    pub tick_interval: Duration,

    /// Time to wait for a coordinator slot.
    pub queue_timeout: Duration,

    /// Time a session collects entries before giving up.
    pub submission_timeout: Duration,

    /// Time a signer gets per signature request.
    pub signing_timeout: Duration,

    /// Signature re-requests before a stalled signer is dropped.
    pub signing_retries: u32,

    /// Consecutive failed rounds the scheduler retries on its own.
    pub max_auto_retries: u32,

    /// Minimum time between progress refreshes triggered by new blocks.
    pub block_refresh_interval: Duration,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            enabled: false,
            lite_mode: false,
            masternode_mode: false,
            anonymize_amount: 1000,
            rounds: 2,
            max_pool_transactions: 3,
            min_participants: 2,
            min_balance: 149_000_000,
            relay_fee: 20_000,
            denominations: DEFAULT_DENOMINATIONS.to_vec(),
            tick_interval: Duration::from_millis(333),
            queue_timeout: Duration::from_secs(30),
            submission_timeout: Duration::from_secs(30),
            signing_timeout: Duration::from_secs(15),
            signing_retries: 2,
            max_auto_retries: 3,
            block_refresh_interval: Duration::from_secs(10),
        }
    }
}

impl MixingConfig {
    /// Create a new configuration for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Create a configuration for mainnet.
    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    /// Create a configuration for testnet.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Create a configuration for regtest.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Switch automatic mixing on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_lite_mode(mut self, lite: bool) -> Self {
        self.lite_mode = lite;
        self
    }

    pub fn with_masternode_mode(mut self, masternode: bool) -> Self {
        self.masternode_mode = masternode;
        self
    }

    /// Set the amount to anonymize, in whole coins.
    pub fn with_anonymize_amount(mut self, coins: u64) -> Self {
        self.anonymize_amount = coins;
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Apply a preset's amount and rounds.
    pub fn with_preset(self, preset: MixingPreset) -> Self {
        let (amount, rounds) = preset.values();
        self.with_anonymize_amount(amount).with_rounds(rounds)
    }

    pub fn with_max_pool_transactions(mut self, max: usize) -> Self {
        self.max_pool_transactions = max;
        self
    }

    pub fn with_min_participants(mut self, min: usize) -> Self {
        self.min_participants = min;
        self
    }

    pub fn with_min_balance(mut self, amount: u64) -> Self {
        self.min_balance = amount;
        self
    }

    pub fn with_relay_fee(mut self, fee: u64) -> Self {
        self.relay_fee = fee;
        self
    }

    /// Replace the denomination ladder.
    pub fn with_denominations(mut self, values: Vec<u64>) -> Self {
        self.denominations = values;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    /// Set the per-signer timeout and the number of re-requests before dropping.
    pub fn with_signing_timeout(mut self, timeout: Duration, retries: u32) -> Self {
        self.signing_timeout = timeout;
        self.signing_retries = retries;
        self
    }

    pub fn with_max_auto_retries(mut self, retries: u32) -> Self {
        self.max_auto_retries = retries;
        self
    }

    pub fn with_block_refresh_interval(mut self, interval: Duration) -> Self {
        self.block_refresh_interval = interval;
        self
    }

    /// Build the denomination catalog for this configuration.
    pub fn catalog(&self) -> Result<DenominationCatalog, ConfigError> {
        DenominationCatalog::new(self.denominations.clone(), self.relay_fee)
    }

    pub(crate) fn signing_policy(&self) -> SigningPolicy {
        SigningPolicy {
            timeout: self.signing_timeout,
            retries: self.signing_retries,
            min_participants: self.min_participants,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lite_mode && self.masternode_mode {
            return Err(ConfigError::ConflictingModes("lite mode and masternode mode"));
        }
        if self.enabled && self.lite_mode {
            return Err(ConfigError::ConflictingModes("mixing enabled in lite mode"));
        }
        if self.enabled && self.masternode_mode {
            return Err(ConfigError::ConflictingModes("mixing enabled in masternode mode"));
        }

        if self.rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.max_pool_transactions == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.min_participants == 0 || self.min_participants > self.max_pool_transactions {
            return Err(ConfigError::MinParticipants {
                min: self.min_participants,
                max: self.max_pool_transactions,
            });
        }

        for (name, value) in [
            ("tick_interval", self.tick_interval),
            ("queue_timeout", self.queue_timeout),
            ("submission_timeout", self.submission_timeout),
            ("signing_timeout", self.signing_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        self.catalog()?;
        Ok(())
    }
}
