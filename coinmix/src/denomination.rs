//! Standard output values used to make mixed outputs indistinguishable.
//!
//! The ladder is ordered smallest to largest and a denomination's position in
//! it is its bit in a denomination mask. Classification is exact: a coin
//! either is a whole multiple of a ladder value plus the relay fee or it is
//! not denominated at all.

use crate::error::ConfigError;
use crate::types::{COIN, format_amount};

/// Default ladder: 0.1, 1, 10 and 100 coins.
pub const DEFAULT_DENOMINATIONS: [u64; 4] = [COIN / 10, COIN, 10 * COIN, 100 * COIN];

/// One standard coin value.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Denomination {
    value: u64,
    index: u8,
}

impl Denomination {
    /// Value in base units.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Single-bit mask identifying this denomination.
    pub fn mask(&self) -> u32 {
        1 << self.index
    }
}

/// Ordered set of denominations plus the relay fee carried by denominated coins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenominationCatalog {
    values: Vec<u64>,
    fee: u64,
}

impl DenominationCatalog {
    /// Build a catalog. Values must be non-zero, strictly increasing and fit a 32-bit mask.
    pub fn new(values: Vec<u64>, fee: u64) -> Result<Self, ConfigError> {
        if values.is_empty() {
            return Err(ConfigError::Denominations("ladder is empty".to_string()));
        }
        if values.len() > 32 {
            return Err(ConfigError::Denominations(format!(
                "{} values do not fit a denomination mask",
                values.len()
            )));
        }
        if values[0] == 0 {
            return Err(ConfigError::Denominations("zero value".to_string()));
        }
        if values.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Denominations("values must be strictly increasing".to_string()));
        }
        Ok(Self {
            values,
            fee,
        })
    }

    /// The default ladder with the given relay fee.
    pub fn standard(fee: u64) -> Self {
        Self {
            values: DEFAULT_DENOMINATIONS.to_vec(),
            fee,
        }
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Ladder values, smallest first.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Iterate denominations smallest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Denomination> + '_ {
        self.values.iter().enumerate().map(|(index, &value)| Denomination {
            value,
            index: index as u8,
        })
    }

    pub fn smallest(&self) -> Denomination {
        Denomination {
            value: self.values[0],
            index: 0,
        }
    }

    /// Classify an amount: `Some(d)` iff `amount == k * d + fee` for a positive `k`.
    ///
    /// When several ladder values divide the amount the largest one wins.
    pub fn classify(&self, amount: u64) -> Option<Denomination> {
        let net = amount.checked_sub(self.fee)?;
        if net == 0 {
            return None;
        }
        self.iter().rev().find(|d| net % d.value == 0)
    }

    /// Exact match of an output value against the ladder.
    pub fn find(&self, value: u64) -> Option<Denomination> {
        self.iter().find(|d| d.value == value)
    }

    pub fn is_denomination(&self, value: u64) -> bool {
        self.find(value).is_some()
    }

    /// Mask bit for an exact ladder value, `0` if the value is not on the ladder.
    pub fn mask_of(&self, value: u64) -> u32 {
        self.find(value).map(|d| d.mask()).unwrap_or(0)
    }

    /// Denominations selected by a mask, largest first.
    pub fn from_mask(&self, mask: u32) -> Vec<Denomination> {
        self.iter().rev().filter(|d| mask & d.mask() != 0).collect()
    }

    /// Human readable form of a mask, e.g. `"10+1"`. Mask `0` renders empty.
    pub fn to_display_string(&self, mask: u32) -> String {
        self.from_mask(mask)
            .iter()
            .map(|d| format_amount(d.value))
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Largest denomination not exceeding `limit`.
    pub fn largest_within(&self, limit: u64) -> Option<Denomination> {
        self.iter().rev().find(|d| d.value <= limit)
    }
}
