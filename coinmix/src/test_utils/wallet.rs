use std::sync::Mutex;

use async_trait::async_trait;

use crate::denomination::Denomination;
use crate::error::{WalletError, WalletResult};
use crate::interface::{MixingWallet, WalletSnapshot};
use crate::types::{EntryInput, InputSignature, OutPoint, Transaction, Txid};

#[derive(Default)]
struct WalletState {
    snapshot: WalletSnapshot,
    /// Denominated coins keyed by denomination, each worth one denomination plus the relay fee.
    coins: Vec<(u64, EntryInput)>,
    fail_signing: Option<String>,
    sign_calls: usize,
    destinations: u8,
}

/// In-memory wallet with settable balances and coins.
#[derive(Default)]
pub struct MockWallet {
    state: Mutex<WalletState>,
}

impl MockWallet {
    pub fn new(snapshot: WalletSnapshot) -> Self {
        Self {
            state: Mutex::new(WalletState {
                snapshot,
                ..WalletState::default()
            }),
        }
    }

    /// Add `count` coins of `denomination + fee`, spendable as single-input entries.
    pub fn add_coins(&self, denomination: u64, fee: u64, count: u32, seed: u8) {
        let mut state = self.state.lock().unwrap();
        state.coins.extend((0..count).map(|vout| {
            let coin = EntryInput {
                outpoint: OutPoint::new(Txid([seed; 32]), vout),
                value: denomination + fee,
            };
            (denomination, coin)
        }));
    }

    pub fn set_snapshot(&self, snapshot: WalletSnapshot) {
        self.state.lock().unwrap().snapshot = snapshot;
    }

    pub fn set_locked(&self, locked: bool) {
        self.state.lock().unwrap().snapshot.locked = locked;
    }

    /// Make every signing request fail with `reason`.
    pub fn fail_signing(&self, reason: &str) {
        self.state.lock().unwrap().fail_signing = Some(reason.to_string());
    }

    pub fn sign_calls(&self) -> usize {
        self.state.lock().unwrap().sign_calls
    }
}

#[async_trait]
impl MixingWallet for MockWallet {
    async fn balance(&self) -> u64 {
        self.state.lock().unwrap().snapshot.balance
    }

    async fn denominated_balance(&self, only_unconfirmed: bool, _exclude_mine: bool) -> u64 {
        let state = self.state.lock().unwrap();
        if only_unconfirmed {
            state.snapshot.unconfirmed_denominated
        } else {
            state.snapshot.denominated
        }
    }

    async fn anonymized_balance(&self) -> u64 {
        self.state.lock().unwrap().snapshot.anonymized
    }

    async fn normalized_anonymized_balance(&self) -> u64 {
        self.state.lock().unwrap().snapshot.normalized_anonymized
    }

    async fn average_anonymized_rounds(&self) -> f64 {
        self.state.lock().unwrap().snapshot.average_rounds
    }

    async fn sign_transaction(
        &self,
        tx: &Transaction,
        inputs: &[OutPoint],
    ) -> WalletResult<Vec<InputSignature>> {
        let mut state = self.state.lock().unwrap();
        state.sign_calls += 1;
        if let Some(reason) = &state.fail_signing {
            return Err(WalletError::SigningFailed(reason.clone()));
        }
        let sighash = tx.signature_hash();
        Ok(inputs
            .iter()
            .map(|outpoint| InputSignature {
                outpoint: *outpoint,
                script_sig: sighash[..8].to_vec(),
            })
            .collect())
    }

    async fn select_denominated_inputs(
        &self,
        denomination: Denomination,
        max_value: u64,
    ) -> WalletResult<Vec<EntryInput>> {
        if denomination.value() > max_value {
            return Ok(Vec::new());
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .coins
            .iter()
            .find(|(value, _)| *value == denomination.value())
            .map(|(_, coin)| coin.clone())
            .into_iter()
            .collect())
    }

    async fn new_destination(&self) -> WalletResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.destinations = state.destinations.wrapping_add(1);
        Ok(vec![0x76, 0xa9, state.destinations])
    }

    async fn is_locked(&self) -> bool {
        self.state.lock().unwrap().snapshot.locked
    }
}
