//! Mock collaborators and builders for tests.

mod network;
mod wallet;

pub use network::{MockBroadcaster, MockChainTip, MockTransport};
pub use wallet::MockWallet;

use std::time::Instant;

use crate::entry_pool::Entry;
use crate::interface::WalletSnapshot;
use crate::types::{EntryInput, OutPoint, ParticipantId, TxOut, Txid};

/// A valid entry of `count` inputs for `denomination`: one input carries the fee.
pub fn denominated_entry(
    participant: ParticipantId,
    seed: u8,
    denomination: u64,
    fee: u64,
    count: u32,
) -> Entry {
    let mut inputs: Vec<_> = (0..count)
        .map(|vout| EntryInput {
            outpoint: OutPoint::new(Txid([seed; 32]), vout),
            value: denomination,
        })
        .collect();
    if let Some(first) = inputs.first_mut() {
        first.value += fee;
    }
    let outputs = (0..count)
        .map(|n| TxOut {
            value: denomination,
            script_pubkey: vec![0x76, seed, n as u8],
        })
        .collect();
    Entry::new(participant, inputs, outputs, Instant::now())
}

/// Unlocked wallet holding `balance`, nothing denominated yet.
pub fn funded_snapshot(balance: u64) -> WalletSnapshot {
    WalletSnapshot {
        balance,
        ..WalletSnapshot::default()
    }
}
