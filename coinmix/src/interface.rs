//! Collaborators the mixing service talks to.
//!
//! The service never touches keys, coins or sockets directly. It reads wallet
//! balances, asks the wallet to sign, hands finished transactions to a
//! broadcaster and sends protocol messages through a transport.

use async_trait::async_trait;

use crate::denomination::Denomination;
use crate::error::{BroadcastRejection, TransportError, WalletResult};
use crate::messages::PoolMessage;
use crate::types::{EntryInput, InputSignature, OutPoint, ParticipantId, Transaction, Txid};

/// Wallet access needed for mixing.
#[async_trait]
pub trait MixingWallet: Send + Sync {
    /// Confirmed spendable balance.
    async fn balance(&self) -> u64;

    /// Balance held in denominated coins. `only_unconfirmed` restricts the sum
    /// to unconfirmed coins; `exclude_mine` skips coins from our own transactions.
    async fn denominated_balance(&self, only_unconfirmed: bool, exclude_mine: bool) -> u64;

    /// Balance that has completed the target number of rounds.
    async fn anonymized_balance(&self) -> u64;

    /// Denominated balance weighted by completed rounds.
    async fn normalized_anonymized_balance(&self) -> u64;

    async fn average_anonymized_rounds(&self) -> f64;

    /// Sign the given inputs of `tx`. Only inputs owned by this wallet may be listed.
    async fn sign_transaction(
        &self,
        tx: &Transaction,
        inputs: &[OutPoint],
    ) -> WalletResult<Vec<InputSignature>>;

    /// Pick unspent denominated coins of `denomination` worth at most `max_value`.
    async fn select_denominated_inputs(
        &self,
        denomination: Denomination,
        max_value: u64,
    ) -> WalletResult<Vec<EntryInput>>;

    /// Fresh output script for mixed coins.
    async fn new_destination(&self) -> WalletResult<Vec<u8>>;

    async fn is_locked(&self) -> bool;
}

/// Hands fully-signed transactions to the network.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastRejection>;
}

/// Where an outbound message goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// The coordinator of the session we joined.
    Coordinator,
    /// A participant of the session we host.
    Participant(ParticipantId),
}

/// Sends protocol messages. Inbound messages arrive through `MixingHandle::deliver`.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, to: Recipient, message: PoolMessage) -> Result<(), TransportError>;
}

/// Chain height source.
#[async_trait]
pub trait ChainTip: Send + Sync {
    async fn tip_height(&self) -> u32;

    async fn is_initial_block_download(&self) -> bool;
}

/// Point-in-time view of the wallet balances the pool decides on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WalletSnapshot {
    pub balance: u64,
    pub denominated: u64,
    pub unconfirmed_denominated: u64,
    pub anonymized: u64,
    pub normalized_anonymized: u64,
    pub average_rounds: f64,
    pub locked: bool,
}

impl WalletSnapshot {
    /// Read every balance from the wallet.
    pub async fn capture(wallet: &dyn MixingWallet) -> Self {
        Self {
            balance: wallet.balance().await,
            denominated: wallet.denominated_balance(false, false).await,
            unconfirmed_denominated: wallet.denominated_balance(true, true).await,
            anonymized: wallet.anonymized_balance().await,
            normalized_anonymized: wallet.normalized_anonymized_balance().await,
            average_rounds: wallet.average_anonymized_rounds().await,
            locked: wallet.is_locked().await,
        }
    }
}
