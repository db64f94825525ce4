use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::{BroadcastRejection, TransportError};
use crate::interface::{Broadcaster, ChainTip, PeerTransport, Recipient};
use crate::messages::PoolMessage;
use crate::types::{Transaction, Txid};

/// Records broadcasts; optionally rejects them.
#[derive(Default)]
pub struct MockBroadcaster {
    broadcasts: Mutex<Vec<Transaction>>,
    reject: Mutex<Option<String>>,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following broadcast with `reason`.
    pub fn reject_with(&self, reason: &str) {
        *self.reject.lock().unwrap() = Some(reason.to_string());
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastRejection> {
        if let Some(reason) = self.reject.lock().unwrap().clone() {
            return Err(BroadcastRejection::new(reason));
        }
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(tx.txid())
    }
}

/// Captures outbound protocol messages.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(Recipient, PoolMessage)>>,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Recipient, PoolMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<(Recipient, PoolMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Fail sends instead of recording them.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn send(&self, to: Recipient, message: PoolMessage) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock transport offline".to_string()));
        }
        self.sent.lock().unwrap().push((to, message));
        Ok(())
    }
}

/// Settable chain tip.
#[derive(Default)]
pub struct MockChainTip {
    height: AtomicU32,
    initial_block_download: AtomicBool,
}

impl MockChainTip {
    pub fn new(height: u32) -> Self {
        Self {
            height: AtomicU32::new(height),
            initial_block_download: AtomicBool::new(false),
        }
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_initial_block_download(&self, syncing: bool) {
        self.initial_block_download.store(syncing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainTip for MockChainTip {
    async fn tip_height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    async fn is_initial_block_download(&self) -> bool {
        self.initial_block_download.load(Ordering::SeqCst)
    }
}
