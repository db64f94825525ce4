//! Collect-signatures phase of a round.
//!
//! The coordinator builds the joint transaction from the admitted entries,
//! asks every participant for signatures over its own inputs and tracks a
//! per-signer deadline. A signer that misses its deadline is asked again up
//! to `retries` times and is then dropped together with its entry.
//! Participants sign only their own inputs and outputs, so the remaining
//! signatures stay valid when an entry is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};

use crate::entry_pool::Entry;
use crate::types::{InputSignature, OutPoint, ParticipantId, Transaction, TxIn, TxOut};

/// Version stamped on joint transactions.
pub const JOINT_TX_VERSION: u32 = 1;

/// Timeout policy for signers.
#[derive(Debug, Clone, Copy)]
pub struct SigningPolicy {
    /// Time a signer gets per request.
    pub timeout: Duration,
    /// Re-requests before a silent signer is dropped.
    pub retries: u32,
    /// Fewest entries a round may continue with.
    pub min_participants: usize,
}

/// Result of a signing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// Still waiting. `requests` lists the signers that must be (re)asked, in admission order.
    Pending {
        requests: Vec<ParticipantId>,
    },
    /// Every remaining entry has signed.
    Complete(Transaction),
    /// The round cannot finish.
    Failed(String),
}

/// Rejected signature submissions. These never fail the round by themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("{0} is not a signer in this round")]
    UnknownSigner(ParticipantId),

    #[error("{participant} signed input {outpoint} it does not own")]
    ForeignInput {
        participant: ParticipantId,
        outpoint: OutPoint,
    },

    #[error("empty signature for {0}")]
    EmptySignature(OutPoint),
}

#[derive(Debug)]
struct SignerSlot {
    participant: ParticipantId,
    inputs: Vec<OutPoint>,
    signatures: HashMap<OutPoint, Vec<u8>>,
    deadline: Instant,
    timeouts: u32,
}

impl SignerSlot {
    fn is_signed(&self) -> bool {
        self.inputs.iter().all(|i| self.signatures.contains_key(i))
    }
}

/// Drives signature collection for one round.
#[derive(Debug)]
pub struct SigningCoordinator {
    policy: SigningPolicy,
    /// Signers in admission order.
    slots: Vec<SignerSlot>,
    /// Outputs in their shuffled transaction order, tagged with their owner.
    outputs: Vec<(ParticipantId, TxOut)>,
}

impl SigningCoordinator {
    /// Build the joint transaction and request a signature from every entry.
    pub fn begin(entries: &[Entry], policy: SigningPolicy, now: Instant) -> (Self, SigningOutcome) {
        let slots: Vec<_> = entries
            .iter()
            .map(|entry| SignerSlot {
                participant: entry.participant,
                inputs: entry.inputs.iter().map(|i| i.outpoint).collect(),
                signatures: HashMap::new(),
                deadline: now + policy.timeout,
                timeouts: 0,
            })
            .collect();

        let mut outputs: Vec<_> = entries
            .iter()
            .flat_map(|entry| entry.outputs.iter().map(|o| (entry.participant, o.clone())))
            .collect();
        outputs.shuffle(&mut rand::thread_rng());

        let coordinator = Self {
            policy,
            slots,
            outputs,
        };

        let outcome = if coordinator.slots.len() < policy.min_participants {
            SigningOutcome::Failed(format!(
                "not enough participants to sign ({} of {})",
                coordinator.slots.len(),
                policy.min_participants
            ))
        } else {
            SigningOutcome::Pending {
                requests: coordinator.participants(),
            }
        };
        (coordinator, outcome)
    }

    /// The joint transaction without signatures.
    pub fn transaction(&self) -> Transaction {
        Transaction {
            version: JOINT_TX_VERSION,
            input: self
                .slots
                .iter()
                .flat_map(|slot| slot.inputs.iter())
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: Vec::new(),
                })
                .collect(),
            output: self.outputs.iter().map(|(_, o)| o.clone()).collect(),
        }
    }

    /// Remaining signers in admission order.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.slots.iter().map(|s| s.participant).collect()
    }

    /// Inputs owned by a signer.
    pub fn inputs_of(&self, participant: ParticipantId) -> Option<&[OutPoint]> {
        self.slot(participant).map(|s| s.inputs.as_slice())
    }

    pub fn remaining(&self) -> usize {
        self.slots.len()
    }

    pub fn signed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_signed()).count()
    }

    pub fn is_signed(&self, participant: ParticipantId) -> bool {
        self.slot(participant).map(|s| s.is_signed()).unwrap_or(false)
    }

    fn slot(&self, participant: ParticipantId) -> Option<&SignerSlot> {
        self.slots.iter().find(|s| s.participant == participant)
    }

    /// Record a signer's signatures. All of them are checked before any is stored.
    pub fn add_signatures(
        &mut self,
        participant: ParticipantId,
        signatures: Vec<InputSignature>,
    ) -> Result<SigningOutcome, SignatureError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.participant == participant)
            .ok_or(SignatureError::UnknownSigner(participant))?;

        for signature in &signatures {
            if !slot.inputs.contains(&signature.outpoint) {
                return Err(SignatureError::ForeignInput {
                    participant,
                    outpoint: signature.outpoint,
                });
            }
            if signature.script_sig.is_empty() {
                return Err(SignatureError::EmptySignature(signature.outpoint));
            }
        }

        for signature in signatures {
            slot.signatures.insert(signature.outpoint, signature.script_sig);
        }
        debug!(
            "Signatures from {}: {}/{} inputs",
            participant,
            slot.signatures.len(),
            slot.inputs.len()
        );

        Ok(self.outcome(Vec::new()))
    }

    /// Fire expired signer deadlines. Returns the dropped signers and the new outcome.
    pub fn check_timeouts(&mut self, now: Instant) -> (Vec<ParticipantId>, SigningOutcome) {
        let mut requests = Vec::new();
        let mut dropped = Vec::new();

        for slot in self.slots.iter_mut().filter(|s| !s.is_signed() && s.deadline <= now) {
            slot.timeouts += 1;
            if slot.timeouts > self.policy.retries {
                warn!("Signer {} timed out {} times, dropping its entry", slot.participant, slot.timeouts);
                dropped.push(slot.participant);
            } else {
                debug!("Signer {} timed out, asking again", slot.participant);
                slot.deadline = now + self.policy.timeout;
                requests.push(slot.participant);
            }
        }

        if !dropped.is_empty() {
            self.slots.retain(|s| !dropped.contains(&s.participant));
            self.outputs.retain(|(owner, _)| !dropped.contains(owner));
        }

        (dropped, self.outcome(requests))
    }

    fn outcome(&self, requests: Vec<ParticipantId>) -> SigningOutcome {
        if self.slots.len() < self.policy.min_participants {
            return SigningOutcome::Failed(format!(
                "signing timed out: {} entries left, {} required",
                self.slots.len(),
                self.policy.min_participants
            ));
        }
        if self.slots.iter().all(|s| s.is_signed()) {
            return SigningOutcome::Complete(self.assemble());
        }
        SigningOutcome::Pending {
            requests,
        }
    }

    /// The joint transaction with every collected signature applied.
    fn assemble(&self) -> Transaction {
        let mut tx = self.transaction();
        for input in &mut tx.input {
            if let Some(sig) = self
                .slots
                .iter()
                .find_map(|s| s.signatures.get(&input.previous_output))
            {
                input.script_sig = sig.clone();
            }
        }
        tx
    }
}
