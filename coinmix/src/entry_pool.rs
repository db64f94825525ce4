//! Admitted participant contributions for the active round.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::{AdmissionError, AdmissionResult};
use crate::pool::PoolState;
use crate::types::{EntryInput, OutPoint, ParticipantId, TxOut};

/// One participant's contribution to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub participant: ParticipantId,
    pub inputs: Vec<EntryInput>,
    pub outputs: Vec<TxOut>,
    /// When the entry was received.
    pub submitted_at: Instant,
    pub accepted: bool,
    /// Set once the participant's signatures are in.
    pub signed: bool,
}

impl Entry {
    pub fn new(
        participant: ParticipantId,
        inputs: Vec<EntryInput>,
        outputs: Vec<TxOut>,
        submitted_at: Instant,
    ) -> Self {
        Self {
            participant,
            inputs,
            outputs,
            submitted_at,
            accepted: false,
            signed: false,
        }
    }

    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| i.outpoint == *outpoint)
    }
}

/// Holds admitted entries in submission order.
///
/// Submission order is the signing order and the order blame is attributed in
/// when a signer stalls.
#[derive(Debug)]
pub struct EntryPool {
    entries: Vec<Entry>,
    /// Every input of every admitted entry.
    spent: HashSet<OutPoint>,
    max_entries: usize,
    relay_fee: u64,
}

impl EntryPool {
    pub fn new(max_entries: usize, relay_fee: u64) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries),
            spent: HashSet::new(),
            max_entries,
            relay_fee,
        }
    }

    /// Try to admit an entry. Returns its position in admission order.
    pub fn try_admit(
        &mut self,
        mut entry: Entry,
        state: PoolState,
        denomination: u64,
    ) -> AdmissionResult<usize> {
        if state != PoolState::AcceptingEntries {
            return Err(AdmissionError::NotAccepting(state));
        }

        if self.entries.len() >= self.max_entries {
            return Err(AdmissionError::PoolFull {
                max: self.max_entries,
            });
        }

        let mut seen = HashSet::with_capacity(entry.inputs.len());
        for input in &entry.inputs {
            if self.spent.contains(&input.outpoint) || !seen.insert(input.outpoint) {
                trace!("Rejecting duplicate input {}", input.outpoint);
                return Err(AdmissionError::DuplicateInput(input.outpoint));
            }
        }

        if self.entries.iter().any(|e| e.participant == entry.participant) {
            return Err(AdmissionError::DuplicateParticipant(entry.participant));
        }

        self.check_value(&entry, denomination)?;

        entry.accepted = true;
        self.spent.extend(entry.inputs.iter().map(|i| i.outpoint));
        debug!(
            "Admitted entry from {} with {} inputs ({}/{})",
            entry.participant,
            entry.inputs.len(),
            self.entries.len() + 1,
            self.max_entries
        );
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Check the value rules alone: exact input total and matching outputs.
    pub fn check_value(&self, entry: &Entry, denomination: u64) -> AdmissionResult<()> {
        if entry.inputs.is_empty() {
            return Err(AdmissionError::Empty);
        }

        let count = entry.inputs.len() as u64;
        let required = count.checked_mul(denomination).and_then(|v| v.checked_add(self.relay_fee));
        let total = entry.inputs.iter().try_fold(0u64, |acc, i| acc.checked_add(i.value));
        if total.is_none() || total != required {
            return Err(AdmissionError::WrongDenomination {
                total: total.unwrap_or(u64::MAX),
                inputs: entry.inputs.len(),
                denomination,
                fee: self.relay_fee,
            });
        }

        if entry.outputs.len() != entry.inputs.len()
            || entry.outputs.iter().any(|o| o.value != denomination)
        {
            return Err(AdmissionError::OutputMismatch {
                denomination,
            });
        }

        Ok(())
    }

    /// Number of admitted entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.spent.clear();
    }

    /// Entries in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, participant: ParticipantId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.participant == participant)
    }

    pub fn contains_input(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.entries.iter().map(|e| e.participant).collect()
    }

    /// Flag a participant's entry as signed.
    pub fn mark_signed(&mut self, participant: ParticipantId) -> bool {
        match self.entries.iter_mut().find(|e| e.participant == participant) {
            Some(entry) => {
                entry.signed = true;
                true
            }
            None => false,
        }
    }

    /// Remove a participant's entry, releasing its inputs.
    pub fn evict(&mut self, participant: ParticipantId) -> Option<Entry> {
        let position = self.entries.iter().position(|e| e.participant == participant)?;
        let entry = self.entries.remove(position);
        for input in &entry.inputs {
            self.spent.remove(&input.outpoint);
        }
        debug!("Evicted entry from {}", participant);
        Some(entry)
    }
}
