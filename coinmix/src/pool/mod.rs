//! The mixing pool: session state machine, timers and retry policy.
//!
//! `MixingPool` performs no I/O. Every input (user command, protocol message,
//! collaborator result, timer tick) is a method call that mutates the pool
//! and returns the [`PoolAction`]s the caller has to carry out. Results of
//! those actions come back through `on_local_signatures` and
//! `on_broadcast_result`, tagged with the session they were issued for so
//! results that outlive a reset are dropped.

mod session;
mod state;
mod status;

pub use session::Role;
pub use state::PoolState;
pub use status::PoolStatus;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::MixingConfig;
use crate::denomination::{Denomination, DenominationCatalog};
use crate::entry_pool::{Entry, EntryPool};
use crate::error::{AdmissionError, BroadcastRejection, MixingError, Result, WalletError, WalletResult};
use crate::interface::{Recipient, WalletSnapshot};
use crate::messages::PoolMessage;
use crate::progress::ProgressReport;
use crate::scheduler::{AutoDenominateScheduler, SchedulerContext, SchedulerDecision};
use crate::signing::{SigningCoordinator, SigningOutcome};
use crate::types::{InputSignature, OutPoint, ParticipantId, SessionId, Transaction, Txid, format_amount};
use session::Session;

/// Side effects requested by the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolAction {
    /// Ask the local wallet to sign `inputs` of `tx`.
    SignLocal {
        session: SessionId,
        tx: Transaction,
        inputs: Vec<OutPoint>,
    },
    Send {
        to: Recipient,
        message: PoolMessage,
    },
    /// Hand the fully-signed transaction to the broadcaster.
    Broadcast {
        session: SessionId,
        tx: Transaction,
    },
}

pub struct MixingPool {
    config: MixingConfig,
    catalog: DenominationCatalog,
    state: PoolState,
    enabled: bool,
    session: Option<Session>,
    /// Entries of a hosted session.
    entries: EntryPool,
    scheduler: AutoDenominateScheduler,
    last_message: String,
    auto_denom_result: String,
    last_entry_accepted: bool,
    rounds_completed: u32,
    cached_num_blocks: u32,
    last_block_refresh: Option<Instant>,
    progress: Option<ProgressReport>,
}

impl MixingPool {
    /// Create a pool. Fails on an invalid configuration.
    pub fn new(config: MixingConfig) -> Result<Self> {
        config.validate()?;
        let catalog = config.catalog()?;
        let mut scheduler = AutoDenominateScheduler::new(config.max_auto_retries);
        if config.enabled {
            scheduler.arm();
        }

        Ok(Self {
            entries: EntryPool::new(config.max_pool_transactions, config.relay_fee),
            enabled: config.enabled,
            catalog,
            scheduler,
            config,
            state: PoolState::Idle,
            session: None,
            last_message: String::new(),
            auto_denom_result: String::new(),
            last_entry_accepted: false,
            rounds_completed: 0,
            cached_num_blocks: 0,
            last_block_refresh: None,
            progress: None,
        })
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &MixingConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DenominationCatalog {
        &self.catalog
    }

    /// Entries in the current session: admitted ones when hosting, the
    /// coordinator's count when participating.
    pub fn entries_count(&self) -> usize {
        match &self.session {
            Some(session) if session.is_host() => self.entries.count(),
            Some(session) => session.reported_entries,
            None => 0,
        }
    }

    pub fn last_entry_accepted(&self) -> bool {
        self.last_entry_accepted
    }

    /// Denomination mask of the current session, `0` without one.
    pub fn session_denom(&self) -> u32 {
        self.session.as_ref().map(|s| s.denomination.mask()).unwrap_or(0)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    pub fn cached_num_blocks(&self) -> u32 {
        self.cached_num_blocks
    }

    /// Admitted entries of a hosted session.
    pub fn entries(&self) -> &EntryPool {
        &self.entries
    }

    pub fn status(&self) -> PoolStatus {
        let session_denom = self.session_denom();
        PoolStatus {
            state: self.state,
            enabled: self.enabled,
            session: self.session_id(),
            entries: self.entries_count(),
            max_entries: self.config.max_pool_transactions,
            last_entry_accepted: self.last_entry_accepted,
            session_denom,
            session_denom_text: self.catalog.to_display_string(session_denom),
            last_message: self.last_message.clone(),
            auto_denom_result: self.auto_denom_result.clone(),
            rounds_completed: self.rounds_completed,
            target_rounds: self.config.rounds,
            progress: self.progress.as_ref().and_then(|p| p.percent()),
            progress_text: self.progress.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            cached_num_blocks: self.cached_num_blocks,
        }
    }

    fn set_state(&mut self, next: PoolState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MixingError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Pool state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Move to ERROR with `reason`. Hosted sessions tell their participants.
    fn fail(&mut self, reason: impl Into<String>) -> Vec<PoolAction> {
        let reason = reason.into();
        if !self.state.can_transition_to(PoolState::Error) {
            debug!("Ignoring failure in state {}: {}", self.state, reason);
            return Vec::new();
        }
        warn!("Mixing round failed in state {}: {}", self.state, reason);
        let actions = self.notify_participants(false, None, &reason);
        self.state = PoolState::Error;
        self.last_message = reason;
        actions
    }

    fn notify_participants(&self, success: bool, txid: Option<Txid>, message: &str) -> Vec<PoolAction> {
        let Some(session) = self.session.as_ref().filter(|s| s.is_host()) else {
            return Vec::new();
        };
        self.entries
            .participants()
            .into_iter()
            .map(|p| PoolAction::Send {
                to: Recipient::Participant(p),
                message: PoolMessage::Complete {
                    session: session.id,
                    success,
                    txid,
                    message: message.to_string(),
                },
            })
            .collect()
    }

    fn current(&self, id: SessionId, role: Role) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id && s.role == role)
    }

    fn single_denomination(&self, mask: u32) -> Option<Denomination> {
        match self.catalog.from_mask(mask).as_slice() {
            [denomination] => Some(*denomination),
            _ => None,
        }
    }

    // User commands

    /// Switch automatic mixing on. Refused in lite and masternode mode, below
    /// the minimum balance and while the wallet is locked.
    pub fn enable(&mut self, snapshot: &WalletSnapshot) -> Result<()> {
        if self.config.lite_mode {
            return Err(MixingError::Unavailable("lite mode"));
        }
        if self.config.masternode_mode {
            return Err(MixingError::Unavailable("masternode mode"));
        }
        if self.enabled {
            return Ok(());
        }
        if snapshot.balance < self.config.min_balance {
            return Err(MixingError::InsufficientBalance {
                minimum: self.config.min_balance,
            });
        }
        if snapshot.locked {
            self.cached_num_blocks = 0;
            return Err(WalletError::Locked.into());
        }

        self.enabled = true;
        self.cached_num_blocks = 0;
        self.scheduler.resume();
        self.scheduler.arm();
        info!("Mixing enabled");
        Ok(())
    }

    /// Switch automatic mixing off. A running round is left to finish.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.cached_num_blocks = 0;
        info!("Mixing disabled");
    }

    /// Flip the enabled flag. Returns the new value.
    pub fn toggle(&mut self, snapshot: &WalletSnapshot) -> Result<bool> {
        if self.enabled {
            self.disable();
        } else {
            self.enable(snapshot)?;
        }
        Ok(self.enabled)
    }

    /// Decide whether a new round should start. `user_initiated` clears an
    /// exhausted retry budget.
    pub fn do_automatic_denominating(
        &mut self,
        snapshot: &WalletSnapshot,
        initial_block_download: bool,
        user_initiated: bool,
    ) -> SchedulerDecision {
        if user_initiated {
            self.scheduler.resume();
        }
        let decision = self.scheduler.evaluate(&SchedulerContext {
            config: &self.config,
            state: self.state,
            enabled: self.enabled,
            initial_block_download,
            snapshot,
        });
        if !matches!(decision, SchedulerDecision::Busy(_)) {
            self.auto_denom_result = decision.to_string();
        }
        debug!("Automatic denomination: {}", decision);
        decision
    }

    /// Whether the scheduler asked for an evaluation since the last call.
    pub fn take_scheduler_request(&mut self) -> bool {
        self.scheduler.take_armed()
    }

    /// Hard cancel, honoured in every state. Signing state is dropped so a
    /// partially-signed transaction is never broadcast.
    pub fn reset(&mut self) {
        info!("Mixing reset in state {}", self.state);
        self.clear_session();
        self.state = PoolState::Idle;
        self.last_message.clear();
        self.auto_denom_result.clear();
        self.scheduler.reset();
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.entries.clear();
        self.last_entry_accepted = false;
    }

    /// Finish a round in SUCCESS or ERROR: clear the session, return to IDLE
    /// and re-arm the scheduler when the retry budget allows. Returns whether
    /// the scheduler was re-armed.
    pub fn check(&mut self) -> Result<bool> {
        if !self.state.is_terminal() {
            return Ok(false);
        }

        // Hosted rounds belong to peers; only our own rounds count.
        let hosted = self.role() == Some(Role::Host);
        let retry = if hosted {
            !self.scheduler.is_paused()
        } else if self.state == PoolState::Success {
            self.rounds_completed = self.rounds_completed.saturating_add(1);
            self.scheduler.record_success();
            true
        } else {
            self.scheduler.record_failure()
        };

        self.clear_session();
        self.set_state(PoolState::Idle)?;

        if self.enabled && retry {
            self.scheduler.arm();
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a new chain height. Returns `true` when progress should be
    /// refreshed; refreshes are throttled to one per `block_refresh_interval`.
    pub fn on_new_block(&mut self, height: u32, now: Instant) -> bool {
        if height == self.cached_num_blocks {
            return false;
        }
        if let Some(last) = self.last_block_refresh {
            if now.saturating_duration_since(last) < self.config.block_refresh_interval {
                return false;
            }
        }
        self.cached_num_blocks = height;
        self.last_block_refresh = Some(now);
        // Balances may have changed; let an idle pool reconsider.
        if self.enabled && self.state == PoolState::Idle && !self.scheduler.is_paused() {
            self.scheduler.arm();
        }
        true
    }

    pub fn set_progress(&mut self, report: ProgressReport) {
        self.progress = Some(report);
    }

    // Participant side

    /// Start a round as a participant: queue for a coordinator slot with our entry.
    pub fn join_queue(
        &mut self,
        entry: Entry,
        denomination: Denomination,
        now: Instant,
    ) -> Result<Vec<PoolAction>> {
        if !self.enabled {
            return Err(MixingError::Disabled);
        }
        if self.config.masternode_mode {
            return Err(MixingError::Unavailable("masternode mode"));
        }
        self.entries.check_value(&entry, denomination.value())?;
        self.set_state(PoolState::Queue)?;

        let id = SessionId::random();
        let mut session =
            Session::new(id, Role::Participant, denomination, now + self.config.queue_timeout);
        session.own_entry = Some(entry);
        self.session = Some(session);
        self.last_entry_accepted = false;
        self.last_message.clear();

        info!(
            "Queueing for session {} with denomination {}",
            id,
            format_amount(denomination.value())
        );
        Ok(vec![PoolAction::Send {
            to: Recipient::Coordinator,
            message: PoolMessage::JoinQueue {
                session: id,
                denom_mask: denomination.mask(),
            },
        }])
    }

    fn on_queue_ready(&mut self, id: SessionId, mask: u32, now: Instant) -> Result<Vec<PoolAction>> {
        let deadline = now + self.config.submission_timeout;
        let entry = match self.session.as_mut() {
            Some(session)
                if self.state == PoolState::Queue
                    && session.role == Role::Participant
                    && session.denomination.mask() == mask =>
            {
                // The coordinator names the session.
                session.id = id;
                session.deadline = deadline;
                session.own_entry.clone()
            }
            _ => {
                debug!("Ignoring queue_ready for {} in state {}", id, self.state);
                return Ok(Vec::new());
            }
        };
        let Some(entry) = entry else {
            return Ok(self.fail("No entry to submit"));
        };

        self.set_state(PoolState::AcceptingEntries)?;
        Ok(vec![PoolAction::Send {
            to: Recipient::Coordinator,
            message: PoolMessage::Entry {
                session: id,
                inputs: entry.inputs,
                outputs: entry.outputs,
            },
        }])
    }

    fn on_entry_status(
        &mut self,
        id: SessionId,
        accepted: bool,
        reason: String,
        entries: u32,
    ) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Participant) || self.state != PoolState::AcceptingEntries {
            return Ok(Vec::new());
        }
        if let Some(session) = self.session.as_mut() {
            session.reported_entries = entries as usize;
        }
        self.last_entry_accepted = accepted;
        if accepted {
            debug!("Entry accepted, {} entries in session {}", entries, id);
            Ok(Vec::new())
        } else {
            Ok(self.fail(format!("Entry rejected: {}", reason)))
        }
    }

    fn on_sign_request(&mut self, id: SessionId, tx: Transaction, now: Instant) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Participant)
            || !matches!(self.state, PoolState::AcceptingEntries | PoolState::Signing)
        {
            return Ok(Vec::new());
        }
        let Some(entry) = self.session.as_ref().and_then(|s| s.own_entry.clone()) else {
            return Ok(self.fail("No entry to sign"));
        };
        if !contains_entry(&tx, &entry) {
            return Ok(self.fail("Joint transaction does not contain our entry"));
        }

        if self.state == PoolState::AcceptingEntries {
            self.set_state(PoolState::Signing)?;
        }
        let window = self.config.signing_timeout * (self.config.signing_retries + 2);
        if let Some(session) = self.session.as_mut() {
            session.deadline = now + window;
        }

        Ok(vec![PoolAction::SignLocal {
            session: id,
            tx,
            inputs: entry.inputs.iter().map(|i| i.outpoint).collect(),
        }])
    }

    fn on_complete(&mut self, id: SessionId, success: bool, message: String) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Participant) {
            return Ok(Vec::new());
        }
        if !success {
            return Ok(self.fail(message));
        }
        if self.state != PoolState::Signing {
            return Ok(self.fail("Unexpected completion"));
        }
        self.set_state(PoolState::Transmission)?;
        self.set_state(PoolState::Success)?;
        info!("Session {} completed: {}", id, message);
        self.last_message = message;
        Ok(Vec::new())
    }

    // Host side

    fn on_join_queue(
        &mut self,
        from: ParticipantId,
        id: SessionId,
        mask: u32,
        now: Instant,
    ) -> Result<Vec<PoolAction>> {
        if self.config.lite_mode {
            return Ok(Vec::new());
        }
        let Some(denomination) = self.single_denomination(mask) else {
            debug!("Ignoring join request from {} with mask {:#x}", from, mask);
            return Ok(Vec::new());
        };

        let joinable = self
            .session
            .as_ref()
            .filter(|s| {
                self.state == PoolState::AcceptingEntries
                    && s.is_host()
                    && s.denomination == denomination
                    && !self.entries.is_full()
            })
            .map(|s| s.id);

        let session_id = if let Some(existing) = joinable {
            existing
        } else if self.session.is_none() && self.state == PoolState::Idle {
            self.set_state(PoolState::AcceptingEntries)?;
            self.entries.clear();
            self.session = Some(Session::new(
                id,
                Role::Host,
                denomination,
                now + self.config.submission_timeout,
            ));
            info!("Hosting session {} for denomination {}", id, format_amount(denomination.value()));
            id
        } else {
            debug!("Ignoring join request from {} in state {}", from, self.state);
            return Ok(Vec::new());
        };

        Ok(vec![PoolAction::Send {
            to: Recipient::Participant(from),
            message: PoolMessage::QueueReady {
                session: session_id,
                denom_mask: mask,
            },
        }])
    }

    /// Admit an entry into the hosted session. Signing starts as soon as the
    /// pool is full.
    fn submit_entry(&mut self, entry: Entry, now: Instant) -> Result<Vec<PoolAction>> {
        let denomination = match &self.session {
            Some(session) if session.is_host() => session.denomination,
            _ => return Err(AdmissionError::NotAccepting(self.state).into()),
        };
        self.entries.try_admit(entry, self.state, denomination.value())?;

        if self.entries.is_full() {
            return self.begin_signing(now);
        }
        Ok(Vec::new())
    }

    fn on_entry(
        &mut self,
        from: ParticipantId,
        id: SessionId,
        entry: Entry,
        now: Instant,
    ) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Host) {
            return Ok(Vec::new());
        }

        let reply = |accepted: bool, reason: String, entries: usize| PoolAction::Send {
            to: Recipient::Participant(from),
            message: PoolMessage::EntryStatus {
                session: id,
                accepted,
                reason,
                entries: entries as u32,
            },
        };

        match self.submit_entry(entry, now) {
            Ok(mut actions) => {
                actions.insert(0, reply(true, String::new(), self.entries.count()));
                Ok(actions)
            }
            Err(MixingError::Admission(e)) => {
                debug!("Rejected entry from {}: {}", from, e);
                Ok(vec![reply(false, e.to_string(), self.entries.count())])
            }
            Err(e) => Err(e),
        }
    }

    fn begin_signing(&mut self, now: Instant) -> Result<Vec<PoolAction>> {
        self.set_state(PoolState::Signing)?;
        let (coordinator, outcome) =
            SigningCoordinator::begin(self.entries.entries(), self.config.signing_policy(), now);
        if let Some(session) = self.session.as_mut() {
            info!("Session {} has {} entries, collecting signatures", session.id, self.entries.count());
            session.signing = Some(coordinator);
        }
        self.apply_signing_outcome(outcome)
    }

    fn apply_signing_outcome(&mut self, outcome: SigningOutcome) -> Result<Vec<PoolAction>> {
        match outcome {
            SigningOutcome::Pending {
                requests,
            } => Ok(self.signature_requests(&requests)),
            SigningOutcome::Complete(tx) => self.finalize(tx),
            SigningOutcome::Failed(reason) => Ok(self.fail(reason)),
        }
    }

    fn signature_requests(&self, requests: &[ParticipantId]) -> Vec<PoolAction> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let Some(coordinator) = session.signing.as_ref() else {
            return Vec::new();
        };
        let tx = coordinator.transaction();

        requests
            .iter()
            .map(|&participant| PoolAction::Send {
                to: Recipient::Participant(participant),
                message: PoolMessage::SignRequest {
                    session: session.id,
                    tx: tx.clone(),
                },
            })
            .collect()
    }

    fn on_signatures(
        &mut self,
        from: ParticipantId,
        id: SessionId,
        signatures: Vec<InputSignature>,
    ) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Host) || self.state != PoolState::Signing {
            return Ok(Vec::new());
        }
        let Some(coordinator) = self.session.as_mut().and_then(|s| s.signing.as_mut()) else {
            return Ok(Vec::new());
        };

        match coordinator.add_signatures(from, signatures) {
            Ok(outcome) => {
                if coordinator.is_signed(from) {
                    self.entries.mark_signed(from);
                }
                self.apply_signing_outcome(outcome)
            }
            Err(e) => {
                warn!("Ignoring signatures from {}: {}", from, e);
                Ok(Vec::new())
            }
        }
    }

    fn finalize(&mut self, tx: Transaction) -> Result<Vec<PoolAction>> {
        self.set_state(PoolState::FinalizeTransaction)?;
        if !tx.is_fully_signed() {
            return Ok(self.fail("Transaction not fully signed"));
        }
        self.set_state(PoolState::Transmission)?;

        let Some(id) = self.session_id() else {
            return Ok(self.fail("Session vanished before transmission"));
        };
        info!("Transmitting joint transaction {} with {} inputs", tx.txid(), tx.input.len());
        Ok(vec![PoolAction::Broadcast {
            session: id,
            tx,
        }])
    }

    // Collaborator results

    /// Signatures produced by the local wallet for a `SignLocal` action.
    pub fn on_local_signatures(
        &mut self,
        id: SessionId,
        result: WalletResult<Vec<InputSignature>>,
    ) -> Result<Vec<PoolAction>> {
        if !self.current(id, Role::Participant) || self.state != PoolState::Signing {
            debug!("Dropping signatures for stale session {}", id);
            return Ok(Vec::new());
        }

        match result {
            Ok(signatures) => Ok(vec![PoolAction::Send {
                to: Recipient::Coordinator,
                message: PoolMessage::Signatures {
                    session: id,
                    signatures,
                },
            }]),
            Err(e) => Ok(self.fail(format!("Signing failed: {}", e))),
        }
    }

    /// Outcome of a `Broadcast` action.
    pub fn on_broadcast_result(
        &mut self,
        id: SessionId,
        result: std::result::Result<Txid, BroadcastRejection>,
    ) -> Result<Vec<PoolAction>> {
        if self.session_id() != Some(id) || self.state != PoolState::Transmission {
            debug!("Dropping broadcast result for stale session {}", id);
            return Ok(Vec::new());
        }

        match result {
            Ok(txid) => {
                info!("Joint transaction {} accepted by the network", txid);
                let actions = self.notify_participants(true, Some(txid), "Transaction created successfully");
                self.set_state(PoolState::Success)?;
                self.last_message = "Transaction created successfully".to_string();
                Ok(actions)
            }
            Err(rejection) => Ok(self.fail(rejection.reason)),
        }
    }

    // Messages and timers

    /// Handle a protocol message from a peer. Messages for other sessions are ignored.
    pub fn handle_message(
        &mut self,
        from: ParticipantId,
        message: PoolMessage,
        now: Instant,
    ) -> Result<Vec<PoolAction>> {
        debug!("Received {} from {} for session {}", message.command(), from, message.session());
        if from.is_local() {
            warn!("Dropping {} claiming to come from the local wallet", message.command());
            return Ok(Vec::new());
        }
        match message {
            PoolMessage::JoinQueue {
                session,
                denom_mask,
            } => self.on_join_queue(from, session, denom_mask, now),
            PoolMessage::QueueReady {
                session,
                denom_mask,
            } => self.on_queue_ready(session, denom_mask, now),
            PoolMessage::Entry {
                session,
                inputs,
                outputs,
            } => self.on_entry(from, session, Entry::new(from, inputs, outputs, now), now),
            PoolMessage::EntryStatus {
                session,
                accepted,
                reason,
                entries,
            } => self.on_entry_status(session, accepted, reason, entries),
            PoolMessage::SignRequest {
                session,
                tx,
            } => self.on_sign_request(session, tx, now),
            PoolMessage::Signatures {
                session,
                signatures,
            } => self.on_signatures(from, session, signatures),
            PoolMessage::Complete {
                session,
                success,
                message,
                ..
            } => self.on_complete(session, success, message),
        }
    }

    /// Run the timers of the current phase.
    pub fn tick(&mut self, now: Instant) -> Result<Vec<PoolAction>> {
        let Some(session) = self.session.as_ref() else {
            return Ok(Vec::new());
        };
        let expired = now >= session.deadline;

        match (self.state, session.role) {
            (PoolState::Queue, _) if expired => Ok(self.fail("Queue timeout")),
            (PoolState::AcceptingEntries, Role::Host) if expired => {
                if self.entries.count() >= self.config.min_participants {
                    info!("Submission window closed with {} entries", self.entries.count());
                    self.begin_signing(now)
                } else {
                    Ok(self.fail("Session timed out, not enough entries"))
                }
            }
            (PoolState::AcceptingEntries, Role::Participant) if expired => {
                Ok(self.fail("Session timed out"))
            }
            (PoolState::Signing, Role::Host) => {
                let Some(coordinator) = self.session.as_mut().and_then(|s| s.signing.as_mut()) else {
                    return Ok(self.fail("Signing state missing"));
                };
                let (dropped, outcome) = coordinator.check_timeouts(now);
                for participant in &dropped {
                    self.entries.evict(*participant);
                }
                self.apply_signing_outcome(outcome)
            }
            (PoolState::Signing, Role::Participant) if expired => Ok(self.fail("Signing timed out")),
            _ => Ok(Vec::new()),
        }
    }
}

/// Whether `tx` spends all of `entry`'s inputs and pays all of its outputs.
fn contains_entry(tx: &Transaction, entry: &Entry) -> bool {
    let inputs = entry
        .inputs
        .iter()
        .all(|i| tx.input.iter().any(|txin| txin.previous_output == i.outpoint));
    let outputs = entry.outputs.iter().all(|o| {
        let wanted = entry.outputs.iter().filter(|x| *x == o).count();
        tx.output.iter().filter(|x| *x == o).count() >= wanted
    });
    inputs && outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{denominated_entry, funded_snapshot};
    use crate::types::COIN;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn config() -> MixingConfig {
        MixingConfig::regtest().with_enabled(true)
    }

    fn host_session(pool: &mut MixingPool, now: Instant) -> SessionId {
        let id = SessionId(7);
        let actions = pool
            .handle_message(
                ParticipantId(1),
                PoolMessage::JoinQueue {
                    session: id,
                    denom_mask: pool.catalog().find(COIN).unwrap().mask(),
                },
                now,
            )
            .unwrap();
        assert_eq!(actions.len(), 1);
        id
    }

    fn entry_message(id: SessionId, participant: u64) -> PoolMessage {
        let entry = denominated_entry(ParticipantId(participant), participant as u8, COIN, 20_000, 1);
        PoolMessage::Entry {
            session: id,
            inputs: entry.inputs,
            outputs: entry.outputs,
        }
    }

    #[test]
    fn test_join_request_opens_hosted_session() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let id = host_session(&mut pool, now);

        assert_eq!(pool.state(), PoolState::AcceptingEntries);
        assert_eq!(pool.role(), Some(Role::Host));
        assert_eq!(pool.session_id(), Some(id));
        assert_eq!(pool.status().denomination_label(), "1");
    }

    #[test]
    fn test_invalid_mask_is_ignored() {
        let mut pool = MixingPool::new(config()).unwrap();
        let actions = pool
            .handle_message(
                ParticipantId(1),
                PoolMessage::JoinQueue {
                    session: SessionId(1),
                    denom_mask: 0b0110,
                },
                Instant::now(),
            )
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(pool.state(), PoolState::Idle);
    }

    #[test]
    fn test_rejected_entry_gets_negative_status() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let id = host_session(&mut pool, now);

        pool.handle_message(ParticipantId(1), entry_message(id, 1), now).unwrap();
        // Same participant again
        let actions = pool.handle_message(ParticipantId(1), entry_message(id, 1), now).unwrap();
        assert_matches!(
            actions.as_slice(),
            [PoolAction::Send {
                message: PoolMessage::EntryStatus {
                    accepted: false,
                    ..
                },
                ..
            }]
        );
        assert_eq!(pool.entries_count(), 1);
        assert_eq!(pool.state(), PoolState::AcceptingEntries);
    }

    #[test]
    fn test_stale_session_messages_are_ignored() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let _ = host_session(&mut pool, now);

        let actions = pool.handle_message(ParticipantId(2), entry_message(SessionId(99), 2), now).unwrap();
        assert!(actions.is_empty());
        assert_eq!(pool.entries_count(), 0);
    }

    #[test]
    fn test_messages_from_local_wallet_are_dropped() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let actions = pool
            .handle_message(
                ParticipantId::LOCAL,
                PoolMessage::JoinQueue {
                    session: SessionId(7),
                    denom_mask: pool.catalog().find(COIN).unwrap().mask(),
                },
                now,
            )
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(pool.state(), PoolState::Idle);
        assert_eq!(pool.role(), None);
    }

    #[test]
    fn test_local_signatures_ignored_while_hosting() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let id = host_session(&mut pool, now);
        pool.handle_message(ParticipantId(1), entry_message(id, 1), now).unwrap();
        pool.handle_message(ParticipantId(2), entry_message(id, 2), now).unwrap();
        pool.tick(now + pool.config().submission_timeout).unwrap();
        assert_eq!(pool.state(), PoolState::Signing);

        let actions = pool.on_local_signatures(id, Ok(Vec::new())).unwrap();
        assert!(actions.is_empty());
        assert_eq!(pool.state(), PoolState::Signing);
    }

    #[test]
    fn test_submission_timeout_without_enough_entries_fails() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let id = host_session(&mut pool, now);
        pool.handle_message(ParticipantId(1), entry_message(id, 1), now).unwrap();

        let later = now + pool.config().submission_timeout;
        pool.tick(later).unwrap();
        assert_eq!(pool.state(), PoolState::Error);
        assert_eq!(pool.last_message(), "Session timed out, not enough entries");
    }

    #[test]
    fn test_submission_timeout_with_enough_entries_signs() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let id = host_session(&mut pool, now);
        pool.handle_message(ParticipantId(1), entry_message(id, 1), now).unwrap();
        pool.handle_message(ParticipantId(2), entry_message(id, 2), now).unwrap();

        let actions = pool.tick(now + pool.config().submission_timeout).unwrap();
        assert_eq!(pool.state(), PoolState::Signing);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_enable_refusals() {
        let mut pool = MixingPool::new(MixingConfig::regtest()).unwrap();

        let poor = funded_snapshot(COIN);
        assert_matches!(
            pool.enable(&poor),
            Err(MixingError::InsufficientBalance {
                minimum: 149_000_000
            })
        );
        assert!(!pool.is_enabled());

        let mut locked = funded_snapshot(10 * COIN);
        locked.locked = true;
        assert_matches!(pool.enable(&locked), Err(MixingError::Wallet(WalletError::Locked)));

        assert!(pool.toggle(&funded_snapshot(149_000_000)).unwrap());
        assert!(pool.is_enabled());
        assert!(!pool.toggle(&poor).unwrap());
    }

    #[test]
    fn test_lite_mode_refuses_enable() {
        let mut pool = MixingPool::new(MixingConfig::regtest().with_lite_mode(true)).unwrap();
        assert_matches!(pool.enable(&funded_snapshot(10 * COIN)), Err(MixingError::Unavailable("lite mode")));
    }

    #[test]
    fn test_block_refresh_is_throttled() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        assert!(pool.on_new_block(100, now));
        assert!(!pool.on_new_block(100, now + Duration::from_secs(20)));
        assert!(!pool.on_new_block(101, now + Duration::from_secs(5)));
        assert_eq!(pool.cached_num_blocks(), 100);
        assert!(pool.on_new_block(101, now + Duration::from_secs(10)));
        assert_eq!(pool.cached_num_blocks(), 101);
    }

    #[test]
    fn test_check_ignores_non_terminal_states() {
        let mut pool = MixingPool::new(config()).unwrap();
        let now = Instant::now();
        let _ = host_session(&mut pool, now);
        assert!(!pool.check().unwrap());
        assert_eq!(pool.state(), PoolState::AcceptingEntries);
    }

    #[test]
    fn test_error_check_returns_to_idle_and_rearms() {
        let mut pool = MixingPool::new(config()).unwrap();
        assert!(pool.take_scheduler_request());
        let now = Instant::now();
        let _ = host_session(&mut pool, now);
        pool.tick(now + pool.config().submission_timeout).unwrap();
        assert_eq!(pool.state(), PoolState::Error);

        assert!(pool.check().unwrap());
        assert_eq!(pool.state(), PoolState::Idle);
        assert_eq!(pool.session_denom(), 0);
        assert_eq!(pool.entries_count(), 0);
        assert!(pool.take_scheduler_request());
    }

    #[test]
    fn test_join_queue_validates_own_entry() {
        let mut pool = MixingPool::new(config()).unwrap();
        let denomination = pool.catalog().find(COIN).unwrap();
        let mut entry = denominated_entry(ParticipantId::LOCAL, 1, COIN, 20_000, 1);
        entry.inputs[0].value += 1;

        assert_matches!(
            pool.join_queue(entry, denomination, Instant::now()),
            Err(MixingError::Admission(AdmissionError::WrongDenomination { .. }))
        );
        assert_eq!(pool.state(), PoolState::Idle);
    }

    #[test]
    fn test_contains_entry() {
        let entry = denominated_entry(ParticipantId(1), 1, COIN, 20_000, 2);
        let mut tx = Transaction {
            version: 1,
            input: entry
                .inputs
                .iter()
                .map(|i| crate::types::TxIn {
                    previous_output: i.outpoint,
                    script_sig: vec![],
                })
                .collect(),
            output: entry.outputs.clone(),
        };
        assert!(contains_entry(&tx, &entry));
        tx.output.pop();
        assert!(!contains_entry(&tx, &entry));
    }
}
