//! Async driver around [`MixingPool`].
//!
//! [`MixingService::run`] owns the pool and is the only place it is mutated.
//! Commands arrive over an unbounded channel from [`MixingHandle`]; status
//! snapshots go the other way through a watch channel.

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MixingConfig;
use crate::denomination::Denomination;
use crate::entry_pool::Entry;
use crate::error::{MixingError, Result};
use crate::interface::{Broadcaster, ChainTip, MixingWallet, PeerTransport, WalletSnapshot};
use crate::messages::PoolMessage;
use crate::pool::{MixingPool, PoolAction, PoolState, PoolStatus};
use crate::progress::ProgressReport;
use crate::scheduler::SchedulerDecision;
use crate::types::{ParticipantId, TxOut};

async fn receive<T>(receiver: oneshot::Receiver<T>) -> Result<T> {
    receiver.await.map_err(|_| MixingError::ServiceStopped)
}

/// Requests handled by the service loop.
pub enum MixingCommand {
    DoAutomaticDenominating {
        sender: oneshot::Sender<SchedulerDecision>,
    },
    Reset {
        sender: oneshot::Sender<()>,
    },
    Enable {
        sender: oneshot::Sender<Result<()>>,
    },
    Disable {
        sender: oneshot::Sender<()>,
    },
    Toggle {
        sender: oneshot::Sender<Result<bool>>,
    },
    Deliver {
        from: ParticipantId,
        message: PoolMessage,
    },
}

impl Display for MixingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixingCommand::DoAutomaticDenominating {
                ..
            } => write!(f, "DoAutomaticDenominating"),
            MixingCommand::Reset {
                ..
            } => write!(f, "Reset"),
            MixingCommand::Enable {
                ..
            } => write!(f, "Enable"),
            MixingCommand::Disable {
                ..
            } => write!(f, "Disable"),
            MixingCommand::Toggle {
                ..
            } => write!(f, "Toggle"),
            MixingCommand::Deliver {
                from,
                message,
            } => write!(f, "Deliver({}, {})", from, message.command()),
        }
    }
}

/// Client side of a running [`MixingService`].
#[derive(Clone)]
pub struct MixingHandle {
    pub command_sender: UnboundedSender<MixingCommand>,
    status: watch::Receiver<PoolStatus>,
}

impl MixingHandle {
    /// Latest published status.
    pub fn status(&self) -> PoolStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PoolState {
        self.status.borrow().state
    }

    pub fn entries_count(&self) -> usize {
        self.status.borrow().entries
    }

    pub fn last_entry_accepted(&self) -> bool {
        self.status.borrow().last_entry_accepted
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.status.clone()
    }

    fn send(&self, command: MixingCommand) -> Result<()> {
        self.command_sender.send(command).map_err(|_| MixingError::ServiceStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> MixingCommand) -> Result<T> {
        let (sender, receiver) = oneshot::channel();
        self.send(command(sender))?;
        receive(receiver).await
    }

    /// Evaluate the scheduler now, clearing an exhausted retry budget.
    pub async fn do_automatic_denominating(&self) -> Result<SchedulerDecision> {
        self.request(|sender| MixingCommand::DoAutomaticDenominating {
            sender,
        })
        .await
    }

    /// Cancel whatever the pool is doing and return to idle.
    pub async fn reset(&self) -> Result<()> {
        self.request(|sender| MixingCommand::Reset {
            sender,
        })
        .await
    }

    pub async fn enable(&self) -> Result<()> {
        self.request(|sender| MixingCommand::Enable {
            sender,
        })
        .await?
    }

    pub async fn disable(&self) -> Result<()> {
        self.request(|sender| MixingCommand::Disable {
            sender,
        })
        .await
    }

    /// Flip the enabled flag, returning the new value.
    pub async fn toggle(&self) -> Result<bool> {
        self.request(|sender| MixingCommand::Toggle {
            sender,
        })
        .await?
    }

    /// Hand an inbound protocol message to the service.
    pub fn deliver(&self, from: ParticipantId, message: PoolMessage) -> Result<()> {
        self.send(MixingCommand::Deliver {
            from,
            message,
        })
    }

    /// Decode and deliver a raw message.
    pub fn deliver_bytes(&self, from: ParticipantId, bytes: &[u8]) -> Result<()> {
        let message = PoolMessage::decode(bytes)?;
        self.deliver(from, message)
    }
}

/// External collaborators of the service.
#[derive(Clone)]
pub struct Collaborators {
    pub wallet: Arc<dyn MixingWallet>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub transport: Arc<dyn PeerTransport>,
    pub chain: Arc<dyn ChainTip>,
}

struct ServiceCore {
    pool: MixingPool,
    collaborators: Collaborators,
    status_sender: watch::Sender<PoolStatus>,
    last_status_text: String,
}

/// Owns the pool and executes its actions.
pub struct MixingService {
    core: ServiceCore,
    command_receiver: UnboundedReceiver<MixingCommand>,
}

impl MixingService {
    /// Build the service and its handle. Fails on an invalid configuration.
    pub fn new(config: MixingConfig, collaborators: Collaborators) -> Result<(Self, MixingHandle)> {
        let pool = MixingPool::new(config)?;
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (status_sender, status) = watch::channel(pool.status());

        let service = Self {
            core: ServiceCore {
                pool,
                collaborators,
                status_sender,
                last_status_text: String::new(),
            },
            command_receiver,
        };
        let handle = MixingHandle {
            command_sender,
            status,
        };
        Ok((service, handle))
    }

    /// Run until `shutdown` fires or every handle is dropped.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            mut core,
            mut command_receiver,
        } = self;

        let mut tick_interval = tokio::time::interval(core.pool.config().tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Mixing service started on {:?}", core.pool.config().network);

        loop {
            tokio::select! {
                received = command_receiver.recv() => {
                    match received {
                        None => {
                            warn!("MixingCommand channel closed.");
                            break;
                        }
                        Some(command) => {
                            core.handle_command(command)
                                .await
                                .unwrap_or_else(|e| error!("Failed to handle command: {}", e));
                        }
                    }
                }
                _ = tick_interval.tick() => {
                    if let Err(e) = core.on_tick().await {
                        warn!("Mixing tick error: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Mixing service run loop cancelled");
                    break;
                }
            }
        }

        core.pool.reset();
        core.publish();
        info!("Mixing service stopped");
        Ok(())
    }
}

impl ServiceCore {
    async fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot::capture(self.collaborators.wallet.as_ref()).await
    }

    async fn handle_command(&mut self, command: MixingCommand) -> Result<()> {
        debug!("Handling {}", command);
        match command {
            MixingCommand::DoAutomaticDenominating {
                sender,
            } => {
                let initial_block_download =
                    self.collaborators.chain.is_initial_block_download().await;
                let decision = self.start_round(true, initial_block_download).await?;
                let _ = sender.send(decision);
            }
            MixingCommand::Reset {
                sender,
            } => {
                self.pool.reset();
                self.publish();
                let _ = sender.send(());
            }
            MixingCommand::Enable {
                sender,
            } => {
                let snapshot = self.snapshot().await;
                let result = self.pool.enable(&snapshot);
                self.publish();
                let _ = sender.send(result);
            }
            MixingCommand::Disable {
                sender,
            } => {
                self.pool.disable();
                self.publish();
                let _ = sender.send(());
            }
            MixingCommand::Toggle {
                sender,
            } => {
                let snapshot = self.snapshot().await;
                let result = self.pool.toggle(&snapshot);
                self.publish();
                let _ = sender.send(result);
            }
            MixingCommand::Deliver {
                from,
                message,
            } => {
                let actions = self.pool.handle_message(from, message, Instant::now())?;
                self.execute(actions).await?;
                self.settle()?;
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        let height = self.collaborators.chain.tip_height().await;
        let initial_block_download = self.collaborators.chain.is_initial_block_download().await;
        let now = Instant::now();

        if !initial_block_download && self.pool.on_new_block(height, now) {
            let snapshot = self.snapshot().await;
            self.pool.set_progress(ProgressReport::evaluate(&snapshot, self.pool.config()));
        }

        let actions = self.pool.tick(now)?;
        self.execute(actions).await?;
        self.settle()?;

        if self.pool.take_scheduler_request() {
            self.start_round(false, initial_block_download).await?;
        }
        Ok(())
    }

    /// Publish, then close out a finished round.
    fn settle(&mut self) -> Result<()> {
        self.publish();
        if self.pool.state().is_terminal() {
            self.pool.check()?;
            self.publish();
        }
        Ok(())
    }

    /// Ask the scheduler for a decision and join a round when it says so.
    async fn start_round(
        &mut self,
        user_initiated: bool,
        initial_block_download: bool,
    ) -> Result<SchedulerDecision> {
        let snapshot = self.snapshot().await;
        let decision =
            self.pool.do_automatic_denominating(&snapshot, initial_block_download, user_initiated);

        if let SchedulerDecision::Start {
            max_amount,
        } = decision
        {
            match self.build_entry(max_amount).await? {
                Some((entry, denomination)) => {
                    let actions = self.pool.join_queue(entry, denomination, Instant::now())?;
                    self.execute(actions).await?;
                }
                None => info!("No denominated inputs available within {}", max_amount),
            }
        }
        self.publish();
        Ok(decision)
    }

    /// Select inputs for the largest denomination the wallet can fill.
    async fn build_entry(&self, max_amount: u64) -> Result<Option<(Entry, Denomination)>> {
        let wallet = &self.collaborators.wallet;
        for denomination in self.pool.catalog().iter().rev() {
            if denomination.value() > max_amount {
                continue;
            }
            let inputs = wallet.select_denominated_inputs(denomination, max_amount).await?;
            if inputs.is_empty() {
                continue;
            }

            let mut outputs = Vec::with_capacity(inputs.len());
            for _ in 0..inputs.len() {
                outputs.push(TxOut {
                    value: denomination.value(),
                    script_pubkey: wallet.new_destination().await?,
                });
            }
            let entry = Entry::new(ParticipantId::LOCAL, inputs, outputs, Instant::now());
            return Ok(Some((entry, denomination)));
        }
        Ok(None)
    }

    /// Carry out pool actions, feeding collaborator results back into the pool.
    async fn execute(&mut self, actions: Vec<PoolAction>) -> Result<()> {
        let mut queue: VecDeque<PoolAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            let follow_up = match action {
                PoolAction::SignLocal {
                    session,
                    tx,
                    inputs,
                } => {
                    let result = self.collaborators.wallet.sign_transaction(&tx, &inputs).await;
                    self.pool.on_local_signatures(session, result)?
                }
                PoolAction::Send {
                    to,
                    message,
                } => {
                    let command = message.command();
                    if let Err(e) = self.collaborators.transport.send(to, message).await {
                        warn!("Failed to send {} to {:?}: {}", command, to, e);
                    }
                    Vec::new()
                }
                PoolAction::Broadcast {
                    session,
                    tx,
                } => {
                    let result = self.collaborators.broadcaster.broadcast(&tx).await;
                    self.pool.on_broadcast_result(session, result)?
                }
            };
            queue.extend(follow_up);
        }
        Ok(())
    }

    fn publish(&mut self) {
        let status = self.pool.status();
        let text = status.describe();
        if text != self.last_status_text {
            info!("Last mixing message: {}", text);
            self.last_status_text = text;
        }
        self.status_sender.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBroadcaster, MockChainTip, MockTransport, MockWallet, funded_snapshot};
    use crate::types::COIN;

    fn collaborators(wallet: Arc<MockWallet>) -> Collaborators {
        Collaborators {
            wallet,
            broadcaster: Arc::new(MockBroadcaster::new()),
            transport: Arc::new(MockTransport::new()),
            chain: Arc::new(MockChainTip::new(100)),
        }
    }

    #[tokio::test]
    async fn test_build_entry_prefers_largest_denomination() {
        let wallet = Arc::new(MockWallet::new(funded_snapshot(200 * COIN)));
        wallet.add_coins(COIN, 20_000, 2, 1);
        wallet.add_coins(10 * COIN, 20_000, 1, 2);
        let (service, _handle) =
            MixingService::new(MixingConfig::regtest(), collaborators(wallet)).unwrap();

        let (entry, denomination) = service.core.build_entry(50 * COIN).await.unwrap().unwrap();
        assert_eq!(denomination.value(), 10 * COIN);
        assert_eq!(entry.inputs.len(), 1);
        assert_eq!(entry.outputs.len(), 1);
        assert_eq!(entry.outputs[0].value, 10 * COIN);

        let (_, small) = service.core.build_entry(5 * COIN).await.unwrap().unwrap();
        assert_eq!(small.value(), COIN);
    }

    #[tokio::test]
    async fn test_build_entry_without_coins() {
        let wallet = Arc::new(MockWallet::new(funded_snapshot(200 * COIN)));
        let (service, _handle) =
            MixingService::new(MixingConfig::regtest(), collaborators(wallet)).unwrap();
        assert!(service.core.build_entry(50 * COIN).await.unwrap().is_none());
    }

    #[test]
    fn test_command_display() {
        let (sender, _receiver) = oneshot::channel();
        let command = MixingCommand::Toggle {
            sender,
        };
        assert_eq!(command.to_string(), "Toggle");
    }
}
