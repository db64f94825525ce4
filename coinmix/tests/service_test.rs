//! The async service against mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use coinmix::test_utils::{
    MockBroadcaster, MockChainTip, MockTransport, MockWallet, denominated_entry, funded_snapshot,
};
use coinmix::types::{InputSignature, TxIn};
use coinmix::{
    COIN, Collaborators, MixingConfig, MixingError, MixingHandle, MixingService, ParticipantId,
    PoolMessage, PoolState, PoolStatus, Recipient, SchedulerDecision, SessionId, Transaction,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FEE: u64 = 20_000;

struct Harness {
    handle: MixingHandle,
    wallet: Arc<MockWallet>,
    broadcaster: Arc<MockBroadcaster>,
    transport: Arc<MockTransport>,
    shutdown: CancellationToken,
    task: JoinHandle<coinmix::Result<()>>,
}

fn start(config: MixingConfig, wallet: MockWallet) -> Harness {
    let wallet = Arc::new(wallet);
    let broadcaster = Arc::new(MockBroadcaster::new());
    let transport = Arc::new(MockTransport::new());
    let collaborators = Collaborators {
        wallet: wallet.clone(),
        broadcaster: broadcaster.clone(),
        transport: transport.clone(),
        chain: Arc::new(MockChainTip::new(1000)),
    };
    let (service, handle) = MixingService::new(config, collaborators).unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(service.run(shutdown.clone()));
    Harness {
        handle,
        wallet,
        broadcaster,
        transport,
        shutdown,
        task,
    }
}

async fn wait_until(handle: &MixingHandle, predicate: impl FnMut(&PoolStatus) -> bool) {
    let mut status = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("service stopped");
}

fn sent_commands(transport: &MockTransport) -> Vec<&'static str> {
    transport.sent().iter().map(|(_, m)| m.command()).collect()
}

#[tokio::test]
async fn test_enable_checks_wallet() {
    let wallet = MockWallet::new(funded_snapshot(COIN));
    let harness = start(MixingConfig::regtest(), wallet);

    assert_matches!(harness.handle.enable().await, Err(MixingError::InsufficientBalance { .. }));
    assert!(!harness.handle.status().enabled);

    harness.wallet.set_snapshot(funded_snapshot(2 * COIN));
    harness.handle.enable().await.unwrap();
    assert!(harness.handle.status().enabled);

    assert!(!harness.handle.toggle().await.unwrap());
    assert!(!harness.handle.status().enabled);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hosted_round_is_broadcast() {
    let harness = start(MixingConfig::regtest(), MockWallet::default());
    let handle = &harness.handle;
    let id = SessionId(42);
    let mask = 1 << 1; // one coin

    handle
        .deliver(
            ParticipantId(1),
            PoolMessage::JoinQueue {
                session: id,
                denom_mask: mask,
            },
        )
        .unwrap();
    for p in 1..=3u64 {
        let entry = denominated_entry(ParticipantId(p), p as u8, COIN, FEE, 1);
        handle
            .deliver(
                ParticipantId(p),
                PoolMessage::Entry {
                    session: id,
                    inputs: entry.inputs,
                    outputs: entry.outputs,
                },
            )
            .unwrap();
    }
    wait_until(handle, |s| s.state == PoolState::Signing).await;
    assert_eq!(handle.entries_count(), 3);

    for p in 1..=3u64 {
        let entry = denominated_entry(ParticipantId(p), p as u8, COIN, FEE, 1);
        let signatures = entry
            .inputs
            .iter()
            .map(|i| InputSignature {
                outpoint: i.outpoint,
                script_sig: vec![0x30, p as u8],
            })
            .collect();
        handle
            .deliver(
                ParticipantId(p),
                PoolMessage::Signatures {
                    session: id,
                    signatures,
                },
            )
            .unwrap();
    }
    wait_until(handle, |s| s.state == PoolState::Idle).await;
    assert_eq!(handle.status().rounds_completed, 0);
    let broadcasts = harness.broadcaster.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert!(broadcasts[0].is_fully_signed());

    let completions: Vec<_> = harness
        .transport
        .sent()
        .into_iter()
        .filter_map(|(to, m)| match m {
            PoolMessage::Complete {
                success: true,
                txid,
                ..
            } => Some((to, txid)),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 3);
    assert!(completions.iter().all(|(_, txid)| *txid == Some(broadcasts[0].txid())));
    assert!(completions.contains(&(Recipient::Participant(ParticipantId(2)), Some(broadcasts[0].txid()))));

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_participant_round_through_scheduler() {
    let wallet = MockWallet::new(funded_snapshot(10 * COIN));
    wallet.add_coins(COIN, FEE, 1, 9);
    let harness = start(MixingConfig::regtest().with_enabled(true), wallet);
    let handle = &harness.handle;

    // The scheduler starts a round on its own.
    wait_until(handle, |s| s.state == PoolState::Queue).await;
    let (to, join) = harness.transport.sent().remove(0);
    assert_eq!(to, Recipient::Coordinator);
    let denom_mask = match join {
        PoolMessage::JoinQueue {
            denom_mask,
            ..
        } => denom_mask,
        other => panic!("expected join_queue, got {}", other.command()),
    };
    assert_eq!(handle.status().session_denom_text, "1");
    assert_matches!(handle.do_automatic_denominating().await, Ok(SchedulerDecision::Busy(PoolState::Queue)));

    let coordinator = ParticipantId(100);
    let id = SessionId(0x5151);
    handle
        .deliver(
            coordinator,
            PoolMessage::QueueReady {
                session: id,
                denom_mask,
            },
        )
        .unwrap();
    wait_until(handle, |s| s.state == PoolState::AcceptingEntries).await;

    let (inputs, outputs) = harness
        .transport
        .sent()
        .into_iter()
        .find_map(|(_, m)| match m {
            PoolMessage::Entry {
                inputs,
                outputs,
                ..
            } => Some((inputs, outputs)),
            _ => None,
        })
        .unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(outputs[0].value, COIN);

    let tx = Transaction {
        version: 1,
        input: inputs
            .iter()
            .map(|i| TxIn {
                previous_output: i.outpoint,
                script_sig: Vec::new(),
            })
            .collect(),
        output: outputs,
    };
    handle
        .deliver(
            coordinator,
            PoolMessage::SignRequest {
                session: id,
                tx,
            },
        )
        .unwrap();
    wait_until(handle, |s| s.state == PoolState::Signing).await;
    assert_eq!(harness.wallet.sign_calls(), 1);
    assert!(sent_commands(&harness.transport).contains(&"signatures"));

    handle
        .deliver(
            coordinator,
            PoolMessage::Complete {
                session: id,
                success: true,
                txid: None,
                message: "Transaction created successfully".to_string(),
            },
        )
        .unwrap();
    wait_until(handle, |s| s.rounds_completed == 1).await;

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_scheduler_reports_why_it_waits() {
    let wallet = MockWallet::new(funded_snapshot(COIN));
    let harness = start(MixingConfig::regtest().with_enabled(true), wallet);

    let decision = harness.handle.do_automatic_denominating().await.unwrap();
    assert_matches!(decision, SchedulerDecision::BelowMinimumBalance { .. });
    assert_eq!(harness.handle.status().auto_denom_result, "Mixing requires at least 1.49 to use");

    harness.wallet.set_snapshot(funded_snapshot(10 * COIN));
    harness.wallet.set_locked(true);
    let decision = harness.handle.do_automatic_denominating().await.unwrap();
    assert_eq!(decision, SchedulerDecision::WalletLocked);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deliver_bytes_rejects_garbage() {
    let harness = start(MixingConfig::regtest(), MockWallet::default());

    let bytes = PoolMessage::JoinQueue {
        session: SessionId(3),
        denom_mask: 1 << 1,
    }
    .encode()
    .unwrap();
    harness.handle.deliver_bytes(ParticipantId(1), &bytes).unwrap();
    wait_until(&harness.handle, |s| s.state == PoolState::AcceptingEntries).await;

    assert_matches!(
        harness.handle.deliver_bytes(ParticipantId(1), &[0xff, 0xff, 0xff]),
        Err(MixingError::Codec(_))
    );

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_service() {
    let harness = start(MixingConfig::regtest(), MockWallet::default());
    harness.handle.reset().await.unwrap();

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();

    assert_matches!(harness.handle.reset().await, Err(MixingError::ServiceStopped));
    assert_eq!(harness.handle.state(), PoolState::Idle);
}
