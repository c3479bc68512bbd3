//! Queue ordering and session façade behavior: FIFO resolution, depth
//! accounting, identity lifecycle, and error surfacing.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, TxHash, U256};
use tokio::sync::oneshot::error::TryRecvError;

use blocklog::config::Config;
use blocklog::error::PipelineError;
use blocklog::fees::{FeePolicy, FeeSchedule};
use blocklog::keystore::{Identity, KeyStore};
use blocklog::ledger::mock::MockEndpoint;
use blocklog::ledger::LedgerEndpoint;
use blocklog::oracle::BalanceOracle;
use blocklog::queue::ActionQueue;
use blocklog::session::{SessionController, SessionState};
use blocklog::storage::MemoryStore;
use blocklog::submitter::{Submitter, SubmitterSettings};
use blocklog::types::{ActionKind, ActionPayload};

fn fast_config() -> Config {
    let mut config = Config::default();
    config.submitter.max_attempts = 3;
    config.submitter.retry_base_delay_ms = 10;
    config.submitter.confirm_timeout_ms = 2_000;
    config.submitter.confirm_max_polls = 5;
    config.submitter.poll_absent_ms = 10;
    config.submitter.poll_pending_ms = 10;
    config.queue.inter_item_delay_ms = 5;
    config.session.min_refresh_spacing_ms = 0;
    config
}

fn dyn_endpoints(endpoints: &[Arc<MockEndpoint>]) -> Vec<Arc<dyn LedgerEndpoint>> {
    endpoints
        .iter()
        .map(|endpoint| endpoint.clone() as Arc<dyn LedgerEndpoint>)
        .collect()
}

fn submitter(endpoints: &[Arc<MockEndpoint>], config: &Config) -> Arc<Submitter> {
    let dyns = dyn_endpoints(endpoints);
    let oracle = Arc::new(BalanceOracle::new(dyns.clone()));
    let policy = FeePolicy::new(FeeSchedule::from_config(&config.fees).unwrap(), oracle);
    Arc::new(Submitter::new(
        dyns,
        policy,
        SubmitterSettings::from_config(&config.submitter),
        config.endpoints.chain_id,
    ))
}

fn controller(endpoints: &[Arc<MockEndpoint>], config: &Config) -> Arc<SessionController> {
    let keystore = KeyStore::new(Arc::new(MemoryStore::default()), "test_wallet_");
    SessionController::from_parts(keystore, dyn_endpoints(endpoints), config).unwrap()
}

fn owner() -> Address {
    Address::repeat_byte(0x55)
}

fn payload() -> ActionPayload {
    ActionPayload::new()
}

#[tokio::test]
async fn queue_resolves_in_fifo_order() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    endpoint.queue_send_hashes([
        TxHash::repeat_byte(0x01),
        TxHash::repeat_byte(0x02),
        TxHash::repeat_byte(0x03),
    ]);

    let state = Arc::new(SessionState::new());
    state.set_identity(Identity::generate(owner()));
    let queue = ActionQueue::spawn(
        submitter(&[endpoint.clone()], &config),
        state.clone(),
        Duration::from_millis(5),
    );

    // All three enqueued before the worker gets a chance to run.
    let rx1 = queue.submit(ActionKind::PlaceBlock, payload()).unwrap();
    let rx2 = queue.submit(ActionKind::ClearLine, payload()).unwrap();
    let rx3 = queue.submit(ActionKind::GameOver, payload()).unwrap();
    assert_eq!(queue.queued_depth(), 3);

    // Scripted hashes come back in submission order: no skip, no reorder.
    let r1 = rx1.await.unwrap();
    let r2 = rx2.await.unwrap();
    let r3 = rx3.await.unwrap();
    assert_eq!(r1.hash, Some(TxHash::repeat_byte(0x01)));
    assert_eq!(r2.hash, Some(TxHash::repeat_byte(0x02)));
    assert_eq!(r3.hash, Some(TxHash::repeat_byte(0x03)));

    assert_eq!(queue.queued_depth(), 0);
    assert_eq!(endpoint.sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn second_submission_queues_behind_first() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    // Keep the first item in confirmation for a few poll ticks.
    endpoint.queue_lookups([None, None, None]);

    let state = Arc::new(SessionState::new());
    state.set_identity(Identity::generate(owner()));
    let queue = ActionQueue::spawn(
        submitter(&[endpoint.clone()], &config),
        state.clone(),
        Duration::from_millis(5),
    );

    let rx1 = queue.submit(ActionKind::PlaceBlock, payload()).unwrap();
    // Let the worker pick up the first item.
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(state.status().is_pending());
    assert_eq!(queue.queued_depth(), 0);

    // Fired while the first is in flight: observably queued, depth 1.
    let mut rx2 = queue.submit(ActionKind::ClearLine, payload()).unwrap();
    assert_eq!(queue.queued_depth(), 1);

    let r1 = rx1.await.unwrap();
    assert!(r1.success);
    // Strictly after the first terminal status: the second is unresolved.
    assert!(matches!(rx2.try_recv(), Err(TryRecvError::Empty)));

    let r2 = rx2.await.unwrap();
    assert!(r2.success);
    assert_eq!(queue.queued_depth(), 0);
}

#[tokio::test]
async fn execute_action_updates_totals_and_status() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    let controller = controller(&[endpoint.clone()], &config);

    controller.init_identity(owner()).unwrap();
    let success = controller
        .execute_action(ActionKind::PlaceBlock, payload())
        .await;
    assert!(success);

    let status = controller.status();
    assert_eq!(status.totals.transactions, 1);
    assert!(status.totals.spent > U256::zero());
    assert_eq!(status.last_hash, Some(TxHash::repeat_byte(0xaa)));
    assert!(status.pending.is_none());
    // The post-action refresh picked up the live balance.
    assert_eq!(status.balance, U256::exp10(18));
    assert!(status.is_ready);
}

#[tokio::test]
async fn insufficient_funds_surfaces_to_caller() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    endpoint.set_balance(U256::from(1_000u64));
    let controller = controller(&[endpoint.clone()], &config);

    controller.init_identity(owner()).unwrap();
    let success = controller
        .execute_action(ActionKind::NewGame, payload())
        .await;

    assert!(!success);
    let status = controller.status();
    assert_eq!(status.totals.transactions, 0);
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("insufficient funds"));
    assert_eq!(endpoint.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn execute_action_without_identity_fails_fast() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    let controller = controller(&[endpoint.clone()], &config);

    let success = controller
        .execute_action(ActionKind::PlaceBlock, payload())
        .await;

    assert!(!success);
    assert!(controller.status().last_error.is_some());
    assert_eq!(endpoint.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn init_identity_is_stable_and_reset_is_idempotent() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    let controller = controller(&[endpoint], &config);

    let first = controller.init_identity(owner()).unwrap();
    // Re-initializing loads the same identity rather than minting one.
    let second = controller.init_identity(owner()).unwrap();
    assert_eq!(first, second);

    controller.reset_identity(owner()).unwrap();
    controller.reset_identity(owner()).unwrap();
    assert!(controller.status().address.is_none());

    // A fresh init after reset mints a new wallet.
    let third = controller.init_identity(owner()).unwrap();
    assert_ne!(first, third);
}

#[tokio::test]
async fn reset_is_refused_while_a_submission_is_in_flight() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    // Hold the first submission in confirmation for ~50ms.
    endpoint.set_lookup(None);
    endpoint.set_receipt(None);
    let controller = controller(&[endpoint.clone()], &config);

    controller.init_identity(owner()).unwrap();

    let background = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .execute_action(ActionKind::PlaceBlock, payload())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(15)).await;
    let err = controller.reset_identity(owner()).unwrap_err();
    assert!(matches!(err, PipelineError::Busy(_)));
    // The identity survived the refused reset.
    assert!(controller.status().address.is_some());

    // Times out as indeterminate, then the queue is drained and reset works.
    let success = background.await.unwrap();
    assert!(!success);
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.reset_identity(owner()).unwrap();
    assert!(controller.status().address.is_none());
}

#[tokio::test]
async fn failed_submission_still_drains_the_queue() {
    let config = fast_config();
    let endpoint = MockEndpoint::healthy("http://a");
    endpoint.fail_send("connection reset");

    let state = Arc::new(SessionState::new());
    state.set_identity(Identity::generate(owner()));
    let queue = ActionQueue::spawn(
        submitter(&[endpoint.clone()], &config),
        state.clone(),
        Duration::from_millis(5),
    );

    let rx1 = queue.submit(ActionKind::PlaceBlock, payload()).unwrap();
    let rx2 = queue.submit(ActionKind::ClearLine, payload()).unwrap();

    // First fails after its retry budget; the second still runs.
    let r1 = rx1.await.unwrap();
    assert!(!r1.success);
    let r2 = rx2.await.unwrap();
    assert!(!r2.success);
    assert_eq!(queue.queued_depth(), 0);
}
