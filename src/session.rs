//! Session controller: the façade the UI consumes
//!
//! Owns all observable session state (identity, balance, status, totals)
//! behind controlled mutation methods; no ambient globals. Boundary methods
//! never panic past this layer: every contract method returns a value or a
//! result.

use ethers::types::{Address, TxHash, U256};
use ethers::utils::parse_ether;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::fees::{FeePolicy, FeeSchedule};
use crate::keystore::{Identity, KeyStore};
use crate::ledger::{self, LedgerEndpoint};
use crate::oracle::BalanceOracle;
use crate::queue::ActionQueue;
use crate::storage;
use crate::submitter::{Submitter, SubmitterSettings};
use crate::types::{
    ActionKind, ActionPayload, SessionStatus, Totals, TransactionResult, TransactionStatus,
};

/// Observable state shared between the controller and the queue worker.
/// The worker is the only writer of `status`; the controller owns identity
/// and balance.
pub struct SessionState {
    identity: RwLock<Option<Identity>>,
    status: RwLock<TransactionStatus>,
    balance: RwLock<U256>,
    last_hash: RwLock<Option<TxHash>>,
    last_error: RwLock<Option<String>>,
    totals: RwLock<Totals>,
    pub(crate) queued: AtomicUsize,
    in_flight: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            identity: RwLock::new(None),
            status: RwLock::new(TransactionStatus::Idle),
            balance: RwLock::new(U256::zero()),
            last_hash: RwLock::new(None),
            last_error: RwLock::new(None),
            totals: RwLock::new(Totals::default()),
            queued: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn queued_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// A submission is in flight or waiting. While true, identity mutation
    /// is refused.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) || self.queued_depth() > 0
    }

    pub fn status(&self) -> TransactionStatus {
        self.status.read().clone()
    }

    // Queue worker: item picked up. The status lock serializes the counter
    // hand-off so an item is never counted as both queued and in flight.
    pub(crate) fn begin_dispatch(&self, action: ActionKind) {
        let mut status = self.status.write();
        self.in_flight.store(true, Ordering::SeqCst);
        self.queued.fetch_sub(1, Ordering::SeqCst);
        *status = TransactionStatus::Pending(action);
    }

    // Queue worker: terminal state reached.
    pub(crate) fn finish_dispatch(
        &self,
        action: ActionKind,
        result: &TransactionResult,
        base_fee: U256,
    ) {
        {
            let mut status = self.status.write();
            *status = match (&result.error, result.hash) {
                (None, Some(hash)) if result.success => TransactionStatus::Success(hash),
                (Some(PipelineError::ConfirmationTimeout { .. }), _) => {
                    TransactionStatus::Timeout(action)
                }
                (Some(err), _) => TransactionStatus::Failed(action, err.to_string()),
                _ => TransactionStatus::Failed(action, "unknown failure".to_string()),
            };
            self.in_flight.store(false, Ordering::SeqCst);
        }

        if result.success {
            *self.last_hash.write() = result.hash;
            let mut totals = self.totals.write();
            totals.transactions += 1;
            let gas_cost =
                result.gas_used.unwrap_or_default() * result.effective_rate.unwrap_or_default();
            totals.spent = totals.spent + base_fee + gas_cost;
        }
        if let Some(err) = &result.error {
            *self.last_error.write() = Some(err.to_string());
        }
    }

    pub(crate) fn set_idle(&self) {
        let mut status = self.status.write();
        if !status.is_pending() {
            *status = TransactionStatus::Idle;
        }
    }

    /// Make an identity current. Only the controller (or a test harness)
    /// may do this; never while a submission is in flight.
    pub fn set_identity(&self, identity: Identity) {
        *self.identity.write() = Some(identity);
    }

    pub(crate) fn clear_session(&self) {
        *self.identity.write() = None;
        *self.balance.write() = U256::zero();
        *self.status.write() = TransactionStatus::Idle;
        *self.last_hash.write() = None;
        *self.last_error.write() = None;
        *self.totals.write() = Totals::default();
    }

    pub(crate) fn set_balance(&self, balance: U256) {
        *self.balance.write() = balance;
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    fn snapshot(&self, funded_threshold: U256) -> SessionStatus {
        let address = self.identity.read().as_ref().map(|identity| identity.address);
        let balance = *self.balance.read();
        SessionStatus {
            address,
            balance,
            is_ready: address.is_some() && balance > funded_threshold,
            pending: self.status.read().pending_action(),
            queued: self.queued_depth(),
            last_hash: *self.last_hash.read(),
            last_error: self.last_error.read().clone(),
            totals: *self.totals.read(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates key store, balance oracle, and action queue behind the single
/// interface the UI layer is allowed to touch.
pub struct SessionController {
    keystore: KeyStore,
    oracle: Arc<BalanceOracle>,
    queue: ActionQueue,
    state: Arc<SessionState>,
    funded_threshold: U256,
    refresh_interval: Duration,
    min_refresh_spacing: Duration,
}

impl SessionController {
    /// Wire every component from configuration. Storage falls back to
    /// process-local memory when the durable store cannot be opened.
    pub fn bootstrap(config: &Config) -> Result<Arc<Self>, PipelineError> {
        config.validate()?;
        let endpoints = ledger::endpoints_from_urls(
            &config.endpoints.urls,
            Duration::from_millis(config.endpoints.call_timeout_ms),
        )?;
        let store = storage::open_store(&config.storage.path);
        let keystore = KeyStore::new(store, &config.storage.namespace);
        Self::from_parts(keystore, endpoints, config)
    }

    /// Assemble the controller around explicit parts. Used by `bootstrap`
    /// and by tests driving the pipeline through in-process endpoints.
    pub fn from_parts(
        keystore: KeyStore,
        endpoints: Vec<Arc<dyn LedgerEndpoint>>,
        config: &Config,
    ) -> Result<Arc<Self>, PipelineError> {
        let oracle = Arc::new(BalanceOracle::new(endpoints.clone()));
        let schedule = FeeSchedule::from_config(&config.fees)?;
        let fees = FeePolicy::new(schedule, oracle.clone());
        let submitter = Arc::new(Submitter::new(
            endpoints,
            fees,
            SubmitterSettings::from_config(&config.submitter),
            config.endpoints.chain_id,
        ));
        let state = Arc::new(SessionState::new());
        let queue = ActionQueue::spawn(
            submitter,
            state.clone(),
            Duration::from_millis(config.queue.inter_item_delay_ms),
        );
        let funded_threshold = parse_ether(&config.session.funded_threshold).map_err(|e| {
            PipelineError::Config(format!("bad session.funded_threshold: {e}"))
        })?;

        Ok(Arc::new(Self {
            keystore,
            oracle,
            queue,
            state,
            funded_threshold,
            refresh_interval: Duration::from_secs(config.session.refresh_interval_secs),
            min_refresh_spacing: Duration::from_millis(config.session.min_refresh_spacing_ms),
        }))
    }

    /// Load the owner's existing identity into the session without creating
    /// one.
    pub fn load_identity(&self, owner: Address) -> Result<Option<Address>, PipelineError> {
        match self.keystore.get(owner)? {
            Some(identity) => {
                let address = identity.address;
                self.state.set_identity(identity);
                Ok(Some(address))
            }
            None => Ok(None),
        }
    }

    /// Get or create the session identity for an owner and make it current.
    pub fn init_identity(&self, owner: Address) -> Result<Address, PipelineError> {
        let identity = match self.keystore.get(owner)? {
            Some(identity) => identity,
            None => self.keystore.create(owner)?,
        };
        let address = identity.address;
        self.state.set_identity(identity);
        info!(address = %format!("{address:#x}"), "session identity active");
        Ok(address)
    }

    /// Destroy the owner's identity and reset session state. Refused while
    /// a submission is in flight or queued: a reset must never race the
    /// secret key out from under an outstanding signing use. Idempotent
    /// when idle.
    pub fn reset_identity(&self, owner: Address) -> Result<(), PipelineError> {
        if self.state.is_busy() {
            return Err(PipelineError::Busy(
                "submissions in flight; retry once the queue drains".to_string(),
            ));
        }
        self.keystore.clear(owner)?;
        self.state.clear_session();
        info!(owner = %format!("{owner:#x}"), "session identity reset");
        Ok(())
    }

    /// Snapshot of the observable session state.
    pub fn status(&self) -> SessionStatus {
        self.state.snapshot(self.funded_threshold)
    }

    /// Submit a game action and wait for its terminal outcome. Resolves
    /// only after the item has cleared the queue; the boolean is the
    /// on-ledger success of this one action.
    pub async fn execute_action(&self, action: ActionKind, payload: ActionPayload) -> bool {
        if self.state.identity().is_none() {
            self.state
                .record_error("no session identity; initialize one first");
            return false;
        }

        let receiver = match self.queue.submit(action, payload) {
            Ok(receiver) => receiver,
            Err(err) => {
                self.state.record_error(err.to_string());
                return false;
            }
        };

        let result: TransactionResult = match receiver.await {
            Ok(result) => result,
            Err(_) => {
                self.state.record_error("queue worker dropped the request");
                return false;
            }
        };

        if result.success {
            // Pick up the spend without waiting for the background timer.
            let _ = self.refresh_now().await;
        }
        result.success
    }

    /// Manual balance re-check, debounced against the minimum spacing.
    pub async fn refresh(&self) {
        if !self.refresh_due() {
            debug!("skipping balance refresh, last one was too recent");
            return;
        }
        let _ = self.refresh_now().await;
    }

    async fn refresh_now(&self) -> Result<(), PipelineError> {
        let Some(identity) = self.state.identity() else {
            return Ok(());
        };
        *self.state.last_refresh.lock() = Some(Instant::now());
        match self.oracle.balance_of(identity.address).await {
            Ok(balance) => {
                debug!(balance = %balance, "balance refreshed");
                self.state.set_balance(balance);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "balance refresh failed");
                self.state.record_error(err.to_string());
                Err(err)
            }
        }
    }

    fn refresh_due(&self) -> bool {
        match *self.state.last_refresh.lock() {
            Some(last) => last.elapsed() >= self.min_refresh_spacing,
            None => true,
        }
    }

    /// Background deposit watcher: periodic refresh on a fixed interval,
    /// skipped when a refresh happened more recently than the minimum
    /// spacing.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                controller.refresh().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutPhase;

    #[test]
    fn snapshot_reflects_readiness_threshold() {
        let state = SessionState::new();
        let threshold = parse_ether("0.001").unwrap();

        // No identity: never ready.
        state.set_balance(threshold * U256::from(2u64));
        assert!(!state.snapshot(threshold).is_ready);

        state.set_identity(Identity::generate(Address::repeat_byte(0x01)));
        assert!(state.snapshot(threshold).is_ready);

        // Exactly at the threshold is not above it.
        state.set_balance(threshold);
        assert!(!state.snapshot(threshold).is_ready);
    }

    #[test]
    fn dispatch_accounting_never_double_counts() {
        let state = SessionState::new();
        state.queued.fetch_add(1, Ordering::SeqCst);
        assert_eq!(state.queued_depth(), 1);
        assert!(state.is_busy());

        state.begin_dispatch(ActionKind::PlaceBlock);
        assert_eq!(state.queued_depth(), 0);
        assert!(state.is_busy());
        assert!(state.status().is_pending());

        let result = TransactionResult::confirmed(
            TxHash::repeat_byte(0x0a),
            U256::from(21_000u64),
            U256::from(1_000_000_000u64),
        );
        state.finish_dispatch(ActionKind::PlaceBlock, &result, U256::from(100u64));
        assert!(!state.is_busy());
        assert_eq!(
            state.status(),
            TransactionStatus::Success(TxHash::repeat_byte(0x0a))
        );
        assert_eq!(state.snapshot(U256::zero()).totals.transactions, 1);
    }

    #[test]
    fn timeout_result_maps_to_timeout_status() {
        let state = SessionState::new();
        state.queued.fetch_add(1, Ordering::SeqCst);
        state.begin_dispatch(ActionKind::NewGame);

        let result = TransactionResult::failed(PipelineError::ConfirmationTimeout {
            hash: TxHash::repeat_byte(0x0b),
            phase: TimeoutPhase::StillPending,
        });
        state.finish_dispatch(ActionKind::NewGame, &result, U256::zero());
        assert_eq!(state.status(), TransactionStatus::Timeout(ActionKind::NewGame));
        // Timeout status carries no hash; the error string is still visible.
        assert!(state.snapshot(U256::zero()).last_hash.is_none());
        assert!(state.snapshot(U256::zero()).last_error.is_some());
    }

    #[test]
    fn set_idle_does_not_clobber_pending() {
        let state = SessionState::new();
        state.queued.fetch_add(1, Ordering::SeqCst);
        state.begin_dispatch(ActionKind::GameOver);
        state.set_idle();
        assert!(state.status().is_pending());
    }

    #[test]
    fn clear_session_resets_everything() {
        let state = SessionState::new();
        state.set_identity(Identity::generate(Address::repeat_byte(0x01)));
        state.set_balance(U256::from(5u64));
        state.record_error("boom");
        state.clear_session();

        let snapshot = state.snapshot(U256::zero());
        assert!(snapshot.address.is_none());
        assert_eq!(snapshot.balance, U256::zero());
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.totals, Totals::default());
    }
}
