//! Scriptable in-process endpoint double
//!
//! Backs the fallback, retry, and confirmation tests in-process. Each remote
//! operation can be scripted per call (a queue of canned responses) or given
//! a standing default.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, TxHash, U256, U64};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::ledger::LedgerEndpoint;

pub struct MockEndpoint {
    url: String,
    balance: Mutex<Result<U256, String>>,
    gas_price: Mutex<Result<U256, String>>,
    head: Mutex<Result<u64, String>>,
    send_queue: Mutex<VecDeque<Result<TxHash, PipelineError>>>,
    send_default: Mutex<Result<TxHash, PipelineError>>,
    lookup_queue: Mutex<VecDeque<Option<Transaction>>>,
    lookup_default: Mutex<Option<Transaction>>,
    receipt: Mutex<Option<TransactionReceipt>>,

    pub balance_calls: AtomicUsize,
    pub probes: AtomicUsize,
    pub sends: AtomicUsize,
    pub polls: AtomicUsize,
}

impl MockEndpoint {
    /// Endpoint that accepts everything: funded balance, sane gas price,
    /// transactions mined on the first poll.
    pub fn healthy(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            balance: Mutex::new(Ok(U256::exp10(18))),
            gas_price: Mutex::new(Ok(U256::from(1_000_000_000u64))),
            head: Mutex::new(Ok(100)),
            send_queue: Mutex::new(VecDeque::new()),
            send_default: Mutex::new(Ok(TxHash::repeat_byte(0xaa))),
            lookup_queue: Mutex::new(VecDeque::new()),
            lookup_default: Mutex::new(Some(mined_tx())),
            receipt: Mutex::new(Some(success_receipt(21_000, 1_000_000_000))),
            balance_calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        })
    }

    /// Endpoint where every operation fails at the transport level.
    pub fn unreachable(url: &str) -> Arc<Self> {
        let refused = || Err("connection refused".to_string());
        Arc::new(Self {
            url: url.to_string(),
            balance: Mutex::new(refused()),
            gas_price: Mutex::new(refused()),
            head: Mutex::new(Err("connection refused".to_string())),
            send_queue: Mutex::new(VecDeque::new()),
            send_default: Mutex::new(Err(PipelineError::Transport {
                endpoint: url.to_string(),
                message: "connection refused".to_string(),
            })),
            lookup_queue: Mutex::new(VecDeque::new()),
            lookup_default: Mutex::new(None),
            receipt: Mutex::new(None),
            balance_calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock() = Ok(balance);
    }

    pub fn fail_balance(&self, message: &str) {
        *self.balance.lock() = Err(message.to_string());
    }

    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.lock() = Ok(price);
    }

    pub fn fail_gas_price(&self, message: &str) {
        *self.gas_price.lock() = Err(message.to_string());
    }

    pub fn fail_probe(&self, message: &str) {
        *self.head.lock() = Err(message.to_string());
    }

    /// Script the next sends to return these hashes in order; afterwards the
    /// standing default applies again.
    pub fn queue_send_hashes(&self, hashes: impl IntoIterator<Item = TxHash>) {
        self.send_queue
            .lock()
            .extend(hashes.into_iter().map(Ok));
    }

    pub fn fail_send(&self, message: &str) {
        *self.send_default.lock() = Err(PipelineError::Transport {
            endpoint: self.url.clone(),
            message: message.to_string(),
        });
    }

    pub fn reject_send(&self, reason: &str) {
        *self.send_default.lock() = Err(PipelineError::Rejected {
            endpoint: self.url.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn set_lookup(&self, tx: Option<Transaction>) {
        *self.lookup_default.lock() = tx;
    }

    /// Script the next lookups in order; afterwards the standing default
    /// applies again.
    pub fn queue_lookups(&self, lookups: impl IntoIterator<Item = Option<Transaction>>) {
        self.lookup_queue.lock().extend(lookups);
    }

    pub fn set_receipt(&self, receipt: Option<TransactionReceipt>) {
        *self.receipt.lock() = receipt;
    }

    fn transport(&self, message: &str) -> PipelineError {
        PipelineError::Transport {
            endpoint: self.url.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl LedgerEndpoint for MockEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, PipelineError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balance
            .lock()
            .clone()
            .map_err(|message| self.transport(&message))
    }

    async fn gas_price(&self) -> Result<U256, PipelineError> {
        self.gas_price
            .lock()
            .clone()
            .map_err(|message| self.transport(&message))
    }

    async fn block_number(&self) -> Result<u64, PipelineError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.head
            .lock()
            .clone()
            .map_err(|message| self.transport(&message))
    }

    async fn send_raw_transaction(&self, _raw: Bytes) -> Result<TxHash, PipelineError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.send_queue.lock().pop_front() {
            return scripted;
        }
        self.send_default.lock().clone()
    }

    async fn transaction_by_hash(
        &self,
        _hash: TxHash,
    ) -> Result<Option<Transaction>, PipelineError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.lookup_queue.lock().pop_front() {
            return Ok(scripted);
        }
        Ok(self.lookup_default.lock().clone())
    }

    async fn transaction_receipt(
        &self,
        _hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, PipelineError> {
        Ok(self.receipt.lock().clone())
    }
}

/// A transaction already included in a block.
pub fn mined_tx() -> Transaction {
    Transaction {
        block_number: Some(U64::from(1u64)),
        ..Default::default()
    }
}

/// A transaction known to the network but not yet mined.
pub fn pending_tx() -> Transaction {
    Transaction {
        block_number: None,
        ..Default::default()
    }
}

pub fn success_receipt(gas_used: u64, effective_gas_price: u64) -> TransactionReceipt {
    TransactionReceipt {
        status: Some(U64::from(1u64)),
        gas_used: Some(U256::from(gas_used)),
        effective_gas_price: Some(U256::from(effective_gas_price)),
        ..Default::default()
    }
}

pub fn revert_receipt() -> TransactionReceipt {
    TransactionReceipt {
        status: Some(U64::from(0u64)),
        gas_used: Some(U256::from(21_000u64)),
        effective_gas_price: Some(U256::from(1_000_000_000u64)),
        ..Default::default()
    }
}
