//! Transaction submission state machine
//!
//! One call to `send` drives a single action through: identity validation,
//! a fresh sufficiency check, up to `max_attempts` submission attempts (each
//! walking the endpoint list: probe, build, sign, send), and a bounded
//! confirmation-polling loop. Linear backoff separates whole attempts;
//! endpoints within an attempt are tried back-to-back.

use chrono::Utc;
use dashmap::DashMap;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, TxHash, U256, U64};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SubmitterConfig;
use crate::error::{PipelineError, TimeoutPhase};
use crate::fees::FeePolicy;
use crate::keystore::Identity;
use crate::ledger::LedgerEndpoint;
use crate::observability::CorrelationId;
use crate::types::{ActionKind, ActionPayload, TransactionResult};

/// Phase of a single submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Building,
    Sent,
    Confirmed,
    RevertedOnChain,
    NotFoundAfterTimeout,
    StillPendingAfterTimeout,
}

/// Resolved submission tunables.
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub confirm_timeout: Duration,
    pub confirm_max_polls: u32,
    pub poll_absent: Duration,
    pub poll_pending: Duration,
}

impl SubmitterSettings {
    pub fn from_config(config: &SubmitterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
            confirm_max_polls: config.confirm_max_polls,
            poll_absent: Duration::from_millis(config.poll_absent_ms),
            poll_pending: Duration::from_millis(config.poll_pending_ms),
        }
    }
}

struct SubmittedTx {
    hash: TxHash,
    endpoint: String,
    gas_price: U256,
}

pub struct Submitter {
    endpoints: Vec<Arc<dyn LedgerEndpoint>>,
    fees: FeePolicy,
    settings: SubmitterSettings,
    chain_id: u64,
    // Local per-identity transaction counter. The session wallet is created
    // fresh by this pipeline and nothing else ever sends from it, so the
    // counter is authoritative. Advanced only after an endpoint accepts the
    // raw transaction.
    nonces: DashMap<Address, u64>,
}

impl Submitter {
    pub fn new(
        endpoints: Vec<Arc<dyn LedgerEndpoint>>,
        fees: FeePolicy,
        settings: SubmitterSettings,
        chain_id: u64,
    ) -> Self {
        Self {
            endpoints,
            fees,
            settings,
            chain_id,
            nonces: DashMap::new(),
        }
    }

    pub fn base_fee(&self, action: ActionKind) -> U256 {
        self.fees.schedule().base_fee(action)
    }

    /// Submit one action and wait for its terminal state. Never panics;
    /// every failure mode comes back inside the result.
    pub async fn send(
        &self,
        identity: &Identity,
        action: ActionKind,
        payload: &ActionPayload,
        correlation: &CorrelationId,
    ) -> TransactionResult {
        // Malformed identities are fatal, no retry.
        let wallet = match identity.signer(self.chain_id) {
            Ok(wallet) => wallet,
            Err(err) => {
                warn!(correlation = %correlation, error = %err, "identity validation failed");
                return TransactionResult::failed(err);
            }
        };

        // Re-validate funds immediately before submission; an earlier
        // observation of the balance must never be trusted here.
        let gate_record = match encode_record(identity.address, action, payload, 1) {
            Ok(record) => record,
            Err(err) => return TransactionResult::failed(err),
        };
        match self
            .fees
            .sufficiency(identity.address, action, gate_record.len())
            .await
        {
            Ok(verdict) if !verdict.sufficient => {
                info!(
                    correlation = %correlation,
                    required = %verdict.required,
                    available = %verdict.available,
                    shortfall = %verdict.shortfall,
                    "insufficient funds, submission refused"
                );
                return TransactionResult::failed(PipelineError::InsufficientFunds {
                    required: verdict.required,
                    available: verdict.available,
                    shortfall: verdict.shortfall,
                });
            }
            Ok(_) => {}
            Err(err) => return TransactionResult::failed(err),
        }

        let mut attempt_errors: Vec<String> = Vec::new();
        for attempt in 1..=self.settings.max_attempts {
            match self
                .submit_once(&wallet, identity, action, payload, attempt, correlation)
                .await
            {
                Ok(submitted) => {
                    return self.confirm(submitted, correlation).await;
                }
                Err(err) if !err.is_retryable() => {
                    warn!(
                        correlation = %correlation,
                        attempt,
                        error = %err,
                        "submission aborted on non-retryable error"
                    );
                    return TransactionResult::failed(err);
                }
                Err(err) => {
                    warn!(
                        correlation = %correlation,
                        attempt,
                        error = %err,
                        "submission attempt failed on every endpoint"
                    );
                    attempt_errors.push(format!("attempt {attempt}: {err}"));
                    if attempt < self.settings.max_attempts {
                        // Linear backoff between whole attempts.
                        tokio::time::sleep(self.settings.retry_base_delay * attempt).await;
                    }
                }
            }
        }

        TransactionResult::failed(PipelineError::AllEndpointsFailed {
            last: attempt_errors.join("; "),
        })
    }

    /// One attempt: walk the endpoint list in order, no inter-endpoint
    /// delay. A non-retryable error from any endpoint aborts the attempt
    /// loop entirely.
    async fn submit_once(
        &self,
        wallet: &LocalWallet,
        identity: &Identity,
        action: ActionKind,
        payload: &ActionPayload,
        attempt: u32,
        correlation: &CorrelationId,
    ) -> Result<SubmittedTx, PipelineError> {
        let record = encode_record(identity.address, action, payload, attempt)?;
        let mut last: Option<PipelineError> = None;

        for endpoint in &self.endpoints {
            // Liveness probe before committing a signed transaction here.
            if let Err(err) = endpoint.block_number().await {
                warn!(endpoint = %endpoint.url(), error = %err, "liveness probe failed");
                last = Some(err);
                continue;
            }

            let raw_rate = match endpoint.gas_price().await {
                Ok(rate) => rate,
                Err(err) => {
                    warn!(endpoint = %endpoint.url(), error = %err, "fee rate fetch failed");
                    last = Some(err);
                    continue;
                }
            };

            let gas_price = self.fees.schedule().buffered_gas_price(raw_rate);
            let gas_limit = self.fees.schedule().gas_limit(record.len());
            let nonce = self.current_nonce(identity.address);

            debug!(
                correlation = %correlation,
                endpoint = %endpoint.url(),
                phase = ?AttemptPhase::Building,
                attempt,
                nonce,
                gas_limit,
                gas_price = %gas_price,
                "building transaction"
            );

            let request = TransactionRequest::new()
                .from(identity.address)
                .to(self.fees.schedule().log_address())
                .value(self.fees.schedule().base_fee(action))
                .data(Bytes::from(record.clone()))
                .gas(gas_limit)
                .gas_price(gas_price)
                .nonce(nonce)
                .chain_id(self.chain_id);
            let typed: TypedTransaction = request.into();
            let signature = wallet
                .sign_transaction_sync(&typed)
                .map_err(|e| PipelineError::Identity(format!("signing failed: {e}")))?;
            let raw = typed.rlp_signed(&signature);

            match endpoint.send_raw_transaction(raw).await {
                Ok(hash) => {
                    self.advance_nonce(identity.address);
                    info!(
                        correlation = %correlation,
                        endpoint = %endpoint.url(),
                        phase = ?AttemptPhase::Sent,
                        hash = %format!("{hash:#x}"),
                        attempt,
                        "transaction submitted"
                    );
                    return Ok(SubmittedTx {
                        hash,
                        endpoint: endpoint.url().to_string(),
                        gas_price,
                    });
                }
                // Explicit rejection or insufficient-funds signals abort
                // immediately; the next endpoint would refuse them too.
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(endpoint = %endpoint.url(), error = %err, "send failed, trying next endpoint");
                    last = Some(err);
                }
            }
        }

        Err(last.unwrap_or(PipelineError::AllEndpointsFailed {
            last: "no endpoints configured".to_string(),
        }))
    }

    /// Bounded confirmation polling: an attempt counter plus an interval
    /// table, faster while the transaction is absent, slower once it is
    /// known but unmined. Exhausting the budget is terminal and
    /// indeterminate; it is never retried.
    async fn confirm(
        &self,
        submitted: SubmittedTx,
        correlation: &CorrelationId,
    ) -> TransactionResult {
        let deadline = Instant::now() + self.settings.confirm_timeout;
        let mut polls = 0u32;
        let mut seen = false;

        loop {
            if polls >= self.settings.confirm_max_polls || Instant::now() >= deadline {
                let (phase, attempt_phase) = if seen {
                    (
                        TimeoutPhase::StillPending,
                        AttemptPhase::StillPendingAfterTimeout,
                    )
                } else {
                    (TimeoutPhase::NotFound, AttemptPhase::NotFoundAfterTimeout)
                };
                warn!(
                    correlation = %correlation,
                    hash = %format!("{:#x}", submitted.hash),
                    polls,
                    phase = ?attempt_phase,
                    "confirmation budget exhausted"
                );
                return TransactionResult::failed(PipelineError::ConfirmationTimeout {
                    hash: submitted.hash,
                    phase,
                });
            }

            match self.lookup_transaction(submitted.hash).await {
                Ok(Some(tx)) if tx.block_number.is_some() => {
                    match self.lookup_receipt(submitted.hash).await {
                        Ok(Some(receipt)) => {
                            return self.interpret_receipt(&submitted, receipt, correlation);
                        }
                        // Mined but the receipt is lagging; keep polling.
                        Ok(None) => seen = true,
                        Err(err) => {
                            warn!(error = %err, "receipt fetch failed on every endpoint");
                        }
                    }
                }
                Ok(Some(_)) => seen = true,
                Ok(None) => {}
                Err(err) => {
                    // Transient poll failures count against the budget but
                    // do not terminate the wait.
                    warn!(error = %err, "confirmation poll failed on every endpoint");
                }
            }

            polls += 1;
            let interval = if seen {
                self.settings.poll_pending
            } else {
                self.settings.poll_absent
            };
            tokio::time::sleep(interval).await;
        }
    }

    fn interpret_receipt(
        &self,
        submitted: &SubmittedTx,
        receipt: TransactionReceipt,
        correlation: &CorrelationId,
    ) -> TransactionResult {
        let gas_used = receipt.gas_used.unwrap_or_default();
        let effective_rate = receipt.effective_gas_price.unwrap_or(submitted.gas_price);

        if receipt.status == Some(U64::from(1u64)) {
            info!(
                correlation = %correlation,
                endpoint = %submitted.endpoint,
                hash = %format!("{:#x}", submitted.hash),
                gas_used = %gas_used,
                effective_rate = %effective_rate,
                phase = ?AttemptPhase::Confirmed,
                "transaction confirmed"
            );
            TransactionResult::confirmed(submitted.hash, gas_used, effective_rate)
        } else {
            warn!(
                correlation = %correlation,
                hash = %format!("{:#x}", submitted.hash),
                phase = ?AttemptPhase::RevertedOnChain,
                "transaction reverted on chain"
            );
            TransactionResult::failed(PipelineError::Reverted {
                hash: submitted.hash,
            })
        }
    }

    async fn lookup_transaction(
        &self,
        hash: TxHash,
    ) -> Result<Option<ethers::types::Transaction>, PipelineError> {
        let mut last: Option<PipelineError> = None;
        for endpoint in &self.endpoints {
            match endpoint.transaction_by_hash(hash).await {
                Ok(found) => return Ok(found),
                Err(err) => last = Some(err),
            }
        }
        Err(last.unwrap_or(PipelineError::AllEndpointsFailed {
            last: "no endpoints configured".to_string(),
        }))
    }

    async fn lookup_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, PipelineError> {
        let mut last: Option<PipelineError> = None;
        for endpoint in &self.endpoints {
            match endpoint.transaction_receipt(hash).await {
                Ok(found) => return Ok(found),
                Err(err) => last = Some(err),
            }
        }
        Err(last.unwrap_or(PipelineError::AllEndpointsFailed {
            last: "no endpoints configured".to_string(),
        }))
    }

    fn current_nonce(&self, address: Address) -> u64 {
        *self.nonces.entry(address).or_insert(0)
    }

    fn advance_nonce(&self, address: Address) {
        *self.nonces.entry(address).or_insert(0) += 1;
    }
}

/// Serialize the on-ledger payload record: fixed fields first, then the
/// caller's game data (which may override them).
fn encode_record(
    signer: Address,
    action: ActionKind,
    payload: &ActionPayload,
    attempt: u32,
) -> Result<Vec<u8>, PipelineError> {
    let mut record = serde_json::Map::new();
    record.insert("action".to_string(), json!(action));
    record.insert("timestamp".to_string(), json!(Utc::now().timestamp_millis()));
    record.insert("signer".to_string(), json!(format!("{signer:#x}")));
    record.insert("attempt".to_string(), json!(attempt));
    for (key, value) in payload {
        record.insert(key.clone(), value.clone());
    }
    serde_json::to_vec(&record)
        .map_err(|e| PipelineError::Storage(format!("cannot encode payload record: {e}")))
}
