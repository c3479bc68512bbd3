//! Narrow ledger client surface
//!
//! Exactly the six remote operations the pipeline consumes, behind a trait
//! so endpoints stay interchangeable and tests can substitute in-process
//! doubles for the fallback, retry, and confirmation paths.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;

pub mod http;
pub mod mock;

pub use http::HttpEndpoint;

/// One remote service instance capable of answering balance, fee, and
/// submission queries for the ledger.
#[async_trait]
pub trait LedgerEndpoint: Send + Sync {
    /// Endpoint URL, used for error context and logs.
    fn url(&self) -> &str;

    async fn get_balance(&self, address: Address) -> Result<U256, PipelineError>;

    /// Current network fee rate in wei per gas unit.
    async fn gas_price(&self) -> Result<U256, PipelineError>;

    /// Current chain head. Doubles as the liveness probe.
    async fn block_number(&self) -> Result<u64, PipelineError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, PipelineError>;

    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<Transaction>, PipelineError>;

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, PipelineError>;
}

/// Build the ordered endpoint list from configured URLs. Order is
/// significant: primary first, fallbacks after.
pub fn endpoints_from_urls(
    urls: &[String],
    call_timeout: Duration,
) -> Result<Vec<Arc<dyn LedgerEndpoint>>, PipelineError> {
    urls.iter()
        .map(|url| {
            HttpEndpoint::new(url.clone(), call_timeout)
                .map(|endpoint| Arc::new(endpoint) as Arc<dyn LedgerEndpoint>)
        })
        .collect()
}
