//! HTTP endpoint backed by an ethers JSON-RPC provider
//!
//! Every call is bounded by the configured per-call timeout; a timed-out
//! call surfaces as a transport error so the caller can move to the next
//! endpoint without delay.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, TxHash, U256};
use std::future::Future;
use std::time::Duration;

use crate::error::PipelineError;
use crate::ledger::LedgerEndpoint;

#[derive(Debug)]
pub struct HttpEndpoint {
    url: String,
    provider: Provider<Http>,
    call_timeout: Duration,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, call_timeout: Duration) -> Result<Self, PipelineError> {
        let url = url.into();
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| PipelineError::Config(format!("invalid endpoint url {url}: {e}")))?;
        Ok(Self {
            url,
            provider,
            call_timeout,
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(PipelineError::from_endpoint_error(&self.url, err.to_string())),
            Err(_) => Err(PipelineError::Transport {
                endpoint: self.url.clone(),
                message: format!("call timed out after {}ms", self.call_timeout.as_millis()),
            }),
        }
    }
}

#[async_trait]
impl LedgerEndpoint for HttpEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, address: Address) -> Result<U256, PipelineError> {
        self.bounded(self.provider.get_balance(address, None)).await
    }

    async fn gas_price(&self) -> Result<U256, PipelineError> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn block_number(&self) -> Result<u64, PipelineError> {
        let number = self.bounded(self.provider.get_block_number()).await?;
        Ok(number.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, PipelineError> {
        let pending = self.bounded(self.provider.send_raw_transaction(raw)).await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<Transaction>, PipelineError> {
        self.bounded(self.provider.get_transaction(hash)).await
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, PipelineError> {
        self.bounded(self.provider.get_transaction_receipt(hash))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        let err = HttpEndpoint::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn accepts_well_formed_url() {
        let endpoint = HttpEndpoint::new("http://localhost:8545", Duration::from_secs(1)).unwrap();
        assert_eq!(endpoint.url(), "http://localhost:8545");
    }
}
