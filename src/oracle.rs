//! Balance and fee-rate queries with ordered endpoint fallback
//!
//! Every call is a live query; there is no caching. Callers are responsible
//! for debouncing (the session controller enforces a minimum refresh
//! spacing).

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::ledger::LedgerEndpoint;

pub struct BalanceOracle {
    endpoints: Vec<Arc<dyn LedgerEndpoint>>,
}

impl BalanceOracle {
    pub fn new(endpoints: Vec<Arc<dyn LedgerEndpoint>>) -> Self {
        Self { endpoints }
    }

    /// Remaining funds for an address. Endpoints are tried in order with no
    /// inter-endpoint delay; errors only if every endpoint fails, carrying
    /// the last observed failure.
    pub async fn balance_of(&self, address: Address) -> Result<U256, PipelineError> {
        let mut last: Option<PipelineError> = None;
        for endpoint in &self.endpoints {
            match endpoint.get_balance(address).await {
                Ok(balance) => {
                    debug!(endpoint = %endpoint.url(), balance = %balance, "balance query succeeded");
                    return Ok(balance);
                }
                Err(err) => {
                    warn!(
                        endpoint = %endpoint.url(),
                        error = %err,
                        "balance query failed, trying next endpoint"
                    );
                    last = Some(err);
                }
            }
        }
        Err(Self::exhausted(last))
    }

    /// Live network fee rate, same fallback order as `balance_of`.
    pub async fn gas_price(&self) -> Result<U256, PipelineError> {
        let mut last: Option<PipelineError> = None;
        for endpoint in &self.endpoints {
            match endpoint.gas_price().await {
                Ok(price) => {
                    debug!(endpoint = %endpoint.url(), price = %price, "fee rate query succeeded");
                    return Ok(price);
                }
                Err(err) => {
                    warn!(
                        endpoint = %endpoint.url(),
                        error = %err,
                        "fee rate query failed, trying next endpoint"
                    );
                    last = Some(err);
                }
            }
        }
        Err(Self::exhausted(last))
    }

    fn exhausted(last: Option<PipelineError>) -> PipelineError {
        PipelineError::AllEndpointsFailed {
            last: last
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no endpoints configured".to_string()),
        }
    }
}
