//! Fee policy: per-action cost schedule and the sufficiency gate
//!
//! The schedule is parsed once from configuration; quotes are recomputed on
//! every call against a live fee-rate query and never cached. The gas
//! numbers are tunable approximations with one guarantee: a transaction is
//! never under-funded relative to its quote.

use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use std::sync::Arc;

use crate::config::FeesConfig;
use crate::error::PipelineError;
use crate::oracle::BalanceOracle;
use crate::types::{ActionKind, FeeQuote, Sufficiency};

/// Parsed, wei-denominated fee constants.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    place_block: U256,
    clear_line: U256,
    new_game: U256,
    game_over: U256,
    log_address: Address,
    gas_price_buffer_pct: u64,
    gas_base_units: u64,
    gas_units_per_word: u64,
    gas_safety_units: u64,
    gas_limit_margin_pct: u64,
    safety_margin: U256,
    congestion_buffer: U256,
}

impl FeeSchedule {
    pub fn from_config(config: &FeesConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            place_block: parse_amount("fees.place_block", &config.place_block)?,
            clear_line: parse_amount("fees.clear_line", &config.clear_line)?,
            new_game: parse_amount("fees.new_game", &config.new_game)?,
            game_over: parse_amount("fees.game_over", &config.game_over)?,
            log_address: config.log_address.parse().map_err(|e| {
                PipelineError::Config(format!("bad fees.log_address: {e}"))
            })?,
            gas_price_buffer_pct: config.gas_price_buffer_pct.max(100),
            gas_base_units: config.gas_base_units,
            gas_units_per_word: config.gas_units_per_word,
            gas_safety_units: config.gas_safety_units,
            gas_limit_margin_pct: config.gas_limit_margin_pct,
            safety_margin: parse_amount("fees.safety_margin", &config.safety_margin)?,
            congestion_buffer: parse_amount(
                "fees.congestion_buffer",
                &config.congestion_buffer,
            )?,
        })
    }

    pub fn base_fee(&self, action: ActionKind) -> U256 {
        match action {
            ActionKind::PlaceBlock => self.place_block,
            ActionKind::ClearLine => self.clear_line,
            ActionKind::NewGame => self.new_game,
            ActionKind::GameOver => self.game_over,
        }
    }

    pub fn log_address(&self) -> Address {
        self.log_address
    }

    /// Estimated gas units for a payload of the given byte length: base
    /// transfer units, a per-32-byte-word cost, and flat headroom.
    pub fn gas_units(&self, payload_len: usize) -> u64 {
        let words = (payload_len as u64).div_ceil(32);
        self.gas_base_units + words * self.gas_units_per_word + self.gas_safety_units
    }

    /// Gas limit including the configured percentage margin.
    pub fn gas_limit(&self, payload_len: usize) -> u64 {
        self.gas_units(payload_len) * (100 + self.gas_limit_margin_pct) / 100
    }

    /// Live gas price with the multiplicative buffer applied (>= 1.0x).
    pub fn buffered_gas_price(&self, raw: U256) -> U256 {
        raw * U256::from(self.gas_price_buffer_pct) / U256::from(100u64)
    }
}

fn parse_amount(field: &str, value: &str) -> Result<U256, PipelineError> {
    parse_ether(value)
        .map_err(|e| PipelineError::Config(format!("bad amount for {field}: {e}")))
}

/// The single gate for "is an on-chain move currently allowed".
pub struct FeePolicy {
    schedule: FeeSchedule,
    oracle: Arc<BalanceOracle>,
}

impl FeePolicy {
    pub fn new(schedule: FeeSchedule, oracle: Arc<BalanceOracle>) -> Self {
        Self { schedule, oracle }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Fresh cost quote for one action. The gas estimate is priced at the
    /// buffered live rate against the full gas limit, so it bounds the
    /// worst-case spend from above.
    pub async fn quote(
        &self,
        action: ActionKind,
        payload_len: usize,
    ) -> Result<FeeQuote, PipelineError> {
        let rate = self.oracle.gas_price().await?;
        let gas_estimate = self.schedule.buffered_gas_price(rate)
            * U256::from(self.schedule.gas_limit(payload_len));
        let base_fee = self.schedule.base_fee(action);
        let total = base_fee
            + gas_estimate
            + self.schedule.safety_margin
            + self.schedule.congestion_buffer;
        Ok(FeeQuote {
            base_fee,
            gas_estimate,
            safety_margin: self.schedule.safety_margin,
            congestion_buffer: self.schedule.congestion_buffer,
            total,
        })
    }

    /// Evaluate whether `address` can currently afford `action`. Queries the
    /// balance exactly once and the live fee rate exactly once; must be
    /// re-evaluated immediately before every submission.
    pub async fn sufficiency(
        &self,
        address: Address,
        action: ActionKind,
        payload_len: usize,
    ) -> Result<Sufficiency, PipelineError> {
        let available = self.oracle.balance_of(address).await?;
        let quote = self.quote(action, payload_len).await?;
        let required = quote.total;
        Ok(Sufficiency {
            sufficient: available >= required,
            required,
            available,
            shortfall: required.saturating_sub(available),
        })
    }
}
