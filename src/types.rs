//! Common types used throughout the pipeline

use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Discrete game events recorded on the remote ledger. Closed set; each kind
/// carries a fixed base fee in the fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PlaceBlock,
    ClearLine,
    NewGame,
    GameOver,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::PlaceBlock,
        ActionKind::ClearLine,
        ActionKind::NewGame,
        ActionKind::GameOver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PlaceBlock => "place_block",
            ActionKind::ClearLine => "clear_line",
            ActionKind::NewGame => "new_game",
            ActionKind::GameOver => "game_over",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "place_block" => Ok(ActionKind::PlaceBlock),
            "clear_line" => Ok(ActionKind::ClearLine),
            "new_game" => Ok(ActionKind::NewGame),
            "game_over" => Ok(ActionKind::GameOver),
            other => Err(PipelineError::Config(format!(
                "unknown action kind: {other}"
            ))),
        }
    }
}

/// Free-form game data embedded in the transaction payload record.
pub type ActionPayload = serde_json::Map<String, serde_json::Value>;

/// Per-identity transaction status. Mutated only by the queue worker, read
/// by the session controller and the UI. At most one submission may be
/// Pending at any time; everything else waits in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    Pending(ActionKind),
    /// Always carries the non-empty transaction hash.
    Success(TxHash),
    Failed(ActionKind, String),
    Timeout(ActionKind),
}

impl TransactionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionStatus::Pending(_))
    }

    pub fn pending_action(&self) -> Option<ActionKind> {
        match self {
            TransactionStatus::Pending(action) => Some(*action),
            _ => None,
        }
    }
}

/// Outcome of a single submission, resolved through the queue back to the
/// original caller.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub success: bool,
    pub hash: Option<TxHash>,
    pub gas_used: Option<U256>,
    pub effective_rate: Option<U256>,
    pub error: Option<PipelineError>,
}

impl TransactionResult {
    pub fn confirmed(hash: TxHash, gas_used: U256, effective_rate: U256) -> Self {
        Self {
            success: true,
            hash: Some(hash),
            gas_used: Some(gas_used),
            effective_rate: Some(effective_rate),
            error: None,
        }
    }

    pub fn failed(error: PipelineError) -> Self {
        Self {
            success: false,
            hash: None,
            gas_used: None,
            effective_rate: None,
            error: Some(error),
        }
    }
}

/// Derived cost breakdown for one action, in wei. Recomputed per submission
/// attempt, never cached across balance changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub base_fee: U256,
    pub gas_estimate: U256,
    pub safety_margin: U256,
    pub congestion_buffer: U256,
    /// Sum of the four components above. Never below `base_fee`.
    pub total: U256,
}

/// Verdict of the sufficiency gate for one action at the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sufficiency {
    pub sufficient: bool,
    pub required: U256,
    pub available: U256,
    /// `max(0, required - available)`, saturating.
    pub shortfall: U256,
}

/// Running totals for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub transactions: u64,
    /// Cumulative spend in wei: action fees plus consumed gas.
    pub spent: U256,
}

/// Snapshot handed to the UI layer. Plain data, safe to read at any time.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub address: Option<Address>,
    pub balance: U256,
    /// Balance is above the configured funded threshold.
    pub is_ready: bool,
    pub pending: Option<ActionKind>,
    /// Items waiting behind the in-flight submission.
    pub queued: usize,
    pub last_hash: Option<TxHash>,
    pub last_error: Option<String>,
    pub totals: Totals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_string_round_trip() {
        for action in ActionKind::ALL {
            let parsed: ActionKind = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert!("jump".parse::<ActionKind>().is_err());
    }

    #[test]
    fn action_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&ActionKind::PlaceBlock).unwrap();
        assert_eq!(json, "\"place_block\"");
        let back: ActionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionKind::PlaceBlock);
    }

    #[test]
    fn confirmed_result_always_has_hash() {
        let result = TransactionResult::confirmed(
            TxHash::repeat_byte(0x11),
            U256::from(21_000u64),
            U256::from(1_000_000_000u64),
        );
        assert!(result.success);
        assert!(result.hash.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn failed_result_never_has_hash() {
        let result = TransactionResult::failed(PipelineError::Identity("missing".to_string()));
        assert!(!result.success);
        assert!(result.hash.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn pending_action_accessor() {
        let status = TransactionStatus::Pending(ActionKind::ClearLine);
        assert!(status.is_pending());
        assert_eq!(status.pending_action(), Some(ActionKind::ClearLine));
        assert_eq!(TransactionStatus::Idle.pending_action(), None);
    }
}
