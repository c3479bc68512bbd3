//! blocklog — session-wallet transaction pipeline for an on-chain block game
//!
//! Turns game actions into signed ledger transactions, submits them against
//! an ordered list of unreliable RPC endpoints with immediate fallback,
//! polls for confirmation under a bounded budget, and serializes concurrent
//! requests into a strict FIFO pipeline per session identity. The UI layer
//! consumes [`SessionController`] and nothing else.

pub mod config;
pub mod error;
pub mod fees;
pub mod keystore;
pub mod leaderboard;
pub mod ledger;
pub mod observability;
pub mod oracle;
pub mod queue;
pub mod session;
pub mod storage;
pub mod submitter;
pub mod types;

pub use config::Config;
pub use error::PipelineError;
pub use session::SessionController;
pub use types::{
    ActionKind, ActionPayload, SessionStatus, TransactionResult, TransactionStatus,
};
