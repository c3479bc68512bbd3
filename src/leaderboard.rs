//! Capped leaderboard over the shared key-value store
//!
//! Outside the pipeline core: scores come from the game layer, this module
//! only persists them. One entry per owner, best score wins, sorted
//! descending, capped at 100 entries.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::PipelineError;
use crate::storage::KeyValueStore;

const LEADERBOARD_KEY: &str = "blocklog_leaderboard";
const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub owner: Address,
    pub session_address: Address,
    pub score: u64,
    pub level: u32,
    pub blocks_placed: u64,
    pub transactions: u64,
    /// Cumulative spend in wei.
    pub gas_spent: U256,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
}

pub struct Leaderboard {
    store: Arc<dyn KeyValueStore>,
}

impl Leaderboard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All entries, best first. An unreadable record is treated as an empty
    /// board rather than an error.
    pub fn entries(&self) -> Result<Vec<LeaderboardEntry>, PipelineError> {
        let Some(bytes) = self.store.get(LEADERBOARD_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!(error = %err, "discarding unreadable leaderboard record");
                Ok(Vec::new())
            }
        }
    }

    /// Insert or update the owner's entry, keeping only their best score.
    pub fn save(&self, entry: LeaderboardEntry) -> Result<(), PipelineError> {
        let mut entries = self.entries()?;

        match entries.iter_mut().find(|e| e.owner == entry.owner) {
            Some(existing) => {
                if entry.score > existing.score {
                    *existing = entry;
                }
            }
            None => entries.push(entry),
        }

        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries.truncate(MAX_ENTRIES);

        let bytes = serde_json::to_vec(&entries)
            .map_err(|e| PipelineError::Storage(format!("cannot serialize leaderboard: {e}")))?;
        self.store.set(LEADERBOARD_KEY, &bytes)
    }

    /// 1-based rank of the owner, if present.
    pub fn rank(&self, owner: Address) -> Result<Option<usize>, PipelineError> {
        Ok(self
            .entries()?
            .iter()
            .position(|e| e.owner == owner)
            .map(|index| index + 1))
    }

    pub fn best(&self, owner: Address) -> Result<Option<LeaderboardEntry>, PipelineError> {
        Ok(self.entries()?.into_iter().find(|e| e.owner == owner))
    }

    pub fn top(&self, count: usize) -> Result<Vec<LeaderboardEntry>, PipelineError> {
        let mut entries = self.entries()?;
        entries.truncate(count);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn board() -> Leaderboard {
        Leaderboard::new(Arc::new(MemoryStore::default()))
    }

    fn entry(owner_byte: u8, score: u64) -> LeaderboardEntry {
        LeaderboardEntry {
            owner: Address::repeat_byte(owner_byte),
            session_address: Address::repeat_byte(owner_byte.wrapping_add(1)),
            score,
            level: 1,
            blocks_placed: score / 10,
            transactions: score / 10,
            gas_spent: U256::from(score),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn save_and_rank() {
        let board = board();
        board.save(entry(0x01, 100)).unwrap();
        board.save(entry(0x02, 300)).unwrap();
        board.save(entry(0x03, 200)).unwrap();

        assert_eq!(board.rank(Address::repeat_byte(0x02)).unwrap(), Some(1));
        assert_eq!(board.rank(Address::repeat_byte(0x03)).unwrap(), Some(2));
        assert_eq!(board.rank(Address::repeat_byte(0x01)).unwrap(), Some(3));
        assert_eq!(board.rank(Address::repeat_byte(0x09)).unwrap(), None);
    }

    #[test]
    fn lower_score_does_not_replace_best() {
        let board = board();
        board.save(entry(0x01, 500)).unwrap();
        board.save(entry(0x01, 100)).unwrap();

        let best = board.best(Address::repeat_byte(0x01)).unwrap().unwrap();
        assert_eq!(best.score, 500);
        assert_eq!(board.entries().unwrap().len(), 1);
    }

    #[test]
    fn higher_score_replaces_best() {
        let board = board();
        board.save(entry(0x01, 100)).unwrap();
        board.save(entry(0x01, 900)).unwrap();

        let best = board.best(Address::repeat_byte(0x01)).unwrap().unwrap();
        assert_eq!(best.score, 900);
    }

    #[test]
    fn board_is_capped() {
        let board = board();
        for i in 0..120u64 {
            board.save(entry(i as u8, i + 1)).unwrap();
        }
        let entries = board.entries().unwrap();
        assert_eq!(entries.len(), MAX_ENTRIES);
        // Lowest scores fell off the bottom.
        assert!(entries.iter().all(|e| e.score > 20));
    }

    #[test]
    fn top_limits_results() {
        let board = board();
        for i in 1..=10u64 {
            board.save(entry(i as u8, i * 10)).unwrap();
        }
        let top = board.top(3).unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].score, 100);
    }

    #[test]
    fn unreadable_board_is_empty() {
        let store = Arc::new(MemoryStore::default());
        store.set(LEADERBOARD_KEY, b"not json").unwrap();
        let board = Leaderboard::new(store);
        assert!(board.entries().unwrap().is_empty());
    }
}
