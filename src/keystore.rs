//! Per-owner session identity management
//!
//! A session identity is an ephemeral signing key-pair authorized to record
//! game actions without per-action approval. Exactly one identity exists per
//! owner wallet; `create` always generates a fresh secret and overwrites any
//! prior record.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::PipelineError;
use crate::storage::KeyValueStore;

/// Ephemeral signing identity exclusively owned by one external wallet.
///
/// The secret never leaves the process; it is handed only to the submitter
/// for local signing.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Hex-encoded secp256k1 secret key.
    pub secret_key: String,
    /// Address derived from the secret key.
    pub address: Address,
    /// External wallet that owns this identity.
    pub owner: Address,
}

impl Identity {
    /// Generate a fresh random identity for the given owner.
    pub fn generate(owner: Address) -> Self {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        Self {
            secret_key: hex::encode(wallet.signer().to_bytes()),
            address: wallet.address(),
            owner,
        }
    }

    /// Parse the stored secret and check that it still derives the recorded
    /// address. A mismatch means the record was corrupted or tampered with;
    /// such an identity must never be used for signing.
    pub fn signer(&self, chain_id: u64) -> Result<LocalWallet, PipelineError> {
        let wallet: LocalWallet = self
            .secret_key
            .parse()
            .map_err(|e| PipelineError::Identity(format!("unusable secret key: {e}")))?;
        if wallet.address() != self.address {
            return Err(PipelineError::Identity(format!(
                "secret key does not derive recorded address {:#x}",
                self.address
            )));
        }
        Ok(wallet.with_chain_id(chain_id))
    }
}

// The secret must never end up in logs or debug output.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("secret_key", &"<redacted>")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Durable mapping from owner address to session identity.
pub struct KeyStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    // Lowercase-hex owner address keeps the key case-normalized.
    fn storage_key(&self, owner: Address) -> String {
        format!("{}{:#x}", self.namespace, owner)
    }

    /// Look up the identity for an owner. A record that fails to parse is
    /// treated as missing rather than fatal; the caller will create a fresh
    /// one.
    pub fn get(&self, owner: Address) -> Result<Option<Identity>, PipelineError> {
        let Some(bytes) = self.store.get(&self.storage_key(owner))? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Identity>(&bytes) {
            Ok(identity) => Ok(Some(identity)),
            Err(err) => {
                warn!(owner = %format!("{owner:#x}"), error = %err, "discarding unreadable identity record");
                Ok(None)
            }
        }
    }

    /// Generate and persist a fresh identity, overwriting any prior record
    /// for this owner. Last write wins.
    pub fn create(&self, owner: Address) -> Result<Identity, PipelineError> {
        let identity = Identity::generate(owner);
        let bytes = serde_json::to_vec(&identity)
            .map_err(|e| PipelineError::Storage(format!("cannot serialize identity: {e}")))?;
        self.store.set(&self.storage_key(owner), &bytes)?;
        info!(
            owner = %format!("{owner:#x}"),
            address = %format!("{:#x}", identity.address),
            "created session identity"
        );
        Ok(identity)
    }

    /// Remove the owner's identity record. Idempotent.
    pub fn clear(&self, owner: Address) -> Result<(), PipelineError> {
        self.store.remove(&self.storage_key(owner))
    }
}
