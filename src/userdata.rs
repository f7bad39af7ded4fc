//! Typed persisted state layered over a [`StorageAdapter`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScripError};
use crate::storage::{keys, StorageAdapter};
use crate::types::{token_type, Purchase, PurchasePrice, TransactionId};

/// Everything the engine persists, serialized as one JSON document so that a
/// multi-field update is committed in a single write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct UserState {
    #[serde(default)]
    pub instance_id: String,
    /// Token type ("earner", ...) to opaque token value.
    #[serde(default)]
    pub auth_tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub is_account: bool,
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub purchase_prices: Vec<PurchasePrice>,
    #[serde(default)]
    pub purchases: Vec<Purchase>,
    #[serde(default)]
    pub last_transaction_id: TransactionId,
    #[serde(default)]
    pub request_metadata: BTreeMap<String, String>,
    /// server clock minus local clock, in milliseconds
    #[serde(default)]
    pub server_time_diff_ms: i64,
}

/// Storage and retrieval of Scrip user state.
///
/// Mutations go through [`UserData::commit`], which applies a change to a
/// scratch copy and persists the whole state in one write; if persisting
/// fails the in-memory state is rolled back, so observers never see a state
/// that was not durably stored.
pub(crate) struct UserData {
    storage: Arc<dyn StorageAdapter>,
    state: UserState,
}

impl UserData {
    /// Load state from storage, creating a fresh state (with a new instance
    /// id) if none exists yet. An unparseable stored state is an internal
    /// error.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        let state = match storage.get(keys::STATE) {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| ScripError::internal(format!("stored state is corrupt: {e}")))?,
            None => UserState {
                instance_id: uuid::Uuid::new_v4().to_string(),
                ..UserState::default()
            },
        };

        let user_data = Self { storage, state };
        user_data.persist()?;
        Ok(user_data)
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.state)?;
        self.storage.set(keys::STATE, &raw)
    }

    /// Apply `f` to a scratch copy of the state and persist the result in one
    /// write. If `f` fails or the write fails, the previous state is kept.
    pub fn commit<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut UserState) -> Result<()>,
    {
        let mut next = self.state.clone();
        f(&mut next)?;
        let prev = std::mem::replace(&mut self.state, next);
        if let Err(e) = self.persist() {
            self.state = prev;
            return Err(e);
        }
        Ok(())
    }

    /// Wipe user state, keeping the instance id.
    pub fn clear(&mut self) -> Result<()> {
        let instance_id = self.state.instance_id.clone();
        self.commit(|state| {
            *state = UserState {
                instance_id,
                ..UserState::default()
            };
            Ok(())
        })
    }

    // ==================== Accessors ====================

    pub fn instance_id(&self) -> &str {
        &self.state.instance_id
    }

    pub fn auth_tokens(&self) -> &BTreeMap<String, String> {
        &self.state.auth_tokens
    }

    pub fn valid_token_types(&self) -> Vec<String> {
        self.state.auth_tokens.keys().cloned().collect()
    }

    pub fn has_tokens(&self) -> bool {
        !self.state.auth_tokens.is_empty()
    }

    pub fn earner_token(&self) -> Option<&str> {
        self.state
            .auth_tokens
            .get(token_type::EARNER)
            .map(String::as_str)
    }

    pub fn is_account(&self) -> bool {
        self.state.is_account
    }

    pub fn balance(&self) -> i64 {
        self.state.balance
    }

    pub fn purchase_prices(&self) -> Vec<PurchasePrice> {
        self.state.purchase_prices.clone()
    }

    /// The full ledger, with local expiry recomputed from the current
    /// server-time diff (the diff may have changed since the purchase was
    /// stored).
    pub fn purchases(&self) -> Vec<Purchase> {
        let mut purchases = self.state.purchases.clone();
        for purchase in &mut purchases {
            self.update_purchase_local_expiry(purchase);
        }
        purchases
    }

    pub fn last_transaction_id(&self) -> &str {
        &self.state.last_transaction_id
    }

    pub fn request_metadata(&self) -> &BTreeMap<String, String> {
        &self.state.request_metadata
    }

    pub fn server_time_diff(&self) -> Duration {
        Duration::milliseconds(self.state.server_time_diff_ms)
    }

    // ==================== Mutators ====================

    pub fn set_balance(&mut self, balance: i64) -> Result<()> {
        self.commit(|state| {
            state.balance = balance;
            Ok(())
        })
    }

    pub fn set_purchases(&mut self, purchases: Vec<Purchase>) -> Result<()> {
        self.commit(|state| {
            state.purchases = purchases;
            Ok(())
        })
    }

    /// Upsert one metadata item. The key must be non-empty; any string value
    /// (including empty) is allowed.
    pub fn set_request_metadata_item(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ScripError::internal("metadata key cannot be empty"));
        }
        self.commit(|state| {
            state
                .request_metadata
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Record the diff between the server clock and the local clock, from a
    /// fresh server timestamp.
    pub fn set_server_time_diff(&mut self, server_now: DateTime<Utc>) -> Result<()> {
        let diff = server_now - Utc::now();
        self.commit(|state| {
            state.server_time_diff_ms = diff.num_milliseconds();
            Ok(())
        })
    }

    // ==================== Time helpers ====================

    /// Shift a server-clock instant onto the local clock.
    pub fn server_time_to_local(&self, server_time: DateTime<Utc>) -> DateTime<Utc> {
        server_time - self.server_time_diff()
    }

    /// Derive `local_time_expiry` from `server_time_expiry`.
    pub fn update_purchase_local_expiry(&self, purchase: &mut Purchase) {
        purchase.local_time_expiry = purchase
            .server_time_expiry
            .map(|expiry| self.server_time_to_local(expiry));
    }
}
