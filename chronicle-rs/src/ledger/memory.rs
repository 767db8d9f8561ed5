//! In-process ledger store.

use std::collections::HashMap;

use tokio::sync::Mutex;

use super::{AccountKey, LedgerEntry, LedgerOperation, LedgerResult, LedgerStore};

/// [`LedgerStore`] over a mutex-guarded map. The compare-and-set is checked
/// and applied under one lock acquisition.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<AccountKey, LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an account's entry.
    pub async fn insert(&self, account: AccountKey, entry: LedgerEntry) {
        self.entries.lock().await.insert(account, entry);
    }

    /// Drop an entry, as a cascading account delete would.
    pub async fn remove(&self, account: &AccountKey) -> Option<LedgerEntry> {
        self.entries.lock().await.remove(account)
    }
}

impl LedgerStore for InMemoryLedger {
    async fn load(&self, account: &AccountKey) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.entries.lock().await.get(account).cloned())
    }

    async fn compare_and_set_available(
        &self,
        account: &AccountKey,
        expected: i64,
        new: i64,
    ) -> LedgerResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(account) {
            Some(entry) if entry.available_credits == expected => {
                entry.available_credits = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn adjust_available(&self, account: &AccountKey, delta: i64) -> LedgerResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(account) else {
            return Ok(false);
        };
        entry.available_credits = entry.available_credits.saturating_add(delta);
        Ok(true)
    }

    async fn record_usage(
        &self,
        account: &AccountKey,
        operation: LedgerOperation,
        amount: u64,
    ) -> LedgerResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(account) else {
            return Ok(false);
        };
        entry.used_credits = entry.used_credits.saturating_add(amount);
        *entry.usage_by_operation.entry(operation).or_insert(0) += amount;
        Ok(true)
    }
}
