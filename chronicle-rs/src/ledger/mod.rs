//! Credit ledger.
//!
//! Reserve at admission, refund on failure, reconcile at completion. Every
//! write to `available_credits` that depends on a read goes through a
//! compare-and-set against the value the caller observed; a lost race is
//! reported as "no credits" and is never retried here.

pub mod memory;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::LedgerError;

pub use memory::InMemoryLedger;

/// Alias for ledger results.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// The `(tenant, user)` pair owning one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub tenant_id: String,
    pub user_id: String,
}

impl AccountKey {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.user_id)
    }
}

/// Operation types with their own usage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    Ingestion,
    Resolution,
    Search,
    Chat,
}

/// One account's balance and usage counters. Never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Spendable balance. Only reconciliation under overage can push it below zero.
    pub available_credits: i64,
    pub used_credits: u64,
    pub usage_by_operation: HashMap<LedgerOperation, u64>,
    /// Plan allows work past a zero balance, billed by usage.
    pub overage_enabled: bool,
}

impl LedgerEntry {
    pub fn with_credits(available_credits: i64) -> Self {
        Self {
            available_credits,
            ..Default::default()
        }
    }

    pub fn usage(&self, operation: LedgerOperation) -> u64 {
        self.usage_by_operation.get(&operation).copied().unwrap_or(0)
    }
}

/// Single-row store with an optimistic-concurrency update.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Send + Sync {
    async fn load(&self, account: &AccountKey) -> LedgerResult<Option<LedgerEntry>>;

    /// Set `available_credits` to `new` only if it still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_set_available(
        &self,
        account: &AccountKey,
        expected: i64,
        new: i64,
    ) -> LedgerResult<bool>;

    /// Unconditional increment (or decrement, for negative `delta`).
    /// Returns `false` if the entry does not exist.
    async fn adjust_available(&self, account: &AccountKey, delta: i64) -> LedgerResult<bool>;

    /// Add to `used_credits` and the operation's counter.
    /// Returns `false` if the entry does not exist.
    async fn record_usage(
        &self,
        account: &AccountKey,
        operation: LedgerOperation,
        amount: u64,
    ) -> LedgerResult<bool>;
}

/// Outcome of a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Credits the caller may spend.
    pub authorized: u64,
    /// Credits actually taken from the balance. Below `authorized` only under
    /// overage, when the balance ran out.
    pub debited: u64,
}

impl Reservation {
    pub fn none() -> Self {
        Self {
            authorized: 0,
            debited: 0,
        }
    }
}

/// Reserve / refund / reconcile over a [`LedgerStore`].
pub struct CreditLedger<L> {
    store: L,
    billing_enabled: bool,
}

impl<L: LedgerStore> CreditLedger<L> {
    pub fn new(store: L, billing_enabled: bool) -> Self {
        Self {
            store,
            billing_enabled,
        }
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn billing_enabled(&self) -> bool {
        self.billing_enabled
    }

    /// Reserve `amount` credits for `account`.
    ///
    /// With billing disabled the full amount is authorized and nothing is
    /// debited. Otherwise the balance is decremented with a compare-and-set
    /// against the observed value. A failed compare-and-set is
    /// [`LedgerError::RaceLost`]. Under overage a short balance is drained to
    /// zero and the full amount is still authorized. A balance that is
    /// already zero or negative is never touched by a reservation.
    pub async fn reserve(&self, account: &AccountKey, amount: u64) -> LedgerResult<Reservation> {
        if !self.billing_enabled {
            return Ok(Reservation {
                authorized: amount,
                debited: 0,
            });
        }
        if amount == 0 {
            return Ok(Reservation::none());
        }

        let entry = self
            .store
            .load(account)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;
        let available = entry.available_credits;
        let wanted = i64::try_from(amount).unwrap_or(i64::MAX);

        if available >= wanted {
            if !self
                .store
                .compare_and_set_available(account, available, available - wanted)
                .await?
            {
                debug!(%account, amount, "reservation lost race");
                return Err(LedgerError::RaceLost);
            }
            return Ok(Reservation {
                authorized: amount,
                debited: amount,
            });
        }

        if !entry.overage_enabled {
            return Err(LedgerError::InsufficientCredits {
                requested: amount,
                available,
            });
        }

        // A balance already at or below zero is left alone: the debt stays
        // and reconciliation bills the whole actual cost.
        if available <= 0 {
            debug!(%account, amount, available, "overage reservation against empty balance");
            return Ok(Reservation {
                authorized: amount,
                debited: 0,
            });
        }

        let floor = (available - wanted).max(0);
        if !self
            .store
            .compare_and_set_available(account, available, floor)
            .await?
        {
            debug!(%account, amount, "overage reservation lost race");
            return Err(LedgerError::RaceLost);
        }
        Ok(Reservation {
            authorized: amount,
            debited: u64::try_from(available - floor).unwrap_or(amount),
        })
    }

    /// Return unused credits.
    pub async fn refund(&self, account: &AccountKey, amount: u64) -> LedgerResult<()> {
        if !self.billing_enabled || amount == 0 {
            return Ok(());
        }
        let delta = i64::try_from(amount).unwrap_or(i64::MAX);
        if !self.store.adjust_available(account, delta).await? {
            warn!(%account, amount, "refund skipped: ledger entry is gone");
        }
        Ok(())
    }

    /// Settle a finished operation: move the balance by `actual - reserved`
    /// and count `actual` as used.
    ///
    /// `reserved` is what was debited, so the balance ends at
    /// `before - actual` whatever the reservation was.
    pub async fn reconcile(
        &self,
        account: &AccountKey,
        operation: LedgerOperation,
        reserved: u64,
        actual: u64,
    ) -> LedgerResult<()> {
        if !self.billing_enabled {
            return Ok(());
        }

        let difference = i128::from(actual) - i128::from(reserved);
        if difference != 0 {
            let delta = i64::try_from(-difference).unwrap_or(if difference > 0 {
                i64::MIN
            } else {
                i64::MAX
            });
            if !self.store.adjust_available(account, delta).await? {
                warn!(%account, ?operation, "reconcile adjustment skipped: ledger entry is gone");
                return Ok(());
            }
        }

        if !self.store.record_usage(account, operation, actual).await? {
            warn!(%account, ?operation, "usage not recorded: ledger entry is gone");
        }
        debug!(%account, ?operation, reserved, actual, "reconciled");
        Ok(())
    }
}
