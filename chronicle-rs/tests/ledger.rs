//! Integration tests for the credit ledger: contention, conservation and
//! the non-negative balance guarantee.

use std::sync::Arc;

use chronicle_rs::errors::LedgerError;
use chronicle_rs::ledger::{
    AccountKey, CreditLedger, InMemoryLedger, LedgerEntry, LedgerOperation, LedgerResult,
    LedgerStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn account() -> AccountKey {
    AccountKey::new("tenant-1", "user-1")
}

async fn ledger_with(credits: i64, overage: bool) -> CreditLedger<InMemoryLedger> {
    let store = InMemoryLedger::new();
    store
        .insert(
            account(),
            LedgerEntry {
                overage_enabled: overage,
                ..LedgerEntry::with_credits(credits)
            },
        )
        .await;
    CreditLedger::new(store, true)
}

async fn entry(ledger: &CreditLedger<InMemoryLedger>) -> LedgerEntry {
    ledger.store().load(&account()).await.unwrap().unwrap()
}

/// Store whose `load` is always answered with a snapshot taken before a
/// competing writer spent `competing_debit` credits.
struct StaleReadStore {
    inner: InMemoryLedger,
    competing_debit: i64,
}

impl LedgerStore for StaleReadStore {
    async fn load(&self, account: &AccountKey) -> LedgerResult<Option<LedgerEntry>> {
        let snapshot = self.inner.load(account).await?;
        self.inner
            .adjust_available(account, -self.competing_debit)
            .await?;
        Ok(snapshot)
    }

    async fn compare_and_set_available(
        &self,
        account: &AccountKey,
        expected: i64,
        new: i64,
    ) -> LedgerResult<bool> {
        self.inner
            .compare_and_set_available(account, expected, new)
            .await
    }

    async fn adjust_available(&self, account: &AccountKey, delta: i64) -> LedgerResult<bool> {
        self.inner.adjust_available(account, delta).await
    }

    async fn record_usage(
        &self,
        account: &AccountKey,
        operation: LedgerOperation,
        amount: u64,
    ) -> LedgerResult<bool> {
        self.inner.record_usage(account, operation, amount).await
    }
}

// ---------------------------------------------------------------------------
// Contention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_reservations_never_overspend() {
    let ledger = Arc::new(ledger_with(100, false).await);
    let key = account();

    let (a, b) = tokio::join!(ledger.reserve(&key, 60), ledger.reserve(&key, 60));

    let granted: Vec<u64> = [&a, &b]
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|r| r.debited))
        .collect();
    assert_eq!(granted, vec![60]);
    assert!([a, b].iter().any(|r| matches!(r, Err(e) if e.is_insufficient())));
    assert_eq!(entry(&ledger).await.available_credits, 40);
}

#[tokio::test]
async fn test_concurrent_reservations_across_tasks() {
    let ledger = Arc::new(ledger_with(100, false).await);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(&account(), 30).await })
        })
        .collect();

    let mut debited = 0;
    for handle in handles {
        if let Ok(r) = handle.await.unwrap() {
            debited += r.debited;
        }
    }
    let remaining = entry(&ledger).await.available_credits;
    assert!(debited <= 100);
    assert_eq!(remaining, 100 - debited as i64);
    assert!(remaining >= 0);
}

#[tokio::test]
async fn test_stale_read_loses_race_and_is_not_retried() {
    let inner = InMemoryLedger::new();
    inner.insert(account(), LedgerEntry::with_credits(100)).await;
    let ledger = CreditLedger::new(
        StaleReadStore {
            inner,
            competing_debit: 30,
        },
        true,
    );

    let err = ledger.reserve(&account(), 50).await.unwrap_err();
    assert_eq!(err, LedgerError::RaceLost);
    assert!(err.is_insufficient());

    // Only the competing writer's debit landed.
    let balance = ledger
        .store()
        .inner
        .load(&account())
        .await
        .unwrap()
        .unwrap()
        .available_credits;
    assert_eq!(balance, 70);
}

// ---------------------------------------------------------------------------
// Conservation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reserve_then_reconcile_conserves_credits() {
    let ledger = ledger_with(1_000, false).await;
    let key = account();

    let ingest = ledger.reserve(&key, 100).await.unwrap();
    let resolve = ledger.reserve(&key, 20).await.unwrap();
    ledger
        .reconcile(&key, LedgerOperation::Ingestion, ingest.debited, 70)
        .await
        .unwrap();
    ledger
        .reconcile(&key, LedgerOperation::Resolution, resolve.debited, 25)
        .await
        .unwrap();

    let e = entry(&ledger).await;
    assert_eq!(e.used_credits, 95);
    assert_eq!(e.available_credits + e.used_credits as i64, 1_000);
    assert_eq!(e.usage(LedgerOperation::Ingestion), 70);
    assert_eq!(e.usage(LedgerOperation::Resolution), 25);
}

#[tokio::test]
async fn test_refund_restores_reservation() {
    let ledger = ledger_with(100, false).await;
    let r = ledger.reserve(&account(), 40).await.unwrap();
    ledger.refund(&account(), r.debited).await.unwrap();

    let e = entry(&ledger).await;
    assert_eq!(e.available_credits, 100);
    assert_eq!(e.used_credits, 0);
}

#[tokio::test]
async fn test_reservations_never_drive_balance_negative() {
    let ledger = ledger_with(25, true).await;
    let key = account();

    let first = ledger.reserve(&key, 20).await.unwrap();
    let second = ledger.reserve(&key, 20).await.unwrap();
    assert_eq!(first.debited, 20);
    assert_eq!(second.authorized, 20);
    assert_eq!(second.debited, 5);
    assert_eq!(entry(&ledger).await.available_credits, 0);

    let third = ledger.reserve(&key, 20).await.unwrap();
    assert_eq!(third.debited, 0);
    assert_eq!(entry(&ledger).await.available_credits, 0);
}

#[tokio::test]
async fn test_overage_debt_survives_later_reservations() {
    let ledger = ledger_with(10, true).await;
    let key = account();

    let first = ledger.reserve(&key, 10).await.unwrap();
    ledger
        .reconcile(&key, LedgerOperation::Ingestion, first.debited, 60)
        .await
        .unwrap();
    assert_eq!(entry(&ledger).await.available_credits, -50);

    let second = ledger.reserve(&key, 5).await.unwrap();
    assert_eq!(second.authorized, 5);
    assert_eq!(second.debited, 0);
    assert_eq!(entry(&ledger).await.available_credits, -50);

    ledger
        .reconcile(&key, LedgerOperation::Resolution, second.debited, 5)
        .await
        .unwrap();
    let e = entry(&ledger).await;
    assert_eq!(e.available_credits, -55);
    assert_eq!(e.used_credits, 65);
    assert_eq!(e.available_credits + e.used_credits as i64, 10);
}

#[tokio::test]
async fn test_missing_account_is_reported() {
    let ledger = CreditLedger::new(InMemoryLedger::new(), true);
    let err = ledger.reserve(&account(), 1).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));
}
