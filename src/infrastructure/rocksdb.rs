use super::in_memory::SettlementState;
use crate::domain::negotiation::{CancellationRequest, SupplementRequest};
use crate::domain::payment::Payment;
use crate::domain::ports::{SettlementStore, UnitOfWork};
use crate::domain::receipt::Receipt;
use crate::domain::work_order::{Quote, ServiceRequest, WorkOrder};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const CF_SERVICE_REQUESTS: &str = "service_requests";
pub const CF_QUOTES: &str = "quotes";
pub const CF_WORK_ORDERS: &str = "work_orders";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_SUPPLEMENTS: &str = "supplements";
pub const CF_CANCELLATIONS: &str = "cancellations";
/// Keyed by payment id.
pub const CF_RECEIPTS: &str = "receipts";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_SERVICE_REQUESTS,
    CF_QUOTES,
    CF_WORK_ORDERS,
    CF_PAYMENTS,
    CF_SUPPLEMENTS,
    CF_CANCELLATIONS,
    CF_RECEIPTS,
];

/// A persistent store backed by RocksDB, one column family per record type.
///
/// The full record set is loaded into memory at open so invariant checks and
/// queries never scan the disk. A unit of work becomes one `WriteBatch`, so a
/// crash never leaves half of a transition on disk.
///
/// `Clone` shares the underlying `Arc<DB>` and cache.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    cache: Arc<RwLock<SettlementState>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path` and loads every record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let state = SettlementState {
            service_requests: load(&db, CF_SERVICE_REQUESTS, |r: &ServiceRequest| r.id)?,
            quotes: load(&db, CF_QUOTES, |r: &Quote| r.id)?,
            work_orders: load(&db, CF_WORK_ORDERS, |r: &WorkOrder| r.id)?,
            payments: load(&db, CF_PAYMENTS, |r: &Payment| r.id)?,
            supplements: load(&db, CF_SUPPLEMENTS, |r: &SupplementRequest| r.id)?,
            cancellations: load(&db, CF_CANCELLATIONS, |r: &CancellationRequest| r.id)?,
            receipts: load(&db, CF_RECEIPTS, |r: &Receipt| r.payment_id)?,
        };

        Ok(Self {
            db: Arc::new(db),
            cache: Arc::new(RwLock::new(state)),
        })
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: Uuid,
        record: &T,
    ) -> Result<()> {
        let cf = self.db.cf_handle(cf_name).ok_or_else(|| missing_cf(cf_name))?;
        let value = serde_json::to_vec(record)
            .map_err(|e| SettlementError::Storage(format!("Serialization error: {}", e)))?;
        batch.put_cf(&cf, key.as_bytes(), value);
        Ok(())
    }

    fn batch_for(&self, unit: &UnitOfWork) -> Result<WriteBatch> {
        let mut batch = WriteBatch::default();
        for r in &unit.service_requests {
            self.put(&mut batch, CF_SERVICE_REQUESTS, r.id, r)?;
        }
        for r in &unit.quotes {
            self.put(&mut batch, CF_QUOTES, r.id, r)?;
        }
        for r in &unit.work_orders {
            self.put(&mut batch, CF_WORK_ORDERS, r.id, r)?;
        }
        for r in &unit.payments {
            self.put(&mut batch, CF_PAYMENTS, r.id, r)?;
        }
        for r in &unit.supplements {
            self.put(&mut batch, CF_SUPPLEMENTS, r.id, r)?;
        }
        for r in &unit.cancellations {
            self.put(&mut batch, CF_CANCELLATIONS, r.id, r)?;
        }
        for r in &unit.receipts {
            self.put(&mut batch, CF_RECEIPTS, r.payment_id, r)?;
        }
        Ok(batch)
    }
}

fn missing_cf(name: &str) -> SettlementError {
    SettlementError::Storage(format!("Column family {} not found", name))
}

fn load<T, F>(db: &DB, cf_name: &str, key_of: F) -> Result<HashMap<Uuid, T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Uuid,
{
    let cf = db.cf_handle(cf_name).ok_or_else(|| missing_cf(cf_name))?;
    let mut records = HashMap::new();
    for item in db.iterator_cf(&cf, IteratorMode::Start) {
        let (_key, value) = item?;
        let record: T = serde_json::from_slice(&value).map_err(|e| {
            SettlementError::Storage(format!("Failed to deserialize {} record: {}", cf_name, e))
        })?;
        records.insert(key_of(&record), record);
    }
    Ok(records)
}

#[async_trait]
impl SettlementStore for RocksDBStore {
    async fn service_request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        Ok(self.cache.read().await.service_requests.get(&id).cloned())
    }

    async fn quote(&self, id: Uuid) -> Result<Option<Quote>> {
        Ok(self.cache.read().await.quotes.get(&id).cloned())
    }

    async fn quotes_for_request(&self, service_request_id: Uuid) -> Result<Vec<Quote>> {
        Ok(self.cache.read().await.quotes_for_request(service_request_id))
    }

    async fn work_order(&self, id: Uuid) -> Result<Option<WorkOrder>> {
        Ok(self.cache.read().await.work_orders.get(&id).cloned())
    }

    async fn work_order_for_request(&self, service_request_id: Uuid) -> Result<Option<WorkOrder>> {
        Ok(self.cache.read().await.work_order_for_request(service_request_id))
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.cache.read().await.payments.get(&id).cloned())
    }

    async fn payment_by_hold_ref(&self, hold_ref: &str) -> Result<Option<Payment>> {
        Ok(self.cache.read().await.payment_by_hold_ref(hold_ref))
    }

    async fn payments_for_work_order(&self, work_order_id: Uuid) -> Result<Vec<Payment>> {
        Ok(self.cache.read().await.payments_for_work_order(work_order_id))
    }

    async fn active_payment(&self, work_order_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.cache.read().await.active_payment(work_order_id))
    }

    async fn supplement(&self, id: Uuid) -> Result<Option<SupplementRequest>> {
        Ok(self.cache.read().await.supplements.get(&id).cloned())
    }

    async fn open_supplement(&self, work_order_id: Uuid) -> Result<Option<SupplementRequest>> {
        Ok(self.cache.read().await.open_supplement(work_order_id))
    }

    async fn cancellation(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        Ok(self.cache.read().await.cancellations.get(&id).cloned())
    }

    async fn open_cancellation(&self, work_order_id: Uuid) -> Result<Option<CancellationRequest>> {
        Ok(self.cache.read().await.open_cancellation(work_order_id))
    }

    async fn receipt_for_payment(&self, payment_id: Uuid) -> Result<Option<Receipt>> {
        Ok(self.cache.read().await.receipts.get(&payment_id).cloned())
    }

    async fn receipts(&self) -> Result<Vec<Receipt>> {
        Ok(self.cache.read().await.receipts())
    }

    async fn expired_supplements(&self, now: DateTime<Utc>) -> Result<Vec<SupplementRequest>> {
        Ok(self.cache.read().await.expired_supplements(now))
    }

    async fn expired_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<CancellationRequest>> {
        Ok(self.cache.read().await.expired_cancellations(now))
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.validate(&unit)?;
        let batch = self.batch_for(&unit)?;
        self.db.write(batch)?;
        cache.apply(unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::{CardType, FeeBreakdown, ProcessorId};
    use crate::domain::money::Money;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn payment(work_order_id: Uuid) -> Payment {
        Payment::reserve(
            Uuid::new_v4(),
            "PAY-1".into(),
            work_order_id,
            "c1".into(),
            "p1".into(),
            ProcessorId::Stripe,
            CardType::Credit,
            FeeBreakdown::compute(Money::new(dec!(200)), ProcessorId::Stripe, CardType::Credit)
                .unwrap(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let wo_id = Uuid::new_v4();
        let p = payment(wo_id);

        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store
                .commit(UnitOfWork::new().payment(p.clone()))
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.payment(p.id).await.unwrap(), Some(p.clone()));
        assert_eq!(store.active_payment(wo_id).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn test_rocksdb_rejects_second_active_payment() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let wo_id = Uuid::new_v4();

        store
            .commit(UnitOfWork::new().payment(payment(wo_id)))
            .await
            .unwrap();
        let result = store.commit(UnitOfWork::new().payment(payment(wo_id))).await;

        assert!(matches!(result, Err(SettlementError::Conflict(_))));
        drop(store);
        let reopened = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(reopened.payments_for_work_order(wo_id).await.unwrap().len(), 1);
    }
}
