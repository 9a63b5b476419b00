use super::Versioned;
use crate::domain::activity::{Activity, ActivityScope};
use crate::domain::deal::Deal;
use crate::domain::document::DocumentRecord;
use crate::domain::earnout::EarnoutSchedule;
use crate::domain::ids::{DealId, DocumentId, ListingId, MilestoneId, NdaRequestId, PartyId, PaymentId};
use crate::domain::milestone::Milestone;
use crate::domain::nda::NdaRequest;
use crate::domain::payment::Payment;
use crate::domain::ports::{
    ActivityStore, DealStore, DocumentStore, EarnoutStore, MilestoneStore, NdaStore, PaymentStore,
    Repositories,
};
use crate::error::{DealError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_DEALS: &str = "deals";
pub const CF_MILESTONES: &str = "milestones";
pub const CF_DOCUMENTS: &str = "documents";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_NDAS: &str = "ndas";
pub const CF_EARNOUTS: &str = "earnouts";
/// Activity entries keyed `{scope}/{sequence}` so a prefix scan returns append order.
pub const CF_ACTIVITIES: &str = "activities";
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 8] = [
    CF_DEALS,
    CF_MILESTONES,
    CF_DOCUMENTS,
    CF_PAYMENTS,
    CF_NDAS,
    CF_EARNOUTS,
    CF_ACTIVITIES,
    CF_META,
];

const ACTIVITY_SEQ_KEY: &[u8] = b"activity_seq";

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own column family as JSON. RocksDB has no native
/// compare-and-swap, so every read-compare-write is serialized through
/// `write_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Exposes this database through every storage port.
    pub fn repositories(self) -> Repositories {
        let store = Arc::new(self);
        Repositories {
            deals: store.clone(),
            milestones: store.clone(),
            documents: store.clone(),
            payments: store.clone(),
            ndas: store.clone(),
            earnouts: store.clone(),
            activities: store,
        }
    }

    fn handle(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            DealError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn put_json<T: Serialize>(&self, cf_name: &'static str, key: &str, value: &T) -> Result<()> {
        let cf = self.handle(cf_name)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &'static str, key: &str) -> Result<Option<T>> {
        let cf = self.handle(cf_name)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decodes every value whose key starts with `prefix` (all values for "").
    fn scan_json<T: DeserializeOwned>(&self, cf_name: &'static str, prefix: &str) -> Result<Vec<T>> {
        let cf = self.handle(cf_name)?;
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn delete_where<T: DeserializeOwned>(
        &self,
        cf_name: &'static str,
        predicate: impl Fn(&T) -> bool,
    ) -> Result<()> {
        let cf = self.handle(cf_name)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let row: T = serde_json::from_slice(&value)?;
            if predicate(&row) {
                batch.delete_cf(cf, key);
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn insert_versioned<T>(&self, cf_name: &'static str, row: T) -> Result<()>
    where
        T: Versioned + Serialize + DeserializeOwned + Send + Sync,
    {
        let _guard = self.write_lock.lock().await;
        let key = row.key();
        if self.get_json::<T>(cf_name, &key)?.is_some() {
            return Err(DealError::conflict(T::ENTITY, key));
        }
        self.put_json(cf_name, &key, &row)
    }

    async fn compare_and_swap_versioned<T>(
        &self,
        cf_name: &'static str,
        mut row: T,
        expected_version: u64,
    ) -> Result<T>
    where
        T: Versioned + Serialize + DeserializeOwned + Send + Sync,
    {
        let _guard = self.write_lock.lock().await;
        let key = row.key();
        match self.get_json::<T>(cf_name, &key)? {
            None => Err(DealError::not_found(T::ENTITY, key)),
            Some(current) if current.version() != expected_version => {
                Err(DealError::conflict(T::ENTITY, key))
            }
            Some(_) => {
                row.set_version(expected_version + 1);
                self.put_json(cf_name, &key, &row)?;
                Ok(row)
            }
        }
    }
}

fn activity_prefix(scope: &ActivityScope) -> String {
    format!("{}/", scope.key())
}

#[async_trait]
impl DealStore for RocksDBStore {
    async fn insert(&self, deal: Deal) -> Result<()> {
        self.insert_versioned(CF_DEALS, deal).await
    }

    async fn get(&self, id: &DealId) -> Result<Option<Deal>> {
        self.get_json(CF_DEALS, id.as_str())
    }

    async fn compare_and_swap(&self, deal: Deal, expected_version: u64) -> Result<Deal> {
        self.compare_and_swap_versioned(CF_DEALS, deal, expected_version)
            .await
    }

    async fn remove(&self, id: &DealId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.handle(CF_DEALS)?;
        self.db.delete_cf(cf, id.as_str().as_bytes())?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Deal>> {
        self.scan_json(CF_DEALS, "")
    }
}

#[async_trait]
impl MilestoneStore for RocksDBStore {
    async fn store(&self, milestone: Milestone) -> Result<()> {
        self.put_json(CF_MILESTONES, milestone.id.as_str(), &milestone)
    }

    async fn get(&self, id: &MilestoneId) -> Result<Option<Milestone>> {
        self.get_json(CF_MILESTONES, id.as_str())
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Milestone>> {
        let all: Vec<Milestone> = self.scan_json(CF_MILESTONES, "")?;
        Ok(all.into_iter().filter(|m| &m.deal_id == deal).collect())
    }

    async fn remove_for_deal(&self, deal: &DealId) -> Result<()> {
        self.delete_where::<Milestone>(CF_MILESTONES, |m| &m.deal_id == deal)
    }
}

#[async_trait]
impl DocumentStore for RocksDBStore {
    async fn store(&self, document: DocumentRecord) -> Result<()> {
        self.put_json(CF_DOCUMENTS, document.id.as_str(), &document)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        self.get_json(CF_DOCUMENTS, id.as_str())
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<DocumentRecord>> {
        let all: Vec<DocumentRecord> = self.scan_json(CF_DOCUMENTS, "")?;
        let mut found: Vec<DocumentRecord> =
            all.into_iter().filter(|d| &d.deal_id == deal).collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn remove_for_deal(&self, deal: &DealId) -> Result<()> {
        self.delete_where::<DocumentRecord>(CF_DOCUMENTS, |d| &d.deal_id == deal)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        self.insert_versioned(CF_PAYMENTS, payment).await
    }

    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, id.as_str())
    }

    async fn compare_and_swap(&self, payment: Payment, expected_version: u64) -> Result<Payment> {
        self.compare_and_swap_versioned(CF_PAYMENTS, payment, expected_version)
            .await
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Payment>> {
        let all: Vec<Payment> = self.scan_json(CF_PAYMENTS, "")?;
        let mut found: Vec<Payment> = all.into_iter().filter(|p| &p.deal_id == deal).collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn remove_unfunded_for_deal(&self, deal: &DealId) -> Result<Option<Payment>> {
        let _guard = self.write_lock.lock().await;
        let all: Vec<Payment> = self.scan_json(CF_PAYMENTS, "")?;
        if let Some(funded) = all.into_iter().find(|p| &p.deal_id == deal && p.holds_funds()) {
            return Ok(Some(funded));
        }
        self.delete_where::<Payment>(CF_PAYMENTS, |p| &p.deal_id == deal)?;
        Ok(None)
    }
}

#[async_trait]
impl NdaStore for RocksDBStore {
    async fn insert(&self, request: NdaRequest) -> Result<()> {
        self.insert_versioned(CF_NDAS, request).await
    }

    async fn get(&self, id: &NdaRequestId) -> Result<Option<NdaRequest>> {
        self.get_json(CF_NDAS, id.as_str())
    }

    async fn compare_and_swap(&self, request: NdaRequest, expected_version: u64) -> Result<NdaRequest> {
        self.compare_and_swap_versioned(CF_NDAS, request, expected_version)
            .await
    }

    async fn find(&self, listing: &ListingId, buyer: &PartyId) -> Result<Vec<NdaRequest>> {
        let all: Vec<NdaRequest> = self.scan_json(CF_NDAS, "")?;
        let mut found: Vec<NdaRequest> = all
            .into_iter()
            .filter(|r| r.covers(listing, buyer))
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[async_trait]
impl EarnoutStore for RocksDBStore {
    async fn insert(&self, schedule: EarnoutSchedule) -> Result<()> {
        self.insert_versioned(CF_EARNOUTS, schedule).await
    }

    async fn get(&self, deal: &DealId) -> Result<Option<EarnoutSchedule>> {
        self.get_json(CF_EARNOUTS, deal.as_str())
    }

    async fn compare_and_swap(&self, schedule: EarnoutSchedule, expected_version: u64) -> Result<EarnoutSchedule> {
        self.compare_and_swap_versioned(CF_EARNOUTS, schedule, expected_version)
            .await
    }

    async fn remove(&self, deal: &DealId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.handle(CF_EARNOUTS)?;
        self.db.delete_cf(cf, deal.as_str().as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for RocksDBStore {
    async fn append(&self, activity: Activity) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let meta = self.handle(CF_META)?;
        let activities = self.handle(CF_ACTIVITIES)?;

        let next = match self.db.get_cf(meta, ACTIVITY_SEQ_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    DealError::InternalError(Box::new(std::io::Error::other(
                        "corrupt activity sequence",
                    )))
                })?;
                u64::from_be_bytes(raw) + 1
            }
            None => 0,
        };

        let key = format!("{}{next:020}", activity_prefix(&activity.scope));
        let mut batch = WriteBatch::default();
        batch.put_cf(activities, key.as_bytes(), serde_json::to_vec(&activity)?);
        batch.put_cf(meta, ACTIVITY_SEQ_KEY, next.to_be_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    async fn for_scope(&self, scope: &ActivityScope) -> Result<Vec<Activity>> {
        self.scan_json(CF_ACTIVITIES, &activity_prefix(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::ActivityType;
    use crate::domain::deal::{DealTerms, Stage};
    use crate::domain::ids::ActivityId;
    use crate::domain::money::Amount;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn deal(id: &str) -> Deal {
        Deal {
            id: DealId::new(id),
            listing_id: ListingId::new("listing-1"),
            buyer_id: PartyId::new("buyer"),
            seller_id: PartyId::new("seller"),
            stage: Stage::LoiSigned,
            previous_stage: None,
            agreed_price: Amount::new(dec!(100.0)).unwrap(),
            closing_date: None,
            created_at: Utc::now(),
            notes: String::new(),
            terms: DealTerms::default(),
            spa_document: None,
            disputes: Vec::new(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in ALL_CFS {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_deal_compare_and_swap() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let original = deal("deal-1");
        DealStore::insert(&store, original.clone()).await.unwrap();

        let mut moved = original.clone();
        moved.stage = Stage::DdInProgress;
        let saved = DealStore::compare_and_swap(&store, moved, 0).await.unwrap();
        assert_eq!(saved.version, 1);

        let stale = DealStore::compare_and_swap(&store, original, 0).await;
        assert!(matches!(stale, Err(DealError::ConcurrentModification { .. })));

        let all = DealStore::get_all(&store).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stage, Stage::DdInProgress);
    }

    #[tokio::test]
    async fn test_rocksdb_activity_prefix_scan() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        for (scope, title) in [
            ("deal-1", "first"),
            ("deal-10", "other deal"),
            ("deal-1", "second"),
        ] {
            ActivityStore::append(
                &store,
                Activity {
                    id: ActivityId::generate(),
                    scope: ActivityScope::Deal(DealId::new(scope)),
                    activity_type: ActivityType::StageChanged,
                    title: title.to_string(),
                    description: String::new(),
                    actor_id: PartyId::new("system"),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let titles: Vec<String> = store
            .for_scope(&ActivityScope::Deal(DealId::new("deal-1")))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            DealStore::insert(&store, deal("deal-1")).await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        let retrieved = DealStore::get(&store, &DealId::new("deal-1")).await.unwrap();
        assert!(retrieved.is_some());
    }
}
