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
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds a full set of empty in-memory stores.
pub fn repositories() -> Repositories {
    Repositories {
        deals: Arc::new(InMemoryDealStore::new()),
        milestones: Arc::new(InMemoryMilestoneStore::new()),
        documents: Arc::new(InMemoryDocumentStore::new()),
        payments: Arc::new(InMemoryPaymentStore::new()),
        ndas: Arc::new(InMemoryNdaStore::new()),
        earnouts: Arc::new(InMemoryEarnoutStore::new()),
        activities: Arc::new(InMemoryActivityStore::new()),
    }
}

/// Map of versioned rows. Compare-and-swap runs entirely under the write lock.
struct VersionedTable<T> {
    rows: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> Clone for VersionedTable<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<T> Default for VersionedTable<T> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Versioned> VersionedTable<T> {
    async fn insert(&self, row: T) -> Result<()> {
        let mut rows = self.rows.write().await;
        let key = row.key();
        if rows.contains_key(&key) {
            return Err(DealError::conflict(T::ENTITY, key));
        }
        rows.insert(key, row);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        let rows = self.rows.read().await;
        Ok(rows.get(key).cloned())
    }

    async fn compare_and_swap(&self, mut row: T, expected_version: u64) -> Result<T> {
        let mut rows = self.rows.write().await;
        let key = row.key();
        match rows.get(&key).map(T::version) {
            None => Err(DealError::not_found(T::ENTITY, key)),
            Some(current) if current != expected_version => {
                Err(DealError::conflict(T::ENTITY, key))
            }
            Some(_) => {
                row.set_version(expected_version + 1);
                rows.insert(key, row.clone());
                Ok(row)
            }
        }
    }

    async fn values(&self) -> Vec<T> {
        let rows = self.rows.read().await;
        rows.values().cloned().collect()
    }

    async fn remove_where(&self, predicate: impl Fn(&T) -> bool + Send) {
        let mut rows = self.rows.write().await;
        rows.retain(|_, row| !predicate(row));
    }
}

/// A thread-safe in-memory store for deals.
#[derive(Default, Clone)]
pub struct InMemoryDealStore {
    deals: VersionedTable<Deal>,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DealStore for InMemoryDealStore {
    async fn insert(&self, deal: Deal) -> Result<()> {
        self.deals.insert(deal).await
    }

    async fn get(&self, id: &DealId) -> Result<Option<Deal>> {
        self.deals.get(id.as_str()).await
    }

    async fn compare_and_swap(&self, deal: Deal, expected_version: u64) -> Result<Deal> {
        self.deals.compare_and_swap(deal, expected_version).await
    }

    async fn remove(&self, id: &DealId) -> Result<()> {
        self.deals.remove_where(|deal| &deal.id == id).await;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Deal>> {
        let mut deals = self.deals.values().await;
        deals.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(deals)
    }
}

/// A thread-safe in-memory store for milestones. Writes are plain upserts.
#[derive(Default, Clone)]
pub struct InMemoryMilestoneStore {
    milestones: Arc<RwLock<HashMap<MilestoneId, Milestone>>>,
}

impl InMemoryMilestoneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MilestoneStore for InMemoryMilestoneStore {
    async fn store(&self, milestone: Milestone) -> Result<()> {
        let mut milestones = self.milestones.write().await;
        milestones.insert(milestone.id.clone(), milestone);
        Ok(())
    }

    async fn get(&self, id: &MilestoneId) -> Result<Option<Milestone>> {
        let milestones = self.milestones.read().await;
        Ok(milestones.get(id).cloned())
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Milestone>> {
        let milestones = self.milestones.read().await;
        let mut found: Vec<Milestone> = milestones
            .values()
            .filter(|m| &m.deal_id == deal)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn remove_for_deal(&self, deal: &DealId) -> Result<()> {
        let mut milestones = self.milestones.write().await;
        milestones.retain(|_, m| &m.deal_id != deal);
        Ok(())
    }
}

/// A thread-safe in-memory store for document records.
#[derive(Default, Clone)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, DocumentRecord>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn store(&self, document: DocumentRecord) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        let documents = self.documents.read().await;
        Ok(documents.get(id).cloned())
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<DocumentRecord>> {
        let documents = self.documents.read().await;
        let mut found: Vec<DocumentRecord> = documents
            .values()
            .filter(|d| &d.deal_id == deal)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn remove_for_deal(&self, deal: &DealId) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.retain(|_, d| &d.deal_id != deal);
        Ok(())
    }
}

/// A thread-safe in-memory store for payments.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: VersionedTable<Payment>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        self.payments.insert(payment).await
    }

    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        self.payments.get(id.as_str()).await
    }

    async fn compare_and_swap(&self, payment: Payment, expected_version: u64) -> Result<Payment> {
        self.payments.compare_and_swap(payment, expected_version).await
    }

    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .payments
            .values()
            .await
            .into_iter()
            .filter(|p| &p.deal_id == deal)
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn remove_unfunded_for_deal(&self, deal: &DealId) -> Result<Option<Payment>> {
        let mut rows = self.payments.rows.write().await;
        if let Some(funded) = rows.values().find(|p| &p.deal_id == deal && p.holds_funds()) {
            return Ok(Some(funded.clone()));
        }
        rows.retain(|_, p| &p.deal_id != deal);
        Ok(None)
    }
}

/// A thread-safe in-memory store for NDA requests.
#[derive(Default, Clone)]
pub struct InMemoryNdaStore {
    requests: VersionedTable<NdaRequest>,
}

impl InMemoryNdaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NdaStore for InMemoryNdaStore {
    async fn insert(&self, request: NdaRequest) -> Result<()> {
        self.requests.insert(request).await
    }

    async fn get(&self, id: &NdaRequestId) -> Result<Option<NdaRequest>> {
        self.requests.get(id.as_str()).await
    }

    async fn compare_and_swap(&self, request: NdaRequest, expected_version: u64) -> Result<NdaRequest> {
        self.requests.compare_and_swap(request, expected_version).await
    }

    async fn find(&self, listing: &ListingId, buyer: &PartyId) -> Result<Vec<NdaRequest>> {
        let mut found: Vec<NdaRequest> = self
            .requests
            .values()
            .await
            .into_iter()
            .filter(|r| r.covers(listing, buyer))
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

/// A thread-safe in-memory store for earnout schedules, keyed by deal.
#[derive(Default, Clone)]
pub struct InMemoryEarnoutStore {
    schedules: VersionedTable<EarnoutSchedule>,
}

impl InMemoryEarnoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EarnoutStore for InMemoryEarnoutStore {
    async fn insert(&self, schedule: EarnoutSchedule) -> Result<()> {
        self.schedules.insert(schedule).await
    }

    async fn get(&self, deal: &DealId) -> Result<Option<EarnoutSchedule>> {
        self.schedules.get(deal.as_str()).await
    }

    async fn compare_and_swap(&self, schedule: EarnoutSchedule, expected_version: u64) -> Result<EarnoutSchedule> {
        self.schedules.compare_and_swap(schedule, expected_version).await
    }

    async fn remove(&self, deal: &DealId) -> Result<()> {
        self.schedules.remove_where(|s| &s.deal_id == deal).await;
        Ok(())
    }
}

/// A thread-safe in-memory activity log, partitioned by scope.
#[derive(Default, Clone)]
pub struct InMemoryActivityStore {
    entries: Arc<RwLock<HashMap<ActivityScope, Vec<Activity>>>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn append(&self, activity: Activity) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .entry(activity.scope.clone())
            .or_default()
            .push(activity);
        Ok(())
    }

    async fn for_scope(&self, scope: &ActivityScope) -> Result<Vec<Activity>> {
        let entries = self.entries.read().await;
        Ok(entries.get(scope).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::{DealTerms, Stage};
    use crate::domain::money::Amount;
    use crate::domain::payment::{PaymentStatus, PaymentType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

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
    async fn test_in_memory_deal_store() {
        let store = InMemoryDealStore::new();
        let deal = deal("deal-1");

        store.insert(deal.clone()).await.unwrap();
        let retrieved = store.get(&deal.id).await.unwrap().unwrap();
        assert_eq!(retrieved, deal);

        assert!(store.get(&DealId::new("deal-2")).await.unwrap().is_none());
        assert!(matches!(
            store.insert(deal).await,
            Err(DealError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = InMemoryDealStore::new();
        let original = deal("deal-1");
        store.insert(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.stage = Stage::DdInProgress;
        let saved = store.compare_and_swap(first, 0).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut second = original;
        second.stage = Stage::Cancelled;
        let err = store.compare_and_swap(second, 0).await.unwrap_err();
        assert!(matches!(err, DealError::ConcurrentModification { .. }));

        let current = store.get(&DealId::new("deal-1")).await.unwrap().unwrap();
        assert_eq!(current.stage, Stage::DdInProgress);
    }

    #[tokio::test]
    async fn test_compare_and_swap_on_missing_row() {
        let store = InMemoryDealStore::new();
        let err = store.compare_and_swap(deal("ghost"), 0).await.unwrap_err();
        assert!(matches!(err, DealError::NotFound { .. }));
    }

    fn payment(id: &str, status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(id),
            deal_id: DealId::new("deal-1"),
            payment_type: PaymentType::Fee,
            amount: Amount::new(dec!(500)).unwrap(),
            status,
            due_date: None,
            paid_at: None,
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            resolved_amount: None,
            earnout_period: None,
            waived: false,
            waiver_reason: None,
            refund_review: false,
            created_at: Utc::now(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_remove_unfunded_keeps_everything_when_funds_are_held() {
        let store = InMemoryPaymentStore::new();
        let deal = DealId::new("deal-1");
        store.insert(payment("pending", PaymentStatus::Pending)).await.unwrap();
        store.insert(payment("held", PaymentStatus::Escrowed)).await.unwrap();

        let funded = store.remove_unfunded_for_deal(&deal).await.unwrap();
        assert_eq!(funded.map(|p| p.id), Some(PaymentId::new("held")));
        assert_eq!(store.for_deal(&deal).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unfunded_clears_open_payments() {
        let store = InMemoryPaymentStore::new();
        let deal = DealId::new("deal-1");
        store.insert(payment("pending", PaymentStatus::Pending)).await.unwrap();
        store.insert(payment("refunded", PaymentStatus::Refunded)).await.unwrap();

        assert!(store.remove_unfunded_for_deal(&deal).await.unwrap().is_none());
        assert!(store.for_deal(&deal).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activity_store_preserves_append_order() {
        let store = InMemoryActivityStore::new();
        let scope = ActivityScope::Deal(DealId::new("deal-1"));
        for i in 0..3 {
            store
                .append(Activity {
                    id: crate::domain::ids::ActivityId::new(format!("a-{i}")),
                    scope: scope.clone(),
                    activity_type: crate::domain::activity::ActivityType::StageChanged,
                    title: format!("entry {i}"),
                    description: String::new(),
                    actor_id: PartyId::new("system"),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let titles: Vec<String> = store
            .for_scope(&scope)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["entry 0", "entry 1", "entry 2"]);
        assert!(store
            .for_scope(&ActivityScope::Deal(DealId::new("other")))
            .await
            .unwrap()
            .is_empty());
    }
}
