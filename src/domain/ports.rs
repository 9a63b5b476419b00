//! Persistence boundaries, one per entity.
//!
//! Versioned entities (deals, payments, NDA requests, earnout schedules) are
//! written through `compare_and_swap`: the write succeeds only when the stored
//! version still equals `expected_version`, and the stored copy gets
//! `expected_version + 1`. A lost race surfaces as
//! [`DealError::ConcurrentModification`](crate::error::DealError).

use super::activity::{Activity, ActivityScope};
use super::deal::Deal;
use super::document::DocumentRecord;
use super::earnout::EarnoutSchedule;
use super::ids::{DealId, DocumentId, ListingId, MilestoneId, NdaRequestId, PartyId, PaymentId};
use super::milestone::Milestone;
use super::nda::NdaRequest;
use super::payment::Payment;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait DealStore: Send + Sync {
    /// Inserts a new deal. Fails with `ConcurrentModification` if the id exists.
    async fn insert(&self, deal: Deal) -> Result<()>;
    async fn get(&self, id: &DealId) -> Result<Option<Deal>>;
    async fn compare_and_swap(&self, deal: Deal, expected_version: u64) -> Result<Deal>;
    async fn remove(&self, id: &DealId) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<Deal>>;
}

#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn store(&self, milestone: Milestone) -> Result<()>;
    async fn get(&self, id: &MilestoneId) -> Result<Option<Milestone>>;
    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Milestone>>;
    async fn remove_for_deal(&self, deal: &DealId) -> Result<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn store(&self, document: DocumentRecord) -> Result<()>;
    async fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>>;
    async fn for_deal(&self, deal: &DealId) -> Result<Vec<DocumentRecord>>;
    async fn remove_for_deal(&self, deal: &DealId) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>>;
    async fn compare_and_swap(&self, payment: Payment, expected_version: u64) -> Result<Payment>;
    async fn for_deal(&self, deal: &DealId) -> Result<Vec<Payment>>;
    /// Removes every payment of `deal` unless one of them holds funds. That
    /// payment is returned instead and nothing is removed. The check and the
    /// removal are one atomic step with respect to `compare_and_swap`.
    async fn remove_unfunded_for_deal(&self, deal: &DealId) -> Result<Option<Payment>>;
}

#[async_trait]
pub trait NdaStore: Send + Sync {
    async fn insert(&self, request: NdaRequest) -> Result<()>;
    async fn get(&self, id: &NdaRequestId) -> Result<Option<NdaRequest>>;
    async fn compare_and_swap(&self, request: NdaRequest, expected_version: u64) -> Result<NdaRequest>;
    async fn find(&self, listing: &ListingId, buyer: &PartyId) -> Result<Vec<NdaRequest>>;
}

#[async_trait]
pub trait EarnoutStore: Send + Sync {
    async fn insert(&self, schedule: EarnoutSchedule) -> Result<()>;
    async fn get(&self, deal: &DealId) -> Result<Option<EarnoutSchedule>>;
    async fn compare_and_swap(&self, schedule: EarnoutSchedule, expected_version: u64) -> Result<EarnoutSchedule>;
    async fn remove(&self, deal: &DealId) -> Result<()>;
}

/// Append-only; entries are never updated or deleted.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, activity: Activity) -> Result<()>;
    /// Entries of one scope in append order.
    async fn for_scope(&self, scope: &ActivityScope) -> Result<Vec<Activity>>;
}

pub type DealStoreRef = Arc<dyn DealStore>;
pub type MilestoneStoreRef = Arc<dyn MilestoneStore>;
pub type DocumentStoreRef = Arc<dyn DocumentStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type NdaStoreRef = Arc<dyn NdaStore>;
pub type EarnoutStoreRef = Arc<dyn EarnoutStore>;
pub type ActivityStoreRef = Arc<dyn ActivityStore>;

/// The full set of stores the application services run against.
#[derive(Clone)]
pub struct Repositories {
    pub deals: DealStoreRef,
    pub milestones: MilestoneStoreRef,
    pub documents: DocumentStoreRef,
    pub payments: PaymentStoreRef,
    pub ndas: NdaStoreRef,
    pub earnouts: EarnoutStoreRef,
    pub activities: ActivityStoreRef,
}
