use super::activity_log::{ActivityLog, Entry};
use crate::domain::activity::{ActivityScope, ActivityType};
use crate::domain::ids::{ListingId, NdaRequestId, PartyId};
use crate::domain::nda::{NdaRequest, NdaStatus};
use crate::domain::ports::{NdaStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// Input for [`NdaGate::request_access`].
#[derive(Debug, Clone)]
pub struct NewNdaRequest {
    pub id: NdaRequestId,
    pub listing_id: ListingId,
    pub buyer_id: PartyId,
    pub seller_id: PartyId,
}

/// Access-control workflow in front of protected listing fields and deal creation.
///
/// The gate only records the unlocked capability. Callers decide what to reveal
/// or create after asking [`NdaGate::is_approved`].
#[derive(Clone)]
pub struct NdaGate {
    ndas: NdaStoreRef,
    log: ActivityLog,
}

impl NdaGate {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            ndas: repos.ndas.clone(),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    /// Files a pending request. Repeating the same id, or asking again while a
    /// pending or approved request exists for the same parties, returns that
    /// request instead of creating another.
    pub async fn request_access(&self, new: NewNdaRequest, now: DateTime<Utc>) -> Result<NdaRequest> {
        if let Some(existing) = self.ndas.get(&new.id).await? {
            return Ok(existing);
        }
        let open = self
            .ndas
            .find(&new.listing_id, &new.buyer_id)
            .await?
            .into_iter()
            .find(|r| r.seller_id == new.seller_id && r.status != NdaStatus::Rejected);
        if let Some(existing) = open {
            return Ok(existing);
        }

        let request = NdaRequest {
            id: new.id,
            listing_id: new.listing_id,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            status: NdaStatus::Pending,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
            version: 0,
        };
        self.ndas.insert(request.clone()).await?;

        self.log
            .record(
                ActivityScope::Listing(request.listing_id.clone()),
                Entry::new(ActivityType::NdaRequested, "NDA requested")
                    .with_description(format!("Buyer {} requested NDA access", request.buyer_id)),
                &request.buyer_id,
                now,
            )
            .await?;
        info!(nda_id = %request.id, listing_id = %request.listing_id, buyer_id = %request.buyer_id, "NDA requested");
        Ok(request)
    }

    pub async fn approve(&self, id: &NdaRequestId, actor: &PartyId, now: DateTime<Utc>) -> Result<NdaRequest> {
        self.resolve(id, NdaStatus::Approved, actor, now).await
    }

    pub async fn reject(&self, id: &NdaRequestId, actor: &PartyId, now: DateTime<Utc>) -> Result<NdaRequest> {
        self.resolve(id, NdaStatus::Rejected, actor, now).await
    }

    async fn resolve(
        &self,
        id: &NdaRequestId,
        outcome: NdaStatus,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<NdaRequest> {
        let mut request = self.get(id).await?;
        let expected = request.version;
        request.resolve(outcome, actor.clone(), now)?;
        let request = self.ndas.compare_and_swap(request, expected).await?;

        let (activity_type, title) = match outcome {
            NdaStatus::Approved => (ActivityType::NdaApproved, "NDA approved"),
            _ => (ActivityType::NdaRejected, "NDA rejected"),
        };
        self.log
            .record(
                ActivityScope::Listing(request.listing_id.clone()),
                Entry::new(activity_type, title)
                    .with_description(format!("NDA for buyer {} is {}", request.buyer_id, outcome)),
                actor,
                now,
            )
            .await?;
        info!(nda_id = %id, actor = %actor, status = %outcome, "NDA resolved");
        Ok(request)
    }

    pub async fn get(&self, id: &NdaRequestId) -> Result<NdaRequest> {
        self.ndas
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("nda request", id))
    }

    /// Whether `buyer` may see the protected fields of `listing`.
    pub async fn is_approved(&self, listing: &ListingId, buyer: &PartyId) -> Result<bool> {
        Ok(self
            .ndas
            .find(listing, buyer)
            .await?
            .iter()
            .any(NdaRequest::is_approved))
    }

    /// Whether a deal between these exact parties may be created for `listing`.
    pub async fn is_approved_between(
        &self,
        listing: &ListingId,
        buyer: &PartyId,
        seller: &PartyId,
    ) -> Result<bool> {
        Ok(self
            .ndas
            .find(listing, buyer)
            .await?
            .iter()
            .any(|r| &r.seller_id == seller && r.is_approved()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory;

    fn new_request(id: &str) -> NewNdaRequest {
        NewNdaRequest {
            id: NdaRequestId::new(id),
            listing_id: ListingId::new("listing-1"),
            buyer_id: PartyId::new("buyer"),
            seller_id: PartyId::new("seller"),
        }
    }

    #[tokio::test]
    async fn test_approve_then_reject_fails() {
        let repos = in_memory::repositories();
        let gate = NdaGate::new(&repos);
        let now = Utc::now();
        let seller = PartyId::new("seller");

        let request = gate.request_access(new_request("nda-1"), now).await.unwrap();
        gate.approve(&request.id, &seller, now).await.unwrap();

        let err = gate.reject(&request.id, &seller, now).await.unwrap_err();
        assert!(matches!(err, DealError::AlreadyResolved { .. }));
        assert_eq!(gate.get(&request.id).await.unwrap().status, NdaStatus::Approved);

        let log = ActivityLog::new(repos.activities.clone());
        let entries = log.for_listing(&ListingId::new("listing-1")).await.unwrap();
        let kinds: Vec<ActivityType> = entries.iter().map(|a| a.activity_type).collect();
        assert_eq!(kinds, vec![ActivityType::NdaRequested, ActivityType::NdaApproved]);
    }

    #[tokio::test]
    async fn test_is_approved_tracks_resolution() {
        let repos = in_memory::repositories();
        let gate = NdaGate::new(&repos);
        let listing = ListingId::new("listing-1");
        let buyer = PartyId::new("buyer");
        let now = Utc::now();

        let request = gate.request_access(new_request("nda-1"), now).await.unwrap();
        assert!(!gate.is_approved(&listing, &buyer).await.unwrap());

        gate.approve(&request.id, &PartyId::new("seller"), now).await.unwrap();
        assert!(gate.is_approved(&listing, &buyer).await.unwrap());
        assert!(gate
            .is_approved_between(&listing, &buyer, &PartyId::new("seller"))
            .await
            .unwrap());
        assert!(!gate
            .is_approved_between(&listing, &buyer, &PartyId::new("someone-else"))
            .await
            .unwrap());
        assert!(!gate
            .is_approved(&ListingId::new("listing-2"), &buyer)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_requests_collapse() {
        let repos = in_memory::repositories();
        let gate = NdaGate::new(&repos);
        let now = Utc::now();

        let first = gate.request_access(new_request("nda-1"), now).await.unwrap();
        let retry = gate.request_access(new_request("nda-1"), now).await.unwrap();
        let second = gate.request_access(new_request("nda-2"), now).await.unwrap();
        assert_eq!(first.id, retry.id);
        assert_eq!(first.id, second.id);

        gate.reject(&first.id, &PartyId::new("seller"), now).await.unwrap();
        let fresh = gate.request_access(new_request("nda-3"), now).await.unwrap();
        assert_eq!(fresh.id, NdaRequestId::new("nda-3"));
        assert_eq!(fresh.status, NdaStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let repos = in_memory::repositories();
        let gate = NdaGate::new(&repos);
        let err = gate
            .approve(&NdaRequestId::new("missing"), &PartyId::new("seller"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::NotFound { .. }));
    }
}
