use crate::domain::activity::{Activity, ActivityScope, ActivityType};
use crate::domain::ids::{ActivityId, DealId, ListingId, PartyId};
use crate::domain::ports::ActivityStoreRef;
use crate::error::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Append-only audit trail shared by every service.
///
/// Services call [`ActivityLog::record`] only after the state change it
/// describes has been persisted, so the log never mentions a transition that
/// did not happen. Notification collaborators read it; the core never sends
/// anything itself.
#[derive(Clone)]
pub struct ActivityLog {
    store: ActivityStoreRef,
}

/// Fields of an entry about to be appended.
pub struct Entry {
    pub activity_type: ActivityType,
    pub title: String,
    pub description: String,
}

impl Entry {
    pub fn new(activity_type: ActivityType, title: impl Into<String>) -> Self {
        Self {
            activity_type,
            title: title.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl ActivityLog {
    pub fn new(store: ActivityStoreRef) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        scope: ActivityScope,
        entry: Entry,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Activity> {
        let activity = Activity {
            id: ActivityId::generate(),
            scope,
            activity_type: entry.activity_type,
            title: entry.title,
            description: entry.description,
            actor_id: actor.clone(),
            created_at: now,
        };
        self.store.append(activity.clone()).await?;
        debug!(scope = %activity.scope, kind = ?activity.activity_type, "Activity appended");
        Ok(activity)
    }

    pub async fn record_for_deal(
        &self,
        deal: &DealId,
        entry: Entry,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Activity> {
        self.record(ActivityScope::Deal(deal.clone()), entry, actor, now)
            .await
    }

    pub async fn for_deal(&self, deal: &DealId) -> Result<Vec<Activity>> {
        self.store.for_scope(&ActivityScope::Deal(deal.clone())).await
    }

    pub async fn for_listing(&self, listing: &ListingId) -> Result<Vec<Activity>> {
        self.store
            .for_scope(&ActivityScope::Listing(listing.clone()))
            .await
    }
}
