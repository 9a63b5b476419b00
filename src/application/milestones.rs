use super::activity_log::{ActivityLog, Entry};
use crate::domain::activity::ActivityType;
use crate::domain::deal::Stage;
use crate::domain::ids::{DealId, MilestoneId, PartyId};
use crate::domain::milestone::{Milestone, MilestoneKind};
use crate::domain::ports::{DealStoreRef, MilestoneStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// Input for [`MilestoneTracker::add_milestone`].
#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub id: MilestoneId,
    pub deal_id: DealId,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: PartyId,
    pub required_for: Option<Stage>,
    pub kind: MilestoneKind,
}

/// Checklist items that gate stage entry.
#[derive(Clone)]
pub struct MilestoneTracker {
    deals: DealStoreRef,
    milestones: MilestoneStoreRef,
    log: ActivityLog,
}

impl MilestoneTracker {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deals: repos.deals.clone(),
            milestones: repos.milestones.clone(),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    pub async fn add_milestone(&self, new: NewMilestone, actor: &PartyId, now: DateTime<Utc>) -> Result<Milestone> {
        if let Some(existing) = self.milestones.get(&new.id).await? {
            return Ok(existing);
        }
        if new.title.trim().is_empty() {
            return Err(DealError::ValidationError(
                "Milestone title is required".to_string(),
            ));
        }
        let deal = self
            .deals
            .get(&new.deal_id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", &new.deal_id))?;
        if deal.stage.is_terminal() {
            return Err(DealError::invalid_transition("deal", deal.stage, "MILESTONE_ADDED"));
        }

        let milestone = Milestone {
            id: new.id,
            deal_id: new.deal_id,
            title: new.title,
            description: new.description,
            due_date: new.due_date,
            completed: false,
            completed_at: None,
            assigned_to: new.assigned_to,
            required_for: new.required_for,
            kind: new.kind,
        };
        self.milestones.store(milestone.clone()).await?;

        let gate = milestone
            .required_for
            .map_or_else(|| "informational".to_string(), |s| format!("required for {s}"));
        self.log
            .record_for_deal(
                &milestone.deal_id,
                Entry::new(ActivityType::MilestoneAdded, format!("Milestone added: {}", milestone.title))
                    .with_description(gate),
                actor,
                now,
            )
            .await?;
        Ok(milestone)
    }

    /// Marks a milestone complete. Completing it again returns the stored state
    /// without a new activity.
    pub async fn complete_milestone(&self, id: &MilestoneId, actor: &PartyId, now: DateTime<Utc>) -> Result<Milestone> {
        let mut milestone = self.get(id).await?;
        if !milestone.complete(now) {
            return Ok(milestone);
        }
        self.milestones.store(milestone.clone()).await?;

        self.log
            .record_for_deal(
                &milestone.deal_id,
                Entry::new(
                    ActivityType::MilestoneCompleted,
                    format!("Milestone completed: {}", milestone.title),
                ),
                actor,
                now,
            )
            .await?;
        info!(milestone_id = %id, actor = %actor, "Milestone completed");
        Ok(milestone)
    }

    /// True iff every milestone required for `stage` is complete.
    pub async fn is_stage_clear(&self, deal: &DealId, stage: Stage) -> Result<bool> {
        Ok(self.outstanding(deal, stage).await?.is_empty())
    }

    /// Required milestones for `stage` that are still open.
    pub async fn outstanding(&self, deal: &DealId, stage: Stage) -> Result<Vec<Milestone>> {
        Ok(self
            .milestones
            .for_deal(deal)
            .await?
            .into_iter()
            .filter(|m| m.is_required_for(stage) && !m.completed)
            .collect())
    }

    /// Open milestones gating `target` or any earlier stage. A milestone left
    /// open behind the deal still blocks every later forward move.
    pub async fn outstanding_through(&self, deal: &DealId, target: Stage) -> Result<Vec<Milestone>> {
        Ok(self
            .milestones
            .for_deal(deal)
            .await?
            .into_iter()
            .filter(|m| m.blocks(target))
            .collect())
    }

    /// Incomplete milestones past their due date. Reporting only.
    pub async fn overdue(&self, deal: &DealId, now: DateTime<Utc>) -> Result<Vec<Milestone>> {
        Ok(self
            .milestones
            .for_deal(deal)
            .await?
            .into_iter()
            .filter(|m| m.is_overdue(now))
            .collect())
    }

    pub async fn closing_confirmed(&self, deal: &DealId) -> Result<bool> {
        Ok(self
            .milestones
            .for_deal(deal)
            .await?
            .iter()
            .any(|m| m.kind == MilestoneKind::ClosingConfirmed && m.completed))
    }

    pub async fn get(&self, id: &MilestoneId) -> Result<Milestone> {
        self.milestones
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("milestone", id))
    }

    pub async fn for_deal(&self, deal: &DealId) -> Result<Vec<Milestone>> {
        self.milestones.for_deal(deal).await
    }
}
