use super::deal::Stage;
use super::ids::{DealId, MilestoneId, PartyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    #[default]
    Checklist,
    /// Confirms that closing has taken place; may gate DEPOSIT/MAIN_PAYMENT releases.
    ClosingConfirmed,
}

/// A checklist item attached to a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub deal_id: DealId,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_to: PartyId,
    /// Stage whose entry waits for this milestone; `None` for informational items.
    pub required_for: Option<Stage>,
    pub kind: MilestoneKind,
}

impl Milestone {
    /// Marks the milestone done. Returns `false` when it already was.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(now);
        true
    }

    pub fn is_required_for(&self, stage: Stage) -> bool {
        self.required_for == Some(stage)
    }

    /// Open and required for `target` or any stage before it.
    pub fn blocks(&self, target: Stage) -> bool {
        !self.completed && self.required_for.is_some_and(|stage| stage <= target)
    }

    /// Reporting flag only; overdue items never block a transition by themselves.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due < now)
    }
}
