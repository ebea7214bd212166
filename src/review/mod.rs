//! Review assignment and review round status.
//!
//! Assignment status is never stored; it is read off the assignment's dates.
//! Round status is stored but re-determined whenever something in the round
//! changes (assignments, revision uploads, recommendations).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{
    Decision, ReviewAssignment, ReviewRoundId, ReviewRoundStatus, StageAssignment,
    SubmissionFile, UserId,
};

mod service;

pub use service::{AssignReviewer, ReviewService, UploadFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAssignmentStatus {
    AwaitingResponse,
    Declined,
    ResponseOverdue,
    Accepted,
    ReviewOverdue,
    Received,
    Complete,
    Thanked,
    Cancelled,
}

impl ReviewAssignment {
    pub fn status(&self, now: DateTime<Utc>) -> ReviewAssignmentStatus {
        if self.cancelled {
            return ReviewAssignmentStatus::Cancelled;
        }
        if self.declined {
            return ReviewAssignmentStatus::Declined;
        }
        if self.date_completed.is_none() {
            return match self.date_confirmed {
                None if self.date_response_due < now => ReviewAssignmentStatus::ResponseOverdue,
                None => ReviewAssignmentStatus::AwaitingResponse,
                Some(_) if self.date_due < now => ReviewAssignmentStatus::ReviewOverdue,
                Some(_) => ReviewAssignmentStatus::Accepted,
            };
        }
        if self.date_acknowledged.is_some() {
            ReviewAssignmentStatus::Thanked
        } else if self.date_considered.is_some() {
            ReviewAssignmentStatus::Complete
        } else {
            ReviewAssignmentStatus::Received
        }
    }

    /// Neither declined nor cancelled.
    pub fn is_active(&self) -> bool {
        !self.declined && !self.cancelled
    }

    pub fn is_confirmed_or_completed(&self) -> bool {
        self.is_active() && (self.date_confirmed.is_some() || self.date_completed.is_some())
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status(now),
            ReviewAssignmentStatus::ResponseOverdue | ReviewAssignmentStatus::ReviewOverdue
        )
    }
}

/// What a round's status is determined from.
#[derive(Debug, Clone)]
pub struct RoundFacts<'a> {
    pub status: ReviewRoundStatus,
    pub assignments: &'a [ReviewAssignment],
    /// A revision file reached the round after its last decision.
    pub revisions_uploaded: bool,
    pub recommend_only_editors: &'a HashSet<UserId>,
    pub recommenders: &'a HashSet<UserId>,
    pub now: DateTime<Utc>,
}

/// Editors whose every editor assignment on the submission is recommend-only.
pub fn recommend_only_editors(participants: &[StageAssignment]) -> HashSet<UserId> {
    let deciding: HashSet<UserId> = participants
        .iter()
        .filter(|p| p.role.is_editor() && !p.recommend_only)
        .map(|p| p.user_id)
        .collect();
    participants
        .iter()
        .filter(|p| p.role.is_editor() && p.recommend_only && !deciding.contains(&p.user_id))
        .map(|p| p.user_id)
        .collect()
}

/// Recommend-only editors who have made a recommendation in the round.
pub fn recommenders(
    round_id: ReviewRoundId,
    decisions: &[Decision],
    editors: &HashSet<UserId>,
) -> HashSet<UserId> {
    decisions
        .iter()
        .filter(|d| d.review_round_id == Some(round_id) && d.decision.is_recommendation())
        .filter(|d| editors.contains(&d.editor_id))
        .map(|d| d.editor_id)
        .collect()
}

/// Whether an uploaded revision reached the round after its last decision.
pub fn revisions_uploaded(
    round_id: ReviewRoundId,
    files: &[SubmissionFile],
    decisions: &[Decision],
) -> bool {
    let last_decision = decisions
        .iter()
        .filter(|d| d.review_round_id == Some(round_id) && !d.decision.is_recommendation())
        .map(|d| d.date_decided)
        .max();
    files
        .iter()
        .filter(|f| f.review_round_id == Some(round_id) && f.file_stage.is_revision())
        .filter(|f| f.source_file_id.is_none())
        .any(|f| last_decision.map_or(true, |at| f.created_at >= at))
}

pub fn determine_round_status(facts: &RoundFacts<'_>) -> ReviewRoundStatus {
    use ReviewRoundStatus::*;

    match facts.status {
        RevisionsRequested | RevisionsSubmitted => {
            return if facts.revisions_uploaded {
                RevisionsSubmitted
            } else {
                RevisionsRequested
            };
        }
        ResubmitForReview | ResubmitForReviewSubmitted => {
            return if facts.revisions_uploaded {
                ResubmitForReviewSubmitted
            } else {
                ResubmitForReview
            };
        }
        SentToExternal | Accepted | Declined => return facts.status,
        _ => {}
    }

    let active: Vec<&ReviewAssignment> =
        facts.assignments.iter().filter(|a| a.is_active()).collect();

    if active.is_empty() {
        return if facts.status == ReturnedToReview {
            ReturnedToReview
        } else {
            PendingReviewers
        };
    }

    if active.iter().any(|a| a.is_overdue(facts.now)) {
        return ReviewsOverdue;
    }
    if active.iter().any(|a| a.date_completed.is_none()) {
        return PendingReviews;
    }
    if active
        .iter()
        .any(|a| a.status(facts.now) == ReviewAssignmentStatus::Received)
    {
        return ReviewsReady;
    }

    if facts.recommend_only_editors.is_empty() {
        return ReviewsCompleted;
    }
    let made = facts
        .recommend_only_editors
        .iter()
        .filter(|id| facts.recommenders.contains(id))
        .count();
    if made == 0 {
        PendingRecommendations
    } else if made < facts.recommend_only_editors.len() {
        RecommendationsReady
    } else {
        RecommendationsCompleted
    }
}
