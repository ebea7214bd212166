//! Legality of each decision type against the loaded workflow state.

use crate::db::{ReviewRound, ReviewRoundStatus, Stage, SubmissionStatus};
use crate::decision::{DecisionContext, DecisionType};
use crate::error::ValidationErrors;

pub const FIELD_DECISION: &str = "decision";
pub const FIELD_EDITOR: &str = "editorId";
pub const FIELD_ROUND: &str = "reviewRoundId";

/// Every reason `decision` cannot be taken. Empty when it can.
pub fn check(decision: DecisionType, ctx: &DecisionContext) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let pipeline = ctx.pipeline;

    if decision.is_internal() && !pipeline.internal_review {
        errors.add(FIELD_DECISION, "Internal review is not part of this workflow.");
        return errors;
    }

    if !ctx.actor_is_editor() {
        errors.add(FIELD_EDITOR, "You are not assigned as an editor of this submission.");
    } else if decision.is_recommendation() && !ctx.actor_recommend_only() {
        errors.add(
            FIELD_DECISION,
            "Recommendations are made by editors who can only recommend.",
        );
    } else if !decision.is_recommendation() && ctx.actor_recommend_only() {
        errors.add(FIELD_DECISION, "You can only make recommendations on this submission.");
    }

    let stage = decision.stage(pipeline);
    if ctx.submission.stage != stage {
        errors.add(
            FIELD_DECISION,
            format!("This decision can only be taken in the {} stage.", stage.label()),
        );
    }

    if ctx.submission.status != decision.required_status() {
        let message = match ctx.submission.status {
            SubmissionStatus::Queued => "The submission has not been declined.",
            SubmissionStatus::Declined => "The submission has been declined.",
            SubmissionStatus::Published => "The submission has been published.",
            SubmissionStatus::Canceled => "The submission has been canceled.",
        };
        errors.add(FIELD_DECISION, message);
    }

    if !decision.requires_review_round(pipeline) {
        return errors;
    }

    let round = match &ctx.round {
        Some(round) => round,
        None => {
            errors.add(FIELD_ROUND, "A review round is required for this decision.");
            return errors;
        }
    };
    if round.stage != stage {
        errors.add(
            FIELD_ROUND,
            format!("The review round is not in the {} stage.", stage.label()),
        );
        return errors;
    }
    if ctx.latest_round(stage).map(|r| r.id) != Some(round.id) {
        errors.add(FIELD_ROUND, "Decisions can only be taken on the current review round.");
        return errors;
    }

    match decision {
        DecisionType::SendExternalReview if round.status == ReviewRoundStatus::SentToExternal => {
            errors.add(FIELD_ROUND, "This review round has already been sent for review.");
        }
        DecisionType::CancelReviewRound | DecisionType::CancelInternalReviewRound => {
            if ctx.is_sole_round(round) {
                if !can_retract(ctx, round) {
                    errors.add(
                        FIELD_ROUND,
                        "The review round cannot be cancelled because a reviewer has confirmed or completed a review.",
                    );
                }
            } else if !can_delete_round(ctx, round) {
                errors.add(
                    FIELD_ROUND,
                    "The review round cannot be cancelled while reviewers are assigned to it.",
                );
            }
        }
        _ => {}
    }

    errors
}

pub fn is_available(decision: DecisionType, ctx: &DecisionContext) -> bool {
    check(decision, ctx).is_empty()
}

/// Decisions the actor can take now, in menu order.
pub fn available_decisions(ctx: &DecisionContext) -> Vec<DecisionType> {
    DecisionType::ALL
        .iter()
        .copied()
        .filter(|d| is_available(*d, ctx))
        .collect()
}

/// A submission may leave a review stage only while no reviewer in the round
/// being exited has confirmed or completed a review.
pub fn can_retract(ctx: &DecisionContext, round: &ReviewRound) -> bool {
    !ctx
        .round_assignments(round.id)
        .iter()
        .any(|a| a.is_confirmed_or_completed())
}

/// A round may be deleted only when another round remains and nobody is assigned to it.
pub fn can_delete_round(ctx: &DecisionContext, round: &ReviewRound) -> bool {
    !ctx.is_sole_round(round)
        && !ctx.round_assignments(round.id).iter().any(|a| a.is_active())
}

/// Where a submission goes when the only round of `stage` is cancelled.
pub fn retraction_target(ctx: &DecisionContext, stage: Stage) -> Stage {
    match stage {
        Stage::ExternalReview
            if ctx.pipeline.internal_review && ctx.has_rounds_in(Stage::InternalReview) =>
        {
            Stage::InternalReview
        }
        _ => Stage::Submission,
    }
}

/// The last review stage the submission went through, or submission if it skipped review.
pub fn back_from_copyediting_target(ctx: &DecisionContext) -> Stage {
    if ctx.has_rounds_in(Stage::ExternalReview) {
        Stage::ExternalReview
    } else if ctx.has_rounds_in(Stage::InternalReview) {
        Stage::InternalReview
    } else {
        Stage::Submission
    }
}
