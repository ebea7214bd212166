//! Turns a legal decision into the write set the repository commits.

use crate::db::{
    Decision, FilePromotion, OpenRound, ReviewAssignmentId, ReviewRoundId, ReviewRoundStatus,
    Stage, SubmissionStatus, Transition,
};
use crate::decision::{rules, DecisionContext, DecisionType};

/// State changes a decision makes, before files are promoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub new_stage: Option<Stage>,
    pub new_status: Option<SubmissionStatus>,
    pub round_statuses: Vec<(ReviewRoundId, ReviewRoundStatus)>,
    pub open_round: Option<OpenRound>,
    pub delete_round: Option<ReviewRoundId>,
    pub cancel_assignments: Vec<ReviewAssignmentId>,
}

impl Outcome {
    /// Stage the submission ends up in.
    pub fn stage_after(&self, ctx: &DecisionContext) -> Stage {
        self.new_stage.unwrap_or(ctx.submission.stage)
    }
}

/// Round of `stage` to reuse or create when a submission enters it.
fn entry_round(ctx: &DecisionContext, stage: Stage) -> OpenRound {
    OpenRound {
        stage,
        round: ctx.latest_round(stage).map_or(1, |r| r.round),
    }
}

/// Works out what `decision` changes. Total over any context, so action
/// errors can be gathered alongside rule errors; only a decision that passes
/// the rules is ever committed.
pub fn outcome(decision: DecisionType, ctx: &DecisionContext) -> Outcome {
    use DecisionType::*;

    let mut out = Outcome {
        new_stage: decision.fixed_new_stage(),
        new_status: decision.new_status(),
        ..Default::default()
    };
    let round = ctx.round.as_ref().filter(|_| decision.requires_review_round(ctx.pipeline));

    if let (Some(status), Some(round)) = (decision.new_round_status(), round) {
        out.round_statuses.push((round.id, status));
    }

    match decision {
        SendInternalReview => {
            out.open_round = Some(entry_round(ctx, Stage::InternalReview));
        }
        SendExternalReview | SkipInternalReview => {
            out.open_round = Some(entry_round(ctx, Stage::ExternalReview));
        }
        NewExternalReviewRound | NewInternalReviewRound => {
            let stage = decision.stage(ctx.pipeline);
            let latest = ctx.latest_round(stage).map_or(0, |r| r.round);
            out.open_round = Some(OpenRound {
                stage,
                round: latest + 1,
            });
        }
        RevertDecline | RevertInternalDecline => {
            if let Some(round) = round {
                let status = ctx.determine_round_status(round, ReviewRoundStatus::PendingReviewers);
                out.round_statuses.push((round.id, status));
            }
        }
        BackFromCopyediting => {
            let target = rules::back_from_copyediting_target(ctx);
            out.new_stage = Some(target);
            if let Some(latest) = ctx.latest_round(target) {
                out.round_statuses
                    .push((latest.id, ReviewRoundStatus::ReturnedToReview));
            }
        }
        CancelReviewRound | CancelInternalReviewRound => {
            if let Some(round) = round {
                if ctx.is_sole_round(round) {
                    let target = rules::retraction_target(ctx, round.stage);
                    out.new_stage = Some(target);
                    // The round that sent it on is live again.
                    if target == Stage::InternalReview {
                        if let Some(internal) = ctx.latest_round(Stage::InternalReview) {
                            let status = ctx.determine_round_status(
                                internal,
                                ReviewRoundStatus::PendingReviewers,
                            );
                            out.round_statuses.push((internal.id, status));
                        }
                    }
                    out.round_statuses
                        .push((round.id, ReviewRoundStatus::PendingReviewers));
                    out.cancel_assignments = ctx
                        .round_assignments(round.id)
                        .into_iter()
                        .filter(|a| a.is_active())
                        .map(|a| a.id)
                        .collect();
                } else {
                    out.delete_round = Some(round.id);
                }
            }
        }
        _ if decision.is_recommendation() => {
            if let Some(round) = round {
                out.round_statuses
                    .push((round.id, status_after_recommendation(decision, ctx, round)));
            }
        }
        _ => {}
    }

    out
}

/// Round status once this recommendation is on record.
fn status_after_recommendation(
    decision: DecisionType,
    ctx: &DecisionContext,
    round: &crate::db::ReviewRound,
) -> ReviewRoundStatus {
    let mut with_recommendation = ctx.clone();
    with_recommendation.decisions.push(Decision {
        id: 0,
        submission_id: ctx.submission.id,
        editor_id: ctx.actor.id,
        decision,
        stage: round.stage,
        review_round_id: Some(round.id),
        round: Some(round.round),
        date_decided: ctx.now,
    });
    with_recommendation.determine_round_status(round, round.status)
}

/// Assemble the write set for `decision`.
pub fn transition(
    decision: DecisionType,
    ctx: &DecisionContext,
    outcome: Outcome,
    promotions: Vec<FilePromotion>,
) -> Transition {
    let round = ctx
        .round
        .as_ref()
        .filter(|_| decision.requires_review_round(ctx.pipeline));

    let mut log_message = format!(
        "Editor decision \"{}\" recorded by {}",
        decision.label(),
        ctx.actor.name
    );
    if let Some(stage) = outcome.new_stage.filter(|s| *s != ctx.submission.stage) {
        log_message.push_str(&format!("; submission moved to {}", stage.label()));
    }
    if let Some(round) = outcome.open_round {
        log_message.push_str(&format!("; review round {} opened", round.round));
    }
    if outcome.delete_round.is_some() {
        log_message.push_str("; review round deleted");
    }

    Transition {
        submission_id: ctx.submission.id,
        editor_id: ctx.actor.id,
        decision,
        stage: decision.stage(ctx.pipeline),
        review_round_id: round.map(|r| r.id),
        round: round.map(|r| r.round),
        new_stage: outcome.new_stage,
        new_status: outcome.new_status,
        round_statuses: outcome.round_statuses,
        open_round: outcome.open_round,
        delete_round: outcome.delete_round,
        cancel_assignments: outcome.cancel_assignments,
        promotions,
        log_message,
    }
}
