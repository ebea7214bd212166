use serde::{Deserialize, Serialize};

use crate::db::{ReviewRoundStatus, Stage, SubmissionStatus};
use crate::mail::MailTemplate;

/// Shape of the editorial pipeline. Presses run an internal review stage
/// between submission and external review; journals do not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub internal_review: bool,
}

impl Pipeline {
    pub fn journal() -> Self {
        Self { internal_review: false }
    }

    pub fn press() -> Self {
        Self { internal_review: true }
    }

    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Submission];
        if self.internal_review {
            stages.push(Stage::InternalReview);
        }
        stages.extend([Stage::ExternalReview, Stage::Copyediting, Stage::Production]);
        stages
    }
}

/// Every editorial action an editor can take. Codes are persisted with each decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum DecisionType {
    SendInternalReview = 1,
    Accept = 2,
    SendExternalReview = 3,
    RequestRevisions = 4,
    Resubmit = 5,
    Decline = 6,
    SendToProduction = 7,
    InitialDecline = 8,
    RecommendAccept = 11,
    RecommendRevisions = 12,
    RecommendResubmit = 13,
    RecommendDecline = 14,
    RecommendSendExternalReview = 15,
    NewExternalReviewRound = 16,
    RevertDecline = 17,
    RevertInitialDecline = 18,
    SkipExternalReview = 19,
    SkipInternalReview = 20,
    AcceptInternal = 21,
    RequestRevisionsInternal = 22,
    ResubmitInternal = 23,
    DeclineInternal = 24,
    RecommendAcceptInternal = 25,
    RecommendRevisionsInternal = 26,
    RecommendResubmitInternal = 27,
    RecommendDeclineInternal = 28,
    RevertInternalDecline = 29,
    NewInternalReviewRound = 30,
    BackFromProduction = 31,
    BackFromCopyediting = 32,
    CancelReviewRound = 33,
    CancelInternalReviewRound = 34,
}

use DecisionType::*;

impl DecisionType {
    /// Presentation order for the decision menu.
    pub const ALL: [DecisionType; 32] = [
        SendInternalReview,
        SendExternalReview,
        SkipInternalReview,
        SkipExternalReview,
        InitialDecline,
        RevertInitialDecline,
        AcceptInternal,
        RequestRevisionsInternal,
        ResubmitInternal,
        NewInternalReviewRound,
        DeclineInternal,
        RevertInternalDecline,
        CancelInternalReviewRound,
        RecommendSendExternalReview,
        RecommendAcceptInternal,
        RecommendRevisionsInternal,
        RecommendResubmitInternal,
        RecommendDeclineInternal,
        Accept,
        RequestRevisions,
        Resubmit,
        NewExternalReviewRound,
        Decline,
        RevertDecline,
        CancelReviewRound,
        RecommendAccept,
        RecommendRevisions,
        RecommendResubmit,
        RecommendDecline,
        SendToProduction,
        BackFromCopyediting,
        BackFromProduction,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.code() == code)
    }

    /// Decisions that only exist when the pipeline has an internal review stage.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            SendInternalReview
                | SkipInternalReview
                | AcceptInternal
                | RequestRevisionsInternal
                | ResubmitInternal
                | DeclineInternal
                | RecommendAcceptInternal
                | RecommendRevisionsInternal
                | RecommendResubmitInternal
                | RecommendDeclineInternal
                | RecommendSendExternalReview
                | RevertInternalDecline
                | NewInternalReviewRound
                | CancelInternalReviewRound
        )
    }

    /// The stage a submission must be in for this decision to be taken.
    pub fn stage(self, pipeline: Pipeline) -> Stage {
        match self {
            SendInternalReview | SkipInternalReview | SkipExternalReview | InitialDecline
            | RevertInitialDecline => Stage::Submission,
            SendExternalReview if pipeline.internal_review => Stage::InternalReview,
            SendExternalReview => Stage::Submission,
            AcceptInternal
            | RequestRevisionsInternal
            | ResubmitInternal
            | DeclineInternal
            | RecommendAcceptInternal
            | RecommendRevisionsInternal
            | RecommendResubmitInternal
            | RecommendDeclineInternal
            | RecommendSendExternalReview
            | RevertInternalDecline
            | NewInternalReviewRound
            | CancelInternalReviewRound => Stage::InternalReview,
            Accept | RequestRevisions | Resubmit | Decline | RecommendAccept
            | RecommendRevisions | RecommendResubmit | RecommendDecline
            | NewExternalReviewRound | RevertDecline | CancelReviewRound => Stage::ExternalReview,
            SendToProduction | BackFromCopyediting => Stage::Copyediting,
            BackFromProduction => Stage::Production,
        }
    }

    pub fn requires_review_round(self, pipeline: Pipeline) -> bool {
        self.stage(pipeline).is_review()
    }

    pub fn is_recommendation(self) -> bool {
        self.recommendation_of().is_some()
    }

    /// The deciding decision a recommendation proposes.
    pub fn recommendation_of(self) -> Option<DecisionType> {
        match self {
            RecommendAccept => Some(Accept),
            RecommendRevisions => Some(RequestRevisions),
            RecommendResubmit => Some(Resubmit),
            RecommendDecline => Some(Decline),
            RecommendSendExternalReview => Some(SendExternalReview),
            RecommendAcceptInternal => Some(AcceptInternal),
            RecommendRevisionsInternal => Some(RequestRevisionsInternal),
            RecommendResubmitInternal => Some(ResubmitInternal),
            RecommendDeclineInternal => Some(DeclineInternal),
            _ => None,
        }
    }

    pub fn is_revert(self) -> bool {
        matches!(self, RevertDecline | RevertInitialDecline | RevertInternalDecline)
    }

    pub fn is_round_cancellation(self) -> bool {
        matches!(self, CancelReviewRound | CancelInternalReviewRound)
    }

    pub fn opens_new_round(self) -> bool {
        matches!(self, NewExternalReviewRound | NewInternalReviewRound)
    }

    /// Submission status the decision requires before it can be taken.
    pub fn required_status(self) -> SubmissionStatus {
        if self.is_revert() {
            SubmissionStatus::Declined
        } else {
            SubmissionStatus::Queued
        }
    }

    /// Stage the submission moves to, when it does not depend on history.
    pub fn fixed_new_stage(self) -> Option<Stage> {
        match self {
            SendInternalReview => Some(Stage::InternalReview),
            SendExternalReview | SkipInternalReview => Some(Stage::ExternalReview),
            Accept | AcceptInternal | SkipExternalReview | BackFromProduction => {
                Some(Stage::Copyediting)
            }
            SendToProduction => Some(Stage::Production),
            _ => None,
        }
    }

    pub fn new_status(self) -> Option<SubmissionStatus> {
        match self {
            Decline | DeclineInternal | InitialDecline => Some(SubmissionStatus::Declined),
            RevertDecline | RevertInternalDecline | RevertInitialDecline => {
                Some(SubmissionStatus::Queued)
            }
            _ => None,
        }
    }

    /// Status written to the decided round. `None` leaves it alone or, for
    /// reverts, lets the round status be determined afresh.
    pub fn new_round_status(self) -> Option<ReviewRoundStatus> {
        match self {
            Accept | AcceptInternal => Some(ReviewRoundStatus::Accepted),
            RequestRevisions | RequestRevisionsInternal => {
                Some(ReviewRoundStatus::RevisionsRequested)
            }
            Resubmit | ResubmitInternal => Some(ReviewRoundStatus::ResubmitForReview),
            Decline | DeclineInternal => Some(ReviewRoundStatus::Declined),
            SendExternalReview => Some(ReviewRoundStatus::SentToExternal),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SendInternalReview => "Send to Internal Review",
            Accept | AcceptInternal => "Accept Submission",
            SendExternalReview => "Send for Review",
            RequestRevisions | RequestRevisionsInternal => "Request Revisions",
            Resubmit | ResubmitInternal => "Resubmit for Review",
            Decline | DeclineInternal | InitialDecline => "Decline Submission",
            SendToProduction => "Send To Production",
            RecommendAccept | RecommendAcceptInternal => "Recommend Accept",
            RecommendRevisions | RecommendRevisionsInternal => "Recommend Revisions",
            RecommendResubmit | RecommendResubmitInternal => "Recommend Resubmit",
            RecommendDecline | RecommendDeclineInternal => "Recommend Decline",
            RecommendSendExternalReview => "Recommend Sending for Review",
            NewExternalReviewRound | NewInternalReviewRound => "New Review Round",
            RevertDecline | RevertInternalDecline | RevertInitialDecline => "Revert Decline",
            SkipExternalReview => "Skip Review",
            SkipInternalReview => "Skip Internal Review",
            BackFromProduction => "Back to Copyediting",
            BackFromCopyediting => "Cancel Copyediting",
            CancelReviewRound | CancelInternalReviewRound => "Cancel Review Round",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SendInternalReview => "Send this submission to the internal review stage.",
            Accept | AcceptInternal => {
                "Accept this submission for publication and send it to the copyediting stage."
            }
            SendExternalReview => "Send this submission to the review stage.",
            RequestRevisions | RequestRevisionsInternal => {
                "Request that the author make revisions which the editor will check before continuing."
            }
            Resubmit | ResubmitInternal => {
                "Request that the author make revisions which will be sent for another round of review."
            }
            Decline | DeclineInternal => "Decline this submission after review.",
            InitialDecline => "Decline this submission without sending it for review.",
            SendToProduction => "Send this submission to the production stage.",
            RecommendAccept | RecommendAcceptInternal => {
                "Recommend that the submission be accepted."
            }
            RecommendRevisions | RecommendRevisionsInternal => {
                "Recommend that revisions be requested."
            }
            RecommendResubmit | RecommendResubmitInternal => {
                "Recommend that the author resubmit for another round of review."
            }
            RecommendDecline | RecommendDeclineInternal => {
                "Recommend that the submission be declined."
            }
            RecommendSendExternalReview => "Recommend that the submission be sent for review.",
            NewExternalReviewRound | NewInternalReviewRound => {
                "Open a new round of review for this submission."
            }
            RevertDecline | RevertInternalDecline | RevertInitialDecline => {
                "Reverse the decision to decline this submission."
            }
            SkipExternalReview => "Send this submission directly to copyediting.",
            SkipInternalReview => "Send this submission directly to the review stage.",
            BackFromProduction => "Return this submission to the copyediting stage.",
            BackFromCopyediting => "Return this submission to the review or submission stage.",
            CancelReviewRound | CancelInternalReviewRound => {
                "Cancel the current review round and retract the submission if it is the only round."
            }
        }
    }

    /// Template used to notify authors, or deciding editors for recommendations.
    pub fn mail_template(self) -> MailTemplate {
        match self {
            SendInternalReview => MailTemplate::SendToInternal,
            SendExternalReview | SkipInternalReview => MailTemplate::SendToExternal,
            SkipExternalReview => MailTemplate::SkipReview,
            Accept | AcceptInternal => MailTemplate::Accept,
            RequestRevisions | RequestRevisionsInternal => MailTemplate::Revisions,
            Resubmit | ResubmitInternal => MailTemplate::Resubmit,
            Decline | DeclineInternal => MailTemplate::Decline,
            InitialDecline => MailTemplate::InitialDecline,
            NewExternalReviewRound | NewInternalReviewRound => MailTemplate::NewRound,
            RevertDecline | RevertInternalDecline => MailTemplate::RevertDecline,
            RevertInitialDecline => MailTemplate::RevertInitialDecline,
            SendToProduction => MailTemplate::SendToProduction,
            BackFromProduction => MailTemplate::BackFromProduction,
            BackFromCopyediting => MailTemplate::BackFromCopyediting,
            CancelReviewRound | CancelInternalReviewRound => MailTemplate::CancelReviewRound,
            RecommendAccept
            | RecommendRevisions
            | RecommendResubmit
            | RecommendDecline
            | RecommendSendExternalReview
            | RecommendAcceptInternal
            | RecommendRevisionsInternal
            | RecommendResubmitInternal
            | RecommendDeclineInternal => MailTemplate::Recommendation,
        }
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
