use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::decision::DecisionType;

pub type UserId = i64;
pub type SubmissionId = i64;
pub type ReviewRoundId = i64;
pub type ReviewAssignmentId = i64;
pub type SubmissionFileId = i64;
pub type DecisionId = i64;

/// Workflow stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Stage {
    Submission = 1,
    InternalReview = 2,
    ExternalReview = 3,
    Copyediting = 4,
    Production = 5,
}

impl Stage {
    pub fn is_review(self) -> bool {
        matches!(self, Stage::InternalReview | Stage::ExternalReview)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Submission => "Submission",
            Stage::InternalReview => "Internal Review",
            Stage::ExternalReview => "Review",
            Stage::Copyediting => "Copyediting",
            Stage::Production => "Production",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum SubmissionStatus {
    Queued = 1,
    Published = 3,
    Declined = 4,
    Canceled = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ReviewRoundStatus {
    RevisionsRequested = 1,
    ResubmitForReview = 2,
    SentToExternal = 3,
    Accepted = 4,
    Declined = 5,
    PendingReviewers = 6,
    PendingReviews = 7,
    ReviewsReady = 8,
    ReviewsCompleted = 9,
    ReviewsOverdue = 10,
    RevisionsSubmitted = 11,
    ResubmitForReviewSubmitted = 12,
    ReturnedToReview = 13,
    PendingRecommendations = 14,
    RecommendationsReady = 15,
    RecommendationsCompleted = 16,
}

/// Where a file sits in the workflow. Promotion copies a file into another file stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum FileStage {
    Submission = 2,
    ReviewFile = 4,
    Final = 6,
    Copyedit = 9,
    ProductionReady = 11,
    ReviewRevision = 15,
    InternalReviewFile = 19,
    InternalReviewRevision = 20,
}

impl FileStage {
    pub fn is_revision(self) -> bool {
        matches!(self, FileStage::ReviewRevision | FileStage::InternalReviewRevision)
    }

    /// File stages that must be attached to a review round.
    pub fn review_stage(self) -> Option<Stage> {
        match self {
            FileStage::ReviewFile | FileStage::ReviewRevision => Some(Stage::ExternalReview),
            FileStage::InternalReviewFile | FileStage::InternalReviewRevision => {
                Some(Stage::InternalReview)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Role {
    Manager = 16,
    SubEditor = 17,
    Assistant = 4097,
    Author = 65536,
}

impl Role {
    pub fn is_editor(self) -> bool {
        matches!(self, Role::Manager | Role::SubEditor)
    }
}

/// A reviewer's recommendation on a completed review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ReviewerRecommendation {
    Accept = 1,
    PendingRevisions = 2,
    ResubmitHere = 3,
    ResubmitElsewhere = 4,
    Decline = 5,
    SeeComments = 6,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub title: String,
    pub stage: Stage,
    pub status: SubmissionStatus,
    pub date_submitted: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct StageAssignment {
    pub id: i64,
    pub submission_id: SubmissionId,
    pub user_id: UserId,
    pub role: Role,
    pub recommend_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReviewRound {
    pub id: ReviewRoundId,
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub round: i32,
    pub status: ReviewRoundStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReviewAssignment {
    pub id: ReviewAssignmentId,
    pub submission_id: SubmissionId,
    pub review_round_id: ReviewRoundId,
    pub reviewer_id: UserId,
    pub stage: Stage,
    pub round: i32,
    pub recommendation: Option<ReviewerRecommendation>,
    pub date_assigned: DateTime<Utc>,
    pub date_response_due: DateTime<Utc>,
    pub date_due: DateTime<Utc>,
    pub date_confirmed: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub date_considered: Option<DateTime<Utc>>,
    pub date_acknowledged: Option<DateTime<Utc>>,
    pub declined: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub id: SubmissionFileId,
    pub submission_id: SubmissionId,
    pub file_stage: FileStage,
    pub name: String,
    pub review_round_id: Option<ReviewRoundId>,
    pub source_file_id: Option<SubmissionFileId>,
    pub uploader_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// An editorial decision once taken. Never updated.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub submission_id: SubmissionId,
    pub editor_id: UserId,
    pub decision: DecisionType,
    pub stage: Stage,
    pub review_round_id: Option<ReviewRoundId>,
    pub round: Option<i32>,
    pub date_decided: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub submission_id: SubmissionId,
    pub user_id: Option<UserId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// Insert payloads

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubmission {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStageAssignment {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default)]
    pub recommend_only: bool,
}

#[derive(Debug, Clone)]
pub struct NewReviewAssignment {
    pub submission_id: SubmissionId,
    pub review_round_id: ReviewRoundId,
    pub reviewer_id: UserId,
    pub stage: Stage,
    pub round: i32,
    pub date_assigned: DateTime<Utc>,
    pub date_response_due: DateTime<Utc>,
    pub date_due: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubmissionFile {
    pub submission_id: SubmissionId,
    pub file_stage: FileStage,
    pub name: String,
    pub review_round_id: Option<ReviewRoundId>,
    pub source_file_id: Option<SubmissionFileId>,
    pub uploader_id: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct NewEventLogEntry {
    pub submission_id: SubmissionId,
    pub user_id: Option<UserId>,
    pub message: String,
}

// Decision write set

/// Everything a decision changes, committed by the store as one unit.
#[derive(Debug, Clone)]
pub struct Transition {
    pub submission_id: SubmissionId,
    pub editor_id: UserId,
    pub decision: DecisionType,
    pub stage: Stage,
    pub review_round_id: Option<ReviewRoundId>,
    pub round: Option<i32>,
    pub new_stage: Option<Stage>,
    pub new_status: Option<SubmissionStatus>,
    pub round_statuses: Vec<(ReviewRoundId, ReviewRoundStatus)>,
    pub open_round: Option<OpenRound>,
    pub delete_round: Option<ReviewRoundId>,
    pub cancel_assignments: Vec<ReviewAssignmentId>,
    pub promotions: Vec<FilePromotion>,
    pub log_message: String,
}

/// A round to get or create by (stage, round number). Reused rounds are reset
/// to `PendingReviewers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRound {
    pub stage: Stage,
    pub round: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionTarget {
    /// No review round (copyediting, production).
    Detached,
    /// The round opened by the same transition.
    OpenedRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePromotion {
    pub file_id: SubmissionFileId,
    pub to_stage: FileStage,
    pub target: PromotionTarget,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommittedTransition {
    pub decision: Decision,
    pub submission: Submission,
    pub opened_round: Option<ReviewRound>,
    pub promoted_files: Vec<SubmissionFile>,
}
