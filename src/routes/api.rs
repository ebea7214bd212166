use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{
    Decision, EventLogEntry, NewEventLogEntry, NewStageAssignment, NewSubmission, NewUser,
    ReviewAssignment, ReviewAssignmentId, ReviewRound, ReviewRoundId, ReviewerRecommendation,
    Role, StageAssignment, Submission, SubmissionFile, SubmissionId, User, UserId,
};
use crate::decision::{DecisionOutcome, DecisionRequest, DecisionType, Step};
use crate::error::{ApiError, ApiResult, ValidationErrors};
use crate::review::{AssignReviewer, UploadFile};
use crate::state::AppState;

type AppStateRef = State<Arc<AppState>>;

async fn find_submission(state: &AppState, id: SubmissionId) -> ApiResult<Submission> {
    state
        .repo
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {}", id)))
}

// Users

pub async fn create_user(
    State(state): AppStateRef,
    Json(user): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let mut errors = ValidationErrors::new();
    if user.name.trim().is_empty() {
        errors.add("name", "A name is required.");
    }
    if !user.email.contains('@') {
        errors.add("email", "A valid email address is required.");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let user = state.repo.create_user(user).await?;
    tracing::info!(user_id = user.id, "Created user {}", user.email);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(State(state): AppStateRef, Path(id): Path<UserId>) -> ApiResult<Json<User>> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", id)))?;
    Ok(Json(user))
}

// Submissions

#[derive(Debug, Deserialize)]
pub struct CreateSubmission {
    pub title: String,
    pub author_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct SubmissionDetail {
    pub submission: Submission,
    pub participants: Vec<StageAssignment>,
    pub review_rounds: Vec<ReviewRound>,
    pub review_assignments: Vec<ReviewAssignment>,
    pub files: Vec<SubmissionFile>,
    pub decisions: Vec<Decision>,
}

pub async fn list_submissions(State(state): AppStateRef) -> ApiResult<Json<Vec<Submission>>> {
    Ok(Json(state.repo.list_submissions().await?))
}

pub async fn create_submission(
    State(state): AppStateRef,
    Json(req): Json<CreateSubmission>,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "A title is required.");
        return Err(ApiError::Validation(errors));
    }
    let author = state
        .repo
        .get_user(req.author_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", req.author_id)))?;

    let submission = state.repo.create_submission(NewSubmission { title }).await?;
    state
        .repo
        .add_stage_assignment(
            submission.id,
            NewStageAssignment {
                user_id: author.id,
                role: Role::Author,
                recommend_only: false,
            },
        )
        .await?;
    state
        .repo
        .log_event(NewEventLogEntry {
            submission_id: submission.id,
            user_id: Some(author.id),
            message: format!("Submission \"{}\" submitted by {}", submission.title, author.name),
        })
        .await?;
    tracing::info!(submission_id = submission.id, "Created submission");
    Ok((StatusCode::CREATED, Json(submission)))
}

pub async fn get_submission(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<SubmissionDetail>> {
    let submission = find_submission(&state, id).await?;
    Ok(Json(SubmissionDetail {
        participants: state.repo.stage_assignments(id).await?,
        review_rounds: state.repo.review_rounds(id).await?,
        review_assignments: state.repo.review_assignments(id).await?,
        files: state.repo.submission_files(id).await?,
        decisions: state.repo.decisions(id).await?,
        submission,
    }))
}

pub async fn list_participants(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<Vec<StageAssignment>>> {
    find_submission(&state, id).await?;
    Ok(Json(state.repo.stage_assignments(id).await?))
}

pub async fn add_participant(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
    Json(req): Json<NewStageAssignment>,
) -> ApiResult<(StatusCode, Json<StageAssignment>)> {
    let assignment = state.repo.add_stage_assignment(id, req).await?;
    state
        .repo
        .log_event(NewEventLogEntry {
            submission_id: id,
            user_id: Some(assignment.user_id),
            message: format!("User {} assigned as {:?}", assignment.user_id, assignment.role),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn list_files(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<Vec<SubmissionFile>>> {
    find_submission(&state, id).await?;
    Ok(Json(state.repo.submission_files(id).await?))
}

pub async fn upload_file(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
    Json(req): Json<UploadFile>,
) -> ApiResult<(StatusCode, Json<SubmissionFile>)> {
    let file = state.reviews.upload_file(id, req).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn list_review_rounds(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<Vec<ReviewRound>>> {
    find_submission(&state, id).await?;
    Ok(Json(state.repo.review_rounds(id).await?))
}

pub async fn event_log(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<Vec<EventLogEntry>>> {
    find_submission(&state, id).await?;
    Ok(Json(state.repo.event_log(id).await?))
}

// Decisions

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub editor_id: UserId,
    pub review_round_id: Option<ReviewRoundId>,
}

#[derive(Debug, Serialize)]
pub struct AvailableDecision {
    pub decision: DecisionType,
    pub code: i32,
    pub label: &'static str,
    pub description: &'static str,
}

pub async fn decision_history(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
) -> ApiResult<Json<Vec<Decision>>> {
    find_submission(&state, id).await?;
    Ok(Json(state.repo.decisions(id).await?))
}

pub async fn available_decisions(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
    Query(query): Query<DecisionQuery>,
) -> ApiResult<Json<Vec<AvailableDecision>>> {
    let decisions = state
        .decisions
        .available(id, query.editor_id, query.review_round_id)
        .await?;
    Ok(Json(
        decisions
            .into_iter()
            .map(|d| AvailableDecision {
                decision: d,
                code: d.code(),
                label: d.label(),
                description: d.description(),
            })
            .collect(),
    ))
}

pub async fn decision_steps(
    State(state): AppStateRef,
    Path((id, decision)): Path<(SubmissionId, DecisionType)>,
    Query(query): Query<DecisionQuery>,
) -> ApiResult<Json<Vec<Step>>> {
    let steps = state
        .decisions
        .steps(id, decision, query.editor_id, query.review_round_id)
        .await?;
    Ok(Json(steps))
}

pub async fn take_decision(
    State(state): AppStateRef,
    Path(id): Path<SubmissionId>,
    Json(req): Json<DecisionRequest>,
) -> ApiResult<(StatusCode, Json<DecisionOutcome>)> {
    let outcome = state.decisions.take(id, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// Reviews

#[derive(Debug, Deserialize)]
pub struct AssignReviewerBody {
    pub reviewer_id: UserId,
    pub editor_id: UserId,
    #[serde(default)]
    pub date_response_due: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub date_due: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteReviewBody {
    pub recommendation: ReviewerRecommendation,
}

#[derive(Debug, Deserialize)]
pub struct CancelReviewBody {
    pub editor_id: UserId,
}

pub async fn assign_reviewer(
    State(state): AppStateRef,
    Path(round_id): Path<ReviewRoundId>,
    Json(body): Json<AssignReviewerBody>,
) -> ApiResult<(StatusCode, Json<ReviewAssignment>)> {
    let assignment = state
        .reviews
        .assign_reviewer(AssignReviewer {
            review_round_id: round_id,
            reviewer_id: body.reviewer_id,
            editor_id: body.editor_id,
            date_response_due: body.date_response_due,
            date_due: body.date_due,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn confirm_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.confirm(id).await?))
}

pub async fn decline_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.decline(id).await?))
}

pub async fn complete_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
    Json(body): Json<CompleteReviewBody>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.complete(id, body.recommendation).await?))
}

pub async fn consider_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.consider(id).await?))
}

pub async fn acknowledge_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.acknowledge(id).await?))
}

pub async fn cancel_review(
    State(state): AppStateRef,
    Path(id): Path<ReviewAssignmentId>,
    Json(body): Json<CancelReviewBody>,
) -> ApiResult<Json<ReviewAssignment>> {
    Ok(Json(state.reviews.cancel(id, body.editor_id).await?))
}
