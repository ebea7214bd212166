mod memory;
mod models;
mod postgres;

pub use memory::InMemoryRepository;
pub use models::*;
pub use postgres::PgRepository;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::StoreError;

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Persistence the workflow reads from and writes to.
///
/// Lists come back in creation order; review rounds are ordered by stage, then
/// round number.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    async fn create_submission(&self, submission: NewSubmission) -> Result<Submission, StoreError>;
    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError>;
    async fn list_submissions(&self) -> Result<Vec<Submission>, StoreError>;

    async fn add_stage_assignment(
        &self,
        submission_id: SubmissionId,
        assignment: NewStageAssignment,
    ) -> Result<StageAssignment, StoreError>;
    async fn stage_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<StageAssignment>, StoreError>;

    async fn review_rounds(&self, submission_id: SubmissionId)
        -> Result<Vec<ReviewRound>, StoreError>;
    async fn get_review_round(&self, id: ReviewRoundId) -> Result<Option<ReviewRound>, StoreError>;
    async fn update_review_round_status(
        &self,
        id: ReviewRoundId,
        status: ReviewRoundStatus,
    ) -> Result<(), StoreError>;

    async fn review_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<ReviewAssignment>, StoreError>;
    async fn get_review_assignment(
        &self,
        id: ReviewAssignmentId,
    ) -> Result<Option<ReviewAssignment>, StoreError>;
    async fn create_review_assignment(
        &self,
        assignment: NewReviewAssignment,
    ) -> Result<ReviewAssignment, StoreError>;
    async fn update_review_assignment(&self, assignment: &ReviewAssignment)
        -> Result<(), StoreError>;

    async fn create_submission_file(
        &self,
        file: NewSubmissionFile,
    ) -> Result<SubmissionFile, StoreError>;
    async fn submission_files(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<SubmissionFile>, StoreError>;

    async fn decisions(&self, submission_id: SubmissionId) -> Result<Vec<Decision>, StoreError>;

    async fn log_event(&self, entry: NewEventLogEntry) -> Result<EventLogEntry, StoreError>;
    async fn event_log(&self, submission_id: SubmissionId)
        -> Result<Vec<EventLogEntry>, StoreError>;

    /// Apply every change of a decision atomically.
    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<CommittedTransition, StoreError>;
}
