//! Postgres workflow store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Postgres, Transaction as PgTransaction};

use super::models::*;
use super::{DbPool, WorkflowRepository};
use crate::error::StoreError;

const SELECT_ASSIGNMENT: &str = r#"
    SELECT id, submission_id, review_round_id, reviewer_id, stage, round, recommendation,
           date_assigned, date_response_due, date_due, date_confirmed, date_completed,
           date_considered, date_acknowledged, declined, cancelled
    FROM review_assignments
"#;

const SELECT_FILE: &str = r#"
    SELECT id, submission_id, file_stage, name, review_round_id, source_file_id, uploader_id, created_at
    FROM submission_files
"#;

pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn conflict_or(err: sqlx::Error, what: impl Into<String>) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == "23505");
    if unique_violation {
        StoreError::Conflict(what.into())
    } else {
        StoreError::Database(err)
    }
}

async fn open_round(
    tx: &mut PgTransaction<'_, Postgres>,
    submission_id: SubmissionId,
    open: OpenRound,
) -> Result<ReviewRound, StoreError> {
    let reopened = sqlx::query_as::<_, ReviewRound>(
        r#"
        UPDATE review_rounds SET status = $4
        WHERE submission_id = $1 AND stage = $2 AND round = $3
        RETURNING id, submission_id, stage, round, status
        "#,
    )
    .bind(submission_id)
    .bind(open.stage)
    .bind(open.round)
    .bind(ReviewRoundStatus::PendingReviewers)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(round) = reopened {
        return Ok(round);
    }

    Ok(sqlx::query_as::<_, ReviewRound>(
        r#"
        INSERT INTO review_rounds (submission_id, stage, round, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id, submission_id, stage, round, status
        "#,
    )
    .bind(submission_id)
    .bind(open.stage)
    .bind(open.round)
    .bind(ReviewRoundStatus::PendingReviewers)
    .fetch_one(&mut **tx)
    .await?)
}

#[async_trait]
impl WorkflowRepository for PgRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (name, email) VALUES ($1, $2) RETURNING id, name, email",
        )
        .bind(&user.name)
        .bind(&user.email)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| conflict_or(e, format!("email {} is taken", user.email)))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT id, name, email FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await?,
        )
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, name, email FROM users WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids.to_vec())
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn create_submission(&self, submission: NewSubmission) -> Result<Submission, StoreError> {
        Ok(sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO submissions (title, stage, status)
            VALUES ($1, $2, $3)
            RETURNING id, title, stage, status, date_submitted, last_modified
            "#,
        )
        .bind(&submission.title)
        .bind(Stage::Submission)
        .bind(SubmissionStatus::Queued)
        .fetch_one(self.pool.as_ref())
        .await?)
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        Ok(sqlx::query_as::<_, Submission>(
            "SELECT id, title, stage, status, date_submitted, last_modified FROM submissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?)
    }

    async fn list_submissions(&self) -> Result<Vec<Submission>, StoreError> {
        Ok(sqlx::query_as::<_, Submission>(
            "SELECT id, title, stage, status, date_submitted, last_modified FROM submissions ORDER BY id",
        )
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn add_stage_assignment(
        &self,
        submission_id: SubmissionId,
        assignment: NewStageAssignment,
    ) -> Result<StageAssignment, StoreError> {
        sqlx::query_as::<_, StageAssignment>(
            r#"
            INSERT INTO stage_assignments (submission_id, user_id, role, recommend_only)
            VALUES ($1, $2, $3, $4)
            RETURNING id, submission_id, user_id, role, recommend_only
            "#,
        )
        .bind(submission_id)
        .bind(assignment.user_id)
        .bind(assignment.role)
        .bind(assignment.recommend_only && assignment.role.is_editor())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| {
            conflict_or(
                e,
                format!(
                    "user {} already has that role on submission {}",
                    assignment.user_id, submission_id
                ),
            )
        })
    }

    async fn stage_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<StageAssignment>, StoreError> {
        Ok(sqlx::query_as::<_, StageAssignment>(
            r#"
            SELECT id, submission_id, user_id, role, recommend_only
            FROM stage_assignments WHERE submission_id = $1 ORDER BY id
            "#,
        )
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn review_rounds(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<ReviewRound>, StoreError> {
        Ok(sqlx::query_as::<_, ReviewRound>(
            r#"
            SELECT id, submission_id, stage, round, status
            FROM review_rounds WHERE submission_id = $1 ORDER BY stage, round
            "#,
        )
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn get_review_round(&self, id: ReviewRoundId) -> Result<Option<ReviewRound>, StoreError> {
        Ok(sqlx::query_as::<_, ReviewRound>(
            "SELECT id, submission_id, stage, round, status FROM review_rounds WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?)
    }

    async fn update_review_round_status(
        &self,
        id: ReviewRoundId,
        status: ReviewRoundStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE review_rounds SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.pool.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("review round {}", id)));
        }
        Ok(())
    }

    async fn review_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<ReviewAssignment>, StoreError> {
        Ok(sqlx::query_as::<_, ReviewAssignment>(&format!(
            "{SELECT_ASSIGNMENT} WHERE submission_id = $1 ORDER BY id"
        ))
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn get_review_assignment(
        &self,
        id: ReviewAssignmentId,
    ) -> Result<Option<ReviewAssignment>, StoreError> {
        Ok(
            sqlx::query_as::<_, ReviewAssignment>(&format!("{SELECT_ASSIGNMENT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await?,
        )
    }

    async fn create_review_assignment(
        &self,
        assignment: NewReviewAssignment,
    ) -> Result<ReviewAssignment, StoreError> {
        Ok(sqlx::query_as::<_, ReviewAssignment>(
            r#"
            INSERT INTO review_assignments
                (submission_id, review_round_id, reviewer_id, stage, round,
                 date_assigned, date_response_due, date_due)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, submission_id, review_round_id, reviewer_id, stage, round, recommendation,
                      date_assigned, date_response_due, date_due, date_confirmed, date_completed,
                      date_considered, date_acknowledged, declined, cancelled
            "#,
        )
        .bind(assignment.submission_id)
        .bind(assignment.review_round_id)
        .bind(assignment.reviewer_id)
        .bind(assignment.stage)
        .bind(assignment.round)
        .bind(assignment.date_assigned)
        .bind(assignment.date_response_due)
        .bind(assignment.date_due)
        .fetch_one(self.pool.as_ref())
        .await?)
    }

    async fn update_review_assignment(
        &self,
        assignment: &ReviewAssignment,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE review_assignments
            SET recommendation = $2, date_response_due = $3, date_due = $4,
                date_confirmed = $5, date_completed = $6, date_considered = $7,
                date_acknowledged = $8, declined = $9, cancelled = $10
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.recommendation)
        .bind(assignment.date_response_due)
        .bind(assignment.date_due)
        .bind(assignment.date_confirmed)
        .bind(assignment.date_completed)
        .bind(assignment.date_considered)
        .bind(assignment.date_acknowledged)
        .bind(assignment.declined)
        .bind(assignment.cancelled)
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("review assignment {}", assignment.id)));
        }
        Ok(())
    }

    async fn create_submission_file(
        &self,
        file: NewSubmissionFile,
    ) -> Result<SubmissionFile, StoreError> {
        Ok(sqlx::query_as::<_, SubmissionFile>(
            r#"
            INSERT INTO submission_files
                (submission_id, file_stage, name, review_round_id, source_file_id, uploader_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, submission_id, file_stage, name, review_round_id, source_file_id,
                      uploader_id, created_at
            "#,
        )
        .bind(file.submission_id)
        .bind(file.file_stage)
        .bind(&file.name)
        .bind(file.review_round_id)
        .bind(file.source_file_id)
        .bind(file.uploader_id)
        .fetch_one(self.pool.as_ref())
        .await?)
    }

    async fn submission_files(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<SubmissionFile>, StoreError> {
        Ok(sqlx::query_as::<_, SubmissionFile>(&format!(
            "{SELECT_FILE} WHERE submission_id = $1 ORDER BY id"
        ))
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn decisions(&self, submission_id: SubmissionId) -> Result<Vec<Decision>, StoreError> {
        Ok(sqlx::query_as::<_, Decision>(
            r#"
            SELECT id, submission_id, editor_id, decision, stage, review_round_id, round, date_decided
            FROM decisions WHERE submission_id = $1 ORDER BY id
            "#,
        )
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn log_event(&self, entry: NewEventLogEntry) -> Result<EventLogEntry, StoreError> {
        Ok(sqlx::query_as::<_, EventLogEntry>(
            r#"
            INSERT INTO event_log (submission_id, user_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, submission_id, user_id, message, created_at
            "#,
        )
        .bind(entry.submission_id)
        .bind(entry.user_id)
        .bind(&entry.message)
        .fetch_one(self.pool.as_ref())
        .await?)
    }

    async fn event_log(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        Ok(sqlx::query_as::<_, EventLogEntry>(
            r#"
            SELECT id, submission_id, user_id, message, created_at
            FROM event_log WHERE submission_id = $1 ORDER BY id
            "#,
        )
        .bind(submission_id)
        .fetch_all(self.pool.as_ref())
        .await?)
    }

    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<CommittedTransition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let submission = sqlx::query_as::<_, Submission>(
            r#"
            UPDATE submissions
            SET stage = COALESCE($2, stage), status = COALESCE($3, status), last_modified = $4
            WHERE id = $1
            RETURNING id, title, stage, status, date_submitted, last_modified
            "#,
        )
        .bind(transition.submission_id)
        .bind(transition.new_stage)
        .bind(transition.new_status)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("submission {}", transition.submission_id)))?;

        let decision = sqlx::query_as::<_, Decision>(
            r#"
            INSERT INTO decisions
                (submission_id, editor_id, decision, stage, review_round_id, round, date_decided)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, submission_id, editor_id, decision, stage, review_round_id, round, date_decided
            "#,
        )
        .bind(transition.submission_id)
        .bind(transition.editor_id)
        .bind(transition.decision)
        .bind(transition.stage)
        .bind(transition.review_round_id)
        .bind(transition.round)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (round_id, status) in &transition.round_statuses {
            sqlx::query("UPDATE review_rounds SET status = $2 WHERE id = $1")
                .bind(round_id)
                .bind(status)
                .execute(&mut *tx)
                .await?;
        }

        if !transition.cancel_assignments.is_empty() {
            sqlx::query("UPDATE review_assignments SET cancelled = TRUE WHERE id = ANY($1)")
                .bind(transition.cancel_assignments.clone())
                .execute(&mut *tx)
                .await?;
        }

        if let Some(round_id) = transition.delete_round {
            // Assignments and round files cascade.
            sqlx::query("DELETE FROM review_rounds WHERE id = $1")
                .bind(round_id)
                .execute(&mut *tx)
                .await?;
        }

        let opened_round = match transition.open_round {
            Some(open) => Some(open_round(&mut tx, transition.submission_id, open).await?),
            None => None,
        };

        let mut promoted_files = Vec::with_capacity(transition.promotions.len());
        for promotion in &transition.promotions {
            let review_round_id = match promotion.target {
                PromotionTarget::Detached => None,
                PromotionTarget::OpenedRound => Some(
                    opened_round
                        .as_ref()
                        .ok_or_else(|| {
                            StoreError::Conflict("promotion into a round that was not opened".into())
                        })?
                        .id,
                ),
            };
            let file = sqlx::query_as::<_, SubmissionFile>(
                r#"
                INSERT INTO submission_files
                    (submission_id, file_stage, name, review_round_id, source_file_id, uploader_id, created_at)
                SELECT submission_id, $3, name, $4, id, uploader_id, $5
                FROM submission_files WHERE id = $1 AND submission_id = $2
                RETURNING id, submission_id, file_stage, name, review_round_id, source_file_id,
                          uploader_id, created_at
                "#,
            )
            .bind(promotion.file_id)
            .bind(transition.submission_id)
            .bind(promotion.to_stage)
            .bind(review_round_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("file {}", promotion.file_id)))?;
            promoted_files.push(file);
        }

        sqlx::query("INSERT INTO event_log (submission_id, user_id, message, created_at) VALUES ($1, $2, $3, $4)")
            .bind(transition.submission_id)
            .bind(transition.editor_id)
            .bind(&transition.log_message)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(CommittedTransition {
            decision,
            submission,
            opened_round,
            promoted_files,
        })
    }
}
