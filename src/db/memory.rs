//! In-memory workflow store for development and testing.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::models::*;
use super::WorkflowRepository;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: Vec<User>,
    submissions: Vec<Submission>,
    stage_assignments: Vec<StageAssignment>,
    review_rounds: Vec<ReviewRound>,
    review_assignments: Vec<ReviewAssignment>,
    files: Vec<SubmissionFile>,
    decisions: Vec<Decision>,
    events: Vec<EventLogEntry>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn submission_mut(&mut self, id: SubmissionId) -> Result<&mut Submission, StoreError> {
        self.submissions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", id)))
    }

    fn push_event(&mut self, entry: NewEventLogEntry) -> EventLogEntry {
        let event = EventLogEntry {
            id: self.next_id(),
            submission_id: entry.submission_id,
            user_id: entry.user_id,
            message: entry.message,
            created_at: Utc::now(),
        };
        self.events.push(event.clone());
        event
    }
}

/// Keeps every table in one lock so a transition commits as a unit.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.write().await;
        if t.users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(StoreError::Conflict(format!("email {} is taken", user.email)));
        }
        let user = User {
            id: t.next_id(),
            name: user.name,
            email: user.email,
        };
        t.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().filter(|u| ids.contains(&u.id)).cloned().collect())
    }

    async fn create_submission(&self, submission: NewSubmission) -> Result<Submission, StoreError> {
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let submission = Submission {
            id: t.next_id(),
            title: submission.title,
            stage: Stage::Submission,
            status: SubmissionStatus::Queued,
            date_submitted: now,
            last_modified: now,
        };
        t.submissions.push(submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_submissions(&self) -> Result<Vec<Submission>, StoreError> {
        Ok(self.tables.read().await.submissions.clone())
    }

    async fn add_stage_assignment(
        &self,
        submission_id: SubmissionId,
        assignment: NewStageAssignment,
    ) -> Result<StageAssignment, StoreError> {
        let mut t = self.tables.write().await;
        t.submission_mut(submission_id)?;
        if !t.users.iter().any(|u| u.id == assignment.user_id) {
            return Err(StoreError::NotFound(format!("user {}", assignment.user_id)));
        }
        let duplicate = t.stage_assignments.iter().any(|a| {
            a.submission_id == submission_id
                && a.user_id == assignment.user_id
                && a.role == assignment.role
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "user {} already has that role on submission {}",
                assignment.user_id, submission_id
            )));
        }
        let assignment = StageAssignment {
            id: t.next_id(),
            submission_id,
            user_id: assignment.user_id,
            role: assignment.role,
            recommend_only: assignment.recommend_only && assignment.role.is_editor(),
        };
        t.stage_assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn stage_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<StageAssignment>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.stage_assignments
            .iter()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn review_rounds(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<ReviewRound>, StoreError> {
        let t = self.tables.read().await;
        let mut rounds: Vec<ReviewRound> = t
            .review_rounds
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| (r.stage, r.round));
        Ok(rounds)
    }

    async fn get_review_round(&self, id: ReviewRoundId) -> Result<Option<ReviewRound>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.review_rounds.iter().find(|r| r.id == id).cloned())
    }

    async fn update_review_round_status(
        &self,
        id: ReviewRoundId,
        status: ReviewRoundStatus,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let round = t
            .review_rounds
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("review round {}", id)))?;
        round.status = status;
        Ok(())
    }

    async fn review_assignments(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<ReviewAssignment>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.review_assignments
            .iter()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn get_review_assignment(
        &self,
        id: ReviewAssignmentId,
    ) -> Result<Option<ReviewAssignment>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.review_assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn create_review_assignment(
        &self,
        assignment: NewReviewAssignment,
    ) -> Result<ReviewAssignment, StoreError> {
        let mut t = self.tables.write().await;
        if !t.review_rounds.iter().any(|r| r.id == assignment.review_round_id) {
            return Err(StoreError::NotFound(format!(
                "review round {}",
                assignment.review_round_id
            )));
        }
        let assignment = ReviewAssignment {
            id: t.next_id(),
            submission_id: assignment.submission_id,
            review_round_id: assignment.review_round_id,
            reviewer_id: assignment.reviewer_id,
            stage: assignment.stage,
            round: assignment.round,
            recommendation: None,
            date_assigned: assignment.date_assigned,
            date_response_due: assignment.date_response_due,
            date_due: assignment.date_due,
            date_confirmed: None,
            date_completed: None,
            date_considered: None,
            date_acknowledged: None,
            declined: false,
            cancelled: false,
        };
        t.review_assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn update_review_assignment(
        &self,
        assignment: &ReviewAssignment,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let stored = t
            .review_assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| StoreError::NotFound(format!("review assignment {}", assignment.id)))?;
        *stored = assignment.clone();
        Ok(())
    }

    async fn create_submission_file(
        &self,
        file: NewSubmissionFile,
    ) -> Result<SubmissionFile, StoreError> {
        let mut t = self.tables.write().await;
        t.submission_mut(file.submission_id)?;
        let file = SubmissionFile {
            id: t.next_id(),
            submission_id: file.submission_id,
            file_stage: file.file_stage,
            name: file.name,
            review_round_id: file.review_round_id,
            source_file_id: file.source_file_id,
            uploader_id: file.uploader_id,
            created_at: Utc::now(),
        };
        t.files.push(file.clone());
        Ok(file)
    }

    async fn submission_files(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<SubmissionFile>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.files
            .iter()
            .filter(|f| f.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn decisions(&self, submission_id: SubmissionId) -> Result<Vec<Decision>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.decisions
            .iter()
            .filter(|d| d.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn log_event(&self, entry: NewEventLogEntry) -> Result<EventLogEntry, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.push_event(entry))
    }

    async fn event_log(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.events
            .iter()
            .filter(|e| e.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<CommittedTransition, StoreError> {
        let mut guard = self.tables.write().await;
        // Work on a copy so a failure part way leaves the tables untouched.
        let mut t = Tables {
            next_id: guard.next_id,
            users: Vec::new(),
            submissions: guard.submissions.clone(),
            stage_assignments: Vec::new(),
            review_rounds: guard.review_rounds.clone(),
            review_assignments: guard.review_assignments.clone(),
            files: guard.files.clone(),
            decisions: guard.decisions.clone(),
            events: guard.events.clone(),
        };
        let now = Utc::now();

        let submission = t.submission_mut(transition.submission_id)?;
        if let Some(stage) = transition.new_stage {
            submission.stage = stage;
        }
        if let Some(status) = transition.new_status {
            submission.status = status;
        }
        submission.last_modified = now;
        let submission = submission.clone();

        let decision = Decision {
            id: t.next_id(),
            submission_id: transition.submission_id,
            editor_id: transition.editor_id,
            decision: transition.decision,
            stage: transition.stage,
            review_round_id: transition.review_round_id,
            round: transition.round,
            date_decided: now,
        };
        t.decisions.push(decision.clone());

        for (round_id, status) in &transition.round_statuses {
            let round = t
                .review_rounds
                .iter_mut()
                .find(|r| r.id == *round_id)
                .ok_or_else(|| StoreError::NotFound(format!("review round {}", round_id)))?;
            round.status = *status;
        }

        for assignment in t
            .review_assignments
            .iter_mut()
            .filter(|a| transition.cancel_assignments.contains(&a.id))
        {
            assignment.cancelled = true;
        }

        if let Some(round_id) = transition.delete_round {
            t.review_assignments.retain(|a| a.review_round_id != round_id);
            t.files.retain(|f| f.review_round_id != Some(round_id));
            t.review_rounds.retain(|r| r.id != round_id);
        }

        let opened_round = match transition.open_round {
            Some(open) => {
                let existing = t.review_rounds.iter_mut().find(|r| {
                    r.submission_id == transition.submission_id
                        && r.stage == open.stage
                        && r.round == open.round
                });
                let round = match existing {
                    Some(round) => {
                        round.status = ReviewRoundStatus::PendingReviewers;
                        round.clone()
                    }
                    None => {
                        let round = ReviewRound {
                            id: t.next_id(),
                            submission_id: transition.submission_id,
                            stage: open.stage,
                            round: open.round,
                            status: ReviewRoundStatus::PendingReviewers,
                        };
                        t.review_rounds.push(round.clone());
                        round
                    }
                };
                Some(round)
            }
            None => None,
        };

        let mut promoted_files = Vec::with_capacity(transition.promotions.len());
        for promotion in &transition.promotions {
            let source = t
                .files
                .iter()
                .find(|f| f.id == promotion.file_id && f.submission_id == transition.submission_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("file {}", promotion.file_id)))?;
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
            let file = SubmissionFile {
                id: t.next_id(),
                submission_id: transition.submission_id,
                file_stage: promotion.to_stage,
                name: source.name.clone(),
                review_round_id,
                source_file_id: Some(source.id),
                uploader_id: source.uploader_id,
                created_at: now,
            };
            t.files.push(file.clone());
            promoted_files.push(file);
        }

        t.push_event(NewEventLogEntry {
            submission_id: transition.submission_id,
            user_id: Some(transition.editor_id),
            message: transition.log_message.clone(),
        });

        guard.next_id = t.next_id;
        guard.submissions = t.submissions;
        guard.review_rounds = t.review_rounds;
        guard.review_assignments = t.review_assignments;
        guard.files = t.files;
        guard.decisions = t.decisions;
        guard.events = t.events;

        Ok(CommittedTransition {
            decision,
            submission,
            opened_round,
            promoted_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionType;

    fn transition(submission_id: SubmissionId, editor_id: UserId) -> Transition {
        Transition {
            submission_id,
            editor_id,
            decision: DecisionType::SendExternalReview,
            stage: Stage::Submission,
            review_round_id: None,
            round: None,
            new_stage: Some(Stage::ExternalReview),
            new_status: None,
            round_statuses: vec![],
            open_round: Some(OpenRound {
                stage: Stage::ExternalReview,
                round: 1,
            }),
            delete_round: None,
            cancel_assignments: vec![],
            promotions: vec![],
            log_message: "Sent for review".into(),
        }
    }

    #[tokio::test]
    async fn commit_opens_round_and_promotes_files() {
        let repo = InMemoryRepository::new();
        let submission = repo
            .create_submission(NewSubmission { title: "Paper".into() })
            .await
            .unwrap();
        let manuscript = repo
            .create_submission_file(NewSubmissionFile {
                submission_id: submission.id,
                file_stage: FileStage::Submission,
                name: "paper.docx".into(),
                review_round_id: None,
                source_file_id: None,
                uploader_id: None,
            })
            .await
            .unwrap();

        let mut t = transition(submission.id, 99);
        t.promotions.push(FilePromotion {
            file_id: manuscript.id,
            to_stage: FileStage::ReviewFile,
            target: PromotionTarget::OpenedRound,
        });
        let committed = repo.commit_transition(&t).await.unwrap();

        let round = committed.opened_round.unwrap();
        assert_eq!(round.round, 1);
        assert_eq!(round.status, ReviewRoundStatus::PendingReviewers);
        assert_eq!(committed.submission.stage, Stage::ExternalReview);
        assert_eq!(committed.promoted_files.len(), 1);
        assert_eq!(committed.promoted_files[0].review_round_id, Some(round.id));
        assert_eq!(committed.promoted_files[0].source_file_id, Some(manuscript.id));
        assert_eq!(repo.decisions(submission.id).await.unwrap().len(), 1);
        assert_eq!(repo.event_log(submission.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_changes_nothing() {
        let repo = InMemoryRepository::new();
        let submission = repo
            .create_submission(NewSubmission { title: "Paper".into() })
            .await
            .unwrap();

        let mut t = transition(submission.id, 99);
        t.promotions.push(FilePromotion {
            file_id: 12345,
            to_stage: FileStage::ReviewFile,
            target: PromotionTarget::OpenedRound,
        });
        assert!(matches!(
            repo.commit_transition(&t).await,
            Err(StoreError::NotFound(_))
        ));

        let stored = repo.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Submission);
        assert!(repo.review_rounds(submission.id).await.unwrap().is_empty());
        assert!(repo.decisions(submission.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopening_a_round_resets_its_status() {
        let repo = InMemoryRepository::new();
        let submission = repo
            .create_submission(NewSubmission { title: "Paper".into() })
            .await
            .unwrap();
        let first = repo.commit_transition(&transition(submission.id, 1)).await.unwrap();
        let round = first.opened_round.unwrap();
        repo.update_review_round_status(round.id, ReviewRoundStatus::PendingReviews)
            .await
            .unwrap();

        let again = repo.commit_transition(&transition(submission.id, 1)).await.unwrap();
        let reopened = again.opened_round.unwrap();
        assert_eq!(reopened.id, round.id);
        assert_eq!(reopened.status, ReviewRoundStatus::PendingReviewers);
        assert_eq!(repo.review_rounds(submission.id).await.unwrap().len(), 1);
    }
}
