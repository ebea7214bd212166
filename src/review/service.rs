use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tera::Tera;
use tracing::{info, warn};

use crate::db::{
    FileStage, NewEventLogEntry, NewReviewAssignment, NewSubmissionFile, ReviewAssignment,
    ReviewAssignmentId, ReviewRound, ReviewRoundId, ReviewRoundStatus, ReviewerRecommendation,
    Role, Submission, SubmissionFile, SubmissionId, SubmissionStatus, UserId, WorkflowRepository,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::mail::{Address, MailSettings, MailTemplate, MailVariables, Mailable, Mailer};
use crate::review::{self, RoundFacts};

const DEFAULT_RESPONSE_DAYS: i64 = 7;
const DEFAULT_REVIEW_DAYS: i64 = 28;

#[derive(Debug, Clone, Deserialize)]
pub struct AssignReviewer {
    pub review_round_id: ReviewRoundId,
    pub reviewer_id: UserId,
    pub editor_id: UserId,
    #[serde(default)]
    pub date_response_due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadFile {
    pub file_stage: FileStage,
    pub name: String,
    #[serde(default)]
    pub review_round_id: Option<ReviewRoundId>,
    #[serde(default)]
    pub uploader_id: Option<UserId>,
}

/// Reviewer assignments and the round status that follows from them.
#[derive(Clone)]
pub struct ReviewService {
    repo: Arc<dyn WorkflowRepository>,
    mailer: Arc<dyn Mailer>,
    tera: &'static Tera,
    mail: MailSettings,
    response_days: i64,
    review_days: i64,
}

impl ReviewService {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        mailer: Arc<dyn Mailer>,
        tera: &'static Tera,
        mail: MailSettings,
    ) -> Self {
        Self {
            repo,
            mailer,
            tera,
            mail,
            response_days: DEFAULT_RESPONSE_DAYS,
            review_days: DEFAULT_REVIEW_DAYS,
        }
    }

    /// Days a reviewer gets to respond to, then to complete, a request.
    pub fn with_due_days(mut self, response_days: i64, review_days: i64) -> Self {
        self.response_days = response_days;
        self.review_days = review_days;
        self
    }

    async fn submission(&self, id: SubmissionId) -> WorkflowResult<Submission> {
        self.repo
            .get_submission(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("submission {}", id)))
    }

    async fn round(&self, id: ReviewRoundId) -> WorkflowResult<ReviewRound> {
        self.repo
            .get_review_round(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("review round {}", id)))
    }

    async fn assignment(&self, id: ReviewAssignmentId) -> WorkflowResult<ReviewAssignment> {
        self.repo
            .get_review_assignment(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("review assignment {}", id)))
    }

    async fn log(&self, submission_id: SubmissionId, user_id: Option<UserId>, message: String) {
        info!(submission_id, "{}", message);
        let entry = NewEventLogEntry {
            submission_id,
            user_id,
            message,
        };
        if let Err(e) = self.repo.log_event(entry).await {
            warn!(submission_id, "Failed to write event log: {}", e);
        }
    }

    async fn require_editor(&self, submission_id: SubmissionId, user_id: UserId) -> WorkflowResult<()> {
        let participants = self.repo.stage_assignments(submission_id).await?;
        if participants
            .iter()
            .any(|p| p.user_id == user_id && p.role.is_editor())
        {
            Ok(())
        } else {
            Err(WorkflowError::invalid(
                "editorId",
                "You are not assigned as an editor of this submission.",
            ))
        }
    }

    pub async fn assign_reviewer(&self, req: AssignReviewer) -> WorkflowResult<ReviewAssignment> {
        let round = self.round(req.review_round_id).await?;
        let submission = self.submission(round.submission_id).await?;
        self.require_editor(submission.id, req.editor_id).await?;

        let rounds = self.repo.review_rounds(submission.id).await?;
        let latest = rounds
            .iter()
            .filter(|r| r.stage == round.stage)
            .max_by_key(|r| r.round);
        if latest.map(|r| r.id) != Some(round.id) {
            return Err(WorkflowError::invalid(
                "reviewRoundId",
                "Reviewers can only be assigned to the current review round.",
            ));
        }
        if submission.status != SubmissionStatus::Queued || submission.stage != round.stage {
            return Err(WorkflowError::invalid(
                "reviewRoundId",
                "The submission is not in review in this round's stage.",
            ));
        }
        if matches!(
            round.status,
            ReviewRoundStatus::Accepted | ReviewRoundStatus::Declined | ReviewRoundStatus::SentToExternal
        ) {
            return Err(WorkflowError::invalid(
                "reviewRoundId",
                "A decision has already been made on this review round.",
            ));
        }

        let reviewer = self
            .repo
            .get_user(req.reviewer_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("user {}", req.reviewer_id)))?;
        let participants = self.repo.stage_assignments(submission.id).await?;
        if participants
            .iter()
            .any(|p| p.user_id == reviewer.id && p.role == Role::Author)
        {
            return Err(WorkflowError::invalid(
                "reviewerId",
                "Authors can not review their own submission.",
            ));
        }
        let existing = self.repo.review_assignments(submission.id).await?;
        if existing
            .iter()
            .any(|a| a.review_round_id == round.id && a.reviewer_id == reviewer.id && a.is_active())
        {
            return Err(WorkflowError::Conflict(format!(
                "{} is already reviewing round {}",
                reviewer.name, round.round
            )));
        }

        let now = Utc::now();
        let assignment = self
            .repo
            .create_review_assignment(NewReviewAssignment {
                submission_id: submission.id,
                review_round_id: round.id,
                reviewer_id: reviewer.id,
                stage: round.stage,
                round: round.round,
                date_assigned: now,
                date_response_due: req
                    .date_response_due
                    .unwrap_or(now + Duration::days(self.response_days)),
                date_due: req.date_due.unwrap_or(now + Duration::days(self.review_days)),
            })
            .await?;

        self.log(
            submission.id,
            Some(req.editor_id),
            format!("{} was assigned to review round {}", reviewer.name, round.round),
        )
        .await;
        self.refresh_round_status(round.id).await?;
        Ok(assignment)
    }

    /// Apply `change` to an active assignment, then re-determine its round.
    async fn update_active<F>(
        &self,
        id: ReviewAssignmentId,
        action: &str,
        change: F,
    ) -> WorkflowResult<ReviewAssignment>
    where
        F: FnOnce(&mut ReviewAssignment) -> WorkflowResult<()>,
    {
        let mut assignment = self.assignment(id).await?;
        if !assignment.is_active() {
            return Err(WorkflowError::Conflict(format!(
                "review assignment {} is no longer active",
                id
            )));
        }
        change(&mut assignment)?;
        self.repo.update_review_assignment(&assignment).await?;
        self.log(
            assignment.submission_id,
            Some(assignment.reviewer_id),
            format!("Review assignment {} {}", id, action),
        )
        .await;
        self.refresh_round_status(assignment.review_round_id).await?;
        Ok(assignment)
    }

    pub async fn confirm(&self, id: ReviewAssignmentId) -> WorkflowResult<ReviewAssignment> {
        self.update_active(id, "accepted", |a| {
            if a.date_confirmed.is_some() {
                return Err(WorkflowError::Conflict("the review request was already accepted".into()));
            }
            a.date_confirmed = Some(Utc::now());
            Ok(())
        })
        .await
    }

    pub async fn decline(&self, id: ReviewAssignmentId) -> WorkflowResult<ReviewAssignment> {
        self.update_active(id, "declined", |a| {
            if a.date_completed.is_some() {
                return Err(WorkflowError::Conflict("the review was already completed".into()));
            }
            a.declined = true;
            Ok(())
        })
        .await
    }

    /// Submit the review. Unconfirmed requests are confirmed along the way.
    pub async fn complete(
        &self,
        id: ReviewAssignmentId,
        recommendation: ReviewerRecommendation,
    ) -> WorkflowResult<ReviewAssignment> {
        self.update_active(id, "completed", |a| {
            if a.date_completed.is_some() {
                return Err(WorkflowError::Conflict("the review was already completed".into()));
            }
            let now = Utc::now();
            if a.date_confirmed.is_none() {
                a.date_confirmed = Some(now);
            }
            a.date_completed = Some(now);
            a.recommendation = Some(recommendation);
            Ok(())
        })
        .await
    }

    pub async fn consider(&self, id: ReviewAssignmentId) -> WorkflowResult<ReviewAssignment> {
        self.update_active(id, "considered", |a| {
            if a.date_completed.is_none() {
                return Err(WorkflowError::invalid("reviewAssignmentId", "The review has not been completed."));
            }
            if a.date_considered.is_none() {
                a.date_considered = Some(Utc::now());
            }
            Ok(())
        })
        .await
    }

    /// Thank the reviewer. Acknowledged reviews count as considered.
    pub async fn acknowledge(&self, id: ReviewAssignmentId) -> WorkflowResult<ReviewAssignment> {
        self.update_active(id, "acknowledged", |a| {
            if a.date_completed.is_none() {
                return Err(WorkflowError::invalid("reviewAssignmentId", "The review has not been completed."));
            }
            let now = Utc::now();
            if a.date_considered.is_none() {
                a.date_considered = Some(now);
            }
            a.date_acknowledged = Some(now);
            Ok(())
        })
        .await
    }

    /// Withdraw a review request and let the reviewer know.
    pub async fn cancel(
        &self,
        id: ReviewAssignmentId,
        editor_id: UserId,
    ) -> WorkflowResult<ReviewAssignment> {
        let current = self.assignment(id).await?;
        self.require_editor(current.submission_id, editor_id).await?;
        let assignment = self
            .update_active(id, "cancelled", |a| {
                if a.date_completed.is_some() {
                    return Err(WorkflowError::Conflict("the review was already completed".into()));
                }
                a.cancelled = true;
                Ok(())
            })
            .await?;

        let submission = self.submission(assignment.submission_id).await?;
        let users = self
            .repo
            .get_users(&[assignment.reviewer_id, editor_id])
            .await?;
        let reviewer = users.iter().find(|u| u.id == assignment.reviewer_id);
        let editor = users.iter().find(|u| u.id == editor_id);
        if let Some(reviewer) = reviewer {
            let vars = MailVariables {
                context_name: self.mail.context_name.clone(),
                submission_id: submission.id,
                submission_title: submission.title.clone(),
                editor_name: editor.map(|u| u.name.clone()).unwrap_or_default(),
                stage: assignment.stage.label().to_string(),
                round: assignment.round.to_string(),
                ..Default::default()
            };
            let sent = match Mailable::render(
                self.tera,
                MailTemplate::ReviewCancel,
                self.mail.from.clone(),
                vec![Address::from(reviewer)],
                &vars,
            ) {
                Ok(mailable) => self.mailer.send(&mailable).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(submission_id = submission.id, "Failed to send review cancellation: {}", e);
                self.log(
                    submission.id,
                    Some(editor_id),
                    format!("Failed to send {}: {}", MailTemplate::ReviewCancel.key(), e),
                )
                .await;
            }
        }
        Ok(assignment)
    }

    /// Store a file. Review files and revisions belong to a round of the
    /// matching review stage; other files never do.
    pub async fn upload_file(
        &self,
        submission_id: SubmissionId,
        upload: UploadFile,
    ) -> WorkflowResult<SubmissionFile> {
        let submission = self.submission(submission_id).await?;
        let round = match (upload.file_stage.review_stage(), upload.review_round_id) {
            (Some(stage), Some(round_id)) => {
                let round = self.round(round_id).await?;
                if round.submission_id != submission.id {
                    return Err(WorkflowError::NotFound(format!("review round {}", round_id)));
                }
                if round.stage != stage {
                    return Err(WorkflowError::invalid(
                        "reviewRoundId",
                        format!("Files of this kind belong to a {} round.", stage.label()),
                    ));
                }
                Some(round)
            }
            (Some(_), None) => {
                return Err(WorkflowError::invalid(
                    "reviewRoundId",
                    "Review files must be uploaded to a review round.",
                ));
            }
            (None, Some(_)) => {
                return Err(WorkflowError::invalid(
                    "reviewRoundId",
                    "Only review files belong to a review round.",
                ));
            }
            (None, None) => None,
        };

        let file = self
            .repo
            .create_submission_file(NewSubmissionFile {
                submission_id: submission.id,
                file_stage: upload.file_stage,
                name: upload.name,
                review_round_id: round.as_ref().map(|r| r.id),
                source_file_id: None,
                uploader_id: upload.uploader_id,
            })
            .await?;
        self.log(
            submission.id,
            upload.uploader_id,
            format!("File \"{}\" uploaded", file.name),
        )
        .await;

        if let Some(round) = round.filter(|_| file.file_stage.is_revision()) {
            self.refresh_round_status(round.id).await?;
        }
        Ok(file)
    }

    /// Re-determine and store a round's status.
    pub async fn refresh_round_status(&self, round_id: ReviewRoundId) -> WorkflowResult<ReviewRoundStatus> {
        let round = self.round(round_id).await?;
        let assignments: Vec<ReviewAssignment> = self
            .repo
            .review_assignments(round.submission_id)
            .await?
            .into_iter()
            .filter(|a| a.review_round_id == round.id)
            .collect();
        let participants = self.repo.stage_assignments(round.submission_id).await?;
        let decisions = self.repo.decisions(round.submission_id).await?;
        let files = self.repo.submission_files(round.submission_id).await?;

        let editors = review::recommend_only_editors(&participants);
        let recommenders = review::recommenders(round.id, &decisions, &editors);
        let status = review::determine_round_status(&RoundFacts {
            status: round.status,
            assignments: &assignments,
            revisions_uploaded: review::revisions_uploaded(round.id, &files, &decisions),
            recommend_only_editors: &editors,
            recommenders: &recommenders,
            now: Utc::now(),
        });
        if status != round.status {
            self.repo.update_review_round_status(round.id, status).await?;
            info!(
                submission_id = round.submission_id,
                review_round_id = round.id,
                "Review round status {:?} -> {:?}",
                round.status,
                status
            );
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryRepository, NewStageAssignment, NewSubmission, NewUser, User};
    use crate::decision::{DecisionRequest, DecisionService, DecisionType, Pipeline};
    use crate::mail::OutboxMailer;
    use crate::templates::get_tera;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        outbox: Arc<OutboxMailer>,
        reviews: ReviewService,
        editor: User,
        author: User,
        reviewer: User,
        round: ReviewRound,
    }

    fn settings() -> MailSettings {
        MailSettings {
            context_name: "Journal of Examples".into(),
            from: Address {
                name: "Journal of Examples".into(),
                email: "editors@example.org".into(),
            },
        }
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let outbox = Arc::new(OutboxMailer::new());
        let mut users = Vec::new();
        for name in ["Editor", "Author", "Reviewer"] {
            users.push(
                repo.create_user(NewUser {
                    name: name.into(),
                    email: format!("{}@example.org", name.to_lowercase()),
                })
                .await
                .unwrap(),
            );
        }
        let submission = repo
            .create_submission(NewSubmission {
                title: "On Review Rounds".into(),
            })
            .await
            .unwrap();
        for (user, role) in [(&users[0], Role::SubEditor), (&users[1], Role::Author)] {
            repo.add_stage_assignment(
                submission.id,
                NewStageAssignment {
                    user_id: user.id,
                    role,
                    recommend_only: false,
                },
            )
            .await
            .unwrap();
        }

        let decisions = DecisionService::new(
            repo.clone(),
            outbox.clone(),
            get_tera(),
            Pipeline::journal(),
            settings(),
        );
        let round = decisions
            .take(
                submission.id,
                DecisionRequest {
                    decision: DecisionType::SendExternalReview,
                    editor_id: users[0].id,
                    review_round_id: None,
                    actions: Vec::new(),
                },
            )
            .await
            .unwrap()
            .opened_round
            .unwrap();

        let reviews = ReviewService::new(repo.clone(), outbox.clone(), get_tera(), settings());
        let mut users = users.into_iter();
        Fixture {
            repo,
            outbox,
            reviews,
            editor: users.next().unwrap(),
            author: users.next().unwrap(),
            reviewer: users.next().unwrap(),
            round,
        }
    }

    fn assign(f: &Fixture, reviewer_id: UserId) -> AssignReviewer {
        AssignReviewer {
            review_round_id: f.round.id,
            reviewer_id,
            editor_id: f.editor.id,
            date_response_due: None,
            date_due: None,
        }
    }

    async fn round_status(f: &Fixture) -> ReviewRoundStatus {
        f.repo
            .get_review_round(f.round.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn review_lifecycle_moves_the_round_along() {
        let f = fixture().await;
        assert_eq!(round_status(&f).await, ReviewRoundStatus::PendingReviewers);

        let a = f.reviews.assign_reviewer(assign(&f, f.reviewer.id)).await.unwrap();
        assert_eq!(a.date_due - a.date_assigned, Duration::days(DEFAULT_REVIEW_DAYS));
        assert_eq!(round_status(&f).await, ReviewRoundStatus::PendingReviews);

        f.reviews.confirm(a.id).await.unwrap();
        let a = f
            .reviews
            .complete(a.id, ReviewerRecommendation::Accept)
            .await
            .unwrap();
        assert_eq!(a.recommendation, Some(ReviewerRecommendation::Accept));
        assert_eq!(round_status(&f).await, ReviewRoundStatus::ReviewsReady);

        f.reviews.consider(a.id).await.unwrap();
        assert_eq!(round_status(&f).await, ReviewRoundStatus::ReviewsCompleted);

        let a = f.reviews.acknowledge(a.id).await.unwrap();
        assert!(a.date_acknowledged.is_some());
    }

    #[tokio::test]
    async fn reviewers_are_assigned_once_per_round() {
        let f = fixture().await;
        f.reviews.assign_reviewer(assign(&f, f.reviewer.id)).await.unwrap();
        let err = f
            .reviews
            .assign_reviewer(assign(&f, f.reviewer.id))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn declined_reviewers_can_be_asked_again() {
        let f = fixture().await;
        let a = f.reviews.assign_reviewer(assign(&f, f.reviewer.id)).await.unwrap();
        f.reviews.decline(a.id).await.unwrap();
        assert_eq!(round_status(&f).await, ReviewRoundStatus::PendingReviewers);
        f.reviews.assign_reviewer(assign(&f, f.reviewer.id)).await.unwrap();
    }

    #[tokio::test]
    async fn authors_cannot_review() {
        let f = fixture().await;
        let err = f
            .reviews
            .assign_reviewer(assign(&f, f.author.id))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn cancelling_notifies_the_reviewer() {
        let f = fixture().await;
        let a = f.reviews.assign_reviewer(assign(&f, f.reviewer.id)).await.unwrap();
        let a = f.reviews.cancel(a.id, f.editor.id).await.unwrap();
        assert!(a.cancelled);

        let sent = f.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, MailTemplate::ReviewCancel);
        assert_eq!(sent[0].to[0].email, f.reviewer.email);

        let err = f.reviews.confirm(a.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn revision_uploads_submit_requested_revisions() {
        let f = fixture().await;
        f.repo
            .update_review_round_status(f.round.id, ReviewRoundStatus::RevisionsRequested)
            .await
            .unwrap();

        f.reviews
            .upload_file(
                f.round.submission_id,
                UploadFile {
                    file_stage: FileStage::ReviewRevision,
                    name: "revised.docx".into(),
                    review_round_id: Some(f.round.id),
                    uploader_id: Some(f.author.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(round_status(&f).await, ReviewRoundStatus::RevisionsSubmitted);
    }

    #[tokio::test]
    async fn review_files_need_a_matching_round() {
        let f = fixture().await;
        let err = f
            .reviews
            .upload_file(
                f.round.submission_id,
                UploadFile {
                    file_stage: FileStage::InternalReviewFile,
                    name: "notes.pdf".into(),
                    review_round_id: Some(f.round.id),
                    uploader_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let err = f
            .reviews
            .upload_file(
                f.round.submission_id,
                UploadFile {
                    file_stage: FileStage::ReviewFile,
                    name: "notes.pdf".into(),
                    review_round_id: None,
                    uploader_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }
}
