use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tera::Tera;
use tracing::{info, warn};

use crate::db::{
    Decision, NewEventLogEntry, ReviewRound, ReviewRoundId, Submission, SubmissionFile,
    SubmissionId, UserId, WorkflowRepository,
};
use crate::decision::steps::{self, Step, StepAction};
use crate::decision::{plan, rules, DecisionContext, DecisionType, Pipeline};
use crate::error::{WorkflowError, WorkflowResult};
use crate::mail::{MailSettings, Mailer};

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub decision: DecisionType,
    pub editor_id: UserId,
    #[serde(default)]
    pub review_round_id: Option<ReviewRoundId>,
    #[serde(default)]
    pub actions: Vec<StepAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub submission: Submission,
    pub opened_round: Option<ReviewRound>,
    pub promoted_files: Vec<SubmissionFile>,
    pub emails_sent: usize,
}

/// Takes editorial decisions: validates, commits and notifies.
#[derive(Clone)]
pub struct DecisionService {
    repo: Arc<dyn WorkflowRepository>,
    mailer: Arc<dyn Mailer>,
    tera: &'static Tera,
    pipeline: Pipeline,
    mail: MailSettings,
}

impl DecisionService {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        mailer: Arc<dyn Mailer>,
        tera: &'static Tera,
        pipeline: Pipeline,
        mail: MailSettings,
    ) -> Self {
        Self {
            repo,
            mailer,
            tera,
            pipeline,
            mail,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    /// Load everything a decision on `submission_id` is judged against.
    pub async fn load_context(
        &self,
        submission_id: SubmissionId,
        editor_id: UserId,
        review_round_id: Option<ReviewRoundId>,
    ) -> WorkflowResult<DecisionContext> {
        let submission = self
            .repo
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("submission {}", submission_id)))?;
        let actor = self
            .repo
            .get_user(editor_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("user {}", editor_id)))?;

        let rounds = self.repo.review_rounds(submission_id).await?;
        let round = match review_round_id {
            Some(id) => Some(
                rounds
                    .iter()
                    .find(|r| r.id == id)
                    .cloned()
                    .ok_or_else(|| WorkflowError::NotFound(format!("review round {}", id)))?,
            ),
            None => None,
        };

        let participants = self.repo.stage_assignments(submission_id).await?;
        let assignments = self.repo.review_assignments(submission_id).await?;
        let files = self.repo.submission_files(submission_id).await?;
        let decisions = self.repo.decisions(submission_id).await?;

        let mut user_ids: Vec<UserId> = participants
            .iter()
            .map(|p| p.user_id)
            .chain(assignments.iter().map(|a| a.reviewer_id))
            .collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let mut users: HashMap<UserId, _> = self
            .repo
            .get_users(&user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        users.insert(actor.id, actor.clone());

        Ok(DecisionContext {
            pipeline: self.pipeline,
            submission,
            actor,
            participants,
            users,
            rounds,
            round,
            assignments,
            files,
            decisions,
            now: Utc::now(),
        })
    }

    /// Decisions `editor_id` can take now. Without a round, the latest round
    /// of the submission's current stage is assumed.
    pub async fn available(
        &self,
        submission_id: SubmissionId,
        editor_id: UserId,
        review_round_id: Option<ReviewRoundId>,
    ) -> WorkflowResult<Vec<DecisionType>> {
        let mut ctx = self
            .load_context(submission_id, editor_id, review_round_id)
            .await?;
        if ctx.round.is_none() {
            ctx.round = ctx.latest_round(ctx.submission.stage).cloned();
        }
        Ok(rules::available_decisions(&ctx))
    }

    /// Steps the editor confirms for `decision`, with mail previews.
    pub async fn steps(
        &self,
        submission_id: SubmissionId,
        decision: DecisionType,
        editor_id: UserId,
        review_round_id: Option<ReviewRoundId>,
    ) -> WorkflowResult<Vec<Step>> {
        let ctx = self
            .load_context(submission_id, editor_id, review_round_id)
            .await?;
        rules::check(decision, &ctx).into_result()?;
        let outcome = plan::outcome(decision, &ctx);
        Ok(steps::build(decision, &ctx, &outcome, self.tera, &self.mail)?)
    }

    pub async fn take(
        &self,
        submission_id: SubmissionId,
        request: DecisionRequest,
    ) -> WorkflowResult<DecisionOutcome> {
        let decision = request.decision;
        let ctx = self
            .load_context(submission_id, request.editor_id, request.review_round_id)
            .await?;

        let mut errors = rules::check(decision, &ctx);
        let outcome = plan::outcome(decision, &ctx);
        let steps = steps::build(decision, &ctx, &outcome, self.tera, &self.mail)?;
        let vars = steps::mail_variables(decision, &ctx, &outcome, &self.mail);
        let planned = match steps::apply_actions(&steps, &request.actions, self.tera, &self.mail, &vars) {
            Ok(planned) => planned,
            Err(action_errors) => {
                errors.merge(action_errors);
                Default::default()
            }
        };
        if !errors.is_empty() {
            warn!(
                submission_id,
                decision = decision.code(),
                "Rejected decision: {}",
                errors.fields().collect::<Vec<_>>().join(", ")
            );
            return Err(WorkflowError::Validation(errors));
        }

        let transition = plan::transition(decision, &ctx, outcome, planned.promotions);
        let committed = self.repo.commit_transition(&transition).await?;
        info!(
            submission_id,
            decision = decision.code(),
            editor_id = request.editor_id,
            "{}",
            transition.log_message
        );

        let mut emails_sent = 0;
        for mailable in &planned.mailables {
            match self.mailer.send(mailable).await {
                Ok(()) => emails_sent += 1,
                Err(e) => {
                    warn!(
                        submission_id,
                        template = mailable.template.key(),
                        "Failed to send mail: {}",
                        e
                    );
                    let entry = NewEventLogEntry {
                        submission_id,
                        user_id: Some(request.editor_id),
                        message: format!("Failed to send {}: {}", mailable.template.key(), e),
                    };
                    if let Err(e) = self.repo.log_event(entry).await {
                        warn!(submission_id, "Failed to record mail failure: {}", e);
                    }
                }
            }
        }

        Ok(DecisionOutcome {
            decision: committed.decision,
            submission: committed.submission,
            opened_round: committed.opened_round,
            promoted_files: committed.promoted_files,
            emails_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        FileStage, InMemoryRepository, NewStageAssignment, NewSubmission, NewSubmissionFile,
        NewUser, ReviewRoundStatus, Role, Stage, SubmissionStatus, User,
    };
    use crate::error::MailError;
    use crate::mail::{Address, Mailable, OutboxMailer};
    use crate::review::{AssignReviewer, ReviewService, UploadFile};
    use crate::templates::get_tera;
    use async_trait::async_trait;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        outbox: Arc<OutboxMailer>,
        service: DecisionService,
        editor: User,
        author: User,
        reviewer: User,
        submission: Submission,
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

    async fn user(repo: &InMemoryRepository, name: &str) -> User {
        repo.create_user(NewUser {
            name: name.into(),
            email: format!("{}@example.org", name.to_lowercase()),
        })
        .await
        .unwrap()
    }

    async fn fixture(pipeline: Pipeline) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let outbox = Arc::new(OutboxMailer::new());
        let editor = user(&repo, "Editor").await;
        let author = user(&repo, "Author").await;
        let reviewer = user(&repo, "Reviewer").await;
        let submission = repo
            .create_submission(NewSubmission {
                title: "On Review Rounds".into(),
            })
            .await
            .unwrap();
        for (user_id, role) in [(editor.id, Role::SubEditor), (author.id, Role::Author)] {
            repo.add_stage_assignment(
                submission.id,
                NewStageAssignment {
                    user_id,
                    role,
                    recommend_only: false,
                },
            )
            .await
            .unwrap();
        }
        repo.create_submission_file(NewSubmissionFile {
            submission_id: submission.id,
            file_stage: FileStage::Submission,
            name: "manuscript.docx".into(),
            review_round_id: None,
            source_file_id: None,
            uploader_id: Some(author.id),
        })
        .await
        .unwrap();

        let service = DecisionService::new(
            repo.clone(),
            outbox.clone(),
            get_tera(),
            pipeline,
            settings(),
        );
        Fixture {
            repo,
            outbox,
            service,
            editor,
            author,
            reviewer,
            submission,
        }
    }

    fn request(decision: DecisionType, editor_id: UserId) -> DecisionRequest {
        DecisionRequest {
            decision,
            editor_id,
            review_round_id: None,
            actions: Vec::new(),
        }
    }

    fn notify_authors() -> StepAction {
        StepAction::Email {
            id: steps::NOTIFY_AUTHORS.into(),
            skip: false,
            subject: None,
            body: None,
            recipients: None,
        }
    }

    async fn send_to_review(f: &Fixture) -> DecisionOutcome {
        let files = f.repo.submission_files(f.submission.id).await.unwrap();
        let mut req = request(DecisionType::SendExternalReview, f.editor.id);
        req.actions = vec![
            notify_authors(),
            StepAction::PromoteFiles {
                id: steps::PROMOTE_TO_REVIEW.into(),
                file_ids: vec![files[0].id],
            },
        ];
        f.service.take(f.submission.id, req).await.unwrap()
    }

    #[tokio::test]
    async fn sending_to_review_opens_a_round_and_mails_the_author() {
        let f = fixture(Pipeline::journal()).await;
        let outcome = send_to_review(&f).await;

        assert_eq!(outcome.submission.stage, Stage::ExternalReview);
        let round = outcome.opened_round.unwrap();
        assert_eq!((round.stage, round.round), (Stage::ExternalReview, 1));
        assert_eq!(outcome.promoted_files.len(), 1);
        assert_eq!(outcome.promoted_files[0].file_stage, FileStage::ReviewFile);
        assert_eq!(outcome.promoted_files[0].review_round_id, Some(round.id));
        assert_eq!(outcome.emails_sent, 1);

        let sent = f.outbox.sent();
        assert_eq!(sent[0].to[0].email, f.author.email);
        assert!(sent[0].body.contains("On Review Rounds"));

        let log = f.repo.event_log(f.submission.id).await.unwrap();
        assert!(log.iter().any(|e| e.message.contains("Send for Review")));
    }

    #[tokio::test]
    async fn steps_without_actions_are_not_run() {
        let f = fixture(Pipeline::journal()).await;
        let outcome = f
            .service
            .take(f.submission.id, request(DecisionType::SendExternalReview, f.editor.id))
            .await
            .unwrap();
        assert_eq!(outcome.emails_sent, 0);
        assert!(outcome.promoted_files.is_empty());
        assert!(f.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn illegal_decisions_change_nothing() {
        let f = fixture(Pipeline::journal()).await;
        let err = f
            .service
            .take(f.submission.id, request(DecisionType::Accept, f.editor.id))
            .await
            .unwrap_err();
        let WorkflowError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(errors.get(rules::FIELD_DECISION).is_some());
        assert!(errors.get(rules::FIELD_ROUND).is_some());

        assert!(f.repo.decisions(f.submission.id).await.unwrap().is_empty());
        let submission = f.repo.get_submission(f.submission.id).await.unwrap().unwrap();
        assert_eq!(submission.stage, Stage::Submission);
    }

    #[tokio::test]
    async fn authors_cannot_decide() {
        let f = fixture(Pipeline::journal()).await;
        let err = f
            .service
            .take(f.submission.id, request(DecisionType::InitialDecline, f.author.id))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(ref e) if e.get(rules::FIELD_EDITOR).is_some()));
    }

    #[tokio::test]
    async fn unknown_round_is_not_found() {
        let f = fixture(Pipeline::journal()).await;
        send_to_review(&f).await;
        let mut req = request(DecisionType::Accept, f.editor.id);
        req.review_round_id = Some(9999);
        let err = f.service.take(f.submission.id, req).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn accept_moves_to_copyediting_and_marks_the_round() {
        let f = fixture(Pipeline::journal()).await;
        let round = send_to_review(&f).await.opened_round.unwrap();

        let mut req = request(DecisionType::Accept, f.editor.id);
        req.review_round_id = Some(round.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::Copyediting);
        assert_eq!(outcome.decision.round, Some(1));

        let round = f.repo.get_review_round(round.id).await.unwrap().unwrap();
        assert_eq!(round.status, ReviewRoundStatus::Accepted);
    }

    #[tokio::test]
    async fn decline_and_revert() {
        let f = fixture(Pipeline::journal()).await;
        let outcome = f
            .service
            .take(f.submission.id, request(DecisionType::InitialDecline, f.editor.id))
            .await
            .unwrap();
        assert_eq!(outcome.submission.status, SubmissionStatus::Declined);

        let available = f
            .service
            .available(f.submission.id, f.editor.id, None)
            .await
            .unwrap();
        assert_eq!(available, vec![DecisionType::RevertInitialDecline]);

        let outcome = f
            .service
            .take(
                f.submission.id,
                request(DecisionType::RevertInitialDecline, f.editor.id),
            )
            .await
            .unwrap();
        assert_eq!(outcome.submission.status, SubmissionStatus::Queued);
    }

    #[tokio::test]
    async fn cancelling_the_only_round_retracts_to_submission() {
        let f = fixture(Pipeline::journal()).await;
        let round = send_to_review(&f).await.opened_round.unwrap();
        let reviews = ReviewService::new(f.repo.clone(), f.outbox.clone(), get_tera(), settings());
        let assignment = reviews
            .assign_reviewer(AssignReviewer {
                review_round_id: round.id,
                reviewer_id: f.reviewer.id,
                editor_id: f.editor.id,
                date_response_due: None,
                date_due: None,
            })
            .await
            .unwrap();

        let mut req = request(DecisionType::CancelReviewRound, f.editor.id);
        req.review_round_id = Some(round.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::Submission);

        let assignment = f
            .repo
            .get_review_assignment(assignment.id)
            .await
            .unwrap()
            .unwrap();
        assert!(assignment.cancelled);
        let rounds = f.repo.review_rounds(f.submission.id).await.unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].status, ReviewRoundStatus::PendingReviewers);
    }

    #[tokio::test]
    async fn resending_after_retraction_does_not_duplicate_review_files() {
        let f = fixture(Pipeline::journal()).await;
        let round = send_to_review(&f).await.opened_round.unwrap();

        let mut req = request(DecisionType::CancelReviewRound, f.editor.id);
        req.review_round_id = Some(round.id);
        f.service.take(f.submission.id, req).await.unwrap();

        let steps = f
            .service
            .steps(f.submission.id, DecisionType::SendExternalReview, f.editor.id, None)
            .await
            .unwrap();
        let Some(Step::PromoteFiles(promote)) =
            steps.iter().find(|s| s.id() == steps::PROMOTE_TO_REVIEW)
        else {
            panic!("expected a promotion step");
        };
        assert!(promote.candidates.is_empty());

        let outcome = f
            .service
            .take(f.submission.id, request(DecisionType::SendExternalReview, f.editor.id))
            .await
            .unwrap();
        assert_eq!(outcome.opened_round.map(|r| r.id), Some(round.id));

        let review_files: Vec<_> = f
            .repo
            .submission_files(f.submission.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|file| file.review_round_id == Some(round.id))
            .collect();
        assert_eq!(review_files.len(), 1);
    }

    #[tokio::test]
    async fn cancelling_a_later_round_deletes_it_with_its_reviewers_and_files() {
        let f = fixture(Pipeline::journal()).await;
        let first = send_to_review(&f).await.opened_round.unwrap();

        let mut req = request(DecisionType::NewExternalReviewRound, f.editor.id);
        req.review_round_id = Some(first.id);
        let second = f
            .service
            .take(f.submission.id, req)
            .await
            .unwrap()
            .opened_round
            .unwrap();
        assert_eq!(second.round, 2);

        let reviews = ReviewService::new(f.repo.clone(), f.outbox.clone(), get_tera(), settings());
        let assignment = reviews
            .assign_reviewer(AssignReviewer {
                review_round_id: second.id,
                reviewer_id: f.reviewer.id,
                editor_id: f.editor.id,
                date_response_due: None,
                date_due: None,
            })
            .await
            .unwrap();
        reviews.cancel(assignment.id, f.editor.id).await.unwrap();
        reviews
            .upload_file(
                f.submission.id,
                UploadFile {
                    file_stage: FileStage::ReviewFile,
                    name: "second-round.docx".into(),
                    review_round_id: Some(second.id),
                    uploader_id: Some(f.editor.id),
                },
            )
            .await
            .unwrap();
        let first_before = f.repo.get_review_round(first.id).await.unwrap().unwrap();

        let mut req = request(DecisionType::CancelReviewRound, f.editor.id);
        req.review_round_id = Some(second.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::ExternalReview);

        let rounds = f.repo.review_rounds(f.submission.id).await.unwrap();
        assert_eq!(rounds, vec![first_before]);
        assert!(f.repo.get_review_round(second.id).await.unwrap().is_none());
        let assignments = f.repo.review_assignments(f.submission.id).await.unwrap();
        assert!(assignments.iter().all(|a| a.review_round_id != second.id));
        let files = f.repo.submission_files(f.submission.id).await.unwrap();
        assert!(files.iter().all(|file| file.review_round_id != Some(second.id)));
        assert!(files.iter().any(|file| file.review_round_id == Some(first.id)));
    }

    #[tokio::test]
    async fn press_retraction_reopens_the_internal_round() {
        let f = fixture(Pipeline::press()).await;
        let internal = f
            .service
            .take(f.submission.id, request(DecisionType::SendInternalReview, f.editor.id))
            .await
            .unwrap()
            .opened_round
            .unwrap();

        let mut req = request(DecisionType::SendExternalReview, f.editor.id);
        req.review_round_id = Some(internal.id);
        let external = f
            .service
            .take(f.submission.id, req)
            .await
            .unwrap()
            .opened_round
            .unwrap();

        let mut req = request(DecisionType::CancelReviewRound, f.editor.id);
        req.review_round_id = Some(external.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::InternalReview);

        let round = f.repo.get_review_round(internal.id).await.unwrap().unwrap();
        assert_eq!(round.status, ReviewRoundStatus::PendingReviewers);
        let available = f
            .service
            .available(f.submission.id, f.editor.id, None)
            .await
            .unwrap();
        assert!(available.contains(&DecisionType::SendExternalReview));

        let mut req = request(DecisionType::SendExternalReview, f.editor.id);
        req.review_round_id = Some(internal.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::ExternalReview);
        assert_eq!(outcome.opened_round.map(|r| r.id), Some(external.id));
    }

    #[tokio::test]
    async fn steps_preview_default_mail() {
        let f = fixture(Pipeline::journal()).await;
        let steps = f
            .service
            .steps(f.submission.id, DecisionType::SendExternalReview, f.editor.id, None)
            .await
            .unwrap();
        let Step::Email(email) = &steps[0] else { panic!("expected email step") };
        assert!(email.subject.contains("sent for review"));
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _mailable: &Mailable) -> Result<(), MailError> {
            Err(MailError::Transport("smtp unreachable".into()))
        }
    }

    #[tokio::test]
    async fn mail_failures_do_not_undo_the_decision() {
        let f = fixture(Pipeline::journal()).await;
        let service = DecisionService::new(
            f.repo.clone(),
            Arc::new(FailingMailer),
            get_tera(),
            Pipeline::journal(),
            settings(),
        );
        let mut req = request(DecisionType::SkipExternalReview, f.editor.id);
        req.actions = vec![notify_authors()];
        let outcome = service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::Copyediting);
        assert_eq!(outcome.emails_sent, 0);

        let log = f.repo.event_log(f.submission.id).await.unwrap();
        assert!(log.iter().any(|e| e.message.contains("smtp unreachable")));
    }

    #[tokio::test]
    async fn press_runs_internal_review_first() {
        let f = fixture(Pipeline::press()).await;
        let outcome = f
            .service
            .take(f.submission.id, request(DecisionType::SendInternalReview, f.editor.id))
            .await
            .unwrap();
        let internal = outcome.opened_round.unwrap();
        assert_eq!(internal.stage, Stage::InternalReview);

        let mut req = request(DecisionType::SendExternalReview, f.editor.id);
        req.review_round_id = Some(internal.id);
        let outcome = f.service.take(f.submission.id, req).await.unwrap();
        assert_eq!(outcome.submission.stage, Stage::ExternalReview);

        let internal = f.repo.get_review_round(internal.id).await.unwrap().unwrap();
        assert_eq!(internal.status, ReviewRoundStatus::SentToExternal);
    }
}
