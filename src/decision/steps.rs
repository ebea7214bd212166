//! Steps an editor confirms when taking a decision, and the actions they submit back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tera::Tera;

use crate::db::{
    FilePromotion, FileStage, PromotionTarget, Stage, SubmissionFile, SubmissionFileId, User,
    UserId,
};
use crate::decision::plan::Outcome;
use crate::decision::{DecisionContext, DecisionType};
use crate::error::{MailError, ValidationErrors};
use crate::mail::{Address, MailSettings, MailTemplate, MailVariables, Mailable};

pub const NOTIFY_AUTHORS: &str = "notifyAuthors";
pub const NOTIFY_REVIEWERS: &str = "notifyReviewers";
pub const NOTIFY_EDITORS: &str = "notifyEditors";
pub const PROMOTE_TO_REVIEW: &str = "promoteFilesToReview";
pub const PROMOTE_TO_COPYEDITING: &str = "promoteFilesToCopyediting";
pub const PROMOTE_TO_PRODUCTION: &str = "promoteFilesToProduction";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Email(EmailStep),
    PromoteFiles(PromoteFilesStep),
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::Email(step) => &step.id,
            Step::PromoteFiles(step) => &step.id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailStep {
    pub id: String,
    pub name: String,
    pub recipients: Vec<User>,
    pub template: MailTemplate,
    pub subject: String,
    pub body: String,
    pub can_skip: bool,
    /// Each recipient gets their own copy so reviewers stay hidden from one another.
    pub separate_recipients: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromoteFilesStep {
    pub id: String,
    pub name: String,
    pub to_stage: FileStage,
    pub candidates: Vec<SubmissionFile>,
}

/// What the editor submitted for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Email {
        id: String,
        #[serde(default)]
        skip: bool,
        subject: Option<String>,
        body: Option<String>,
        /// Subset of the step's recipients. All of them when absent.
        recipients: Option<Vec<UserId>>,
    },
    PromoteFiles {
        id: String,
        file_ids: Vec<SubmissionFileId>,
    },
}

impl StepAction {
    pub fn id(&self) -> &str {
        match self {
            StepAction::Email { id, .. } | StepAction::PromoteFiles { id, .. } => id,
        }
    }
}

/// Mail and file work left to do once the decision is validated.
#[derive(Debug, Clone, Default)]
pub struct Planned {
    pub mailables: Vec<Mailable>,
    pub promotions: Vec<FilePromotion>,
}

pub fn mail_variables(
    decision: DecisionType,
    ctx: &DecisionContext,
    outcome: &Outcome,
    settings: &MailSettings,
) -> MailVariables {
    let stage = outcome.stage_after(ctx);
    let round = outcome
        .open_round
        .map(|r| r.round)
        .or_else(|| ctx.round.as_ref().map(|r| r.round))
        .map(|r| r.to_string())
        .unwrap_or_default();
    MailVariables {
        context_name: settings.context_name.clone(),
        recipient_name: String::new(),
        submission_id: ctx.submission.id,
        submission_title: ctx.submission.title.clone(),
        editor_name: ctx.actor.name.clone(),
        decision: decision.label().to_string(),
        stage: stage.label().to_string(),
        round,
        stage_changed: stage != ctx.submission.stage,
    }
}

fn email_step(
    id: &str,
    name: &str,
    recipients: Vec<User>,
    template: MailTemplate,
    separate_recipients: bool,
    tera: &Tera,
    settings: &MailSettings,
    vars: &MailVariables,
) -> Result<Option<Step>, MailError> {
    if recipients.is_empty() {
        return Ok(None);
    }
    let to = recipients.iter().map(Address::from).collect();
    let preview = Mailable::render(tera, template, settings.from.clone(), to, vars)?;
    Ok(Some(Step::Email(EmailStep {
        id: id.to_string(),
        name: name.to_string(),
        recipients,
        template,
        subject: preview.subject,
        body: preview.body,
        can_skip: true,
        separate_recipients,
    })))
}

fn review_file_stage(stage: Stage) -> FileStage {
    match stage {
        Stage::InternalReview => FileStage::InternalReviewFile,
        _ => FileStage::ReviewFile,
    }
}

fn revision_file_stage(stage: Stage) -> FileStage {
    match stage {
        Stage::InternalReview => FileStage::InternalReviewRevision,
        _ => FileStage::ReviewRevision,
    }
}

fn promote_step(
    id: &str,
    name: &str,
    to_stage: FileStage,
    candidates: Vec<&SubmissionFile>,
) -> Step {
    Step::PromoteFiles(PromoteFilesStep {
        id: id.to_string(),
        name: name.to_string(),
        to_stage,
        candidates: candidates.into_iter().cloned().collect(),
    })
}

/// Sources of the files a reopened round already holds.
fn already_promoted(ctx: &DecisionContext, outcome: &Outcome) -> HashSet<SubmissionFileId> {
    let Some(open) = outcome.open_round else {
        return HashSet::new();
    };
    let Some(round) = ctx
        .rounds_in(open.stage)
        .find(|r| r.round == open.round)
    else {
        return HashSet::new();
    };
    ctx.files
        .iter()
        .filter(|f| f.review_round_id == Some(round.id))
        .filter_map(|f| f.source_file_id)
        .collect()
}

/// Reviewers of the current round who sent in a review.
fn completed_reviewers(ctx: &DecisionContext) -> Vec<User> {
    let Some(round) = &ctx.round else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    ctx.round_assignments(round.id)
        .into_iter()
        .filter(|a| a.is_active() && a.date_completed.is_some())
        .filter(|a| seen.insert(a.reviewer_id))
        .filter_map(|a| ctx.users.get(&a.reviewer_id).cloned())
        .collect()
}

/// The steps for `decision`, with default mail rendered for preview.
pub fn build(
    decision: DecisionType,
    ctx: &DecisionContext,
    outcome: &Outcome,
    tera: &Tera,
    settings: &MailSettings,
) -> Result<Vec<Step>, MailError> {
    use DecisionType::*;

    let vars = mail_variables(decision, ctx, outcome, settings);
    let mut steps = Vec::new();

    if decision.is_recommendation() {
        let editors = ctx.deciding_editors().into_iter().cloned().collect();
        steps.extend(email_step(
            NOTIFY_EDITORS,
            "Notify Editors",
            editors,
            MailTemplate::Recommendation,
            false,
            tera,
            settings,
            &vars,
        )?);
        return Ok(steps);
    }

    let authors = ctx.authors().into_iter().cloned().collect();
    steps.extend(email_step(
        NOTIFY_AUTHORS,
        "Notify Authors",
        authors,
        decision.mail_template(),
        false,
        tera,
        settings,
        &vars,
    )?);

    let reviewers = match decision {
        Accept | AcceptInternal | RequestRevisions | RequestRevisionsInternal | Resubmit
        | ResubmitInternal | Decline | DeclineInternal => {
            Some((completed_reviewers(ctx), MailTemplate::NotifyReviewers))
        }
        CancelReviewRound | CancelInternalReviewRound => {
            let cancelled: Vec<User> = ctx
                .assignments
                .iter()
                .filter(|a| outcome.cancel_assignments.contains(&a.id))
                .filter_map(|a| ctx.users.get(&a.reviewer_id).cloned())
                .collect();
            Some((cancelled, MailTemplate::ReviewCancel))
        }
        _ => None,
    };
    if let Some((reviewers, template)) = reviewers {
        steps.extend(email_step(
            NOTIFY_REVIEWERS,
            "Notify Reviewers",
            reviewers,
            template,
            true,
            tera,
            settings,
            &vars,
        )?);
    }

    let current_round = ctx.round.as_ref().map(|r| r.id);
    match decision {
        SendInternalReview | SendExternalReview | SkipInternalReview => {
            let target = outcome.stage_after(ctx);
            let mut candidates = ctx.files_in(&[FileStage::Submission], None);
            if ctx.submission.stage == Stage::InternalReview {
                candidates.extend(ctx.files_in(
                    &[FileStage::InternalReviewFile, FileStage::InternalReviewRevision],
                    current_round,
                ));
            }
            let present = already_promoted(ctx, outcome);
            candidates.retain(|f| !present.contains(&f.id));
            steps.push(promote_step(
                PROMOTE_TO_REVIEW,
                "Select Files for Review",
                review_file_stage(target),
                candidates,
            ));
        }
        NewExternalReviewRound | NewInternalReviewRound => {
            let stage = decision.stage(ctx.pipeline);
            steps.push(promote_step(
                PROMOTE_TO_REVIEW,
                "Select Files for Review",
                review_file_stage(stage),
                ctx.files_in(&[revision_file_stage(stage)], current_round),
            ));
        }
        Accept | AcceptInternal => {
            let stage = decision.stage(ctx.pipeline);
            steps.push(promote_step(
                PROMOTE_TO_COPYEDITING,
                "Select Files for Copyediting",
                FileStage::Final,
                ctx.files_in(
                    &[review_file_stage(stage), revision_file_stage(stage)],
                    current_round,
                ),
            ));
        }
        SkipExternalReview => {
            steps.push(promote_step(
                PROMOTE_TO_COPYEDITING,
                "Select Files for Copyediting",
                FileStage::Final,
                ctx.files_in(&[FileStage::Submission], None),
            ));
        }
        SendToProduction => {
            steps.push(promote_step(
                PROMOTE_TO_PRODUCTION,
                "Select Files for Production",
                FileStage::ProductionReady,
                ctx.files_in(&[FileStage::Copyedit], None),
            ));
        }
        _ => {}
    }

    Ok(steps)
}

/// Check the submitted actions against the steps and work out the mail and
/// promotions they ask for. Steps without an action are left undone.
pub fn apply_actions(
    steps: &[Step],
    actions: &[StepAction],
    tera: &Tera,
    settings: &MailSettings,
    vars: &MailVariables,
) -> Result<Planned, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut planned = Planned::default();
    let mut seen = HashSet::new();

    for (index, action) in actions.iter().enumerate() {
        let field = format!("actions.{index}");
        if !seen.insert(action.id()) {
            errors.add(field, format!("The step {} was submitted more than once.", action.id()));
            continue;
        }
        let Some(step) = steps.iter().find(|s| s.id() == action.id()) else {
            errors.add(field, format!("The step {} is not part of this decision.", action.id()));
            continue;
        };

        match (step, action) {
            (
                Step::Email(step),
                StepAction::Email {
                    skip,
                    subject,
                    body,
                    recipients,
                    ..
                },
            ) => {
                if *skip {
                    if !step.can_skip {
                        errors.add(field, format!("The step {} can not be skipped.", step.id));
                    }
                    continue;
                }
                let to: Vec<&User> = match recipients {
                    None => step.recipients.iter().collect(),
                    Some(ids) => {
                        let unknown: Vec<String> = ids
                            .iter()
                            .filter(|id| !step.recipients.iter().any(|u| u.id == **id))
                            .map(|id| id.to_string())
                            .collect();
                        if !unknown.is_empty() {
                            errors.add(
                                format!("{field}.recipients"),
                                format!("These users can not be sent this email: {}.", unknown.join(", ")),
                            );
                            continue;
                        }
                        step.recipients.iter().filter(|u| ids.contains(&u.id)).collect()
                    }
                };
                if to.is_empty() {
                    errors.add(format!("{field}.recipients"), "Select at least one recipient.");
                    continue;
                }

                let groups: Vec<Vec<Address>> = if step.separate_recipients {
                    to.iter().map(|u| vec![Address::from(*u)]).collect()
                } else {
                    vec![to.iter().map(|u| Address::from(*u)).collect()]
                };
                for group in groups {
                    match Mailable::render_with(
                        tera,
                        step.template,
                        settings.from.clone(),
                        group,
                        vars,
                        subject.as_deref(),
                        body.as_deref(),
                    ) {
                        Ok(mailable) => planned.mailables.push(mailable),
                        Err(e) => {
                            errors.add(format!("{field}.body"), format!("The email could not be prepared: {e}"));
                            break;
                        }
                    }
                }
            }
            (Step::PromoteFiles(step), StepAction::PromoteFiles { file_ids, .. }) => {
                let mut promoted = HashSet::new();
                for file_id in file_ids {
                    if !step.candidates.iter().any(|f| f.id == *file_id) {
                        errors.add(
                            format!("{field}.file_ids"),
                            format!("The file {file_id} can not be promoted by this decision."),
                        );
                        continue;
                    }
                    if promoted.insert(*file_id) {
                        planned.promotions.push(FilePromotion {
                            file_id: *file_id,
                            to_stage: step.to_stage,
                            target: if step.to_stage.review_stage().is_some() {
                                PromotionTarget::OpenedRound
                            } else {
                                PromotionTarget::Detached
                            },
                        });
                    }
                }
            }
            _ => {
                errors.add(field, format!("The action does not match the step {}.", step.id()));
            }
        }
    }

    if errors.is_empty() {
        Ok(planned)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::context::fixtures::*;
    use crate::decision::plan::outcome;
    use crate::templates::get_tera;
    use DecisionType::*;

    fn settings() -> MailSettings {
        MailSettings {
            context_name: "Journal of Examples".into(),
            from: Address {
                name: "Journal of Examples".into(),
                email: "editors@example.org".into(),
            },
        }
    }

    fn steps_for(decision: DecisionType, ctx: &DecisionContext) -> Vec<Step> {
        let out = outcome(decision, ctx);
        build(decision, ctx, &out, get_tera(), &settings()).unwrap()
    }

    fn ids(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.id()).collect()
    }

    fn review_file(ctx: &mut DecisionContext, id: i64, stage: FileStage) {
        let round = ctx.round.as_ref().map(|r| r.id);
        ctx.files.push(SubmissionFile {
            id,
            submission_id: ctx.submission.id,
            file_stage: stage,
            name: format!("file-{id}.pdf"),
            review_round_id: round,
            source_file_id: None,
            uploader_id: Some(AUTHOR),
            created_at: ctx.now,
        });
    }

    #[test]
    fn send_to_review_notifies_authors_and_promotes_submission_files() {
        let ctx = context(Stage::Submission);
        let steps = steps_for(SendExternalReview, &ctx);
        assert_eq!(ids(&steps), vec![NOTIFY_AUTHORS, PROMOTE_TO_REVIEW]);

        let Step::Email(email) = &steps[0] else { panic!("expected email") };
        assert_eq!(email.template, MailTemplate::SendToExternal);
        assert_eq!(email.recipients[0].id, AUTHOR);
        assert!(email.body.contains("On Review Rounds"));

        let Step::PromoteFiles(promote) = &steps[1] else { panic!("expected promotion") };
        assert_eq!(promote.to_stage, FileStage::ReviewFile);
        assert_eq!(promote.candidates.len(), 1);
    }

    #[test]
    fn accept_notifies_reviewers_who_completed_a_review() {
        let mut ctx = with_round(context(Stage::ExternalReview), Stage::ExternalReview, 1);
        let now = ctx.now;
        assign(&mut ctx, REVIEWER).date_completed = Some(now);
        assign(&mut ctx, SECOND_REVIEWER);
        review_file(&mut ctx, 600, FileStage::ReviewFile);
        review_file(&mut ctx, 601, FileStage::ReviewRevision);

        let steps = steps_for(Accept, &ctx);
        assert_eq!(
            ids(&steps),
            vec![NOTIFY_AUTHORS, NOTIFY_REVIEWERS, PROMOTE_TO_COPYEDITING]
        );
        let Step::Email(reviewers) = &steps[1] else { panic!("expected email") };
        assert_eq!(
            reviewers.recipients.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![REVIEWER]
        );
        let Step::PromoteFiles(promote) = &steps[2] else { panic!("expected promotion") };
        assert_eq!(promote.to_stage, FileStage::Final);
        assert_eq!(promote.candidates.len(), 2);
    }

    #[test]
    fn decline_without_reviews_only_notifies_authors() {
        let ctx = with_round(context(Stage::ExternalReview), Stage::ExternalReview, 1);
        assert_eq!(ids(&steps_for(Decline, &ctx)), vec![NOTIFY_AUTHORS]);
    }

    #[test]
    fn recommendations_notify_deciding_editors() {
        let ctx = with_round(
            as_actor(context(Stage::ExternalReview), RECOMMENDER),
            Stage::ExternalReview,
            1,
        );
        let steps = steps_for(RecommendAccept, &ctx);
        assert_eq!(ids(&steps), vec![NOTIFY_EDITORS]);
        let Step::Email(email) = &steps[0] else { panic!("expected email") };
        assert_eq!(email.recipients[0].id, EDITOR);
        assert!(email.subject.contains("Recommend Accept"));
    }

    #[test]
    fn new_round_offers_the_revisions_of_the_current_round() {
        let mut ctx = with_round(context(Stage::ExternalReview), Stage::ExternalReview, 1);
        review_file(&mut ctx, 600, FileStage::ReviewFile);
        review_file(&mut ctx, 601, FileStage::ReviewRevision);

        let steps = steps_for(NewExternalReviewRound, &ctx);
        let Step::PromoteFiles(promote) = &steps[1] else { panic!("expected promotion") };
        assert_eq!(promote.candidates.iter().map(|f| f.id).collect::<Vec<_>>(), vec![601]);
        assert_eq!(promote.to_stage, FileStage::ReviewFile);
    }

    #[test]
    fn cancelling_the_round_warns_the_cancelled_reviewers() {
        let mut ctx = with_round(context(Stage::ExternalReview), Stage::ExternalReview, 1);
        assign(&mut ctx, REVIEWER);
        let steps = steps_for(CancelReviewRound, &ctx);
        assert_eq!(ids(&steps), vec![NOTIFY_AUTHORS, NOTIFY_REVIEWERS]);
        let Step::Email(email) = &steps[1] else { panic!("expected email") };
        assert_eq!(email.template, MailTemplate::ReviewCancel);
    }

    #[test]
    fn actions_become_mail_and_promotions() {
        let ctx = context(Stage::Submission);
        let out = outcome(SendExternalReview, &ctx);
        let steps = build(SendExternalReview, &ctx, &out, get_tera(), &settings()).unwrap();
        let vars = mail_variables(SendExternalReview, &ctx, &out, &settings());
        let actions = vec![
            StepAction::Email {
                id: NOTIFY_AUTHORS.into(),
                skip: false,
                subject: Some("About {{ submission_title }}".into()),
                body: None,
                recipients: None,
            },
            StepAction::PromoteFiles {
                id: PROMOTE_TO_REVIEW.into(),
                file_ids: vec![500, 500],
            },
        ];

        let planned = apply_actions(&steps, &actions, get_tera(), &settings(), &vars).unwrap();
        assert_eq!(planned.mailables.len(), 1);
        assert_eq!(planned.mailables[0].subject, "About On Review Rounds");
        assert_eq!(
            planned.promotions,
            vec![FilePromotion {
                file_id: 500,
                to_stage: FileStage::ReviewFile,
                target: PromotionTarget::OpenedRound,
            }]
        );
    }

    #[test]
    fn skipped_and_missing_steps_do_nothing() {
        let ctx = context(Stage::Submission);
        let out = outcome(SendExternalReview, &ctx);
        let steps = build(SendExternalReview, &ctx, &out, get_tera(), &settings()).unwrap();
        let vars = mail_variables(SendExternalReview, &ctx, &out, &settings());
        let actions = vec![StepAction::Email {
            id: NOTIFY_AUTHORS.into(),
            skip: true,
            subject: None,
            body: None,
            recipients: None,
        }];
        let planned = apply_actions(&steps, &actions, get_tera(), &settings(), &vars).unwrap();
        assert!(planned.mailables.is_empty());
        assert!(planned.promotions.is_empty());
    }

    #[test]
    fn invalid_actions_are_all_reported() {
        let ctx = context(Stage::Submission);
        let out = outcome(SendExternalReview, &ctx);
        let steps = build(SendExternalReview, &ctx, &out, get_tera(), &settings()).unwrap();
        let vars = mail_variables(SendExternalReview, &ctx, &out, &settings());
        let actions = vec![
            StepAction::Email {
                id: NOTIFY_AUTHORS.into(),
                skip: false,
                subject: None,
                body: None,
                recipients: Some(vec![REVIEWER]),
            },
            StepAction::PromoteFiles {
                id: PROMOTE_TO_REVIEW.into(),
                file_ids: vec![999],
            },
            StepAction::PromoteFiles {
                id: PROMOTE_TO_PRODUCTION.into(),
                file_ids: vec![],
            },
        ];

        let errors = apply_actions(&steps, &actions, get_tera(), &settings(), &vars).unwrap_err();
        assert_eq!(
            errors.fields().collect::<Vec<_>>(),
            vec!["actions.0.recipients", "actions.1.file_ids", "actions.2"]
        );
    }

    #[test]
    fn reviewer_mail_is_sent_separately() {
        let mut ctx = with_round(context(Stage::ExternalReview), Stage::ExternalReview, 1);
        let now = ctx.now;
        assign(&mut ctx, REVIEWER).date_completed = Some(now);
        assign(&mut ctx, SECOND_REVIEWER).date_completed = Some(now);
        let out = outcome(Decline, &ctx);
        let steps = build(Decline, &ctx, &out, get_tera(), &settings()).unwrap();
        let vars = mail_variables(Decline, &ctx, &out, &settings());
        let actions = vec![StepAction::Email {
            id: NOTIFY_REVIEWERS.into(),
            skip: false,
            subject: None,
            body: None,
            recipients: None,
        }];

        let planned = apply_actions(&steps, &actions, get_tera(), &settings(), &vars).unwrap();
        assert_eq!(planned.mailables.len(), 2);
        assert!(planned.mailables.iter().all(|m| m.to.len() == 1));
    }
}
