//! Mailables: templated notifications rendered with Tera and handed to a `Mailer`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tera::{Context, Tera};
use tracing::info;

use crate::db::User;
use crate::error::MailError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MailTemplate {
    SendToInternal,
    SendToExternal,
    SkipReview,
    Accept,
    Revisions,
    Resubmit,
    Decline,
    InitialDecline,
    NewRound,
    RevertDecline,
    RevertInitialDecline,
    SendToProduction,
    BackFromProduction,
    BackFromCopyediting,
    CancelReviewRound,
    NotifyReviewers,
    ReviewCancel,
    Recommendation,
}

impl MailTemplate {
    pub fn key(self) -> &'static str {
        match self {
            MailTemplate::SendToInternal => "EDITOR_DECISION_SEND_TO_INTERNAL",
            MailTemplate::SendToExternal => "EDITOR_DECISION_SEND_TO_EXTERNAL",
            MailTemplate::SkipReview => "EDITOR_DECISION_SKIP_REVIEW",
            MailTemplate::Accept => "EDITOR_DECISION_ACCEPT",
            MailTemplate::Revisions => "EDITOR_DECISION_REVISIONS",
            MailTemplate::Resubmit => "EDITOR_DECISION_RESUBMIT",
            MailTemplate::Decline => "EDITOR_DECISION_DECLINE",
            MailTemplate::InitialDecline => "EDITOR_DECISION_INITIAL_DECLINE",
            MailTemplate::NewRound => "EDITOR_DECISION_NEW_ROUND",
            MailTemplate::RevertDecline => "EDITOR_DECISION_REVERT_DECLINE",
            MailTemplate::RevertInitialDecline => "EDITOR_DECISION_REVERT_INITIAL_DECLINE",
            MailTemplate::SendToProduction => "EDITOR_DECISION_SEND_TO_PRODUCTION",
            MailTemplate::BackFromProduction => "EDITOR_DECISION_BACK_FROM_PRODUCTION",
            MailTemplate::BackFromCopyediting => "EDITOR_DECISION_BACK_FROM_COPYEDITING",
            MailTemplate::CancelReviewRound => "EDITOR_DECISION_CANCEL_REVIEW_ROUND",
            MailTemplate::NotifyReviewers => "EDITOR_DECISION_NOTIFY_REVIEWERS",
            MailTemplate::ReviewCancel => "REVIEW_CANCEL",
            MailTemplate::Recommendation => "EDITOR_RECOMMENDATION",
        }
    }

    fn body_template(self) -> &'static str {
        match self {
            MailTemplate::SendToInternal => "mail/send_to_internal.txt",
            MailTemplate::SendToExternal => "mail/send_to_external.txt",
            MailTemplate::SkipReview => "mail/skip_review.txt",
            MailTemplate::Accept => "mail/accept.txt",
            MailTemplate::Revisions => "mail/revisions.txt",
            MailTemplate::Resubmit => "mail/resubmit.txt",
            MailTemplate::Decline => "mail/decline.txt",
            MailTemplate::InitialDecline => "mail/initial_decline.txt",
            MailTemplate::NewRound => "mail/new_round.txt",
            MailTemplate::RevertDecline => "mail/revert_decline.txt",
            MailTemplate::RevertInitialDecline => "mail/revert_initial_decline.txt",
            MailTemplate::SendToProduction => "mail/send_to_production.txt",
            MailTemplate::BackFromProduction => "mail/back_from_production.txt",
            MailTemplate::BackFromCopyediting => "mail/back_from_copyediting.txt",
            MailTemplate::CancelReviewRound => "mail/cancel_review_round.txt",
            MailTemplate::NotifyReviewers => "mail/notify_reviewers.txt",
            MailTemplate::ReviewCancel => "mail/review_cancel.txt",
            MailTemplate::Recommendation => "mail/recommendation.txt",
        }
    }

    fn subject_template(self) -> &'static str {
        match self {
            MailTemplate::SendToInternal => "Your submission has been sent for internal review",
            MailTemplate::SendToExternal => "Your submission has been sent for review",
            MailTemplate::SkipReview => "Your submission has been sent to copyediting",
            MailTemplate::Accept => "Your submission has been accepted to {{ context_name }}",
            MailTemplate::Revisions => {
                "Your submission has been reviewed and we encourage you to submit revisions"
            }
            MailTemplate::Resubmit => {
                "Your submission has been reviewed - please revise and resubmit"
            }
            MailTemplate::Decline | MailTemplate::InitialDecline => {
                "Your submission has been declined"
            }
            MailTemplate::NewRound => {
                "A new round of review has been initiated for your submission"
            }
            MailTemplate::RevertDecline | MailTemplate::RevertInitialDecline => {
                "We have reversed the decision to decline your submission"
            }
            MailTemplate::SendToProduction => "Next steps for publishing your submission",
            MailTemplate::BackFromProduction => "Your submission was sent back to copyediting",
            MailTemplate::BackFromCopyediting => "Your submission was sent back from copyediting",
            MailTemplate::CancelReviewRound => {
                "A review round for your submission has been cancelled"
            }
            MailTemplate::NotifyReviewers => "Thank you for your review",
            MailTemplate::ReviewCancel => "Request for review cancelled",
            MailTemplate::Recommendation => "Editor recommendation: {{ decision }}",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub email: String,
}

impl From<&User> for Address {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Sender identity shared by every mail of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub context_name: String,
    pub from: Address,
}

/// Variables available to every mail template.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MailVariables {
    pub context_name: String,
    pub recipient_name: String,
    pub submission_id: i64,
    pub submission_title: String,
    pub editor_name: String,
    pub decision: String,
    pub stage: String,
    pub round: String,
    pub stage_changed: bool,
}

impl MailVariables {
    fn to_context(&self) -> Result<Context, MailError> {
        Ok(Context::from_serialize(self)?)
    }

    /// Substitute `{{ name }}` placeholders in editor text. Anything else,
    /// including stray braces or tags, is kept as written.
    fn fill(&self, text: &str) -> String {
        let values = [
            ("context_name", self.context_name.clone()),
            ("recipient_name", self.recipient_name.clone()),
            ("submission_id", self.submission_id.to_string()),
            ("submission_title", self.submission_title.clone()),
            ("editor_name", self.editor_name.clone()),
            ("decision", self.decision.clone()),
            ("stage", self.stage.clone()),
            ("round", self.round.clone()),
        ];
        let mut out = text.to_string();
        for (name, value) in &values {
            out = out
                .replace(&format!("{{{{ {name} }}}}"), value)
                .replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }
}

/// A rendered notification. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailable {
    pub template: MailTemplate,
    pub from: Address,
    pub to: Vec<Address>,
    pub subject: String,
    pub body: String,
}

impl Mailable {
    /// Render the template's default subject and body.
    pub fn render(
        tera: &Tera,
        template: MailTemplate,
        from: Address,
        to: Vec<Address>,
        vars: &MailVariables,
    ) -> Result<Self, MailError> {
        Self::render_with(tera, template, from, to, vars, None, None)
    }

    /// Render with editor-supplied subject or body in place of the defaults.
    /// Overrides are plain text: only the variable placeholders are filled in.
    pub fn render_with(
        tera: &Tera,
        template: MailTemplate,
        from: Address,
        to: Vec<Address>,
        vars: &MailVariables,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<Self, MailError> {
        if to.is_empty() {
            return Err(MailError::NoRecipients(template.key().to_string()));
        }
        let mut vars = vars.clone();
        vars.recipient_name = to
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let ctx = vars.to_context()?;

        let subject = match subject {
            Some(subject) => vars.fill(subject),
            None => Tera::one_off(template.subject_template(), &ctx, false)?,
        };
        let body = match body {
            Some(body) => vars.fill(body),
            None => tera.render(template.body_template(), &ctx)?,
        };

        Ok(Self {
            template,
            from,
            to,
            subject: subject.trim().to_string(),
            body,
        })
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mailable: &Mailable) -> Result<(), MailError>;
}

/// Writes mail to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mailable: &Mailable) -> Result<(), MailError> {
        let to = mailable
            .to
            .iter()
            .map(|a| a.email.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            template = mailable.template.key(),
            "Mail to {}: {}", to, mailable.subject
        );
        Ok(())
    }
}

/// Keeps every sent mailable in memory.
#[derive(Debug, Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<Mailable>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Mailable> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, mailable: &Mailable) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|_| MailError::Transport("outbox lock poisoned".to_string()))?
            .push(mailable.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::get_tera;

    fn vars() -> MailVariables {
        MailVariables {
            context_name: "Journal of Examples".into(),
            submission_id: 7,
            submission_title: "On Review Rounds".into(),
            editor_name: "Ed Itor".into(),
            decision: "Accept Submission".into(),
            stage: "Review".into(),
            round: "1".into(),
            ..Default::default()
        }
    }

    fn author() -> Address {
        Address {
            name: "Ada Author".into(),
            email: "ada@example.org".into(),
        }
    }

    fn editor() -> Address {
        Address {
            name: "Ed Itor".into(),
            email: "editor@example.org".into(),
        }
    }

    #[test]
    fn every_template_renders() {
        let templates = [
            MailTemplate::SendToInternal,
            MailTemplate::SendToExternal,
            MailTemplate::SkipReview,
            MailTemplate::Accept,
            MailTemplate::Revisions,
            MailTemplate::Resubmit,
            MailTemplate::Decline,
            MailTemplate::InitialDecline,
            MailTemplate::NewRound,
            MailTemplate::RevertDecline,
            MailTemplate::RevertInitialDecline,
            MailTemplate::SendToProduction,
            MailTemplate::BackFromProduction,
            MailTemplate::BackFromCopyediting,
            MailTemplate::CancelReviewRound,
            MailTemplate::NotifyReviewers,
            MailTemplate::ReviewCancel,
            MailTemplate::Recommendation,
        ];
        for template in templates {
            let mail = Mailable::render(get_tera(), template, editor(), vec![author()], &vars())
                .unwrap_or_else(|e| panic!("{}: {e}", template.key()));
            assert!(!mail.subject.is_empty());
            assert!(mail.body.contains("On Review Rounds"), "{}", template.key());
        }
    }

    #[test]
    fn accept_mail_names_the_context_and_recipients() {
        let mut coauthor = author();
        coauthor.name = "Bo Coauthor".into();
        let mail = Mailable::render(
            get_tera(),
            MailTemplate::Accept,
            editor(),
            vec![author(), coauthor],
            &vars(),
        )
        .unwrap();
        assert_eq!(mail.subject, "Your submission has been accepted to Journal of Examples");
        assert!(mail.body.starts_with("Dear Ada Author, Bo Coauthor,"));
    }

    #[test]
    fn overrides_are_rendered_with_the_same_variables() {
        let mail = Mailable::render_with(
            get_tera(),
            MailTemplate::Decline,
            editor(),
            vec![author()],
            &vars(),
            Some("About {{ submission_title }}"),
            Some("Sorry, {{ recipient_name }}."),
        )
        .unwrap();
        assert_eq!(mail.subject, "About On Review Rounds");
        assert_eq!(mail.body, "Sorry, Ada Author.");
    }

    #[test]
    fn override_text_keeps_literal_braces() {
        let body = "See $\\frac{a}{b}$ and {% raw %} {{x}} in {{submission_title}}.";
        let mail = Mailable::render_with(
            get_tera(),
            MailTemplate::Decline,
            editor(),
            vec![author()],
            &vars(),
            Some("{{ decision }}: {{"),
            Some(body),
        )
        .unwrap();
        assert_eq!(mail.subject, format!("{}: {{{{", vars().decision));
        assert_eq!(
            mail.body,
            "See $\\frac{a}{b}$ and {% raw %} {{x}} in On Review Rounds."
        );
    }

    #[test]
    fn rendering_needs_recipients() {
        let err = Mailable::render(get_tera(), MailTemplate::Accept, editor(), vec![], &vars());
        assert!(matches!(err, Err(MailError::NoRecipients(_))));
    }

    #[tokio::test]
    async fn outbox_keeps_sent_mail() {
        let outbox = OutboxMailer::new();
        let mail =
            Mailable::render(get_tera(), MailTemplate::Accept, editor(), vec![author()], &vars())
                .unwrap();
        outbox.send(&mail).await.unwrap();
        assert_eq!(outbox.sent(), vec![mail]);
    }
}
