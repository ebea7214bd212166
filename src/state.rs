use crate::config::Config;
use crate::db::WorkflowRepository;
use crate::decision::DecisionService;
use crate::review::ReviewService;
use std::sync::Arc;
use tera::Tera;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn WorkflowRepository>,
    pub decisions: DecisionService,
    pub reviews: ReviewService,
    pub tera: &'static Tera,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        mailer: Arc<dyn crate::mail::Mailer>,
        tera: &'static Tera,
        config: Arc<Config>,
    ) -> Self {
        let decisions = DecisionService::new(
            repo.clone(),
            mailer.clone(),
            tera,
            config.pipeline,
            config.mail_settings(),
        );
        let reviews = ReviewService::new(repo.clone(), mailer, tera, config.mail_settings())
            .with_due_days(config.review_response_days, config.review_due_days);
        Self {
            repo,
            decisions,
            reviews,
            tera,
            config,
        }
    }
}
