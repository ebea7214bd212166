use std::sync::Arc;

use editorial_workflow::{
    config::Config,
    db::{self, InMemoryRepository, PgRepository, WorkflowRepository},
    mail::LogMailer,
    routes,
    state::AppState,
    templates,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "editorial_workflow=info,tower_http=info".into()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);
    let tera = templates::init(config.templates_dir.as_deref())?;

    let repo: Arc<dyn WorkflowRepository> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(pool.as_ref()).await?;
            tracing::info!("Using Postgres workflow store");
            Arc::new(PgRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; workflow state is kept in memory");
            Arc::new(InMemoryRepository::new())
        }
    };

    tracing::info!(
        internal_review = config.pipeline.internal_review,
        "Workflow stages: {:?}",
        config.pipeline.stages()
    );

    let state = Arc::new(AppState::new(repo, Arc::new(LogMailer), tera, config.clone()));
    let app = routes::app(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("{} listening on http://{}", config.context_name, addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
