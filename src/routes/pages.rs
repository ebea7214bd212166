use axum::{
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tera::Context;

use crate::db::{SubmissionId, UserId};
use crate::error::{ApiError, ApiResult};
use crate::review::ReviewAssignmentStatus;
use crate::state::AppState;

pub async fn index(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let submissions = state.repo.list_submissions().await?;
    let mut ctx = Context::new();
    ctx.insert("context_name", &state.config.context_name);
    ctx.insert("submissions", &submissions);
    Ok(render_template(&state, "index.html", ctx).into_response())
}

#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    pub editor_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
struct AssignmentRow {
    id: i64,
    reviewer: String,
    round: i32,
    status: ReviewAssignmentStatus,
}

#[derive(Debug, Serialize)]
struct DecisionRow {
    label: &'static str,
    editor: String,
    round: Option<i32>,
    date_decided: String,
}

pub async fn submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SubmissionId>,
    Query(query): Query<WorkflowQuery>,
) -> ApiResult<Response> {
    let submission = state
        .repo
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {}", id)))?;
    let participants = state.repo.stage_assignments(id).await?;
    let assignments = state.repo.review_assignments(id).await?;
    let decisions = state.repo.decisions(id).await?;

    let mut user_ids: Vec<UserId> = participants
        .iter()
        .map(|p| p.user_id)
        .chain(assignments.iter().map(|a| a.reviewer_id))
        .chain(decisions.iter().map(|d| d.editor_id))
        .collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    let names: HashMap<UserId, String> = state
        .repo
        .get_users(&user_ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();
    let name = |id: UserId| names.get(&id).cloned().unwrap_or_else(|| format!("User {}", id));

    let now = chrono::Utc::now();
    let assignment_rows: Vec<AssignmentRow> = assignments
        .iter()
        .map(|a| AssignmentRow {
            id: a.id,
            reviewer: name(a.reviewer_id),
            round: a.round,
            status: a.status(now),
        })
        .collect();
    let decision_rows: Vec<DecisionRow> = decisions
        .iter()
        .map(|d| DecisionRow {
            label: d.decision.label(),
            editor: name(d.editor_id),
            round: d.round,
            date_decided: d.date_decided.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();
    let participant_rows: Vec<(String, String)> = participants
        .iter()
        .map(|p| (name(p.user_id), format!("{:?}", p.role)))
        .collect();

    let available = match query.editor_id {
        Some(editor_id) => state.decisions.available(id, editor_id, None).await?,
        None => Vec::new(),
    };
    let available: Vec<(&str, &str)> = available.iter().map(|d| (d.label(), d.description())).collect();

    let mut ctx = Context::new();
    ctx.insert("context_name", &state.config.context_name);
    ctx.insert("submission", &submission);
    ctx.insert("stage", submission.stage.label());
    ctx.insert("stages", &state.decisions.pipeline().stages().iter().map(|s| s.label()).collect::<Vec<_>>());
    ctx.insert("participants", &participant_rows);
    ctx.insert("review_rounds", &state.repo.review_rounds(id).await?);
    ctx.insert("assignments", &assignment_rows);
    ctx.insert("files", &state.repo.submission_files(id).await?);
    ctx.insert("decisions", &decision_rows);
    ctx.insert("events", &state.repo.event_log(id).await?);
    ctx.insert("editor_id", &query.editor_id);
    ctx.insert("available", &available);

    Ok(render_template(&state, "submission.html", ctx).into_response())
}

fn render_template(state: &AppState, name: &str, ctx: Context) -> Html<String> {
    let rendered = state.tera.render(name, &ctx).unwrap_or_else(|e| {
        tracing::error!("Failed to render {}: {}", name, e);
        format!("Template error: {}", name)
    });
    Html(rendered)
}
