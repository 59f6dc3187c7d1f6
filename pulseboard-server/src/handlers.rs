//! HTTP handler functions for the pulseboard API.
//!
//! Request validation happens before any adapter or store work. Store calls
//! are synchronous and run on actix's blocking pool.

use actix_web::{web, HttpResponse};
use pulseboard_core::db::{DailyRollup, NewAction, NewTask, TaskUpdate};
use pulseboard_core::{AggregationEnvelope, SourceData, SourceName, SourceResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Todoist tasks kept in a planning session's initial context
const CONTEXT_TASKS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub store: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub action: Option<String>,
    pub session_id: Option<i64>,
    pub final_state: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub session_id: Option<i64>,
    pub role: Option<String>,
    pub content: Option<String>,
    pub tokens_used: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub session_id: Option<i64>,
    pub action_type: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub target_title: Option<String>,
    pub details: Option<Value>,
}

#[derive(Serialize)]
struct DashboardResponse<'a> {
    #[serde(flatten)]
    envelope: &'a AggregationEnvelope,
    refresh_interval_secs: u64,
}

#[derive(Serialize)]
struct TrendsResponse {
    days: u32,
    #[serde(flatten)]
    sources: BTreeMap<SourceName, Vec<DailyRollup>>,
}

/// Check a lookback window against its allowed range.
fn window(days: Option<u32>, default: u32, max: u32) -> ApiResult<u32> {
    let days = days.unwrap_or(default);
    if !(1..=max).contains(&days) {
        return Err(ApiError::validation(format!(
            "days must be between 1 and {max}"
        )));
    }
    Ok(days)
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

fn required_text(value: Option<String>, field: &str) -> ApiResult<String> {
    required(value.filter(|v| !v.trim().is_empty()), field)
}

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> pulseboard_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(web::block(f).await??)
}

// ============================================
// Dashboard
// ============================================

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.ctx.health().await)
}

/// `GET /api/dashboard`
///
/// `store=false` skips snapshot persistence for this request.
pub async fn dashboard(
    state: web::Data<AppState>,
    query: web::Query<DashboardQuery>,
) -> HttpResponse {
    let persist = query.store.unwrap_or(true);
    let envelope = state.ctx.aggregator().aggregate(persist).await;

    HttpResponse::Ok().json(DashboardResponse {
        envelope: &envelope,
        refresh_interval_secs: state.ctx.config().server.refresh_interval_secs,
    })
}

/// `GET /api/briefing`
pub async fn briefing(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.ctx.aggregator().briefing().await)
}

/// `GET /api/config`
pub async fn config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.ctx.config().status())
}

// ============================================
// Analytics
// ============================================

/// `GET /api/analytics/trends`
pub async fn trends(
    state: web::Data<AppState>,
    query: web::Query<DaysQuery>,
) -> ApiResult<HttpResponse> {
    let days = window(query.days, 30, 365)?;
    let snapshots = state.ctx.store().snapshots();
    let sources = blocking(move || snapshots.trends(days)).await?;
    Ok(HttpResponse::Ok().json(TrendsResponse { days, sources }))
}

/// `GET /api/analytics/daily`
pub async fn daily(
    state: web::Data<AppState>,
    query: web::Query<DaysQuery>,
) -> ApiResult<HttpResponse> {
    let days = window(query.days, 7, 90)?;
    let snapshots = state.ctx.store().snapshots();
    let stats = blocking(move || snapshots.daily_summary(days)).await?;
    Ok(HttpResponse::Ok().json(json!({ "days": days, "stats": stats })))
}

/// `GET /api/analytics/repo/{name}`
pub async fn repo_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DaysQuery>,
) -> ApiResult<HttpResponse> {
    let days = window(query.days, 30, 365)?;
    let repo = path.into_inner();
    let snapshots = state.ctx.store().snapshots();

    let name = repo.clone();
    let history = blocking(move || snapshots.repo_history(&name, days)).await?;
    Ok(HttpResponse::Ok().json(json!({ "repo": repo, "days": days, "history": history })))
}

// ============================================
// Planning sessions
// ============================================

/// Snapshot of tasks and board handed to a new planning session
fn initial_context(results: &BTreeMap<SourceName, SourceResult>) -> Value {
    let tasks = match results.get(&SourceName::Todoist).and_then(SourceResult::data) {
        Some(SourceData::Todoist(list)) => {
            json!(list.tasks.iter().take(CONTEXT_TASKS).collect::<Vec<_>>())
        }
        _ => json!([]),
    };
    let kanban = match results.get(&SourceName::Kanban).and_then(SourceResult::data) {
        Some(SourceData::Kanban(board)) => json!(board.by_column),
        _ => json!({}),
    };
    json!({ "tasks": tasks, "kanban": kanban })
}

/// `POST /api/planning/session`
pub async fn planning_session(
    state: web::Data<AppState>,
    body: web::Json<SessionRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let sessions = state.ctx.store().sessions();

    match request.action.as_deref() {
        Some("start") => {
            let results = state
                .ctx
                .aggregator()
                .collect(&[SourceName::Todoist, SourceName::Kanban])
                .await;
            let context = initial_context(&results);

            let session = blocking(move || sessions.start(&context)).await?;
            tracing::info!(session_id = session.id, "Planning session started");
            Ok(HttpResponse::Ok().json(json!({
                "status": "ok",
                "session_id": session.id,
                "started_at": session.started_at,
            })))
        }
        Some("end") => {
            let id = required(request.session_id, "session_id")?;
            let final_state = request.final_state.unwrap_or_else(|| json!({}));

            let ended = blocking(move || sessions.end(id, Some(&final_state))).await?;
            tracing::info!(
                session_id = id,
                already_ended = ended.already_ended,
                "Planning session ended"
            );
            Ok(HttpResponse::Ok().json(json!({ "status": "ok", "session": ended })))
        }
        _ => Err(ApiError::validation("invalid action, use start or end")),
    }
}

/// `GET /api/planning/session/{id}`
pub async fn planning_session_detail(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let sessions = state.ctx.store().sessions();
    let session = blocking(move || sessions.get(id))
        .await?
        .ok_or(pulseboard_core::Error::SessionNotFound(id))?;
    Ok(HttpResponse::Ok().json(session))
}

/// `POST /api/planning/message`
pub async fn planning_message(
    state: web::Data<AppState>,
    body: web::Json<MessageRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let session_id = required(request.session_id, "session_id")?;
    let role = required_text(request.role, "role")?;
    let content = required_text(request.content, "content")?;
    let tokens_used = request.tokens_used;

    let sessions = state.ctx.store().sessions();
    let message_id =
        blocking(move || sessions.log_message(session_id, &role, &content, tokens_used)).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "ok", "message_id": message_id })))
}

/// `POST /api/planning/action`
pub async fn planning_action(
    state: web::Data<AppState>,
    body: web::Json<ActionRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let session_id = required(request.session_id, "session_id")?;
    let action = NewAction {
        action_type: required_text(request.action_type, "action_type")?,
        target_type: request.target_type,
        target_id: request.target_id,
        target_title: request.target_title,
        details: request.details,
    };

    let sessions = state.ctx.store().sessions();
    let action_id = blocking(move || sessions.log_action(session_id, &action)).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "ok", "action_id": action_id })))
}

/// `GET /api/planning/analytics`
pub async fn planning_analytics(
    state: web::Data<AppState>,
    query: web::Query<DaysQuery>,
) -> ApiResult<HttpResponse> {
    let days = window(query.days, 30, 365)?;
    let sessions = state.ctx.store().sessions();
    let analytics = blocking(move || sessions.analytics(days)).await?;
    Ok(HttpResponse::Ok().json(analytics))
}

// ============================================
// Kanban board
// ============================================

/// `GET /api/kanban/tasks`
pub async fn kanban_list(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let board = state.ctx.store().kanban();
    let tasks = blocking(move || board.list()).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// `POST /api/kanban/tasks`
pub async fn kanban_create(
    state: web::Data<AppState>,
    body: web::Json<NewTask>,
) -> ApiResult<HttpResponse> {
    let task = body.into_inner();
    task.validate()?;

    let board = state.ctx.store().kanban();
    let created = blocking(move || board.create(&task)).await?;
    Ok(HttpResponse::Created().json(created))
}

/// `PUT /api/kanban/tasks/{id}`
pub async fn kanban_update(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<TaskUpdate>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let changes = body.into_inner();
    changes.validate()?;

    let board = state.ctx.store().kanban();
    let updated = blocking(move || board.update(id, &changes)).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// `DELETE /api/kanban/tasks/{id}`
pub async fn kanban_delete(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let board = state.ctx.store().kanban();
    blocking(move || board.delete(id)).await?;
    Ok(HttpResponse::Ok().json(json!({ "deleted": true, "id": id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        assert_eq!(window(None, 30, 365).unwrap(), 30);
        assert_eq!(window(Some(365), 30, 365).unwrap(), 365);
        assert!(window(Some(0), 30, 365).is_err());
        assert!(window(Some(91), 7, 90).is_err());
    }

    #[test]
    fn test_required_text_rejects_blank() {
        assert!(required_text(Some("  ".to_string()), "role").is_err());
        assert!(required_text(None, "role").is_err());
        assert_eq!(required_text(Some("user".to_string()), "role").unwrap(), "user");
    }

    #[test]
    fn test_initial_context_without_sources() {
        let context = initial_context(&BTreeMap::new());
        assert_eq!(context["tasks"], json!([]));
        assert_eq!(context["kanban"], json!({}));
    }
}
