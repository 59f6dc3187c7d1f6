//! Actix-Web API server for pulseboard.
//!
//! Serves the aggregated dashboard, the briefing, trend analytics, the
//! planning session log and the local kanban board as JSON under `/api`.
//! When `server.static_dir` is set, the frontend is served from `/`.

mod error;
mod handlers;

pub use error::{ApiError, ApiResult};

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use pulseboard_core::DashboardContext;

/// Shared application state.
pub struct AppState {
    pub ctx: DashboardContext,
}

impl AppState {
    pub fn new(ctx: DashboardContext) -> Self {
        Self { ctx }
    }
}

/// Register the `/api` routes and the JSON/query rejection handlers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::validation(err.to_string()).into()),
    )
    .service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/dashboard", web::get().to(handlers::dashboard))
            .route("/briefing", web::get().to(handlers::briefing))
            .route("/config", web::get().to(handlers::config))
            .route("/analytics/trends", web::get().to(handlers::trends))
            .route("/analytics/daily", web::get().to(handlers::daily))
            .route("/analytics/repo/{name}", web::get().to(handlers::repo_history))
            .route("/planning/session", web::post().to(handlers::planning_session))
            .route(
                "/planning/session/{id}",
                web::get().to(handlers::planning_session_detail),
            )
            .route("/planning/message", web::post().to(handlers::planning_message))
            .route("/planning/action", web::post().to(handlers::planning_action))
            .route("/planning/analytics", web::get().to(handlers::planning_analytics))
            .route("/kanban/tasks", web::get().to(handlers::kanban_list))
            .route("/kanban/tasks", web::post().to(handlers::kanban_create))
            .route("/kanban/tasks/{id}", web::put().to(handlers::kanban_update))
            .route("/kanban/tasks/{id}", web::delete().to(handlers::kanban_delete)),
    );
}

/// Starts the pulseboard API server.
///
/// The caller provides the async runtime (e.g. via `#[actix_web::main]`)
/// and has already initialized logging.
pub async fn run_server(ctx: DashboardContext, host: &str, port: u16) -> std::io::Result<()> {
    let static_dir = ctx.config().server.static_dir.clone();
    let state = web::Data::new(AppState::new(ctx));

    tracing::info!(host, port, "Starting server");

    HttpServer::new(move || {
        let app = App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure);

        match &static_dir {
            Some(dir) => app.service(Files::new("/", dir).index_file("index.html")),
            None => app,
        }
    })
    .bind((host, port))?
    .run()
    .await
}
