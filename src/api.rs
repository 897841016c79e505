//! Read API over composed summaries.
//!
//! - `GET /organisations/:id/summary?startDate&endDate`
//! - `GET /organisations/:id/summary/table?startDate&endDate&keyword&orderBy`
//! - `GET /course-units/:id/summary?startDate&endDate`
//! - `GET /cache/status`, `POST /cache/refresh`
//!
//! Missing or unparsable dates default to the current year.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::cache::{CachePopulationJob, JobState, RunOutcome};
use crate::compose::TreeComposer;
use crate::error::SummaryError;
use crate::models::{CourseUnitNode, DateWindow, OrganisationNode};
use crate::provider::{FeedbackSource, Registry};
use crate::store::SummaryStore;
use crate::table::{self, OrderBy};
use crate::windows;

pub struct AppState<S, R, F> {
    pub composer: TreeComposer<S, R, F>,
    pub job: Arc<CachePopulationJob<S, R, F>>,
    pub hidden_organisations: HashSet<String>,
}

impl<S, R, F> AppState<S, R, F> {
    fn check_access(&self, organisation_id: &str) -> Result<(), SummaryError> {
        if self.hidden_organisations.contains(organisation_id) {
            return Err(SummaryError::Forbidden {
                id: organisation_id.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl SummaryQuery {
    fn window(&self) -> Result<DateWindow, SummaryError> {
        let window = windows::window_or_default(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            windows::today(),
        )?;
        if window.start_date > window.end_date {
            return Err(SummaryError::InvalidWindow {
                start: window.start_date.to_string(),
                end: window.end_date.to_string(),
            });
        }
        Ok(window)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQuery {
    #[serde(flatten)]
    pub window: SummaryQuery,
    pub keyword: Option<String>,
    pub order_by: Option<String>,
}

pub async fn organisation_summary<S, R, F>(
    State(state): State<Arc<AppState<S, R, F>>>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<OrganisationNode>, SummaryError>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    state.check_access(&id)?;
    let window = query.window()?;

    let mut tree = state.composer.compose_organisation_summary(&id, window).await?;
    tree.child_organisations
        .retain(|child| !state.hidden_organisations.contains(&child.id));
    Ok(Json(tree))
}

pub async fn organisation_table<S, R, F>(
    State(state): State<Arc<AppState<S, R, F>>>,
    Path(id): Path<String>,
    Query(query): Query<TableQuery>,
) -> Result<Json<Vec<OrganisationNode>>, SummaryError>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    state.check_access(&id)?;
    let window = query.window.window()?;
    let order: OrderBy = match query.order_by.as_deref() {
        Some(raw) => raw.parse().map_err(SummaryError::InvalidQuery)?,
        None => OrderBy::default(),
    };

    let rows = state.composer.compose_children(&id, window).await?;
    let rows: Vec<OrganisationNode> = rows
        .into_iter()
        .filter(|row| !state.hidden_organisations.contains(&row.id))
        .collect();
    let rows = table::filter_by_course_code(rows, query.keyword.as_deref().unwrap_or_default());

    Ok(Json(table::order_by(rows, &order)))
}

pub async fn course_unit_summary<S, R, F>(
    State(state): State<Arc<AppState<S, R, F>>>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<CourseUnitNode>, SummaryError>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    let window = query.window()?;

    let node = state.composer.compose_course_unit_summary(&id, window).await?;
    Ok(Json(node))
}

pub async fn cache_status<S, R, F>(State(state): State<Arc<AppState<S, R, F>>>) -> Json<serde_json::Value>
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    Json(json!({ "state": state.job.state() }))
}

pub async fn refresh_cache<S, R, F>(State(state): State<Arc<AppState<S, R, F>>>) -> Response
where
    S: SummaryStore + 'static,
    R: Registry + 'static,
    F: FeedbackSource + 'static,
{
    if state.job.state() == JobState::Running {
        return (StatusCode::CONFLICT, Json(json!({ "state": JobState::Running }))).into_response();
    }

    let job = state.job.clone();
    tokio::spawn(async move {
        match job.run().await {
            Ok(RunOutcome::Completed(report)) => info!(
                run_id = %report.run_id,
                documents_written = report.documents_written,
                "manual cache population finished"
            ),
            Ok(RunOutcome::Skipped) => {}
            Err(err) => error!(error = %err, "manual cache population failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "state": JobState::Running }))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router<S, R, F>(state: Arc<AppState<S, R, F>>) -> Router
where
    S: SummaryStore + 'static,
    R: Registry + 'static,
    F: FeedbackSource + 'static,
{
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/organisations/:id/summary", get(organisation_summary::<S, R, F>))
        .route("/organisations/:id/summary/table", get(organisation_table::<S, R, F>))
        .route("/course-units/:id/summary", get(course_unit_summary::<S, R, F>))
        .route("/cache/status", get(cache_status::<S, R, F>))
        .route("/cache/refresh", post(refresh_cache::<S, R, F>))
        .layer(cors)
        .with_state(state)
}

pub async fn serve<S, R, F>(state: Arc<AppState<S, R, F>>, port: u16) -> anyhow::Result<()>
where
    S: SummaryStore + 'static,
    R: Registry + 'static,
    F: FeedbackSource + 'static,
{
    let app = router(state);

    let address = format!("0.0.0.0:{port}");
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
