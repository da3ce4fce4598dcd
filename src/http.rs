use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::clickhouse::Connector;
use crate::error::DashboardError;
use crate::ui::render_page;
use crate::view::{Dashboard, DashboardView, FilterState, Sidebar};

pub struct AppState<C: Connector> {
    pub dashboard: Arc<Dashboard<C>>,
}

// Manual impl: derive would demand `C: Clone`.
impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            dashboard: self.dashboard.clone(),
        }
    }
}

pub fn router<C: Connector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/", get(ui_home::<C>))
        .route("/health", get(health::<C>))
        .route("/api/dashboard", get(dashboard_json::<C>))
        .route("/api/subsystems", get(list_subsystems::<C>))
        .with_state(state)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) async fn ui_home<C: Connector>(
    State(state): State<AppState<C>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Html<String> {
    // Halts render inline, so the page is always a 200 like the rest of the form flow.
    let filters = FilterState::from_pairs(&pairs);
    let pass = state.dashboard.render(&filters, today()).await;
    Html(render_page(&pass))
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct DashboardResponse {
    sidebar: Option<Sidebar>,
    #[serde(flatten)]
    view: DashboardView,
}

#[derive(Serialize)]
struct HaltResponse {
    sidebar: Option<Sidebar>,
    error: ErrorBody,
}

fn status_for(err: &DashboardError) -> StatusCode {
    match err {
        DashboardError::Connection(_) | DashboardError::EmptyCatalog => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DashboardError::Query(_) => StatusCode::BAD_GATEWAY,
        DashboardError::EmptySelection => StatusCode::BAD_REQUEST,
        DashboardError::EmptyResult { .. } => StatusCode::NOT_FOUND,
    }
}

fn error_body(err: &DashboardError) -> ErrorBody {
    ErrorBody {
        kind: err.kind(),
        message: err.user_message(),
    }
}

pub(crate) async fn dashboard_json<C: Connector>(
    State(state): State<AppState<C>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let filters = FilterState::from_pairs(&pairs);
    let pass = state.dashboard.render(&filters, today()).await;
    match pass.outcome {
        Ok(view) => Json(DashboardResponse {
            sidebar: pass.sidebar,
            view,
        })
        .into_response(),
        Err(err) => (
            status_for(&err),
            Json(HaltResponse {
                sidebar: pass.sidebar,
                error: error_body(&err),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn list_subsystems<C: Connector>(State(state): State<AppState<C>>) -> Response {
    match state.dashboard.subsystems().await {
        Ok(names) => Json(names).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "subsystem listing failed");
            (status_for(&err), Json(error_body(&err))).into_response()
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    db: String,
}

pub(crate) async fn health<C: Connector>(State(state): State<AppState<C>>) -> Response {
    match state.dashboard.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: "ok".to_string(),
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "health db check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    db: "error".to_string(),
                }),
            )
                .into_response()
        }
    }
}
