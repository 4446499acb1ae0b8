//! HTTP adapter: parses query parameters, calls the engine, serializes.
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::engine::MailEngine;
use crate::errors::AppError;
use crate::types::{ListQuery, MessageDetail, SummaryPage};

pub const PARTIAL_HEADER: &str = "x-partial-result";
pub const FAILED_BATCHES_HEADER: &str = "x-failed-batches";

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "checkDate")]
    pub check_date: Option<String>,
    pub limit: Option<usize>,
}

pub fn router(engine: MailEngine) -> Router {
    Router::new()
        .route("/emails/:keyword", get(list_emails))
        .route("/email/:email_id", get(get_email))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn list_emails(
    State(engine): State<MailEngine>,
    Path(keyword): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, AppError> {
    let since = match params.check_date.as_deref() {
        Some(raw) => parse_check_date(raw)?,
        None => engine.settings().default_since(),
    };

    let mut query = ListQuery::since(since);
    // Only the exact `/emails/all` path lists without a filter.
    if keyword != "all" {
        query = query.with_keyword(keyword);
    }
    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }

    let page = engine.list_summaries(&query).await?;
    Ok(page_response(page))
}

async fn get_email(
    State(engine): State<MailEngine>,
    Path(email_id): Path<String>,
) -> Result<Json<MessageDetail>, AppError> {
    Ok(Json(engine.fetch_detail(&email_id).await?))
}

pub fn parse_check_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadInput(format!("checkDate must be YYYY-MM-DD, got {raw:?}")))
}

fn page_response(page: SummaryPage) -> Response {
    let mut headers = HeaderMap::new();
    if page.partial {
        headers.insert(PARTIAL_HEADER, HeaderValue::from_static("true"));
        headers.insert(FAILED_BATCHES_HEADER, HeaderValue::from(page.failed_batches));
    }
    (headers, Json(page.messages)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadInput(_) => StatusCode::BAD_REQUEST,
            e if e.is_upstream() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(status = %status, error = %self, "Request failed");
        } else {
            warn!(status = %status, error = %self, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
