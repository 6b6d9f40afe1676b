//! Bulk ingestion control surface (§4.12): trigger one calendar month's
//! dump processing and poll its `ProcessingRecord`.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::ProcessingRecord;
use crate::store;
use crate::AppState;

use super::not_found;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:month/trigger", post(trigger_handler))
        .route("/:month/status", get(status_handler))
}

/// Kicks off the Ingestion Orchestrator for `month` (`YYYY-MM`) as a detached
/// background task and returns immediately; poll `/status` for progress.
async fn trigger_handler(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<serde_json::Value>> {
    validate_month(&month)?;

    let orchestrator = state.ingestion.clone();
    let dump_month = month.clone();
    tokio::spawn(async move {
        let token = CancellationToken::new();
        if let Err(e) = orchestrator.run_month(&dump_month, token).await {
            tracing::error!(dump_month, error = %e, "ingestion run failed");
        }
    });

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "dump_month": month,
    })))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<ProcessingRecord>> {
    validate_month(&month)?;
    let record = store::processing::find_by_month(&state.db_pool, &month)
        .await?
        .ok_or_else(|| not_found("processing_record"))?;
    Ok(Json(record))
}

fn validate_month(month: &str) -> Result<()> {
    let valid = month.len() == 7
        && month.as_bytes()[4] == b'-'
        && month[..4].bytes().all(|b| b.is_ascii_digit())
        && month[5..].bytes().all(|b| b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidFieldValue {
            field: "month".to_string(),
            message: "expected YYYY-MM".to_string(),
        })
    }
}
