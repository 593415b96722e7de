//! Sync pass trigger.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, NaiveDate, Utc};
use secrecy::Secret;
use serde::Deserialize;
use service_core::error::AppError;

use crate::config::Credentials;
use crate::models::SyncEvent;
use crate::services::SyncRequest;
use crate::startup::AppState;

/// Request to run one sync pass for a company.
#[derive(Debug, Deserialize)]
pub struct RunSyncRequest {
    pub company_id: i64,
    /// Defaults to `end_date` minus the configured window.
    pub start_date: Option<NaiveDate>,
    /// Defaults to today (UTC).
    pub end_date: Option<NaiveDate>,
    /// Event source access token for the company's linked bank item.
    pub source_token: Secret<String>,
    /// Accounting credentials; omit to sync locally only.
    pub credentials: Option<Credentials>,
}

impl RunSyncRequest {
    fn into_sync_request(self, default_window_days: i64) -> Result<SyncRequest, AppError> {
        let end_date = self.end_date.unwrap_or_else(|| Utc::now().date_naive());
        let start_date = self
            .start_date
            .unwrap_or_else(|| end_date - Duration::days(default_window_days));

        if start_date > end_date {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "start_date {} is after end_date {}",
                start_date,
                end_date
            )));
        }

        Ok(SyncRequest {
            company_id: self.company_id,
            start_date,
            end_date,
            source_token: self.source_token,
            credentials: self.credentials,
        })
    }
}

/// Run a pass and return its sync event.
///
/// The pass runs to completion even if the caller goes away.
/// Returns 409 when a pass for the same company is already running.
pub async fn run_sync(
    State(state): State<AppState>,
    Json(payload): Json<RunSyncRequest>,
) -> Result<(StatusCode, Json<SyncEvent>), AppError> {
    let request =
        payload.into_sync_request(state.orchestrator.config().default_window_days)?;

    tracing::info!(
        company_id = request.company_id,
        start_date = %request.start_date,
        end_date = %request.end_date,
        authorized = request.credentials.is_some(),
        "Sync pass requested"
    );

    // Owned by the runtime, not the request
    let orchestrator = state.orchestrator.clone();
    let cancel = state.shutdown.child_token();
    let event = tokio::spawn(async move { orchestrator.run_pass(request, cancel).await })
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Sync pass task failed: {}", e)))??;

    Ok((StatusCode::OK, Json(event)))
}
