//! Error taxonomy for a sync pass.
//!
//! Pass-level errors abort the pass and reach the caller. Record-level errors
//! are folded into the pass's sync event and the pass moves on.

use crate::models::{EntityKind, RecordFailure};
use crate::services::gateway::{RemoteError, RemoteErrorKind};
use crate::services::source::SourceError;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Event source fetch failed: {0}")]
    SourceFetch(#[from] SourceError),

    #[error("Local ledger store failed: {0}")]
    Persistence(AppError),

    #[error("Downstream authorization missing")]
    AuthorizationMissing,

    #[error("Could not resolve {kind} '{name}' after {attempts} suffixed attempts")]
    EntityResolutionExhausted {
        kind: EntityKind,
        name: String,
        attempts: u32,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("A sync pass for company {company_id} is already running")]
    PassInProgress { company_id: i64 },

    #[error("Cannot build document: {0}")]
    Synthesis(String),
}

impl SyncError {
    /// Errors that fail one record but let the pass continue.
    pub fn is_record_level(&self) -> bool {
        match self {
            Self::EntityResolutionExhausted { .. } | Self::Synthesis(_) => true,
            Self::Remote(e) => e.kind != RemoteErrorKind::Unauthorized,
            _ => false,
        }
    }

    /// True when downstream authorization is absent or was rejected.
    pub fn is_authorization(&self) -> bool {
        match self {
            Self::AuthorizationMissing => true,
            Self::Remote(e) => e.kind == RemoteErrorKind::Unauthorized,
            _ => false,
        }
    }

    pub fn failure_kind(&self) -> &'static str {
        match self {
            Self::SourceFetch(_) => "source_fetch",
            Self::Persistence(_) => "persistence",
            Self::AuthorizationMissing => "authorization_missing",
            Self::EntityResolutionExhausted { .. } => "entity_resolution_exhausted",
            Self::Remote(e) => e.kind.as_str(),
            Self::PassInProgress { .. } => "pass_in_progress",
            Self::Synthesis(_) => "synthesis",
        }
    }

    pub fn to_failure(&self, source_id: &str) -> RecordFailure {
        let (status, code, message) = match self {
            Self::Remote(e) => (e.status, e.code.clone(), e.message.clone()),
            other => (None, None, other.to_string()),
        };
        RecordFailure {
            source_id: source_id.to_string(),
            kind: self.failure_kind().to_string(),
            status,
            code,
            message,
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Persistence(inner) => inner,
            SyncError::SourceFetch(SourceError::NotConfigured) => {
                AppError::ServiceUnavailable("Event source not configured".to_string())
            }
            SyncError::SourceFetch(e) => AppError::BadGateway(e.to_string()),
            SyncError::AuthorizationMissing => {
                AppError::Unauthorized(anyhow::anyhow!("Downstream authorization missing"))
            }
            SyncError::PassInProgress { company_id } => AppError::Conflict(anyhow::anyhow!(
                "A sync pass for company {} is already running",
                company_id
            )),
            SyncError::Remote(e) => AppError::BadGateway(e.to_string()),
            other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_remote_error_is_not_record_level() {
        let err = SyncError::Remote(RemoteError::new(RemoteErrorKind::Unauthorized, "expired"));
        assert!(!err.is_record_level());
        assert!(err.is_authorization());
    }

    #[test]
    fn record_failure_keeps_remote_payload() {
        let remote = RemoteError::classify(
            400,
            r#"{"Fault":{"Error":[{"Message":"Business Validation Error","Detail":"TxnDate invalid","code":"6000"}]}}"#,
        );
        let failure = SyncError::Remote(remote).to_failure("txn_1");
        assert_eq!(failure.kind, "fatal");
        assert_eq!(failure.status, Some(400));
        assert_eq!(failure.code.as_deref(), Some("6000"));
        assert_eq!(failure.message, "Business Validation Error: TxnDate invalid");
    }

    #[test]
    fn exhausted_resolution_is_record_level() {
        let err = SyncError::EntityResolutionExhausted {
            kind: EntityKind::Payable,
            name: "Acme".to_string(),
            attempts: 3,
        };
        assert!(err.is_record_level());
        assert_eq!(err.failure_kind(), "entity_resolution_exhausted");
    }

    #[test]
    fn pass_level_errors_map_to_http_errors() {
        let busy: AppError = SyncError::PassInProgress { company_id: 3 }.into();
        assert!(matches!(busy, AppError::Conflict(_)));

        let unconfigured: AppError = SyncError::SourceFetch(SourceError::NotConfigured).into();
        assert!(matches!(unconfigured, AppError::ServiceUnavailable(_)));

        let upstream: AppError = SyncError::SourceFetch(SourceError::Api {
            status: 400,
            code: "ITEM_LOGIN_REQUIRED".to_string(),
            message: "login required".to_string(),
        })
        .into();
        assert!(matches!(upstream, AppError::BadGateway(_)));
    }
}
