//! Sync orchestrator: one pass over a window of bank transactions for one company.
//!
//! Fetching -> Normalizing -> per record (Persisting -> Classifying ->
//! Resolving -> Guarding -> Creating) -> Logging -> Done | Skipped.
//!
//! A pass holds the company's lock for its whole duration and writes exactly
//! one sync event. Record-level failures are tallied and the loop moves on;
//! source and store failures abort the pass.

use crate::config::{Credentials, SyncConfig};
use crate::error::SyncError;
use crate::models::{
    DocumentKind, NormalizedRecord, PassState, PassTally, RecordOutcome, SyncEvent, SyncOutcome,
};
use crate::services::database::LedgerStore;
use crate::services::gateway::{remote_id, AccountingApi, RemoteError, RemoteErrorKind};
use crate::services::guard::{marker_for, IdempotencyGuard};
use crate::services::metrics::{record_document, record_error, record_pass};
use crate::services::resolver::EntityResolver;
use crate::services::source::EventSource;
use crate::services::synthesizer::{payload, resource_for, synthesize};
use chrono::{NaiveDate, Utc};
use secrecy::Secret;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Everything one pass needs, supplied by the caller at pass start.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub company_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub source_token: Secret<String>,
    /// `None` runs the pass in local-only mode.
    pub credentials: Option<Credentials>,
}

/// Tracks and logs the pass state.
struct PassCursor {
    company_id: i64,
    state: PassState,
}

impl PassCursor {
    fn enter(&mut self, next: PassState) {
        debug!(company_id = self.company_id, from = ?self.state, to = ?next, "Pass state transition");
        self.state = next;
    }
}

/// Held company lock. Released explicitly at the end of a pass, or from a
/// spawned task if the pass future is dropped first.
struct CompanyLock {
    store: Arc<dyn LedgerStore>,
    company_id: i64,
    released: bool,
}

impl CompanyLock {
    async fn release(mut self) {
        self.released = true;
        unlock(self.store.as_ref(), self.company_id).await;
    }
}

impl Drop for CompanyLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(company_id = self.company_id, "Pass dropped before completion, releasing company lock");
        let store = self.store.clone();
        let company_id = self.company_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { unlock(store.as_ref(), company_id).await });
            }
            Err(_) => error!(company_id, "No runtime left to release company lock"),
        }
    }
}

async fn unlock(store: &dyn LedgerStore, company_id: i64) {
    if let Err(e) = store.unlock_company(company_id).await {
        error!(company_id, error = %e, "Failed to release company lock");
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    source: Arc<dyn EventSource>,
    accounting: Arc<dyn AccountingApi>,
    store: Arc<dyn LedgerStore>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn EventSource>,
        accounting: Arc<dyn AccountingApi>,
        store: Arc<dyn LedgerStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            accounting,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one pass under the company's lock.
    #[instrument(skip(self, request, cancel), fields(company_id = request.company_id, start = %request.start_date, end = %request.end_date))]
    pub async fn run_pass(
        &self,
        request: SyncRequest,
        cancel: CancellationToken,
    ) -> Result<SyncEvent, SyncError> {
        let company_id = request.company_id;

        let locked = self
            .store
            .try_lock_company(company_id)
            .await
            .map_err(SyncError::Persistence)?;
        if !locked {
            warn!("Another pass holds the company lock");
            record_error("pass_in_progress");
            return Err(SyncError::PassInProgress { company_id });
        }
        let lock = CompanyLock {
            store: self.store.clone(),
            company_id,
            released: false,
        };

        let result = self.run_locked(&request, &cancel).await;

        lock.release().await;

        match &result {
            Ok(event) => {
                record_pass(event.outcome.as_str());
                info!(
                    outcome = %event.outcome,
                    records_seen = event.records_seen,
                    records_inserted = event.records_inserted,
                    documents_created = event.documents_created,
                    documents_existing = event.documents_existing,
                    records_skipped = event.records_skipped,
                    records_failed = event.records_failed,
                    "Sync pass completed"
                );
            }
            Err(e) => {
                record_error(e.failure_kind());
                error!(error = %e, "Sync pass aborted");
            }
        }

        result
    }

    async fn run_locked(
        &self,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<SyncEvent, SyncError> {
        let started_at = Utc::now();
        let mut cursor = PassCursor {
            company_id: request.company_id,
            state: PassState::Fetching,
        };

        let accounts = self.source.list_accounts(&request.source_token).await?;
        let raw = self
            .source
            .list_transactions(&request.source_token, request.start_date, request.end_date)
            .await?;

        cursor.enter(PassState::Normalizing);
        let known_accounts: HashSet<&str> = accounts.iter().map(|a| a.account_id.as_str()).collect();
        let records: Vec<NormalizedRecord> = raw
            .iter()
            .filter(|t| known_accounts.contains(t.account_id.as_str()))
            .map(|t| NormalizedRecord::from_raw(request.company_id, t))
            .collect();
        if records.len() < raw.len() {
            warn!(
                dropped = raw.len() - records.len(),
                "Skipping transactions for accounts the source did not list"
            );
        }

        let mut tally = PassTally::default();
        let mut credentials = request
            .credentials
            .as_ref()
            .filter(|c| c.is_valid_at(Utc::now()));
        if credentials.is_none() {
            warn!("No valid accounting authorization, running local-only");
            tally.authorization_missing = true;
        }
        let mut resolver = credentials.map(|creds| {
            EntityResolver::new(
                self.accounting.as_ref(),
                creds,
                self.config.max_suffix_attempts,
            )
        });

        let mut cancelled = false;
        for record in &records {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            cursor.enter(PassState::Persisting);
            if self
                .store
                .insert_if_absent(record)
                .await
                .map_err(SyncError::Persistence)?
            {
                tally.records_inserted += 1;
            }

            cursor.enter(PassState::Classifying);
            let kind = DocumentKind::of(record.signed_amount);

            let outcome = match (resolver.as_mut(), credentials) {
                (Some(resolver), Some(creds)) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.sync_record(&mut cursor, resolver, creds, record, kind) => Some(result),
                    }
                }
                _ => Some(Err(SyncError::AuthorizationMissing)),
            };

            // Cancelled mid-record: abandon it uncounted
            let Some(result) = outcome else {
                cancelled = true;
                break;
            };

            tally.records_seen += 1;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) if e.is_authorization() => {
                    if credentials.is_some() {
                        warn!(source_id = %record.source_id, error = %e, "Accounting authorization rejected, rest of pass is local-only");
                        credentials = None;
                        resolver = None;
                        tally.authorization_missing = true;
                    }
                    cursor.enter(PassState::Skipped);
                    RecordOutcome::Skipped
                }
                Err(e) => {
                    warn!(source_id = %record.source_id, error = %e, "Record failed");
                    record_error(e.failure_kind());
                    RecordOutcome::Failed(e.to_failure(&record.source_id))
                }
            };

            record_document(kind.as_str(), outcome_label(&outcome));
            tally.record(outcome);
        }

        if cancelled {
            warn!(records_seen = tally.records_seen, "Pass cancelled between records");
        }
        if let Some(resolver) = &resolver {
            debug!(entities = resolver.cached(), "Entities resolved this pass");
        }

        cursor.enter(PassState::Logging);
        let event = tally.finish(request.company_id, started_at, cancelled);
        self.store
            .append_sync_event(&event)
            .await
            .map_err(SyncError::Persistence)?;

        cursor.enter(if event.outcome == SyncOutcome::Skipped {
            PassState::Skipped
        } else {
            PassState::Done
        });
        Ok(event)
    }

    /// Resolve, guard and create the document for one record.
    #[instrument(skip_all, fields(source_id = %record.source_id, kind = %kind))]
    async fn sync_record(
        &self,
        cursor: &mut PassCursor,
        resolver: &mut EntityResolver<'_>,
        creds: &Credentials,
        record: &NormalizedRecord,
        kind: DocumentKind,
    ) -> Result<RecordOutcome, SyncError> {
        cursor.enter(PassState::Resolving);
        let entities = resolver.resolve_record(record).await?;

        cursor.enter(PassState::Guarding);
        let marker = marker_for(&record.source_id);
        let guard = IdempotencyGuard::new(self.accounting.as_ref(), creds);
        if let Some(existing) = guard.find_existing(kind, &marker).await? {
            debug!(remote_id = %existing.remote_id, "Document already exists");
            return Ok(RecordOutcome::AlreadyExists {
                remote_id: existing.remote_id,
            });
        }

        let document = synthesize(record, entities)?;

        cursor.enter(PassState::Creating);
        let created = self
            .accounting
            .create(creds, resource_for(kind), &payload(&document))
            .await?;
        let id = remote_id(&created).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Fatal,
                format!("Created document for {} returned without Id", marker),
            )
        })?;

        info!(remote_id = %id, marker = %marker, total = %document.total, "Document created");
        Ok(RecordOutcome::Created { remote_id: id })
    }
}

fn outcome_label(outcome: &RecordOutcome) -> &'static str {
    match outcome {
        RecordOutcome::Created { .. } => "created",
        RecordOutcome::AlreadyExists { .. } => "exists",
        RecordOutcome::Skipped => "skipped",
        RecordOutcome::Failed(_) => "failed",
    }
}
