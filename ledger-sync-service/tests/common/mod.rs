//! Common test utilities for ledger-sync-service integration tests.
//!
//! In-memory stand-ins for the accounting API, the event source and the
//! local store, so full passes run without Postgres or network access.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use ledger_sync_service::config::{Credentials, SyncConfig};
use ledger_sync_service::models::{AccountRecord, NormalizedRecord, RawTransaction, SyncEvent};
use ledger_sync_service::services::gateway::{
    AccountingApi, RemoteError, RemoteErrorKind, Resource, DUPLICATE_NAME_CODE,
};
use ledger_sync_service::services::guard::MARKER_FIELD;
use ledger_sync_service::services::{
    EventSource, LedgerStore, SourceError, SyncOrchestrator, SyncRequest,
};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ledger_sync_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const REALM_ID: &str = "realm-1";
pub const ACCOUNT_ID: &str = "acc_checking";

pub fn credentials() -> Credentials {
    let now = Utc::now();
    Credentials::new(REALM_ID, "token-1", now - Duration::minutes(1), now + Duration::hours(1))
}

pub fn expired_credentials() -> Credentials {
    let now = Utc::now();
    Credentials::new(REALM_ID, "token-1", now - Duration::hours(2), now - Duration::hours(1))
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A raw transaction in source sign convention: positive is money out.
pub fn raw(id: &str, amount: &str, merchant: &str, category: Option<&str>) -> RawTransaction {
    RawTransaction {
        transaction_id: id.to_string(),
        account_id: ACCOUNT_ID.to_string(),
        amount: dec(amount),
        date: date("2024-03-15"),
        merchant_name: Some(merchant.to_string()),
        name: None,
        category: category.map(|c| vec![c.to_string()]),
        pending: false,
    }
}

pub fn checking_account() -> AccountRecord {
    AccountRecord {
        account_id: ACCOUNT_ID.to_string(),
        name: "Plaid Checking".to_string(),
        mask: Some("0000".to_string()),
        account_type: Some("depository".to_string()),
        subtype: Some("checking".to_string()),
    }
}

pub fn request(company_id: i64, credentials: Option<Credentials>) -> SyncRequest {
    SyncRequest {
        company_id,
        start_date: date("2024-03-01"),
        end_date: date("2024-03-31"),
        source_token: Secret::new("access-sandbox-1".to_string()),
        credentials,
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        max_suffix_attempts: 3,
        default_window_days: 30,
    }
}

/// Wires the three fakes into an orchestrator.
pub struct Harness {
    pub source: Arc<FakeEventSource>,
    pub api: Arc<FakeAccountingApi>,
    pub store: Arc<MemoryLedgerStore>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub fn new(transactions: Vec<RawTransaction>) -> Self {
        Self::with_parts(
            Arc::new(FakeEventSource::new(vec![checking_account()], transactions)),
            Arc::new(FakeAccountingApi::new()),
            Arc::new(MemoryLedgerStore::new()),
        )
    }

    pub fn with_parts(
        source: Arc<FakeEventSource>,
        api: Arc<FakeAccountingApi>,
        store: Arc<MemoryLedgerStore>,
    ) -> Self {
        init_tracing();
        let orchestrator =
            SyncOrchestrator::new(source.clone(), api.clone(), store.clone(), sync_config());
        Self {
            source,
            api,
            store,
            orchestrator,
        }
    }

    pub async fn run(&self, credentials: Option<Credentials>) -> SyncEvent {
        self.orchestrator
            .run_pass(request(1, credentials), CancellationToken::new())
            .await
            .expect("sync pass failed")
    }
}

// ---------------------------------------------------------------------------
// Accounting API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    objects: HashMap<Resource, Vec<Value>>,
    next_id: u64,
    calls: usize,
    creates: usize,
    documents_created: usize,
    revoke_after_documents: Option<usize>,
    revoked: bool,
    cancel_after_documents: Option<(usize, CancellationToken)>,
    failing_markers: HashMap<String, RemoteError>,
}

/// Downstream accounting system held in memory.
///
/// Lookups are exact-case; the uniqueness check on create is
/// case-insensitive, like the real service. Documents are matched by marker.
pub struct FakeAccountingApi {
    state: Mutex<ApiState>,
}

fn is_named(resource: Resource) -> bool {
    matches!(
        resource,
        Resource::Customer | Resource::Vendor | Resource::Item | Resource::Account
    )
}

fn duplicate_name(name: &str, id: &str) -> RemoteError {
    RemoteError {
        kind: RemoteErrorKind::DuplicateName,
        status: Some(400),
        code: Some(DUPLICATE_NAME_CODE.to_string()),
        message: format!(
            "Duplicate Name Exists Error: The name supplied already exists. : Id={} ({})",
            id, name
        ),
    }
}

fn unauthorized() -> RemoteError {
    RemoteError {
        kind: RemoteErrorKind::Unauthorized,
        status: Some(401),
        code: Some("3200".to_string()),
        message: "AuthenticationFailed: Token expired".to_string(),
    }
}

impl FakeAccountingApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ApiState {
                next_id: 100,
                ..ApiState::default()
            }),
        }
    }

    /// Add an object that already exists downstream.
    pub fn seed(&self, resource: Resource, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .objects
            .entry(resource)
            .or_default()
            .push(json!({ "Id": id, resource.name_field(): name }));
        id
    }

    /// Add a document that already carries `marker`.
    pub fn seed_document(&self, resource: Resource, marker: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .objects
            .entry(resource)
            .or_default()
            .push(json!({ "Id": id, MARKER_FIELD: marker }));
        id
    }

    /// Every call after `n` documents have been created answers 401.
    pub fn revoke_after_documents(&self, n: usize) {
        self.state.lock().unwrap().revoke_after_documents = Some(n);
    }

    /// Cancel `token` once `n` documents have been created.
    pub fn cancel_after_documents(&self, n: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_documents = Some((n, token));
    }

    /// Creating the document carrying `marker` fails with `error`.
    pub fn fail_document(&self, marker: &str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .failing_markers
            .insert(marker.to_string(), error);
    }

    pub fn objects(&self, resource: Resource) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    pub fn names(&self, resource: Resource) -> Vec<String> {
        self.objects(resource)
            .iter()
            .filter_map(|o| o.get(resource.name_field()).and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }
}

#[async_trait]
impl AccountingApi for FakeAccountingApi {
    async fn find_one(
        &self,
        creds: &Credentials,
        resource: Resource,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, RemoteError> {
        assert_eq!(creds.realm_id, REALM_ID);
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.revoked {
            return Err(unauthorized());
        }

        Ok(state
            .objects
            .get(&resource)
            .and_then(|objects| {
                objects
                    .iter()
                    .find(|o| o.get(field).and_then(Value::as_str) == Some(value))
            })
            .cloned())
    }

    async fn create(
        &self,
        creds: &Credentials,
        resource: Resource,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        assert_eq!(creds.realm_id, REALM_ID);
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.revoked {
            return Err(unauthorized());
        }

        if is_named(resource) {
            let name = payload
                .get(resource.name_field())
                .and_then(Value::as_str)
                .expect("named entity created without a name");
            let taken = state.objects.get(&resource).and_then(|objects| {
                objects.iter().find(|o| {
                    o.get(resource.name_field())
                        .and_then(Value::as_str)
                        .is_some_and(|existing| existing.eq_ignore_ascii_case(name))
                })
            });
            if let Some(existing) = taken {
                let id = existing["Id"].as_str().unwrap_or_default().to_string();
                return Err(duplicate_name(name, &id));
            }
        } else if let Some(marker) = payload.get(MARKER_FIELD).and_then(Value::as_str) {
            if let Some(err) = state.failing_markers.get(marker) {
                return Err(err.clone());
            }
        }

        state.next_id += 1;
        let mut object = payload.clone();
        object["Id"] = Value::String(state.next_id.to_string());
        state.objects.entry(resource).or_default().push(object.clone());
        state.creates += 1;

        if !is_named(resource) {
            state.documents_created += 1;
            if state.revoke_after_documents == Some(state.documents_created) {
                state.revoked = true;
            }
            if let Some((n, token)) = &state.cancel_after_documents {
                if *n == state.documents_created {
                    token.cancel();
                }
            }
        }

        Ok(object)
    }
}

// ---------------------------------------------------------------------------
// Event source
// ---------------------------------------------------------------------------

pub struct FakeEventSource {
    accounts: Vec<AccountRecord>,
    transactions: Vec<RawTransaction>,
    unavailable: bool,
    stall: Option<std::time::Duration>,
    windows: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl FakeEventSource {
    pub fn new(accounts: Vec<AccountRecord>, transactions: Vec<RawTransaction>) -> Self {
        Self {
            accounts,
            transactions,
            unavailable: false,
            stall: None,
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Source whose account listing hangs for `delay` before answering.
    pub fn stalled(transactions: Vec<RawTransaction>, delay: std::time::Duration) -> Self {
        Self {
            stall: Some(delay),
            ..Self::new(vec![checking_account()], transactions)
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new(), Vec::new())
        }
    }

    pub fn windows(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for FakeEventSource {
    async fn list_accounts(
        &self,
        _token: &Secret<String>,
    ) -> Result<Vec<AccountRecord>, SourceError> {
        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(SourceError::Api {
                status: 503,
                code: "INSTITUTION_DOWN".to_string(),
                message: "institution is not responding".to_string(),
            });
        }
        Ok(self.accounts.clone())
    }

    async fn list_transactions(
        &self,
        _token: &Secret<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<RawTransaction>, SourceError> {
        self.windows.lock().unwrap().push((start_date, end_date));
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.date >= start_date && t.date <= end_date)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLedgerStore {
    records: Mutex<HashMap<(i64, String), NormalizedRecord>>,
    events: Mutex<Vec<SyncEvent>>,
    locks: Mutex<HashSet<i64>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, company_id: i64, source_id: &str) -> Option<NormalizedRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(company_id, source_id.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_locked(&self, company_id: i64) -> bool {
        self.locks.lock().unwrap().contains(&company_id)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        let key = (record.company_id, record.source_id.clone());
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record.clone());
        Ok(true)
    }

    async fn append_sync_event(&self, event: &SyncEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn try_lock_company(&self, company_id: i64) -> Result<bool, AppError> {
        Ok(self.locks.lock().unwrap().insert(company_id))
    }

    async fn unlock_company(&self, company_id: i64) -> Result<(), AppError> {
        self.locks.lock().unwrap().remove(&company_id);
        Ok(())
    }
}
