//! Entity resolver: find-or-create for counterparties, catalog items and
//! ledger accounts.
//!
//! The lookup by exact name is trusted. A duplicate-name conflict on create
//! means the name exists server-side even though our lookup missed it (index
//! lag, or a variant the query does not match), so the resolver re-checks and
//! only then falls back to `-1`, `-2`, ... suffixed names.

use crate::config::Credentials;
use crate::error::SyncError;
use crate::models::{DocumentKind, EntityDraft, EntityKind, NormalizedRecord, SupportingEntity};
use crate::services::category::{self, SALES_ACCOUNT};
use crate::services::gateway::{remote_id, AccountingApi, RemoteError, RemoteErrorKind, Resource};
use crate::services::metrics::record_entity_resolution;
use crate::services::synthesizer::{counterparty_name, ResolvedEntities, DEFAULT_CATALOG_ITEM};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

pub fn resource_for(kind: EntityKind) -> Resource {
    match kind {
        EntityKind::Receivable => Resource::Customer,
        EntityKind::Payable => Resource::Vendor,
        EntityKind::CatalogItem => Resource::Item,
        EntityKind::LedgerAccount => Resource::Account,
    }
}

/// Resolver for one pass. The cache lives and dies with it.
pub struct EntityResolver<'a> {
    api: &'a dyn AccountingApi,
    creds: &'a Credentials,
    max_suffix_attempts: u32,
    cache: HashMap<(EntityKind, String), SupportingEntity>,
}

impl<'a> EntityResolver<'a> {
    pub fn new(api: &'a dyn AccountingApi, creds: &'a Credentials, max_suffix_attempts: u32) -> Self {
        Self {
            api,
            creds,
            max_suffix_attempts,
            cache: HashMap::new(),
        }
    }

    /// Find or create the entity described by `draft`.
    #[instrument(skip(self, draft), fields(kind = %draft.kind, name = %draft.name))]
    pub async fn ensure(&mut self, draft: &EntityDraft) -> Result<SupportingEntity, SyncError> {
        let key = (draft.kind, draft.name.clone());
        if let Some(entity) = self.cache.get(&key) {
            record_entity_resolution(draft.kind.as_str(), "cached");
            return Ok(entity.clone());
        }

        let entity = match self.resolve(draft).await {
            Ok(entity) => entity,
            Err(e) => {
                record_entity_resolution(draft.kind.as_str(), e.failure_kind());
                return Err(e);
            }
        };
        self.cache.insert(key, entity.clone());
        Ok(entity)
    }

    /// Resolve everything a record's document will reference.
    pub async fn resolve_record(
        &mut self,
        record: &NormalizedRecord,
    ) -> Result<ResolvedEntities, SyncError> {
        let name = counterparty_name(record);
        match DocumentKind::of(record.signed_amount) {
            DocumentKind::Inflow => {
                let counterparty = self.ensure(&EntityDraft::receivable(name)).await?;
                let income = self.ensure(&EntityDraft::ledger_account(&SALES_ACCOUNT)).await?;
                let line = self
                    .ensure(&EntityDraft::catalog_item(DEFAULT_CATALOG_ITEM, &income))
                    .await?;
                Ok(ResolvedEntities { counterparty, line })
            }
            DocumentKind::Outflow => {
                let counterparty = self.ensure(&EntityDraft::payable(name)).await?;
                let descriptor = category::map(record.category_label.as_deref());
                let line = self.ensure(&EntityDraft::ledger_account(&descriptor)).await?;
                Ok(ResolvedEntities { counterparty, line })
            }
        }
    }

    /// Number of distinct entities resolved so far in this pass.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    async fn resolve(&self, draft: &EntityDraft) -> Result<SupportingEntity, SyncError> {
        let kind = draft.kind.as_str();

        if let Some(found) = self.lookup(draft.kind, &draft.name).await? {
            record_entity_resolution(kind, "found");
            return Ok(found);
        }

        match self.try_create(draft, &draft.name).await {
            Ok(created) => {
                record_entity_resolution(kind, "created");
                return Ok(created);
            }
            Err(e) if e.kind == RemoteErrorKind::DuplicateName => {
                info!(name = %draft.name, "Duplicate name on create, re-checking lookup");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(found) = self.lookup(draft.kind, &draft.name).await? {
            record_entity_resolution(kind, "found");
            return Ok(found);
        }

        for attempt in 1..=self.max_suffix_attempts {
            let candidate = format!("{}-{}", draft.name, attempt);

            if let Some(found) = self.lookup(draft.kind, &candidate).await? {
                record_entity_resolution(kind, "found");
                return Ok(found);
            }

            match self.try_create(draft, &candidate).await {
                Ok(created) => {
                    record_entity_resolution(kind, "suffixed");
                    info!(name = %draft.name, candidate = %candidate, "Created entity under suffixed name");
                    return Ok(created);
                }
                Err(e) if e.kind == RemoteErrorKind::DuplicateName => {
                    warn!(candidate = %candidate, attempt, "Suffixed name also taken");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::EntityResolutionExhausted {
            kind: draft.kind,
            name: draft.name.clone(),
            attempts: self.max_suffix_attempts,
        })
    }

    async fn lookup(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<SupportingEntity>, RemoteError> {
        let resource = resource_for(kind);
        self.api
            .find_one(self.creds, resource, resource.name_field(), name)
            .await?
            .map(|object| to_entity(kind, name, &object))
            .transpose()
    }

    async fn try_create(
        &self,
        draft: &EntityDraft,
        name: &str,
    ) -> Result<SupportingEntity, RemoteError> {
        let resource = resource_for(draft.kind);
        let mut body = draft.attributes.clone();
        body.insert(resource.name_field().to_string(), Value::String(name.to_string()));

        let created = self
            .api
            .create(self.creds, resource, &Value::Object(body))
            .await?;
        to_entity(draft.kind, name, &created)
    }
}

fn to_entity(kind: EntityKind, name: &str, object: &Value) -> Result<SupportingEntity, RemoteError> {
    let resource = resource_for(kind);
    let remote_id = remote_id(object).ok_or_else(|| {
        RemoteError::new(
            RemoteErrorKind::Fatal,
            format!("{} '{}' returned without Id", resource.entity_name(), name),
        )
    })?;
    let display_name = object
        .get(resource.name_field())
        .and_then(Value::as_str)
        .unwrap_or(name)
        .to_string();

    Ok(SupportingEntity {
        kind,
        display_name,
        remote_id,
    })
}
