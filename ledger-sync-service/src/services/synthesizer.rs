//! Document synthesizer: a pure transform from a normalized record and its
//! resolved entities to a single-line accounting document.

use crate::error::SyncError;
use crate::models::{AccountingDocument, DocumentKind, EntityKind, NormalizedRecord, SupportingEntity};
use crate::services::gateway::Resource;
use crate::services::guard::{marker_for, MARKER_FIELD};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

/// Default name for the catalog item on inflow lines.
pub const DEFAULT_CATALOG_ITEM: &str = "Services";

/// Entities a document references, resolved before synthesis.
#[derive(Debug, Clone)]
pub struct ResolvedEntities {
    pub counterparty: SupportingEntity,
    pub line: SupportingEntity,
}

pub fn resource_for(kind: DocumentKind) -> Resource {
    match kind {
        DocumentKind::Inflow => Resource::Invoice,
        DocumentKind::Outflow => Resource::Bill,
    }
}

/// Entity kinds a document of `kind` needs: (counterparty, line).
pub fn required_kinds(kind: DocumentKind) -> (EntityKind, EntityKind) {
    match kind {
        DocumentKind::Inflow => (EntityKind::Receivable, EntityKind::CatalogItem),
        DocumentKind::Outflow => (EntityKind::Payable, EntityKind::LedgerAccount),
    }
}

/// Counterparty display name, falling back to a generic one for blank labels.
pub fn counterparty_name(record: &NormalizedRecord) -> &str {
    let label = record.counterparty_label.trim();
    if !label.is_empty() {
        return label;
    }
    match DocumentKind::of(record.signed_amount) {
        DocumentKind::Inflow => "Customer",
        DocumentKind::Outflow => "Vendor",
    }
}

pub fn synthesize(
    record: &NormalizedRecord,
    entities: ResolvedEntities,
) -> Result<AccountingDocument, SyncError> {
    let kind = DocumentKind::of(record.signed_amount);
    let (counterparty_kind, line_kind) = required_kinds(kind);

    if entities.counterparty.kind != counterparty_kind || entities.line.kind != line_kind {
        return Err(SyncError::Synthesis(format!(
            "{} document for {} needs {}/{} entities, got {}/{}",
            kind,
            record.source_id,
            counterparty_kind,
            line_kind,
            entities.counterparty.kind,
            entities.line.kind
        )));
    }

    Ok(AccountingDocument {
        kind,
        counterparty: entities.counterparty,
        line: entities.line,
        total: record.signed_amount.abs().round_dp(2),
        document_date: record.occurred_on,
        marker: marker_for(&record.source_id),
    })
}

/// Wire payload for the create call.
pub fn payload(document: &AccountingDocument) -> Value {
    let amount = document.total.to_f64().unwrap_or_default();
    let date = document.document_date.format("%Y-%m-%d").to_string();

    match document.kind {
        DocumentKind::Inflow => json!({
            "Line": [{
                "DetailType": "SalesItemLineDetail",
                "Amount": amount,
                "SalesItemLineDetail": {
                    "ItemRef": {
                        "value": document.line.remote_id,
                        "name": document.line.display_name,
                    }
                }
            }],
            "CustomerRef": {
                "value": document.counterparty.remote_id,
                "name": document.counterparty.display_name,
            },
            "TxnDate": date,
            MARKER_FIELD: document.marker,
        }),
        DocumentKind::Outflow => json!({
            "Line": [{
                "DetailType": "AccountBasedExpenseLineDetail",
                "Amount": amount,
                "AccountBasedExpenseLineDetail": {
                    "AccountRef": {
                        "value": document.line.remote_id,
                        "name": document.line.display_name,
                    }
                }
            }],
            "VendorRef": {
                "value": document.counterparty.remote_id,
                "name": document.counterparty.display_name,
            },
            "TxnDate": date,
            MARKER_FIELD: document.marker,
        }),
    }
}
