//! Supporting entities a document must reference before it can be created.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Kind of supporting entity in the downstream accounting system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Counterparty referenced by inflow documents.
    Receivable,
    /// Counterparty referenced by outflow documents.
    Payable,
    /// Catalog item used on inflow document lines.
    CatalogItem,
    /// Ledger account used on outflow document lines.
    LedgerAccount,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
            Self::CatalogItem => "catalog_item",
            Self::LedgerAccount => "ledger_account",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target ledger account for a source category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerAccountDescriptor {
    pub name: &'static str,
    pub account_type: &'static str,
    pub sub_type: &'static str,
}

/// A resolved entity. `remote_id` is assigned by the downstream system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingEntity {
    pub kind: EntityKind,
    pub display_name: String,
    pub remote_id: String,
}

/// What the resolver should find or create: kind, candidate name, and the
/// extra attributes a create needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub name: String,
    pub attributes: Map<String, Value>,
}

impl EntityDraft {
    fn new(kind: EntityKind, name: &str) -> Self {
        Self {
            kind,
            name: name.trim().to_string(),
            attributes: Map::new(),
        }
    }

    pub fn receivable(name: &str) -> Self {
        Self::new(EntityKind::Receivable, name)
    }

    pub fn payable(name: &str) -> Self {
        Self::new(EntityKind::Payable, name)
    }

    /// Service-type catalog item booked against `income_account`.
    pub fn catalog_item(name: &str, income_account: &SupportingEntity) -> Self {
        let mut draft = Self::new(EntityKind::CatalogItem, name);
        draft.attributes.insert("Type".to_string(), json!("Service"));
        draft.attributes.insert(
            "IncomeAccountRef".to_string(),
            json!({ "value": income_account.remote_id }),
        );
        draft
    }

    pub fn ledger_account(descriptor: &LedgerAccountDescriptor) -> Self {
        let mut draft = Self::new(EntityKind::LedgerAccount, descriptor.name);
        draft
            .attributes
            .insert("AccountType".to_string(), json!(descriptor.account_type));
        draft
            .attributes
            .insert("AccountSubType".to_string(), json!(descriptor.sub_type));
        draft
    }
}
