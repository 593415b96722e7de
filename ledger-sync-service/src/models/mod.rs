//! Domain models for ledger-sync-service.

mod document;
mod entity;
mod record;
mod sync_event;

pub use document::{AccountingDocument, DocumentKind};
pub use entity::{EntityDraft, EntityKind, LedgerAccountDescriptor, SupportingEntity};
pub use record::{AccountRecord, NormalizedRecord, RawTransaction};
pub use sync_event::{PassState, RecordFailure, RecordOutcome, SyncEvent, SyncOutcome};

pub(crate) use sync_event::PassTally;
