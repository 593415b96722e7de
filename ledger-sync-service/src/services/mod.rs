//! Services module for ledger-sync-service.

pub mod category;
pub mod database;
pub mod gateway;
pub mod guard;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod source;
pub mod synthesizer;

pub use database::{Database, LedgerStore};
pub use gateway::{AccountingApi, QuickbooksGateway, RemoteError, RemoteErrorKind, Resource};
pub use guard::IdempotencyGuard;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use orchestrator::{SyncOrchestrator, SyncRequest};
pub use resolver::EntityResolver;
pub use source::{EventSource, PlaidClient, SourceError};
