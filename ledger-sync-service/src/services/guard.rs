//! Idempotency guard: one downstream document per source record.
//!
//! Every document carries a marker derived from its source id. Before any
//! create, the guard searches for that marker; creation only happens after
//! a miss in the same step.

use crate::config::Credentials;
use crate::models::DocumentKind;
use crate::services::gateway::{remote_id, AccountingApi, RemoteError, RemoteErrorKind};
use crate::services::synthesizer::resource_for;
use tracing::{debug, instrument};

pub const MARKER_PREFIX: &str = "PLD:";

/// Document field that holds the marker.
pub const MARKER_FIELD: &str = "PrivateNote";

/// Deterministic marker for a source record.
pub fn marker_for(source_id: &str) -> String {
    format!("{}{}", MARKER_PREFIX, source_id)
}

/// A document already present downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingDocument {
    pub remote_id: String,
    pub marker: String,
}

pub struct IdempotencyGuard<'a> {
    api: &'a dyn AccountingApi,
    creds: &'a Credentials,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(api: &'a dyn AccountingApi, creds: &'a Credentials) -> Self {
        Self { api, creds }
    }

    /// Look up a document of `kind` by exact marker.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn find_existing(
        &self,
        kind: DocumentKind,
        marker: &str,
    ) -> Result<Option<ExistingDocument>, RemoteError> {
        let found = self
            .api
            .find_one(self.creds, resource_for(kind), MARKER_FIELD, marker)
            .await?;

        match found {
            None => Ok(None),
            Some(object) => {
                let id = remote_id(&object).ok_or_else(|| {
                    RemoteError::new(
                        RemoteErrorKind::Fatal,
                        format!("Document matching marker {} has no Id", marker),
                    )
                })?;
                debug!(remote_id = %id, "Document already exists for marker");
                Ok(Some(ExistingDocument {
                    remote_id: id,
                    marker: marker.to_string(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_prefix_plus_source_id() {
        assert_eq!(marker_for("txn_1"), "PLD:txn_1");
        assert_eq!(marker_for("txn_2"), "PLD:txn_2");
    }

    #[test]
    fn marker_is_deterministic_and_injective() {
        let ids = ["a", "b", "txn_1", "txn_10", "txn_1 ", "TXN_1"];
        for x in ids {
            assert_eq!(marker_for(x), marker_for(x));
            for y in ids {
                if x != y {
                    assert_ne!(marker_for(x), marker_for(y));
                }
            }
        }
    }
}
