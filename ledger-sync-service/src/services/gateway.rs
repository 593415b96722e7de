//! Remote entity gateway for the downstream accounting API.
//!
//! Wraps authenticated query/create calls, classifies failures from the
//! structured fault code in the response body, and retries only the
//! rate-limited and transient classes.

use crate::config::{AccountingConfig, Credentials};
use crate::services::metrics::{observe_remote_duration, record_remote_request};
use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::retry::{retry_with_backoff, RetryConfig, Retryable};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// Fault code for a create rejected because the name is already taken.
pub const DUPLICATE_NAME_CODE: &str = "6240";
/// Fault code for a query the server's parser rejected.
pub const QUERY_PARSER_CODE: &str = "4000";

/// Downstream resources this service reads or creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Customer,
    Vendor,
    Item,
    Account,
    Invoice,
    Bill,
}

impl Resource {
    /// Entity name used in queries and as the response root key.
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Customer => "Customer",
            Self::Vendor => "Vendor",
            Self::Item => "Item",
            Self::Account => "Account",
            Self::Invoice => "Invoice",
            Self::Bill => "Bill",
        }
    }

    /// Path segment for create requests.
    pub fn create_path(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Vendor => "vendor",
            Self::Item => "item",
            Self::Account => "account",
            Self::Invoice => "invoice",
            Self::Bill => "bill",
        }
    }

    /// Field holding the unique display name.
    pub fn name_field(&self) -> &'static str {
        match self {
            Self::Customer | Self::Vendor => "DisplayName",
            _ => "Name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Missing or expired authorization. Needs re-auth, never retried.
    Unauthorized,
    /// Name uniqueness conflict on create.
    DuplicateName,
    /// The server could not parse our query. Always a caller defect.
    MalformedQuery,
    RateLimited,
    /// Network failure or 5xx.
    Transient,
    Fatal,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::DuplicateName => "duplicate_name",
            Self::MalformedQuery => "malformed_query",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{} (status={status:?}, code={code:?}): {message}", .kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Classify a non-success response from its status and body.
    pub fn classify(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let fault = parsed.as_ref().and_then(first_fault_error);
        let code = fault
            .and_then(|e| get_ci(e, "code"))
            .and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let kind = match (status, code.as_deref()) {
            (401 | 403, _) => RemoteErrorKind::Unauthorized,
            (_, Some(DUPLICATE_NAME_CODE)) => RemoteErrorKind::DuplicateName,
            (_, Some(QUERY_PARSER_CODE)) => RemoteErrorKind::MalformedQuery,
            (429, _) => RemoteErrorKind::RateLimited,
            (500..=599, _) => RemoteErrorKind::Transient,
            // Message matching only when the protocol gave us no code
            (_, None) if body.contains("Duplicate Name Exists") => RemoteErrorKind::DuplicateName,
            (_, None) if body.contains("QueryParserError") => RemoteErrorKind::MalformedQuery,
            _ => RemoteErrorKind::Fatal,
        };

        let message = fault
            .map(|e| {
                let msg = get_ci(e, "message").and_then(Value::as_str).unwrap_or("");
                match get_ci(e, "detail").and_then(Value::as_str) {
                    Some(detail) if !detail.is_empty() => format!("{}: {}", msg, detail),
                    _ => msg.to_string(),
                }
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.to_string());

        Self {
            kind,
            status: Some(status),
            code,
            message,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            RemoteErrorKind::Transient
        } else {
            RemoteErrorKind::Fatal
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            code: None,
            message: err.to_string(),
        }
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::RateLimited | RemoteErrorKind::Transient
        )
    }
}

/// Case-insensitive key lookup; the API is inconsistent about `Fault` vs `fault`.
fn get_ci<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn first_fault_error(body: &Value) -> Option<&Value> {
    get_ci(body, "Fault")
        .and_then(|f| get_ci(f, "Error"))
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
}

/// Escape a string literal for the query language by doubling single quotes.
///
/// Only interpolated values go through here; the query text itself is never
/// escaped, or its delimiting quotes break and the server answers `4000`.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Exact-match query on a single field.
pub fn build_query(resource: Resource, field: &str, value: &str) -> String {
    format!(
        "select * from {} where {} = '{}'",
        resource.entity_name(),
        field,
        escape_literal(value)
    )
}

/// Extract the downstream identifier from a returned object.
pub fn remote_id(object: &Value) -> Option<String> {
    match object.get("Id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Seam between the sync engine and the downstream accounting system.
#[async_trait]
pub trait AccountingApi: Send + Sync {
    /// Exact-match lookup; returns the first match the server reports.
    async fn find_one(
        &self,
        creds: &Credentials,
        resource: Resource,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, RemoteError>;

    /// Create an object and return it as stored downstream.
    async fn create(
        &self,
        creds: &Credentials,
        resource: Resource,
        payload: &Value,
    ) -> Result<Value, RemoteError>;
}

/// HTTP gateway to a QuickBooks-Online-shaped REST API.
#[derive(Clone)]
pub struct QuickbooksGateway {
    client: Client,
    base_url: String,
    minor_version: u32,
    retry: RetryConfig,
}

impl QuickbooksGateway {
    pub fn new(config: &AccountingConfig) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            minor_version: config.minor_version,
            retry: config.retry.clone(),
        })
    }

    fn company_url(&self, creds: &Credentials, path: &str) -> String {
        format!("{}/v3/company/{}/{}", self.base_url, creds.realm_id, path)
    }

    /// Authenticated request with classified errors and bounded retry.
    #[instrument(skip(self, creds, body), fields(realm_id = %creds.realm_id))]
    pub async fn request(
        &self,
        creds: &Credentials,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let operation = format!("{} {}", method, path.split('?').next().unwrap_or(path));
        retry_with_backoff(&self.retry, &operation, || {
            self.request_once(creds, method.clone(), path, body)
        })
        .await
    }

    async fn request_once(
        &self,
        creds: &Credentials,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let url = self.company_url(creds, path);
        let operation = path.split('?').next().unwrap_or(path).to_string();
        let started = Instant::now();

        let mut builder = self
            .client
            .request(method, &url)
            .bearer_auth(creds.access_token.expose_secret())
            .header("Accept", "application/json");
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let result = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, RemoteError>((status, text))
        }
        .await;

        observe_remote_duration(&operation, started.elapsed().as_secs_f64());

        let (status, text) = match result {
            Ok(ok) => ok,
            Err(e) => {
                record_remote_request(&operation, e.kind.as_str());
                return Err(e);
            }
        };

        debug!(status = %status, operation = %operation, "Accounting API response");

        if status.is_success() {
            record_remote_request(&operation, "ok");
            if text.trim().is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            return serde_json::from_str(&text).map_err(|e| {
                RemoteError::new(
                    RemoteErrorKind::Fatal,
                    format!("Invalid JSON from accounting API: {}", e),
                )
            });
        }

        let err = RemoteError::classify(status.as_u16(), &text);
        record_remote_request(&operation, err.kind.as_str());
        if err.kind == RemoteErrorKind::MalformedQuery {
            error!(
                path = %path,
                code = ?err.code,
                message = %err.message,
                "Accounting API rejected query as malformed - literal escaping defect"
            );
        }
        Err(err)
    }
}

#[async_trait]
impl AccountingApi for QuickbooksGateway {
    async fn find_one(
        &self,
        creds: &Credentials,
        resource: Resource,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, RemoteError> {
        let query = build_query(resource, field, value);
        let path = format!(
            "query?query={}&minorversion={}",
            urlencoding::encode(&query),
            self.minor_version
        );
        let response = self.request(creds, Method::GET, &path, None).await?;

        Ok(response
            .get("QueryResponse")
            .and_then(|qr| qr.get(resource.entity_name()))
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned())
    }

    async fn create(
        &self,
        creds: &Credentials,
        resource: Resource,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        let path = format!(
            "{}?minorversion={}",
            resource.create_path(),
            self.minor_version
        );
        let mut response = self
            .request(creds, Method::POST, &path, Some(payload))
            .await?;

        response
            .get_mut(resource.entity_name())
            .map(Value::take)
            .ok_or_else(|| {
                RemoteError::new(
                    RemoteErrorKind::Fatal,
                    format!("Create response missing {} object", resource.entity_name()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_embedded_quotes_only() {
        assert_eq!(escape_literal("Joe's Diner"), "Joe''s Diner");
        assert_eq!(escape_literal("plain"), "plain");
    }

    #[test]
    fn query_keeps_delimiting_quotes_intact() {
        let q = build_query(Resource::Account, "Name", "Owner's Draw");
        assert_eq!(q, "select * from Account where Name = 'Owner''s Draw'");

        let q = build_query(Resource::Invoice, "PrivateNote", "PLD:txn_1");
        assert_eq!(q, "select * from Invoice where PrivateNote = 'PLD:txn_1'");
    }

    #[test]
    fn classifies_duplicate_name_by_code() {
        let body = r#"{"Fault":{"Error":[{"Message":"Duplicate Name Exists Error","Detail":"The name supplied already exists. : Id=58","code":"6240"}],"type":"ValidationFault"}}"#;
        let err = RemoteError::classify(400, body);
        assert_eq!(err.kind, RemoteErrorKind::DuplicateName);
        assert_eq!(err.code.as_deref(), Some("6240"));
        assert!(err.message.starts_with("Duplicate Name Exists Error"));
    }

    #[test]
    fn classifies_query_parser_error_by_code() {
        let body = r#"{"Fault":{"Error":[{"Message":"Error parsing query","Detail":"QueryParserError: Encountered IDENTIFIER","code":"4000"}],"type":"ValidationFault"}}"#;
        assert_eq!(
            RemoteError::classify(400, body).kind,
            RemoteErrorKind::MalformedQuery
        );
    }

    #[test]
    fn classifies_lowercase_auth_fault() {
        let body = r#"{"fault":{"error":[{"message":"message=AuthenticationFailed","detail":"Token expired","code":"3200"}],"type":"AUTHENTICATION"}}"#;
        let err = RemoteError::classify(401, body);
        assert_eq!(err.kind, RemoteErrorKind::Unauthorized);
        assert!(!err.is_retryable());
    }

    #[test]
    fn classifies_by_status_when_no_code() {
        assert_eq!(RemoteError::classify(429, "").kind, RemoteErrorKind::RateLimited);
        assert_eq!(RemoteError::classify(503, "down").kind, RemoteErrorKind::Transient);
        assert_eq!(RemoteError::classify(400, "nope").kind, RemoteErrorKind::Fatal);
        assert!(RemoteError::classify(502, "").is_retryable());
    }

    #[test]
    fn message_matching_is_a_fallback_only() {
        assert_eq!(
            RemoteError::classify(400, "Duplicate Name Exists Error").kind,
            RemoteErrorKind::DuplicateName
        );

        // A code that says otherwise wins over the message text.
        let body = r#"{"Fault":{"Error":[{"Message":"Duplicate Name Exists Error","code":"6000"}]}}"#;
        assert_eq!(RemoteError::classify(400, body).kind, RemoteErrorKind::Fatal);
    }

    #[test]
    fn remote_id_accepts_string_or_number() {
        assert_eq!(remote_id(&serde_json::json!({"Id": "58"})), Some("58".into()));
        assert_eq!(remote_id(&serde_json::json!({"Id": 58})), Some("58".into()));
        assert_eq!(remote_id(&serde_json::json!({})), None);
    }
}
