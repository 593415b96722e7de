//! Event source collaborator: bank accounts and transactions for a window.
//!
//! `PlaidClient` talks to a Plaid-compatible API and pages through
//! `/transactions/get` itself; callers only see complete lists.

use crate::config::PlaidConfig;
use crate::models::{AccountRecord, RawTransaction};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Largest page `/transactions/get` will return.
const PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Event source not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event source returned {status}: {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid event source response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn list_accounts(&self, token: &Secret<String>) -> Result<Vec<AccountRecord>, SourceError>;

    /// All transactions dated within `[start_date, end_date]`, in source order.
    async fn list_transactions(
        &self,
        token: &Secret<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<RawTransaction>, SourceError>;
}

#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    config: PlaidConfig,
}

#[derive(Serialize)]
struct AccountsRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
}

#[derive(Serialize)]
struct TransactionsRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    start_date: String,
    end_date: String,
    options: PageOptions,
}

#[derive(Serialize)]
struct PageOptions {
    count: u32,
    offset: u32,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<AccountRecord>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: Vec<RawTransaction>,
    total_transactions: u32,
}

#[derive(Deserialize)]
struct PlaidErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl PlaidClient {
    pub fn new(config: PlaidConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Check if Plaid is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.secret.expose_secret().is_empty()
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SourceError> {
        if !self.is_configured() {
            return Err(SourceError::NotConfigured);
        }

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(status = %status, path = %path, "Plaid response");

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))
        } else {
            let err: PlaidErrorBody = serde_json::from_str(&text).unwrap_or(PlaidErrorBody {
                error_code: "UNKNOWN".to_string(),
                error_message: text.clone(),
            });
            Err(SourceError::Api {
                status: status.as_u16(),
                code: err.error_code,
                message: err.error_message,
            })
        }
    }
}

#[async_trait]
impl EventSource for PlaidClient {
    #[instrument(skip(self, token))]
    async fn list_accounts(&self, token: &Secret<String>) -> Result<Vec<AccountRecord>, SourceError> {
        let request = AccountsRequest {
            client_id: &self.config.client_id,
            secret: self.config.secret.expose_secret(),
            access_token: token.expose_secret(),
        };
        let response: AccountsResponse = self.post("accounts/get", &request).await?;
        info!(accounts = response.accounts.len(), "Fetched accounts");
        Ok(response.accounts)
    }

    #[instrument(skip(self, token))]
    async fn list_transactions(
        &self,
        token: &Secret<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<RawTransaction>, SourceError> {
        let mut transactions = Vec::new();

        loop {
            let request = TransactionsRequest {
                client_id: &self.config.client_id,
                secret: self.config.secret.expose_secret(),
                access_token: token.expose_secret(),
                start_date: start_date.to_string(),
                end_date: end_date.to_string(),
                options: PageOptions {
                    count: PAGE_SIZE,
                    offset: transactions.len() as u32,
                },
            };
            let page: TransactionsResponse = self.post("transactions/get", &request).await?;
            let received = page.transactions.len();
            transactions.extend(page.transactions);

            if received == 0 || transactions.len() as u32 >= page.total_transactions {
                break;
            }
        }

        info!(transactions = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }
}
