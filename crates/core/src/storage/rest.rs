use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::traits::{MonitorStore, PriceCacheStore, TransactionStore};
use crate::errors::CoreError;
use crate::models::monitor::{DailyIncrease, PortfolioSnapshot, UserBalances};
use crate::models::price::Quote;
use crate::models::settings::BackendSettings;
use crate::models::transaction::Transaction;

const PRICES_TABLE: &str = "crypto_prices";
const TRANSACTIONS_TABLE: &str = "crypto_transactions";
const BALANCES_TABLE: &str = "user_balances";
const SNAPSHOTS_TABLE: &str = "portfolio_snapshots";
const INCREASES_TABLE: &str = "daily_value_updates";

/// Balance columns in `user_balances`, as (column, symbol).
const BALANCE_COLUMNS: &[(&str, &str)] = &[
    ("btc_balance", "BTC"),
    ("eth_balance", "ETH"),
    ("usdt_balance", "USDT"),
    ("bnb_balance", "BNB"),
    ("ada_balance", "ADA"),
];

/// Client for the hosted tables behind a PostgREST-style `/rest/v1` API.
///
/// Reads use the public key. Writes that must bypass row-level policies
/// (cache upserts, monitor bookkeeping) use the service key when configured.
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    service_key: Option<String>,
}

impl RestBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, CoreError> {
        if settings.url.trim().is_empty() || settings.api_key.trim().is_empty() {
            return Err(CoreError::Configuration(
                "backend url and api key are required".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            service_key: settings.service_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder, elevated: bool) -> RequestBuilder {
        let key = if elevated {
            self.service_key.as_deref().unwrap_or(&self.api_key)
        } else {
            &self.api_key
        };
        request
            .header("apikey", key)
            .header("Authorization", format!("Bearer {key}"))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        elevated: bool,
    ) -> Result<Vec<T>, CoreError> {
        let request = self.client.get(self.table_url(table)).query(query);
        let resp = self.authorize(request, elevated).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::store(table, format!("HTTP {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| CoreError::store(table, format!("unreadable rows: {e}")))
    }

    async fn insert_rows<T: Serialize + ?Sized>(
        &self,
        table: &str,
        rows: &T,
        on_conflict: Option<&str>,
        elevated: bool,
    ) -> Result<(), CoreError> {
        let mut request = self.client.post(self.table_url(table)).json(rows);
        if let Some(column) = on_conflict {
            request = request
                .query(&[("on_conflict", column)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal");
        } else {
            request = request.header("Prefer", "return=minimal");
        }
        let resp = self.authorize(request, elevated).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::store(table, format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

/// PostgREST `in.(...)` filter with quoted values.
fn in_filter(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl PriceCacheStore for RestBackend {
    async fn read(&self, symbols: &[String]) -> Result<Vec<Quote>, CoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let query = [
            ("select", "*".to_string()),
            ("symbol", in_filter(symbols)),
            ("order", "last_updated.desc".to_string()),
        ];
        self.select(PRICES_TABLE, &query, false).await
    }

    async fn upsert(&self, quotes: &[Quote]) -> Result<(), CoreError> {
        if quotes.is_empty() {
            return Ok(());
        }
        debug!(count = quotes.len(), "upserting cached quotes");
        self.insert_rows(PRICES_TABLE, quotes, Some("symbol"), true).await
    }
}

#[async_trait]
impl TransactionStore for RestBackend {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, CoreError> {
        let query = [
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
        ];
        self.select(TRANSACTIONS_TABLE, &query, false).await
    }

    async fn insert(&self, user_id: Uuid, transaction: &Transaction) -> Result<(), CoreError> {
        let mut row = match serde_json::to_value(transaction) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(CoreError::Serialization(e.to_string())),
        };
        row.insert("user_id".into(), Value::String(user_id.to_string()));
        row.insert("status".into(), Value::String("completed".into()));
        self.insert_rows(TRANSACTIONS_TABLE, &[Value::Object(row)], None, false)
            .await
    }
}

#[derive(Deserialize)]
struct SnapshotValue {
    total_value: f64,
}

#[async_trait]
impl MonitorStore for RestBackend {
    async fn users_with_balances(&self) -> Result<Vec<UserBalances>, CoreError> {
        let columns: Vec<&str> = BALANCE_COLUMNS.iter().map(|(c, _)| *c).collect();
        let any_positive: Vec<String> = columns.iter().map(|c| format!("{c}.gt.0")).collect();
        let query = [
            ("select", format!("user_id,{}", columns.join(","))),
            ("or", format!("({})", any_positive.join(","))),
        ];
        let rows: Vec<Map<String, Value>> = self.select(BALANCES_TABLE, &query, true).await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(user_id) = row
                .get("user_id")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let balances: HashMap<String, f64> = BALANCE_COLUMNS
                .iter()
                .map(|(column, symbol)| {
                    let amount = row.get(*column).and_then(Value::as_f64).unwrap_or(0.0);
                    (symbol.to_string(), amount)
                })
                .collect();
            users.push(UserBalances { user_id, balances });
        }
        Ok(users)
    }

    async fn lowest_snapshot_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError> {
        let query = [
            ("select", "total_value".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("created_at", format!("gte.{}", timestamp(since))),
            ("order", "total_value.asc".to_string()),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<SnapshotValue> = self.select(SNAPSHOTS_TABLE, &query, true).await?;
        Ok(rows.first().map(|r| r.total_value))
    }

    async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), CoreError> {
        self.insert_rows(SNAPSHOTS_TABLE, &[snapshot], None, true).await
    }

    async fn has_daily_increase(&self, user_id: Uuid, date: NaiveDate) -> Result<bool, CoreError> {
        let query = [
            ("select", "id".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("update_date", format!("gte.{date}")),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<Value> = self.select(INCREASES_TABLE, &query, true).await?;
        Ok(!rows.is_empty())
    }

    async fn log_daily_increase(&self, entry: &DailyIncrease) -> Result<(), CoreError> {
        self.insert_rows(INCREASES_TABLE, &[entry], None, true).await
    }
}
