use async_trait::async_trait;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{classify_aws, retry_once, CloudError};

/* ============================= TYPES ============================= */

const RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Scheduler,
    Api,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Scheduler => "scheduler",
            Source::Api => "api",
        }
    }
}

/// One append-only record of a lifecycle action. Entries expire from the
/// log table via the TTL attribute after 90 days.
#[derive(Debug, Clone, Serialize)]
pub struct OperationEntry {
    pub app: String,
    pub action: Action,
    pub source: Source,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl OperationEntry {
    pub fn new(app: impl Into<String>, action: Action, source: Source, reason: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            action,
            source,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn operation_id(&self) -> String {
        format!("{}_{}_{}", self.app, self.action, self.timestamp.timestamp())
    }

    /// Epoch second at which the entry becomes eligible for expiry.
    pub fn expires_at(&self) -> i64 {
        (self.timestamp + Duration::days(RETENTION_DAYS)).timestamp()
    }
}

/* ============================= LOG ============================= */

#[async_trait]
pub trait OperationLog: Send + Sync {
    async fn record(&self, entry: &OperationEntry) -> Result<(), CloudError>;
}

pub struct DynamoOperationLog {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoOperationLog {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self { client, table: table.into() }
    }
}

#[async_trait]
impl OperationLog for DynamoOperationLog {
    async fn record(&self, entry: &OperationEntry) -> Result<(), CloudError> {
        let timestamp = entry.timestamp.to_rfc3339();
        retry_once(|| async {
            self.client
                .put_item()
                .table_name(&self.table)
                .item("PK", AttributeValue::S(entry.operation_id()))
                .item("SK", AttributeValue::S(timestamp.clone()))
                .item("app", AttributeValue::S(entry.app.clone()))
                .item("action", AttributeValue::S(entry.action.as_str().to_string()))
                .item("source", AttributeValue::S(entry.source.as_str().to_string()))
                .item("reason", AttributeValue::S(entry.reason.clone()))
                .item("timestamp", AttributeValue::S(timestamp.clone()))
                .item("ttl", AttributeValue::N(entry.expires_at().to_string()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("put_item failed")))
        })
        .await
    }
}

/* ============================= TESTS ============================= */
