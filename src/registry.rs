use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};

use crate::error::{classify_aws, retry_once, CloudError};

/* ============================= RECORD ============================= */

/// One registered application, keyed by its DNS-style name.
///
/// Written by the discovery collaborator, read by everything, with the hint
/// fields patched by the orchestrators. Hints are advisory only; every
/// status read reconciles against the cloud adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub app_name: String,
    pub namespace: Option<String>,
    /// Index 0 is the probe target.
    pub hostnames: Vec<String>,

    pub postgres_host: Option<String>,
    pub postgres_port: Option<u16>,
    pub postgres_db: Option<String>,
    pub postgres_user: Option<String>,

    pub neo4j_host: Option<String>,
    pub neo4j_port: Option<u16>,
    pub neo4j_username: Option<String>,

    pub status: Option<String>,
    pub postgres_state: Option<String>,
    pub neo4j_state: Option<String>,
    pub nodegroup_state: Option<String>,
}

impl AppRecord {
    pub fn primary_hostname(&self) -> Option<&str> {
        self.hostnames.first().map(String::as_str)
    }

    /// Records without a name or at least one hostname are invalid and are
    /// rejected by the registry write path.
    pub fn validate(&self) -> Result<(), CloudError> {
        if self.app_name.is_empty() {
            return Err(CloudError::Fatal("application record has no app_name".to_string()));
        }
        if self.hostnames.is_empty() {
            return Err(CloudError::Fatal(format!(
                "application record {} has no hostnames",
                self.app_name
            )));
        }
        Ok(())
    }
}

/// Hint fields an orchestrator may patch individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintField {
    Status,
    PostgresState,
    Neo4jState,
    NodegroupState,
}

impl HintField {
    pub fn attribute_name(&self) -> &'static str {
        match self {
            HintField::Status => "status",
            HintField::PostgresState => "postgres_state",
            HintField::Neo4jState => "neo4j_state",
            HintField::NodegroupState => "nodegroup_state",
        }
    }
}

/* ============================= ATTRIBUTE CODEC ============================= */

/// Encode a record into the heterogeneous attribute-value shape the table
/// stores: strings, numbers, and a string list for hostnames. Absent
/// optional fields are omitted entirely.
pub fn encode_record(record: &AppRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert("app_name".to_string(), AttributeValue::S(record.app_name.clone()));
    item.insert(
        "hostnames".to_string(),
        AttributeValue::L(record.hostnames.iter().cloned().map(AttributeValue::S).collect()),
    );

    let mut put_s = |name: &str, value: &Option<String>| {
        if let Some(v) = value {
            item.insert(name.to_string(), AttributeValue::S(v.clone()));
        }
    };
    put_s("namespace", &record.namespace);
    put_s("postgres_host", &record.postgres_host);
    put_s("postgres_db", &record.postgres_db);
    put_s("postgres_user", &record.postgres_user);
    put_s("neo4j_host", &record.neo4j_host);
    put_s("neo4j_username", &record.neo4j_username);
    put_s("status", &record.status);
    put_s("postgres_state", &record.postgres_state);
    put_s("neo4j_state", &record.neo4j_state);
    put_s("nodegroup_state", &record.nodegroup_state);

    if let Some(port) = record.postgres_port {
        item.insert("postgres_port".to_string(), AttributeValue::N(port.to_string()));
    }
    if let Some(port) = record.neo4j_port {
        item.insert("neo4j_port".to_string(), AttributeValue::N(port.to_string()));
    }

    item
}

/// Decode an attribute map into the typed record view. Tolerates ports
/// stored as either numbers or strings and ignores unknown attributes, so
/// new fields stay additive.
pub fn decode_record(item: &HashMap<String, AttributeValue>) -> Result<AppRecord, CloudError> {
    let app_name = read_s(item, "app_name")
        .ok_or_else(|| CloudError::Fatal("registry item is missing app_name".to_string()))?;

    let hostnames = match item.get("hostnames") {
        Some(AttributeValue::L(list)) => list
            .iter()
            .filter_map(|v| v.as_s().ok().cloned())
            .collect(),
        Some(AttributeValue::S(single)) => vec![single.clone()],
        _ => Vec::new(),
    };

    Ok(AppRecord {
        app_name,
        namespace: read_s(item, "namespace"),
        hostnames,
        postgres_host: read_s(item, "postgres_host"),
        postgres_port: read_port(item, "postgres_port"),
        postgres_db: read_s(item, "postgres_db"),
        postgres_user: read_s(item, "postgres_user"),
        neo4j_host: read_s(item, "neo4j_host"),
        neo4j_port: read_port(item, "neo4j_port"),
        neo4j_username: read_s(item, "neo4j_username"),
        status: read_s(item, "status"),
        postgres_state: read_s(item, "postgres_state"),
        neo4j_state: read_s(item, "neo4j_state"),
        nodegroup_state: read_s(item, "nodegroup_state"),
    })
}

fn read_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    match item.get(name) {
        Some(AttributeValue::S(v)) => Some(v.clone()),
        Some(AttributeValue::N(v)) => Some(v.clone()),
        _ => None,
    }
}

fn read_port(item: &HashMap<String, AttributeValue>, name: &str) -> Option<u16> {
    match item.get(name) {
        Some(AttributeValue::N(v)) | Some(AttributeValue::S(v)) => v.parse().ok(),
        _ => None,
    }
}

/* ============================= STORE ============================= */

/// Keyed access to application metadata plus the per-app schedule flag.
///
/// Writes are last-writer-wins; hint updates patch a single named field.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, app_name: &str) -> Result<Option<AppRecord>, CloudError>;

    async fn scan(&self) -> Result<Vec<AppRecord>, CloudError>;

    /// Insert or replace a record. Rejects records without a hostname.
    async fn put(&self, record: &AppRecord) -> Result<(), CloudError>;

    async fn set_hint(&self, app_name: &str, field: HintField, value: &str) -> Result<(), CloudError>;

    /// Per-app scheduling flag; `None` when the app has no schedule record.
    async fn schedule_enabled(&self, app_name: &str) -> Result<Option<bool>, CloudError>;
}

pub struct DynamoRegistry {
    client: aws_sdk_dynamodb::Client,
    registry_table: String,
    schedules_table: String,
}

impl DynamoRegistry {
    pub fn new(
        client: aws_sdk_dynamodb::Client,
        registry_table: impl Into<String>,
        schedules_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry_table: registry_table.into(),
            schedules_table: schedules_table.into(),
        }
    }
}

fn classify<E: ProvideErrorMetadata>(err: &E, fallback: &str) -> CloudError {
    classify_aws(err.code(), err.message().unwrap_or(fallback))
}

#[async_trait]
impl RegistryStore for DynamoRegistry {
    async fn get(&self, app_name: &str) -> Result<Option<AppRecord>, CloudError> {
        let output = retry_once(|| async {
            self.client
                .get_item()
                .table_name(&self.registry_table)
                .key("app_name", AttributeValue::S(app_name.to_string()))
                .send()
                .await
                .map_err(|e| classify(&e, "get_item failed"))
        })
        .await?;

        match output.item {
            Some(item) => Ok(Some(decode_record(&item)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self) -> Result<Vec<AppRecord>, CloudError> {
        let mut records = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let output = retry_once(|| async {
                self.client
                    .scan()
                    .table_name(&self.registry_table)
                    .set_exclusive_start_key(start_key.clone())
                    .send()
                    .await
                    .map_err(|e| classify(&e, "scan failed"))
            })
            .await?;

            for item in output.items() {
                match decode_record(item) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(error = %e, "registry_item_skipped"),
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn put(&self, record: &AppRecord) -> Result<(), CloudError> {
        record.validate()?;
        let item = encode_record(record);
        retry_once(|| async {
            self.client
                .put_item()
                .table_name(&self.registry_table)
                .set_item(Some(item.clone()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify(&e, "put_item failed"))
        })
        .await
    }

    async fn set_hint(&self, app_name: &str, field: HintField, value: &str) -> Result<(), CloudError> {
        retry_once(|| async {
            self.client
                .update_item()
                .table_name(&self.registry_table)
                .key("app_name", AttributeValue::S(app_name.to_string()))
                .update_expression("SET #field = :value")
                .expression_attribute_names("#field", field.attribute_name())
                .expression_attribute_values(":value", AttributeValue::S(value.to_string()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify(&e, "update_item failed"))
        })
        .await
    }

    async fn schedule_enabled(&self, app_name: &str) -> Result<Option<bool>, CloudError> {
        let output = retry_once(|| async {
            self.client
                .get_item()
                .table_name(&self.schedules_table)
                .key("app", AttributeValue::S(app_name.to_string()))
                .send()
                .await
                .map_err(|e| classify(&e, "get_item failed"))
        })
        .await?;

        Ok(output
            .item
            .as_ref()
            .and_then(|item| item.get("enabled"))
            .and_then(|v| v.as_bool().ok())
            .copied())
    }
}

/* ============================= TESTS ============================= */
