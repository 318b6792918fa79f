use std::time::Duration;

use tracing::{debug, info};

use crate::cloud::probes::HttpVerdict;
use crate::error::CloudError;
use crate::registry::RegistryStore;
use crate::runtime::Runtime;

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    Neo4j,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Postgres => "postgres",
            DbKind::Neo4j => "neo4j",
        }
    }
}

/// Whether a database endpoint is referenced by other applications, and if
/// so whether any of them is live right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareVerdict {
    Exclusive,
    Shared { cotenants: Vec<String>, in_use: bool },
}

pub const COTENANT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/* ============================= RESOLUTION ============================= */

/// Applications other than `requesting_app` whose `<kind>_host` matches the
/// endpoint.
pub async fn find_cotenants(
    registry: &dyn RegistryStore,
    host: &str,
    kind: DbKind,
    requesting_app: &str,
) -> Result<Vec<String>, CloudError> {
    let records = registry.scan().await?;
    Ok(records
        .into_iter()
        .filter(|r| r.app_name != requesting_app)
        .filter(|r| {
            let candidate = match kind {
                DbKind::Postgres => r.postgres_host.as_deref(),
                DbKind::Neo4j => r.neo4j_host.as_deref(),
            };
            candidate == Some(host)
        })
        .map(|r| r.app_name)
        .collect())
}

/// Decide whether a database endpoint may be stopped on behalf of
/// `requesting_app`.
///
/// Persisted status is stale by definition, so the in-use decision rests on
/// live HEAD probes of each co-tenant's primary hostname. A probe that
/// cannot produce a definitive DOWN counts the co-tenant as live: a shared
/// database is never stopped on ambiguous information.
pub async fn resolve(
    rt: &Runtime,
    host: &str,
    kind: DbKind,
    requesting_app: &str,
) -> Result<ShareVerdict, CloudError> {
    let cotenants = find_cotenants(rt.registry.as_ref(), host, kind, requesting_app).await?;
    if cotenants.is_empty() {
        debug!(host, kind = kind.as_str(), "database_exclusive");
        return Ok(ShareVerdict::Exclusive);
    }

    info!(
        host,
        kind = kind.as_str(),
        cotenants = ?cotenants,
        "database_shared_probing_cotenants"
    );

    for name in &cotenants {
        if cotenant_is_live(rt, name).await {
            info!(host, cotenant = %name, "shared_database_in_use");
            return Ok(ShareVerdict::Shared { cotenants, in_use: true });
        }
    }

    info!(host, "shared_database_idle");
    Ok(ShareVerdict::Shared { cotenants, in_use: false })
}

async fn cotenant_is_live(rt: &Runtime, app_name: &str) -> bool {
    let record = match rt.registry.get(app_name).await {
        Ok(Some(record)) => record,
        // Missing record or registry failure: cannot prove the co-tenant
        // is down, so it counts as live.
        _ => return true,
    };

    match record.primary_hostname() {
        Some(hostname) => {
            let outcome = rt.prober.head_probe(hostname, COTENANT_PROBE_TIMEOUT).await;
            outcome.verdict != HttpVerdict::Down
        }
        None => true,
    }
}

/* ============================= TESTS ============================= */
