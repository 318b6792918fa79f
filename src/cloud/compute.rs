use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{Filter, InstanceStateName};
use tracing::{debug, info, warn};

use crate::error::{classify_aws, retry_once, CloudError};

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Stopped,
    Pending,
    Stopping,
    Other,
}

impl VmState {
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Running => "running",
            VmState::Stopped => "stopped",
            VmState::Pending => "pending",
            VmState::Stopping => "stopping",
            VmState::Other => "other",
        }
    }
}

impl From<&InstanceStateName> for VmState {
    fn from(name: &InstanceStateName) -> Self {
        match name {
            InstanceStateName::Running => VmState::Running,
            InstanceStateName::Stopped => VmState::Stopped,
            InstanceStateName::Pending => VmState::Pending,
            InstanceStateName::Stopping => VmState::Stopping,
            _ => VmState::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub id: String,
    pub state: VmState,
}

/// `None` means no VM carries the address. Misses are cached like hits.
pub type VmLookup = Option<VmInfo>;

pub const VM_START_DEADLINE: Duration = Duration::from_secs(300);
const VM_START_POLL: Duration = Duration::from_secs(10);
pub const VM_CACHE_TTL: Duration = Duration::from_secs(30);

/* ============================= TRAIT ============================= */

#[async_trait]
pub trait Compute: Send + Sync {
    /// Look up the VM holding a private IP, considering VMs in the running,
    /// stopped, pending, and stopping states.
    async fn find_vm_by_private_ip(&self, ip: &str) -> Result<VmLookup, CloudError>;

    /// Issue a start and poll until the VM reaches a terminal state
    /// (running or stopped) or the 300 s deadline elapses. Returns the
    /// state observed last.
    async fn start_vm(&self, id: &str) -> Result<VmState, CloudError>;

    async fn stop_vm(&self, id: &str) -> Result<(), CloudError>;
}

/* ============================= LOOKUP CACHE ============================= */

/// Per-IP lookup cache absorbing describe-instances rate limits.
///
/// Entries older than the TTL are ignored on the fast path but kept so the
/// throttle fallback can serve stale data. Writers race benignly; last
/// writer wins.
pub struct VmCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (VmLookup, Instant)>>,
}

impl VmCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn fresh(&self, ip: &str) -> Option<VmLookup> {
        let entries = self.entries.lock().expect("vm cache lock");
        entries
            .get(ip)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(lookup, _)| lookup.clone())
    }

    /// Any cached value regardless of age. Used only on throttling.
    pub fn any_age(&self, ip: &str) -> Option<VmLookup> {
        let entries = self.entries.lock().expect("vm cache lock");
        entries.get(ip).map(|(lookup, _)| lookup.clone())
    }

    pub fn store(&self, ip: &str, lookup: VmLookup) {
        let mut entries = self.entries.lock().expect("vm cache lock");
        entries.insert(ip.to_string(), (lookup, Instant::now()));
    }
}

/* ============================= EC2 IMPLEMENTATION ============================= */

pub struct Ec2Compute {
    client: aws_sdk_ec2::Client,
    cache: VmCache,
}

impl Ec2Compute {
    pub fn new(client: aws_sdk_ec2::Client) -> Self {
        Self { client, cache: VmCache::new(VM_CACHE_TTL) }
    }

    async fn describe_by_ip(&self, ip: &str) -> Result<VmLookup, CloudError> {
        let output = self
            .client
            .describe_instances()
            .filters(Filter::builder().name("private-ip-address").values(ip).build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .values("stopped")
                    .values("pending")
                    .values("stopping")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("describe_instances failed")))?;

        for reservation in output.reservations() {
            for instance in reservation.instances() {
                if let (Some(id), Some(state)) = (instance.instance_id(), instance.state()) {
                    let state = state.name().map(VmState::from).unwrap_or(VmState::Other);
                    return Ok(Some(VmInfo { id: id.to_string(), state }));
                }
            }
        }
        Ok(None)
    }

    async fn describe_state(&self, id: &str) -> Result<VmState, CloudError> {
        let output = retry_once(|| async {
            self.client
                .describe_instances()
                .instance_ids(id)
                .send()
                .await
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("describe_instances failed")))
        })
        .await?;

        output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find_map(|i| i.state().and_then(|s| s.name()).map(VmState::from))
            .ok_or_else(|| CloudError::NotFound(format!("instance {id} not found")))
    }
}

#[async_trait]
impl Compute for Ec2Compute {
    async fn find_vm_by_private_ip(&self, ip: &str) -> Result<VmLookup, CloudError> {
        if ip.is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.cache.fresh(ip) {
            return Ok(cached);
        }

        match retry_once(|| self.describe_by_ip(ip)).await {
            Ok(lookup) => {
                self.cache.store(ip, lookup.clone());
                Ok(lookup)
            }
            Err(e) if e.is_transient() => match self.cache.any_age(ip) {
                Some(stale) => {
                    debug!(ip, "vm_lookup_throttled_serving_stale");
                    Ok(stale)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn start_vm(&self, id: &str) -> Result<VmState, CloudError> {
        retry_once(|| async {
            self.client
                .start_instances()
                .instance_ids(id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("start_instances failed")))
        })
        .await?;
        info!(instance = id, "vm_start_issued");

        let deadline = tokio::time::Instant::now() + VM_START_DEADLINE;
        let mut observed = VmState::Pending;
        while tokio::time::Instant::now() < deadline {
            observed = self.describe_state(id).await?;
            match observed {
                VmState::Running => {
                    info!(instance = id, "vm_running");
                    return Ok(VmState::Running);
                }
                VmState::Stopped => {
                    warn!(instance = id, "vm_fell_back_to_stopped");
                    return Ok(VmState::Stopped);
                }
                _ => tokio::time::sleep(VM_START_POLL).await,
            }
        }

        warn!(instance = id, state = observed.as_str(), "vm_start_deadline_elapsed");
        Ok(observed)
    }

    async fn stop_vm(&self, id: &str) -> Result<(), CloudError> {
        retry_once(|| async {
            self.client
                .stop_instances()
                .instance_ids(id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("stop_instances failed")))
        })
        .await?;
        info!(instance = id, "vm_stop_issued");
        Ok(())
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(id: &str, state: VmState) -> VmLookup {
        Some(VmInfo { id: id.to_string(), state })
    }

    #[test]
    fn test_cache_fresh_hit() {
        let cache = VmCache::new(Duration::from_secs(30));
        cache.store("10.0.0.1", vm("i-1", VmState::Running));
        assert_eq!(cache.fresh("10.0.0.1"), Some(vm("i-1", VmState::Running)));
    }

    #[test]
    fn test_cache_miss_result_is_cached() {
        let cache = VmCache::new(Duration::from_secs(30));
        cache.store("10.0.0.2", None);
        assert_eq!(cache.fresh("10.0.0.2"), Some(None));
    }

    #[test]
    fn test_cache_unknown_ip_absent() {
        let cache = VmCache::new(Duration::from_secs(30));
        assert_eq!(cache.fresh("10.0.0.3"), None);
        assert_eq!(cache.any_age("10.0.0.3"), None);
    }

    #[test]
    fn test_cache_expired_entry_not_fresh() {
        let cache = VmCache::new(Duration::from_millis(10));
        cache.store("10.0.0.4", vm("i-4", VmState::Stopped));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.fresh("10.0.0.4"), None);
    }

    #[test]
    fn test_cache_expired_entry_still_served_any_age() {
        let cache = VmCache::new(Duration::from_millis(10));
        cache.store("10.0.0.5", vm("i-5", VmState::Running));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.any_age("10.0.0.5"), Some(vm("i-5", VmState::Running)));
    }

    #[test]
    fn test_cache_last_writer_wins() {
        let cache = VmCache::new(Duration::from_secs(30));
        cache.store("10.0.0.6", vm("i-6", VmState::Stopped));
        cache.store("10.0.0.6", vm("i-6", VmState::Running));
        assert_eq!(cache.fresh("10.0.0.6"), Some(vm("i-6", VmState::Running)));
    }

    #[test]
    fn test_vm_state_running_check() {
        assert!(VmState::Running.is_running());
        assert!(!VmState::Stopped.is_running());
        assert!(!VmState::Pending.is_running());
        assert!(!VmState::Stopping.is_running());
    }

    #[test]
    fn test_vm_state_strings() {
        assert_eq!(VmState::Running.as_str(), "running");
        assert_eq!(VmState::Stopped.as_str(), "stopped");
    }
}
