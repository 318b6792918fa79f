use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::scheduler::parse_hhmm;

/* ============================= TYPES ============================= */

/// Capacity targets for the nodegroup backing one application.
///
/// Read from the configuration file only. This mapping is the single source
/// of truth for capacity targets; discovered or cached scaling values never
/// overwrite it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodegroupAssignment {
    pub nodegroup: String,
    pub desired: i32,
    pub min: i32,
    pub max: i32,
}

/// Process-wide schedule applied to every application with scheduling enabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobalSchedule {
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Weekday names (`Mon`..`Sun`) on which the start window fires.
    /// An empty list means every day.
    #[serde(default = "default_weekdays")]
    pub weekdays_start: Vec<String>,

    #[serde(default = "default_weekdays")]
    pub weekdays_stop: Vec<String>,

    /// 24-hour `HH:MM` in the configured timezone.
    #[serde(default = "default_start_time")]
    pub start_time: String,

    #[serde(default = "default_stop_time")]
    pub stop_time: String,

    /// When true, Saturdays and Sundays suppress the start window and the
    /// stop window fires regardless of `weekdays_stop`.
    #[serde(default = "default_true")]
    pub weekend_shutdown: bool,
}

/// Pricing inputs consumed by the cost-attribution collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub network_price_per_gb: f64,

    /// Fallback hourly price per instance type.
    #[serde(default)]
    pub instance_hourly_prices: HashMap<String, f64>,

    /// Monthly price per GB, keyed by EBS volume type.
    #[serde(default)]
    pub ebs_volume_prices: HashMap<String, f64>,
}

/// Static configuration, loaded once at startup and never reloaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Name of the managed EKS cluster every nodegroup belongs to.
    pub cluster_name: String,

    /// Application registry table.
    pub registry_table: String,

    #[serde(default = "default_schedules_table")]
    pub schedules_table: String,

    #[serde(default = "default_oplog_table")]
    pub operation_log_table: String,

    /// Authoritative application → namespace mapping. Overrides whatever
    /// namespace discovery recorded.
    #[serde(default)]
    pub app_namespaces: HashMap<String, String>,

    /// Authoritative application → nodegroup capacity assignment.
    #[serde(default)]
    pub nodegroup_defaults: HashMap<String, NodegroupAssignment>,

    #[serde(default)]
    pub global_schedule: Option<GlobalSchedule>,

    /// HTTP status codes the probe treats as UP. `[200, 405]` is the
    /// variant used when bare metrics endpoints count as UP.
    #[serde(default = "default_acceptance")]
    pub http_acceptance: Vec<u16>,

    /// Disable TLS verification on outbound probes. Matches the ingress
    /// fleet this controller fronts, where most certificates are internal.
    #[serde(default = "default_true")]
    pub insecure_http_probes: bool,

    #[serde(default)]
    pub pricing: Pricing,
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_weekdays() -> Vec<String> {
    ["Mon", "Tue", "Wed", "Thu", "Fri"].iter().map(|d| d.to_string()).collect()
}

fn default_start_time() -> String {
    "09:00".to_string()
}

fn default_stop_time() -> String {
    "22:00".to_string()
}

fn default_true() -> bool {
    true
}

fn default_schedules_table() -> String {
    "fleet-app-schedules".to_string()
}

fn default_oplog_table() -> String {
    "fleet-operation-logs".to_string()
}

fn default_acceptance() -> Vec<u16> {
    vec![200]
}

/* ============================= LOADING ============================= */

impl Settings {
    /// Load and validate settings from a YAML file. Missing required keys
    /// or malformed values refuse startup.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse configuration file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.cluster_name.is_empty(), "cluster_name must not be empty");
        anyhow::ensure!(!self.registry_table.is_empty(), "registry_table must not be empty");
        anyhow::ensure!(
            !self.http_acceptance.is_empty(),
            "http_acceptance must list at least one status code"
        );

        for (app, assignment) in &self.nodegroup_defaults {
            anyhow::ensure!(
                assignment.min <= assignment.desired && assignment.desired <= assignment.max,
                "nodegroup assignment for {app} must satisfy min <= desired <= max"
            );
        }

        if let Some(schedule) = &self.global_schedule {
            schedule.timezone.parse::<chrono_tz::Tz>().map_err(|_| {
                anyhow::anyhow!("global_schedule.timezone {:?} is not a known timezone", schedule.timezone)
            })?;
            parse_hhmm(&schedule.start_time)
                .with_context(|| format!("global_schedule.start_time {:?}", schedule.start_time))?;
            parse_hhmm(&schedule.stop_time)
                .with_context(|| format!("global_schedule.stop_time {:?}", schedule.stop_time))?;
        }

        Ok(())
    }

    /* ============================= LOOKUPS ============================= */

    /// Resolve the namespace for an application. The configured mapping is
    /// authoritative; the discovered value is a fallback only.
    pub fn namespace_for(&self, app_name: &str, discovered: Option<&str>) -> String {
        if let Some(ns) = self.app_namespaces.get(app_name) {
            return ns.clone();
        }
        discovered.unwrap_or("default").to_string()
    }

    pub fn assignment_for(&self, app_name: &str) -> Option<&NodegroupAssignment> {
        self.nodegroup_defaults.get(app_name)
    }

    pub fn accepts(&self, code: u16) -> bool {
        self.http_acceptance.contains(&code)
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
cluster_name: prod-eks
registry_table: fleet-app-registry
schedules_table: fleet-app-schedules
operation_log_table: fleet-operation-logs
app_namespaces:
  svc.example.com: svc
nodegroup_defaults:
  svc.example.com:
    nodegroup: ng-svc
    desired: 2
    min: 1
    max: 4
global_schedule:
  timezone: Asia/Kolkata
  weekdays_start: [Mon, Tue, Wed, Thu, Fri]
  weekdays_stop: [Mon, Tue, Wed, Thu, Fri]
  start_time: "09:00"
  stop_time: "22:00"
  weekend_shutdown: true
http_acceptance: [200, 405]
insecure_http_probes: true
pricing:
  network_price_per_gb: 0.09
  instance_hourly_prices:
    t3.large: 0.0832
  ebs_volume_prices:
    gp3: 0.08
"#;

    #[test]
    fn test_full_config_parses() {
        let settings: Settings = serde_yaml::from_str(FULL_YAML).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.cluster_name, "prod-eks");
        assert_eq!(settings.http_acceptance, vec![200, 405]);
        let assignment = settings.assignment_for("svc.example.com").unwrap();
        assert_eq!(assignment.nodegroup, "ng-svc");
        assert_eq!((assignment.desired, assignment.min, assignment.max), (2, 1, 4));
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let settings: Settings =
            serde_yaml::from_str("cluster_name: c\nregistry_table: t\n").unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.http_acceptance, vec![200]);
        assert!(settings.insecure_http_probes);
        assert!(settings.global_schedule.is_none());
        assert_eq!(settings.schedules_table, "fleet-app-schedules");
        assert_eq!(settings.operation_log_table, "fleet-operation-logs");
    }

    #[test]
    fn test_missing_cluster_name_refused() {
        let result: Result<Settings, _> = serde_yaml::from_str("registry_table: t\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_registry_table_refused() {
        let result: Result<Settings, _> = serde_yaml::from_str("cluster_name: c\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_acceptance_refused() {
        let settings: Settings =
            serde_yaml::from_str("cluster_name: c\nregistry_table: t\nhttp_acceptance: []\n")
                .unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_schedule_time_refused() {
        let yaml = "cluster_name: c\nregistry_table: t\nglobal_schedule:\n  start_time: \"25:00\"\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_timezone_refused() {
        let yaml = "cluster_name: c\nregistry_table: t\nglobal_schedule:\n  timezone: Mars/Olympus\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_inverted_assignment_refused() {
        let yaml = r#"
cluster_name: c
registry_table: t
nodegroup_defaults:
  a:
    nodegroup: ng
    desired: 5
    min: 1
    max: 4
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_namespace_mapping_overrides_discovered() {
        let settings: Settings = serde_yaml::from_str(FULL_YAML).unwrap();
        assert_eq!(
            settings.namespace_for("svc.example.com", Some("discovered-ns")),
            "svc"
        );
    }

    #[test]
    fn test_namespace_falls_back_to_discovered() {
        let settings: Settings = serde_yaml::from_str(FULL_YAML).unwrap();
        assert_eq!(settings.namespace_for("other.example.com", Some("web")), "web");
    }

    #[test]
    fn test_namespace_falls_back_to_default() {
        let settings: Settings = serde_yaml::from_str(FULL_YAML).unwrap();
        assert_eq!(settings.namespace_for("other.example.com", None), "default");
    }

    #[test]
    fn test_accepts_respects_configured_set() {
        let settings: Settings = serde_yaml::from_str(FULL_YAML).unwrap();
        assert!(settings.accepts(200));
        assert!(settings.accepts(405));
        assert!(!settings.accepts(302));
    }

    #[test]
    fn test_schedule_defaults() {
        let yaml = "cluster_name: c\nregistry_table: t\nglobal_schedule: {}\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        let schedule = settings.global_schedule.unwrap();
        assert_eq!(schedule.timezone, "Asia/Kolkata");
        assert_eq!(schedule.start_time, "09:00");
        assert_eq!(schedule.stop_time, "22:00");
        assert!(schedule.weekend_shutdown);
        assert_eq!(schedule.weekdays_start.len(), 5);
    }

    #[test]
    fn test_pricing_defaults_to_empty() {
        let settings: Settings =
            serde_yaml::from_str("cluster_name: c\nregistry_table: t\n").unwrap();
        assert_eq!(settings.pricing.network_price_per_gb, 0.0);
        assert!(settings.pricing.instance_hourly_prices.is_empty());
    }
}
