use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_eks::error::ProvideErrorMetadata;
use aws_sdk_eks::types::{NodegroupScalingConfig, NodegroupStatus};
use tracing::{debug, info, warn};

use crate::error::{classify_aws, retry_once, CloudError};

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgStatus {
    Active,
    Creating,
    Updating,
    Degraded,
    CreateFailed,
    UpdateFailed,
    Deleting,
    Unknown,
}

impl NgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NgStatus::Active => "ACTIVE",
            NgStatus::Creating => "CREATING",
            NgStatus::Updating => "UPDATING",
            NgStatus::Degraded => "DEGRADED",
            NgStatus::CreateFailed => "CREATE_FAILED",
            NgStatus::UpdateFailed => "UPDATE_FAILED",
            NgStatus::Deleting => "DELETING",
            NgStatus::Unknown => "UNKNOWN",
        }
    }

    /// Statuses that will never converge to ACTIVE without intervention.
    pub fn is_failed(&self) -> bool {
        matches!(self, NgStatus::Degraded | NgStatus::CreateFailed | NgStatus::UpdateFailed)
    }
}

impl From<&NodegroupStatus> for NgStatus {
    fn from(status: &NodegroupStatus) -> Self {
        match status {
            NodegroupStatus::Active => NgStatus::Active,
            NodegroupStatus::Creating => NgStatus::Creating,
            NodegroupStatus::Updating => NgStatus::Updating,
            NodegroupStatus::Degraded => NgStatus::Degraded,
            NodegroupStatus::CreateFailed => NgStatus::CreateFailed,
            NodegroupStatus::UpdateFailed => NgStatus::UpdateFailed,
            NodegroupStatus::Deleting => NgStatus::Deleting,
            _ => NgStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodegroupView {
    pub name: String,
    pub status: NgStatus,
    pub desired: i32,
    pub min: i32,
    pub max: i32,
    pub health_issues: usize,
    pub autoscaling_groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingTarget {
    pub desired: i32,
    pub min: i32,
    pub max: i32,
}

impl ScalingTarget {
    /// Force `min <= desired <= max` by clamping the desired count.
    pub fn clamped(self) -> Self {
        let max = self.max.max(self.min);
        let desired = self.desired.clamp(self.min, max);
        Self { desired, min: self.min, max }
    }
}

pub const NODEGROUP_WAIT_DEADLINE: Duration = Duration::from_secs(600);
const NODEGROUP_WAIT_POLL: Duration = Duration::from_secs(15);

/* ============================= TRAIT ============================= */

#[async_trait]
pub trait NodegroupControl: Send + Sync {
    async fn describe(&self, name: &str) -> Result<NodegroupView, CloudError>;

    /// Apply a scaling config; the target is clamped before sending.
    async fn update_scaling(&self, name: &str, target: ScalingTarget) -> Result<(), CloudError>;

    /// Poll until ACTIVE with the desired count at or above `target_desired`
    /// and no health issues. Failed statuses surface as `Conflict`; the
    /// 600 s deadline surfaces as `Transient`.
    async fn wait_active(&self, name: &str, target_desired: i32) -> Result<(), CloudError> {
        let deadline = tokio::time::Instant::now() + NODEGROUP_WAIT_DEADLINE;
        loop {
            let view = self.describe(name).await?;
            debug!(
                nodegroup = name,
                status = view.status.as_str(),
                desired = view.desired,
                issues = view.health_issues,
                "nodegroup_wait_poll"
            );

            if view.status == NgStatus::Active && view.desired >= target_desired && view.health_issues == 0 {
                info!(nodegroup = name, desired = view.desired, "nodegroup_active");
                return Ok(());
            }
            if view.status.is_failed() {
                return Err(CloudError::Conflict(format!(
                    "nodegroup {name} is in {} state",
                    view.status.as_str()
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CloudError::Transient(format!(
                    "timeout waiting for nodegroup {name} to become ACTIVE"
                )));
            }
            tokio::time::sleep(NODEGROUP_WAIT_POLL).await;
        }
    }
}

/* ============================= EKS IMPLEMENTATION ============================= */

pub struct EksNodegroups {
    client: aws_sdk_eks::Client,
    cluster: String,
}

impl EksNodegroups {
    pub fn new(client: aws_sdk_eks::Client, cluster: impl Into<String>) -> Self {
        Self { client, cluster: cluster.into() }
    }
}

#[async_trait]
impl NodegroupControl for EksNodegroups {
    async fn describe(&self, name: &str) -> Result<NodegroupView, CloudError> {
        let output = retry_once(|| async {
            self.client
                .describe_nodegroup()
                .cluster_name(&self.cluster)
                .nodegroup_name(name)
                .send()
                .await
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("describe_nodegroup failed")))
        })
        .await?;

        let ng = output
            .nodegroup
            .ok_or_else(|| CloudError::NotFound(format!("nodegroup {name} not found")))?;

        let scaling = ng.scaling_config.unwrap_or_else(|| NodegroupScalingConfig::builder().build());
        Ok(NodegroupView {
            name: name.to_string(),
            status: ng.status.as_ref().map(NgStatus::from).unwrap_or(NgStatus::Unknown),
            desired: scaling.desired_size.unwrap_or(0),
            min: scaling.min_size.unwrap_or(0),
            max: scaling.max_size.unwrap_or(0),
            health_issues: ng.health.as_ref().map(|h| h.issues().len()).unwrap_or(0),
            autoscaling_groups: ng
                .resources
                .as_ref()
                .map(|r| {
                    r.auto_scaling_groups()
                        .iter()
                        .filter_map(|g| g.name().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    async fn update_scaling(&self, name: &str, target: ScalingTarget) -> Result<(), CloudError> {
        let target = target.clamped();
        retry_once(|| async {
            self.client
                .update_nodegroup_config()
                .cluster_name(&self.cluster)
                .nodegroup_name(name)
                .scaling_config(
                    NodegroupScalingConfig::builder()
                        .desired_size(target.desired)
                        .min_size(target.min)
                        .max_size(target.max)
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws(e.code(), e.message().unwrap_or("update_nodegroup_config failed")))
        })
        .await?;

        info!(
            nodegroup = name,
            desired = target.desired,
            min = target.min,
            max = target.max,
            "nodegroup_scaling_updated"
        );
        Ok(())
    }
}

/* ============================= TESTS ============================= */
