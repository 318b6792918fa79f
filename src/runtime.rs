use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::cloud::auth::EksClientFactory;
use crate::cloud::compute::{Compute, Ec2Compute};
use crate::cloud::nodegroups::{EksNodegroups, NodegroupControl};
use crate::cloud::probes::{HttpProber, ReqwestProber};
use crate::cloud::workloads::{KubeWorkloads, WorkloadControl};
use crate::config::Settings;
use crate::oplog::{DynamoOperationLog, OperationLog};
use crate::registry::{DynamoRegistry, RegistryStore};

/* ============================= RUNTIME ============================= */

/// Explicit context passed into every component: configuration plus one
/// handle per adapter seam. There are no process-wide singletons; tests
/// assemble a `Runtime` from in-memory fakes.
#[derive(Clone)]
pub struct Runtime {
    pub settings: Arc<Settings>,
    pub compute: Arc<dyn Compute>,
    pub nodegroups: Arc<dyn NodegroupControl>,
    pub workloads: Arc<dyn WorkloadControl>,
    pub prober: Arc<dyn HttpProber>,
    pub registry: Arc<dyn RegistryStore>,
    pub oplog: Arc<dyn OperationLog>,
}

impl Runtime {
    /// Wire up the production adapters from ambient AWS configuration.
    pub async fn connect(settings: Settings) -> anyhow::Result<Self> {
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        aws.region().context("aws region is not configured")?;

        if settings.insecure_http_probes {
            warn!("outbound probes will not verify tls certificates (insecure_http_probes = true)");
        }

        let dynamo = aws_sdk_dynamodb::Client::new(&aws);
        let prober = ReqwestProber::new(settings.http_acceptance.clone(), settings.insecure_http_probes)
            .context("failed to build http prober")?;
        let factory = EksClientFactory::new(&aws, settings.cluster_name.clone());

        let runtime = Self {
            compute: Arc::new(Ec2Compute::new(aws_sdk_ec2::Client::new(&aws))),
            nodegroups: Arc::new(EksNodegroups::new(
                aws_sdk_eks::Client::new(&aws),
                settings.cluster_name.clone(),
            )),
            workloads: Arc::new(KubeWorkloads::new(factory)),
            prober: Arc::new(prober),
            registry: Arc::new(DynamoRegistry::new(
                dynamo.clone(),
                settings.registry_table.clone(),
                settings.schedules_table.clone(),
            )),
            oplog: Arc::new(DynamoOperationLog::new(dynamo, settings.operation_log_table.clone())),
            settings: Arc::new(settings),
        };

        info!(cluster = %runtime.settings.cluster_name, "runtime_connected");
        Ok(runtime)
    }
}
