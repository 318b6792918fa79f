//! In-memory fakes for the adapter seams, shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cloud::compute::{Compute, VmInfo, VmLookup, VmState};
use crate::cloud::nodegroups::{NgStatus, NodegroupControl, NodegroupView, ScalingTarget};
use crate::cloud::probes::{
    HttpProber, HttpVerdict, ProbeOutcome, QuickOutcome, QuickVerdict, TcpVerdict,
};
use crate::cloud::workloads::{PodView, Workload, WorkloadControl, WorkloadKind};
use crate::config::{NodegroupAssignment, Pricing, Settings};
use crate::error::CloudError;
use crate::oplog::{OperationEntry, OperationLog};
use crate::registry::{AppRecord, HintField, RegistryStore};
use crate::runtime::Runtime;

/* ============================= EVENT LOG ============================= */

/// Ordered record of every mutating call across the fakes, for asserting
/// phase sequencing.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first event with the given prefix.
    pub fn first_index(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|e| e.starts_with(prefix))
    }
}

/* ============================= REGISTRY ============================= */

#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<BTreeMap<String, AppRecord>>,
    flags: Mutex<HashMap<String, bool>>,
    pub fail_scan: AtomicBool,
}

impl MemoryRegistry {
    pub fn insert(&self, record: AppRecord) {
        self.records.lock().unwrap().insert(record.app_name.clone(), record);
    }

    pub fn record(&self, app_name: &str) -> Option<AppRecord> {
        self.records.lock().unwrap().get(app_name).cloned()
    }

    pub fn set_schedule_enabled(&self, app_name: &str, enabled: bool) {
        self.flags.lock().unwrap().insert(app_name.to_string(), enabled);
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn get(&self, app_name: &str) -> Result<Option<AppRecord>, CloudError> {
        Ok(self.record(app_name))
    }

    async fn scan(&self) -> Result<Vec<AppRecord>, CloudError> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(CloudError::Transient("registry scan failed".to_string()));
        }
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn put(&self, record: &AppRecord) -> Result<(), CloudError> {
        record.validate()?;
        self.insert(record.clone());
        Ok(())
    }

    async fn set_hint(&self, app_name: &str, field: HintField, value: &str) -> Result<(), CloudError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(app_name)
            .ok_or_else(|| CloudError::NotFound(format!("app {app_name} not found")))?;
        let value = Some(value.to_string());
        match field {
            HintField::Status => record.status = value,
            HintField::PostgresState => record.postgres_state = value,
            HintField::Neo4jState => record.neo4j_state = value,
            HintField::NodegroupState => record.nodegroup_state = value,
        }
        Ok(())
    }

    async fn schedule_enabled(&self, app_name: &str) -> Result<Option<bool>, CloudError> {
        Ok(self.flags.lock().unwrap().get(app_name).copied())
    }
}

/* ============================= COMPUTE ============================= */

#[derive(Default)]
pub struct FakeCompute {
    vms: Mutex<Vec<(String, VmInfo)>>,
    pub mutations: AtomicUsize,
    delay: Mutex<Duration>,
    pub events: EventLog,
}

impl FakeCompute {
    pub fn add_vm(&self, ip: &str, id: &str, state: VmState) {
        self.vms
            .lock()
            .unwrap()
            .push((ip.to_string(), VmInfo { id: id.to_string(), state }));
    }

    pub fn state_of(&self, id: &str) -> Option<VmState> {
        self.vms
            .lock()
            .unwrap()
            .iter()
            .find(|(_, vm)| vm.id == id)
            .map(|(_, vm)| vm.state)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn set_state(&self, id: &str, state: VmState) {
        let mut vms = self.vms.lock().unwrap();
        if let Some((_, vm)) = vms.iter_mut().find(|(_, vm)| vm.id == id) {
            vm.state = state;
        }
    }
}

#[async_trait]
impl Compute for FakeCompute {
    async fn find_vm_by_private_ip(&self, ip: &str) -> Result<VmLookup, CloudError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .vms
            .lock()
            .unwrap()
            .iter()
            .find(|(vm_ip, _)| vm_ip == ip)
            .map(|(_, vm)| vm.clone()))
    }

    async fn start_vm(&self, id: &str) -> Result<VmState, CloudError> {
        self.events.push(format!("start_vm:{id}"));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.set_state(id, VmState::Running);
        Ok(VmState::Running)
    }

    async fn stop_vm(&self, id: &str) -> Result<(), CloudError> {
        self.events.push(format!("stop_vm:{id}"));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.set_state(id, VmState::Stopped);
        Ok(())
    }
}

/* ============================= NODEGROUPS ============================= */

#[derive(Default)]
pub struct FakeNodegroups {
    groups: Mutex<HashMap<String, NodegroupView>>,
    pub mutations: AtomicUsize,
    pub events: EventLog,
}

impl FakeNodegroups {
    pub fn add(&self, view: NodegroupView) {
        self.groups.lock().unwrap().insert(view.name.clone(), view);
    }

    pub fn view(&self, name: &str) -> Option<NodegroupView> {
        self.groups.lock().unwrap().get(name).cloned()
    }
}

pub fn nodegroup(name: &str, status: NgStatus, desired: i32, min: i32, max: i32) -> NodegroupView {
    NodegroupView {
        name: name.to_string(),
        status,
        desired,
        min,
        max,
        health_issues: 0,
        autoscaling_groups: vec![format!("asg-{name}")],
    }
}

#[async_trait]
impl NodegroupControl for FakeNodegroups {
    async fn describe(&self, name: &str) -> Result<NodegroupView, CloudError> {
        self.view(name)
            .ok_or_else(|| CloudError::NotFound(format!("nodegroup {name} not found")))
    }

    async fn update_scaling(&self, name: &str, target: ScalingTarget) -> Result<(), CloudError> {
        let target = target.clamped();
        self.events
            .push(format!("update_nodegroup:{name}:{}/{}/{}", target.desired, target.min, target.max));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut groups = self.groups.lock().unwrap();
        let view = groups
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("nodegroup {name} not found")))?;
        view.desired = target.desired;
        view.min = target.min;
        view.max = target.max;
        view.status = NgStatus::Active;
        Ok(())
    }
}

/* ============================= WORKLOADS ============================= */

#[derive(Default)]
pub struct FakeWorkloads {
    workloads: Mutex<Vec<Workload>>,
    pods: Mutex<Vec<PodView>>,
    pub pods_unauthorized: AtomicBool,
    pub mutations: AtomicUsize,
    delay: Mutex<Duration>,
    pub events: EventLog,
}

impl FakeWorkloads {
    pub fn add_workload(&self, kind: WorkloadKind, name: &str, replicas: i32, owned: bool) {
        self.workloads.lock().unwrap().push(Workload {
            kind,
            name: name.to_string(),
            replicas,
            owned,
        });
    }

    pub fn set_pods(&self, pods: Vec<PodView>) {
        *self.pods.lock().unwrap() = pods;
    }

    pub fn replicas_of(&self, name: &str) -> Option<i32> {
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.replicas)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn scalable_all_zero(&self) -> bool {
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|w| matches!(w.kind, WorkloadKind::Deployment | WorkloadKind::StatefulSet))
            .all(|w| w.replicas == 0)
    }
}

#[async_trait]
impl WorkloadControl for FakeWorkloads {
    async fn list_workloads(&self, _namespace: &str) -> Result<Vec<Workload>, CloudError> {
        Ok(self.workloads.lock().unwrap().clone())
    }

    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), CloudError> {
        self.events.push(format!("scale:{}:{name}:{replicas}", kind.as_str()));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        {
            let mut workloads = self.workloads.lock().unwrap();
            if let Some(w) = workloads.iter_mut().find(|w| w.kind == kind && w.name == name) {
                w.replicas = replicas;
            }
        }
        // Scaling the last workload to zero drains the namespace.
        if replicas == 0 && self.scalable_all_zero() {
            self.pods.lock().unwrap().clear();
        }
        // Scaling up brings one ready pod per workload online.
        if replicas > 0 {
            self.pods.lock().unwrap().push(ready_pod(&format!("{name}-0")));
        }
        Ok(())
    }

    async fn restart_daemonset(&self, _namespace: &str, name: &str) -> Result<(), CloudError> {
        self.events.push(format!("restart_daemonset:{name}"));
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str) -> Result<Vec<PodView>, CloudError> {
        if self.pods_unauthorized.load(Ordering::SeqCst) {
            return Err(CloudError::Unauthorized(
                "pods is forbidden: cannot list resource \"pods\"".to_string(),
            ));
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn wait_pods_terminated(
        &self,
        _namespace: &str,
        _deadline: Duration,
    ) -> Result<bool, CloudError> {
        self.events.push("drain_wait".to_string());
        Ok(self.pods.lock().unwrap().iter().all(|p| p.is_terminal()))
    }
}

/* ============================= PROBER ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeHttp {
    Code(u16),
    Unreachable,
}

pub struct FakeProber {
    responses: Mutex<HashMap<String, FakeHttp>>,
    pub acceptance: Vec<u16>,
    delay: Mutex<Duration>,
}

impl Default for FakeProber {
    fn default() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            acceptance: vec![200],
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeProber {
    pub fn set(&self, hostname: &str, response: FakeHttp) {
        self.responses.lock().unwrap().insert(hostname.to_string(), response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn lookup(&self, hostname: &str) -> FakeHttp {
        self.responses
            .lock()
            .unwrap()
            .get(hostname)
            .copied()
            .unwrap_or(FakeHttp::Unreachable)
    }
}

#[async_trait]
impl HttpProber for FakeProber {
    async fn head_probe(&self, hostname: &str, _timeout: Duration) -> ProbeOutcome {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.lookup(hostname) {
            FakeHttp::Code(code) => ProbeOutcome {
                verdict: if self.acceptance.contains(&code) {
                    HttpVerdict::Up
                } else {
                    HttpVerdict::Down
                },
                code: Some(code),
                latency_ms: Some(12),
            },
            FakeHttp::Unreachable => ProbeOutcome::unreachable(None),
        }
    }

    async fn quick_probe(&self, hostname: &str) -> QuickOutcome {
        match self.lookup(hostname) {
            FakeHttp::Code(code) => QuickOutcome {
                verdict: if self.acceptance.contains(&code) {
                    QuickVerdict::Up
                } else {
                    QuickVerdict::Down
                },
                code: Some(code),
            },
            FakeHttp::Unreachable => QuickOutcome { verdict: QuickVerdict::Unknown, code: None },
        }
    }

    async fn tcp_probe(&self, _host: &str, _port: u16, _timeout: Duration) -> TcpVerdict {
        TcpVerdict::Open
    }
}

/* ============================= OPERATION LOG ============================= */

#[derive(Default)]
pub struct FakeOplog {
    entries: Mutex<Vec<OperationEntry>>,
}

impl FakeOplog {
    pub fn entries(&self) -> Vec<OperationEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationLog for FakeOplog {
    async fn record(&self, entry: &OperationEntry) -> Result<(), CloudError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/* ============================= FIXTURE ============================= */

pub struct TestFixture {
    pub registry: Arc<MemoryRegistry>,
    pub compute: Arc<FakeCompute>,
    pub nodegroups: Arc<FakeNodegroups>,
    pub workloads: Arc<FakeWorkloads>,
    pub prober: Arc<FakeProber>,
    pub oplog: Arc<FakeOplog>,
    pub settings: Settings,
    pub events: EventLog,
}

impl TestFixture {
    pub fn new() -> Self {
        let events = EventLog::default();
        let compute = Arc::new(FakeCompute { events: events.clone(), ..Default::default() });
        let nodegroups = Arc::new(FakeNodegroups { events: events.clone(), ..Default::default() });
        let workloads = Arc::new(FakeWorkloads { events: events.clone(), ..Default::default() });
        Self {
            registry: Arc::new(MemoryRegistry::default()),
            compute,
            nodegroups,
            workloads,
            prober: Arc::new(FakeProber::default()),
            oplog: Arc::new(FakeOplog::default()),
            settings: test_settings(),
            events,
        }
    }

    pub fn assign_nodegroup(&mut self, app: &str, nodegroup: &str, desired: i32, min: i32, max: i32) {
        self.settings.nodegroup_defaults.insert(
            app.to_string(),
            NodegroupAssignment { nodegroup: nodegroup.to_string(), desired, min, max },
        );
    }

    pub fn cloud_mutations(&self) -> usize {
        self.compute.mutations.load(Ordering::SeqCst)
            + self.nodegroups.mutations.load(Ordering::SeqCst)
            + self.workloads.mutations.load(Ordering::SeqCst)
    }
}

pub fn runtime_with(fixture: &TestFixture) -> Runtime {
    Runtime {
        settings: Arc::new(fixture.settings.clone()),
        compute: fixture.compute.clone(),
        nodegroups: fixture.nodegroups.clone(),
        workloads: fixture.workloads.clone(),
        prober: fixture.prober.clone(),
        registry: fixture.registry.clone(),
        oplog: fixture.oplog.clone(),
    }
}

pub fn test_settings() -> Settings {
    Settings {
        cluster_name: "test-eks".to_string(),
        registry_table: "test-registry".to_string(),
        schedules_table: "test-schedules".to_string(),
        operation_log_table: "test-oplog".to_string(),
        app_namespaces: HashMap::new(),
        nodegroup_defaults: HashMap::new(),
        global_schedule: None,
        http_acceptance: vec![200],
        insecure_http_probes: true,
        pricing: Pricing::default(),
    }
}

/* ============================= BUILDERS ============================= */

pub fn record_with_db(name: &str, postgres: Option<&str>, neo4j: Option<&str>) -> AppRecord {
    AppRecord {
        app_name: name.to_string(),
        namespace: Some("svc".to_string()),
        hostnames: vec![name.to_string()],
        postgres_host: postgres.map(str::to_string),
        postgres_port: postgres.map(|_| 5432),
        neo4j_host: neo4j.map(str::to_string),
        neo4j_port: neo4j.map(|_| 7687),
        ..Default::default()
    }
}

pub fn ready_pod(name: &str) -> PodView {
    PodView {
        name: name.to_string(),
        phase: "Running".to_string(),
        containers: vec![crate::cloud::workloads::ContainerView {
            restart_count: 0,
            ready: true,
            waiting_reason: None,
            terminated_reason: None,
        }],
        ..Default::default()
    }
}
