pub mod auth;
pub mod compute;
pub mod nodegroups;
pub mod probes;
pub mod workloads;
