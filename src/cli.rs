use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleet-controller")]
#[command(about = "Application fleet lifecycle controller for EKS")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the lifecycle HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Run the five-minute auto-scheduling loop
    Schedule,

    /// Print the live composite status of one application
    Status {
        /// Application name (DNS-style hostname)
        app: String,
    },

    /// Start an application in the foreground
    Start {
        app: String,

        /// Preview the planned actions without executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Stop an application in the foreground
    Stop {
        app: String,
    },

    /// Check connectivity to the registry, EKS, and Kubernetes
    Check,
}
