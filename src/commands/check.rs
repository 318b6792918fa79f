use fleet_controller::config::Settings;
use fleet_controller::error::CloudError;
use fleet_controller::runtime::Runtime;

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    println!("Checking fleet controller dependencies...\n");

    println!(
        "  Configuration ............ OK ({} namespaces, {} nodegroup assignments)",
        settings.app_namespaces.len(),
        settings.nodegroup_defaults.len()
    );

    let first_assignment = settings.nodegroup_defaults.values().next().cloned();
    let rt = Runtime::connect(settings).await?;

    print!("  Registry ................. ");
    match rt.registry.scan().await {
        Ok(records) => println!("OK ({} applications)", records.len()),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("cannot read the application registry: {e}");
        }
    }

    print!("  Nodegroup access ......... ");
    match first_assignment {
        None => println!("skipped (no nodegroup assignments configured)"),
        Some(assignment) => match rt.nodegroups.describe(&assignment.nodegroup).await {
            Ok(view) => println!("OK ({} is {})", view.name, view.status.as_str()),
            Err(CloudError::NotFound(_)) => {
                println!("WARN (nodegroup {} not found)", assignment.nodegroup);
            }
            Err(e) => {
                println!("FAIL");
                anyhow::bail!("cannot describe nodegroup {}: {e}", assignment.nodegroup);
            }
        },
    }

    print!("  Kubernetes API ........... ");
    match rt.workloads.list_pods("default").await {
        Ok(pods) => println!("OK ({} pods in default)", pods.len()),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("cannot reach the kubernetes api: {e}");
        }
    }

    println!("\nAll checks passed.");
    Ok(())
}
