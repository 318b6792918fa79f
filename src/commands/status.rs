use fleet_controller::config::Settings;
use fleet_controller::runtime::Runtime;
use fleet_controller::status;

pub async fn run(settings: Settings, app: &str) -> anyhow::Result<()> {
    let rt = Runtime::connect(settings).await?;

    match status::aggregate(&rt, app).await? {
        Some(composite) => {
            println!("{}", serde_json::to_string_pretty(&composite)?);
            Ok(())
        }
        None => anyhow::bail!("application {app} not found in registry"),
    }
}
