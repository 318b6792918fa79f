use fleet_controller::config::Settings;
use fleet_controller::oplog::{Action, OperationEntry, Source};
use fleet_controller::orchestrator;
use fleet_controller::runtime::Runtime;

pub async fn start(settings: Settings, app: &str, dry_run: bool) -> anyhow::Result<()> {
    let rt = Runtime::connect(settings).await?;

    if dry_run {
        let preview = orchestrator::build_start_preview(&rt, app).await;
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    record(&rt, app, Action::Start).await;
    let outcome = orchestrator::start_application(&rt, app).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    anyhow::ensure!(outcome.success, "start completed with errors");
    Ok(())
}

pub async fn stop(settings: Settings, app: &str) -> anyhow::Result<()> {
    let rt = Runtime::connect(settings).await?;

    record(&rt, app, Action::Stop).await;
    let outcome = orchestrator::stop_application(&rt, app).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    anyhow::ensure!(outcome.success, "stop completed with errors");
    Ok(())
}

async fn record(rt: &Runtime, app: &str, action: Action) {
    let entry = OperationEntry::new(app, action, Source::Api, "operator cli request");
    if let Err(e) = rt.oplog.record(&entry).await {
        tracing::warn!(app, error = %e, "operation_log_write_failed");
    }
}
