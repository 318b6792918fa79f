use fleet_controller::config::Settings;
use fleet_controller::runtime::Runtime;
use fleet_controller::scheduler;
use fleet_controller::server::Dispatcher;

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let Some(schedule) = settings.global_schedule.clone() else {
        anyhow::bail!("global_schedule is not configured; the scheduler cannot run");
    };

    println!("Starting scheduler (tick every 5 minutes)...");
    println!("  Timezone ........... {}", schedule.timezone);
    println!("  Start window ....... {} on {}", schedule.start_time, schedule.weekdays_start.join(", "));
    println!("  Stop window ........ {} on {}", schedule.stop_time, schedule.weekdays_stop.join(", "));
    println!("  Weekend shutdown ... {}", schedule.weekend_shutdown);
    println!();
    println!("Press Ctrl+C to stop.");

    let rt = Runtime::connect(settings).await?;
    let dispatcher = Dispatcher::start(rt.clone());
    scheduler::run_loop(rt, dispatcher).await
}
