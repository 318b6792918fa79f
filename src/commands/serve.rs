use fleet_controller::config::Settings;
use fleet_controller::runtime::Runtime;
use fleet_controller::server;

pub async fn run(settings: Settings, addr: &str) -> anyhow::Result<()> {
    println!("Starting fleet controller API on {addr}...");
    println!();
    println!("  Available endpoints:");
    println!("    GET  /apps ................ Live composite status of every application");
    println!("    GET  /apps/{{name}} ......... Live composite status of one application");
    println!("    GET  /status/{{name}} ....... HTTP-only UP/DOWN verdict");
    println!("    GET  /status/quick?app= ... 3-second probe with UNKNOWN on timeout");
    println!("    POST /start ............... Start an application (202, async)");
    println!("    POST /stop ................ Stop an application (202, async)");
    println!();
    println!("Press Ctrl+C to stop.");

    let rt = Runtime::connect(settings).await?;
    server::serve(rt, addr).await
}
