use std::sync::Arc;

use clap::Parser;

use inform_core::config;
use inform_core::devicekeys;
use inform_core::keybag::KeyBag;
use inform_core::reconcile::Reconciler;
use inform_core::server;

#[derive(Parser)]
#[command(about = "Controller-side inform protocol daemon")]
struct Args {
    #[arg(long, default_value = "inform.toml")]
    config: String,

    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("inform_core=info,informd=info")
        .init();

    let args = Args::parse();

    let cfg = match config::load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let devices = match devicekeys::load_device_map(std::path::Path::new(&cfg.key_bag_path)) {
        Ok(devices) => devices,
        Err(e) => {
            tracing::error!("Failed to load key bag: {e}");
            std::process::exit(1);
        }
    };

    let key_bag = devicekeys::key_bag_from_device_map(&devices);
    let keys: Arc<dyn KeyBag> = Arc::new(key_bag);

    let reconciler = Arc::new(Reconciler::new(keys, cfg.noop_interval_seconds));

    let surface = reconciler.control_surface();
    for (mac, record) in &devices {
        for port in &record.ports {
            surface.register(mac, port.port);
        }
    }
    tracing::info!(devices = devices.len(), "Key bag loaded, ports registered");

    let listen_addr = args.listen.unwrap_or(cfg.listen_addr);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "informd listening");

    axum::serve(listener, server::router(reconciler)).await?;

    Ok(())
}
