//! Entry point for the diskplug node agent.

use clap::Parser;
use diskplug_node::config::NodeArgs;
use diskplug_node::metadata;
use diskplug_node::service::NodeAgent;
use diskplug_shared::errors::DiskplugResult;
use tracing::info;

#[tokio::main]
async fn main() -> DiskplugResult<()> {
    // Set panic hook to ensure we see panics
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] Node agent panicked: {}", panic_info);
        std::process::exit(1);
    }));

    // Respects RUST_LOG, defaults to info
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    let args = NodeArgs::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "diskplug node agent starting");

    let config = args.into_config()?;
    let identity = metadata::resolve(&config).await?;
    info!(
        node_id = %identity.node_id,
        zone = %identity.zone,
        max_volumes = identity.max_volumes_per_node,
        "Node identity resolved"
    );

    let agent = NodeAgent::from_config(&config, identity)?;
    agent.run(config.transport.clone()).await
}
