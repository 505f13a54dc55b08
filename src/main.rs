use replicated_kv::config::{self, Command};
use replicated_kv::discovery::node::DiscoveryNode;
use replicated_kv::storage::node::StorageNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let command = match config::from_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };

    match command {
        Command::Discovery(settings) => {
            let node = DiscoveryNode::start(settings).await?;
            tracing::info!("Press Ctrl+C to shutdown");

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down discovery");
            node.shutdown().await;
        }
        Command::Storage(settings) => {
            tracing::info!(
                "Starting storage node '{}' on {} (discovery at {}, log at {})",
                settings.service.name,
                settings.service.bind,
                settings.discovery_address,
                settings.change_log.changes_file.display()
            );

            let node = StorageNode::start(settings).await?;
            tracing::info!(
                "Node {} running as {}",
                node.service.node_id(),
                node.role
            );
            tracing::info!("Press Ctrl+C to shutdown");

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down storage node");
            node.shutdown().await;
        }
    }

    Ok(())
}
