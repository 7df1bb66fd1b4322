use axum::{Router, extract::Extension};
use clap::Parser;
use fedplane::catalog::{MemoryCatalog, Node};
use fedplane::config::{CmdArgs, NodeConfig};
use fedplane::storage::{HttpShardClient, KvService, ShardStore};
use fedplane::transfer::{HttpTransferPeer, TransferPeer, TransferService};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CmdArgs::parse();
    let config = NodeConfig::load(&args)?;

    tracing::info!("Starting party {} on {}", config.party_id, args.bind);

    // 1. Catalog and storage:
    let catalog = Arc::new(MemoryCatalog::with_nodes(
        config.nodes.iter().map(|entry| Node::new(entry.node_id, entry.addr)),
    ));
    let shards = Arc::new(ShardStore::new());
    let kv = Arc::new(KvService::new(
        catalog,
        Arc::new(HttpShardClient::new()),
        config.kv_settings(),
    ));

    // 2. Transfers:
    let mut remotes: HashMap<String, Arc<dyn TransferPeer>> = HashMap::new();
    for (party_id, addr) in &config.parties {
        if *party_id == config.party_id {
            continue;
        }
        tracing::info!("Party {} reachable at {}", party_id, addr);
        remotes.insert(party_id.clone(), Arc::new(HttpTransferPeer::new(*addr)));
    }
    let transfers = TransferService::start(
        kv.clone(),
        &config.party_id,
        remotes,
        config.transfer_settings(),
    );

    // 3. HTTP Router:
    let app = Router::new()
        .merge(fedplane::transfer::handlers::routes())
        .merge(fedplane::storage::handlers::routes())
        .layer(Extension(transfers))
        .layer(Extension(kv))
        .layer(Extension(shards));

    // 4. Start HTTP server:
    tracing::info!("HTTP server listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
