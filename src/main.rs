use heartbeat_discovery::common::interval::parse_interval;
use heartbeat_discovery::common::net::local_address;
use heartbeat_discovery::common::signal::Termination;
use heartbeat_discovery::discovery::engine::DiscoveryEngine;
use heartbeat_discovery::discovery::types::DiscoveryConfig;
use heartbeat_discovery::registration::engine::RegistrationEngine;
use heartbeat_discovery::registration::types::RegistrationConfig;
use heartbeat_discovery::registry::store::{DurableStore, InMemoryRegistry};
use heartbeat_discovery::registry::types::RegistryConfig;
use heartbeat_discovery::transport::memory::InMemoryTransport;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!(
            "Usage: {} [--name <service>] [--address <addr:port>] [--weight <n>] [--interval <2s>] [--wait <5s>] [--lease <30s>]",
            args[0]
        );
        eprintln!(
            "Example: {} --name billing --address 10.0.0.1:9000 --weight 3 --interval 2s",
            args[0]
        );
        std::process::exit(1);
    }

    let mut name = "demo".to_string();
    let mut address = format!("{}:9000", local_address());
    let mut weight: usize = 1;
    let mut interval = Duration::from_secs(2);
    let mut wait = Duration::from_secs(5);
    let mut lease_ttl: Option<Duration> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--name", Some(value)) => name = value,
            ("--address", Some(value)) => address = value,
            ("--weight", Some(value)) => weight = value.parse()?,
            ("--interval", Some(value)) => interval = parse_interval(&value)?,
            ("--wait", Some(value)) => wait = parse_interval(&value)?,
            ("--lease", Some(value)) => lease_ttl = Some(parse_interval(&value)?),
            (flag, _) => {
                tracing::warn!("Ignoring argument {}", flag);
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    // 1. Shared substrate: one durable store, a view for each side
    let store = DurableStore::new();
    let transport = InMemoryTransport::new();
    let server_registry = InMemoryRegistry::attach(store.clone(), RegistryConfig { lease_ttl });
    let client_registry = InMemoryRegistry::attach(store, RegistryConfig { lease_ttl });
    let follower = client_registry.clone().follow_sync();

    // 2. Registration (signals are handled below, together with discovery):
    let mut termination = Termination::listen()?;
    let registration = RegistrationEngine::new(
        server_registry,
        transport.clone(),
        RegistrationConfig {
            deregister_on_interrupt: false,
            exit_on_interrupt: false,
        },
    )
    .register(&name, &address, weight, interval)
    .await?;

    // 3. Discovery:
    let discovery = DiscoveryEngine::new(client_registry, transport, DiscoveryConfig::default());
    discovery.discover(&name, wait, |address: String| async move {
        tracing::info!("Connected to {}", address);
        Ok(())
    });

    tracing::info!("Press Ctrl+C to shutdown");
    let signal = termination.recv().await;
    tracing::info!("Received {}, shutting down", signal);

    // 4. Teardown:
    discovery.shutdown();
    follower.abort();
    registration.stop();
    registration.stopped().await;

    tracing::info!(
        "Service {} at {} deregistered",
        registration.name(),
        registration.address()
    );
    Ok(())
}
