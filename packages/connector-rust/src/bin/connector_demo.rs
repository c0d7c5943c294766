//! Exercises the connector against the in-process simulated platform.
//!
//! Loads a service catalog (or a built-in one), acquires every service from
//! several concurrent tasks, optionally kills one service to show a
//! platform-initiated disconnect, then tears everything down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use remoter_connector::{
    ConnectorConfig, ConnectorRegistry, PlatformContext, SimulatedBehavior, SimulatedBinder,
    SimulatedPlatform, SimulatedService,
};
use remoter_core::{ComponentName, ServiceDescriptor};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "connector-demo", about = "Bind to simulated services through the connector")]
struct Args {
    /// JSON catalog of simulated services. Uses a built-in catalog if omitted.
    #[arg(long, env = "REMOTER_CATALOG")]
    catalog: Option<PathBuf>,

    /// Fail acquires that wait longer than this many milliseconds.
    #[arg(long, env = "REMOTER_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: Option<u64>,

    /// Artificial delay before the simulated platform answers a bind.
    #[arg(long, default_value_t = 50)]
    bind_latency_ms: u64,

    /// Concurrent acquire calls issued per service.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Identity suffix appended to every lookup.
    #[arg(long, default_value = "")]
    suffix: String,

    /// Component (`package/class` or `package/.Class`) to kill after connecting.
    #[arg(long)]
    kill: Option<String>,
}

fn builtin_catalog() -> Vec<SimulatedService> {
    vec![
        SimulatedService::new(ComponentName::new("com.example.echo", "com.example.echo.EchoService"))
            .with_action("remoter.ECHO"),
        SimulatedService::new(ComponentName::new("com.example.mute", "com.example.mute.MuteService"))
            .with_behavior(SimulatedBehavior::NullHandle),
        SimulatedService::new(ComponentName::new("com.example.ghost", "com.example.ghost.GhostService"))
            .with_behavior(SimulatedBehavior::Reject),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let catalog = match &args.catalog {
        Some(path) => SimulatedPlatform::load_catalog(path)?,
        None => builtin_catalog(),
    };
    let platform = Arc::new(
        SimulatedPlatform::from_catalog(catalog.clone())
            .with_bind_latency(Duration::from_millis(args.bind_latency_ms)),
    );

    let mut config = ConnectorConfig::default();
    if let Some(ms) = args.handshake_timeout_ms {
        config = config.with_handshake_timeout(Duration::from_millis(ms));
    }
    let context = PlatformContext::current(platform.clone(), platform.clone());
    let registry = ConnectorRegistry::new(context, config);

    info!(services = catalog.len(), "connector demo starting");

    for service in &catalog {
        let connection = match service.actions.first() {
            Some(action) => registry.get_for_action(action, &args.suffix)?,
            None => registry.get(
                &ServiceDescriptor::for_component(service.component.clone()),
                &args.suffix,
            )?,
        };

        let identity = connection.identity().clone();
        connection.on_disconnect(Some(Arc::new(move || {
            warn!(identity = %identity, "service went away");
        })));

        let mut tasks = Vec::with_capacity(args.concurrency);
        for _ in 0..args.concurrency {
            let connection = Arc::clone(&connection);
            tasks.push(tokio::spawn(async move { connection.acquire().await }));
        }
        for task in tasks {
            match task.await? {
                Ok(handle) => {
                    let instance = handle
                        .downcast_ref::<SimulatedBinder>()
                        .map(|binder| binder.instance.to_string())
                        .unwrap_or_default();
                    info!(identity = %connection.identity(), instance = %instance, "acquired handle");
                }
                Err(err) => warn!(identity = %connection.identity(), error = %err, "acquire failed"),
            }
        }
    }

    if let Some(target) = &args.kill {
        let component = ComponentName::unflatten_from_string(target)
            .ok_or_else(|| anyhow::anyhow!("invalid component name: {target}"))?;
        let notified = platform.kill(&component);
        info!(component = %component, notified, "killed service");
        // Let the connection drivers process the disconnect before teardown.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let torn_down = registry.disconnect_all().await;
    info!(
        connections = torn_down,
        binds = platform.bind_count(),
        unbinds = platform.unbind_count(),
        "connector demo finished"
    );
    Ok(())
}
