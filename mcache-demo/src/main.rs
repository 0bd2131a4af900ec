use mcache::{ExpiringMap, MapEvent};
use shared::config::MapConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Requests allowed per client inside one TTL window
const RATE_LIMIT: u32 = 5;
const CLIENTS: [&str; 3] = ["alice", "bob", "carol"];
const ROUNDS: u32 = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = MapConfig::from_env();
    info!(
        "Starting mcache demo with ttl={:?} sweep_interval={:?}",
        config.ttl, config.sweep_interval
    );

    let lookups: Arc<ExpiringMap<u64, String>> = Arc::new(ExpiringMap::with_config(config)?);
    let counters: Arc<ExpiringMap<String, u32>> = Arc::new(ExpiringMap::with_config(config)?);

    let listener = tokio::spawn(log_events(counters.subscribe()));

    tokio::select! {
        _ = run_workload(Arc::clone(&lookups), Arc::clone(&counters), config.ttl) => {
            info!("Workload finished");
        }
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    info!(
        "Final state: lookups={} counters={} lookup_stats={:?}",
        lookups.count(),
        counters.count(),
        lookups.stats()
    );

    lookups.shutdown().await?;
    counters.shutdown().await?;

    // Dropping the last handle closes the event channel and ends the listener
    drop(counters);
    if let Err(e) = listener.await {
        warn!("Event listener ended abnormally: {}", e);
    }

    info!("mcache demo shutting down");
    Ok(())
}

async fn run_workload(
    lookups: Arc<ExpiringMap<u64, String>>,
    counters: Arc<ExpiringMap<String, u32>>,
    ttl: Duration,
) {
    for round in 0..ROUNDS {
        for n in 0..8u64 {
            let rendered = memoized_render(&lookups, n % 4).await;
            debug!("round {} lookup {} -> {}", round, n, rendered);
        }

        for (i, client) in CLIENTS.iter().enumerate() {
            for _ in 0..(i as u32 + 2) * 2 {
                if !allow_request(&counters, client) {
                    warn!("Client {} rate limited in round {}", client, round);
                    break;
                }
            }
        }

        info!(
            "Round {} done: {} memoized lookups, {} active clients, hit ratio {:.2}",
            round,
            lookups.count(),
            counters.count(),
            lookups.stats().hit_ratio()
        );

        // Every other round, let everything expire
        let pause = if round % 2 == 1 { ttl + ttl / 2 } else { ttl / 4 };
        tokio::time::sleep(pause).await;
    }
}

/// Returns the cached rendering of `id`, computing it on a miss.
async fn memoized_render(lookups: &ExpiringMap<u64, String>, id: u64) -> String {
    if let Some(hit) = lookups.get(&id) {
        return hit;
    }

    // Stand-in for a slow backend call
    tokio::time::sleep(Duration::from_millis(5)).await;
    let rendered = format!("record-{id:04}");
    lookups.set(id, rendered.clone());
    rendered
}

/// Counts admitted requests per client; a counter is forgotten one TTL after
/// the client's last admitted request.
///
/// The read-modify-write spans two calls, so concurrent callers for the same
/// client may over-admit slightly. The demo drives it from one task.
fn allow_request(counters: &ExpiringMap<String, u32>, client: &str) -> bool {
    match counters.get(client) {
        Some(used) if used >= RATE_LIMIT => false,
        Some(used) => {
            counters.set(client.to_string(), used + 1);
            true
        }
        None => {
            counters.set(client.to_string(), 1);
            true
        }
    }
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<MapEvent<String>>) {
    loop {
        match rx.recv().await {
            Ok(MapEvent::Expired { key, .. }) => info!("Rate limit window for {} expired", key),
            Ok(event) => debug!("counter event: {:?}", event),
            Err(RecvError::Lagged(skipped)) => warn!("Event listener lagged, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

// Graceful shutdown handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
