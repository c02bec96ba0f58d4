//! TTL Cache demo
//!
//! Stores a few entries with different TTL modes, reports expirations as they
//! happen and prints the final statistics as JSON.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_cache::{CacheConfig, Ttl, TtlCache};

fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        global_ttl_ms = config.global_ttl.map(|ttl| ttl.as_millis() as u64),
        skip_ttl_extension_on_read = config.skip_ttl_extension_on_read,
        "Configuration loaded"
    );

    let cache = TtlCache::with_config(config).context("failed to create cache")?;
    cache.set_expiration_callback(|key: String, value: String| {
        info!(key = %key, value = %value, "Entry expired");
    });
    cache.set_new_item_callback(|key: &String, _: &String| {
        info!(key = %key, "Entry added");
    });
    // Anything tagged "pinned" survives its deadline.
    cache.set_check_expiration_callback(|_: &String, value: &String| value != "pinned");

    cache.set_with_ttl(
        "short".to_string(),
        "gone in 100ms".to_string(),
        Ttl::After(Duration::from_millis(100)),
    );
    cache.set_with_ttl(
        "medium".to_string(),
        "gone in 300ms".to_string(),
        Ttl::After(Duration::from_millis(300)),
    );
    cache.set_with_ttl(
        "pinned".to_string(),
        "pinned".to_string(),
        Ttl::After(Duration::from_millis(100)),
    );
    cache.set_with_ttl(
        "forever".to_string(),
        "never expires".to_string(),
        Ttl::Never,
    );
    cache.set("default".to_string(), "follows global ttl".to_string());

    for key in ["short", "forever", "default"] {
        let ttl_ms = cache
            .get_ttl(&key.to_string())
            .and_then(|ttl| ttl.duration())
            .map(|ttl| ttl.as_millis() as u64);
        info!(key, ttl_ms, "Entry TTL");
    }

    thread::sleep(Duration::from_millis(500));

    let stats = serde_json::to_string_pretty(&cache.stats()).context("failed to encode stats")?;
    println!("{}", stats);

    cache.close();
    Ok(())
}
