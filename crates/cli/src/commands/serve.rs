//! `strata serve`: start the HTTP serving API.

use std::sync::Arc;
use strata_config::StrataConfig;
use strata_core::FeatureRegistry;
use strata_gateway::GatewayState;
use strata_store::InMemoryCache;
use tracing::{info, warn};

pub async fn run(config: StrataConfig) -> anyhow::Result<()> {
    let handle = strata_telemetry::metrics::install_recorder()?;

    // Features are registered by applications embedding the library; the
    // standalone server starts with an empty registry.
    let registry = Arc::new(FeatureRegistry::new());
    warn!("No features registered; /features will return empty mappings");

    let cache = Arc::new(InMemoryCache::new());
    let state = GatewayState::from_config(&config, registry, cache).with_metrics(handle);

    info!(
        env = %config.env,
        addr = %config.bind_address(),
        api_key = config.serving.api_key.is_some(),
        audit = %config.audit.backend,
        "Starting Strata"
    );
    strata_gateway::serve(&config.bind_address(), Arc::new(state)).await?;
    Ok(())
}
