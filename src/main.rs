use forwardcache::acceptor::Acceptor;
use forwardcache::cache::CacheEngine;
use forwardcache::config::ProxyConfig;
use forwardcache::denylist::Denylist;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forwardcache=info")))
        .init();

    let config = match ProxyConfig::parse(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    info!(port = config.port, max_connection = config.max_connection, "starting proxy");

    let engine = match CacheEngine::new(PathBuf::from("cache_responses"), config.max_connection).await {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to load cache index");
            std::process::exit(1);
        }
    };
    let denylist = Arc::new(Denylist::new(PathBuf::from("banned_sites")));

    let acceptor = match Acceptor::bind(config, engine, denylist).await {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to bind listening socket");
            std::process::exit(1);
        }
    };

    if let Err(e) = acceptor.run().await {
        error!(error = %e, "proxy exited with error");
        std::process::exit(1);
    }
    info!("shutdown complete");
}
