//! Tests for `max_connection` configuration and the acceptor's bounded
//! slot pool (spec.md §4.5/§6: a fixed-size array of slots, default 200,
//! overridable via `max_connection=<N>` on the CLI).

use forwardcache::config::{ProxyConfig, DEFAULT_MAX_CONNECTION, DEFAULT_PORT};

#[test]
fn default_max_connection_is_200() {
    let config = ProxyConfig::default();
    assert_eq!(config.max_connection, DEFAULT_MAX_CONNECTION);
    assert_eq!(DEFAULT_MAX_CONNECTION, 200);
}

#[test]
fn max_connection_overridable_from_cli() {
    let config = ProxyConfig::parse(["max_connection=5"]).unwrap();
    assert_eq!(config.max_connection, 5);
    assert_eq!(config.port, DEFAULT_PORT);
}

#[test]
fn slot_pool_accepts_up_to_capacity_then_rejects() {
    // Mirrors the acceptor's free-slot bookkeeping: once `max_connection`
    // slots are occupied, further accepts are dropped rather than queued.
    let max_connection = 4usize;
    let mut slots: Vec<Option<u32>> = (0..max_connection).map(|_| None).collect();
    let mut accepted = 0;
    let mut rejected = 0;

    for i in 0..(max_connection * 2) as u32 {
        if let Some(free) = slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(i);
            accepted += 1;
        } else {
            rejected += 1;
        }
    }

    assert_eq!(accepted, max_connection);
    assert_eq!(rejected, max_connection);
}

#[tokio::test]
async fn acceptor_binds_to_an_ephemeral_port() {
    use forwardcache::acceptor::Acceptor;
    use forwardcache::cache::CacheEngine;
    use forwardcache::denylist::Denylist;
    use std::sync::Arc;
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let engine = CacheEngine::new(dir.path().join("cache_responses"), 2)
        .await
        .unwrap();
    let denylist = Arc::new(Denylist::new(dir.path().join("banned_sites")));
    let config = ProxyConfig {
        max_connection: 4,
        port: 0,
    };
    let acceptor = Acceptor::bind(config, engine, denylist).await;
    assert!(acceptor.is_ok());
}
