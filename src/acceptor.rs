//! Bounded-slot accept loop and graceful shutdown.
//!
//! Grounded in `original_source/Proxy.py` + `ConnectionThread.py` and the
//! teacher's `main_backup.rs` accept loop (`active_connections: Arc
//! <AtomicUsize>` limit check, `tokio::select!` over SIGTERM/SIGINT),
//! generalized from a raw counter into the spec's fixed slot array so a
//! freed slot is something `Shutdown` can join on directly.

use crate::cache::CacheEngine;
use crate::config::ProxyConfig;
use crate::connection::Connection;
use crate::denylist::Denylist;
use crate::error::ProxyError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Acceptor {
    listener: TcpListener,
    engine: CacheEngine,
    denylist: Arc<Denylist>,
    max_connection: usize,
}

impl Acceptor {
    pub async fn bind(
        config: ProxyConfig,
        engine: CacheEngine,
        denylist: Arc<Denylist>,
    ) -> Result<Self, ProxyError> {
        let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, config.port).into();
        let socket = TcpSocket::new_v4().map_err(ProxyError::BindFailure)?;
        socket.set_reuseaddr(true).map_err(ProxyError::BindFailure)?;
        socket.bind(addr).map_err(ProxyError::BindFailure)?;
        let listener = socket
            .listen(config.max_connection as u32)
            .map_err(ProxyError::BindFailure)?;
        Ok(Self {
            listener,
            engine,
            denylist,
            max_connection: config.max_connection,
        })
    }

    /// Accepts connections until an interrupt/terminate signal arrives,
    /// then signals every in-flight handler to wind down, joins them, and
    /// flushes the cache index.
    pub async fn run(self) -> Result<(), ProxyError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut slots: Vec<Option<JoinHandle<()>>> = (0..self.max_connection).map(|_| None).collect();

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown_signal() => {
                    info!("shutdown signal received");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            reclaim_finished(&mut slots);
                            if let Some(free) = slots.iter_mut().find(|s| s.is_none()) {
                                let engine = self.engine.clone();
                                let denylist = self.denylist.clone();
                                let rx = shutdown_rx.clone();
                                let handle = tokio::spawn(async move {
                                    Connection::new(socket, engine, denylist, rx).run().await;
                                });
                                *free = Some(handle);
                                debug!(%peer, "connection accepted");
                            } else {
                                warn!(%peer, "no free connection slot, dropping connection");
                                drop(socket);
                            }
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        let _ = shutdown_tx.send(true);
        for slot in slots.into_iter().flatten() {
            let _ = slot.await;
        }
        self.engine.shutdown().await
    }
}

fn reclaim_finished(slots: &mut [Option<JoinHandle<()>>]) {
    for slot in slots.iter_mut() {
        if slot.as_ref().map(|h| h.is_finished()).unwrap_or(false) {
            *slot = None;
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
