//! Host denylist: `IsBlocked(host) -> bool`, lazily loaded from a text file.
//!
//! Grounded directly in spec.md §4.6 (no equivalent module in the teacher);
//! the DNS-resolution idiom mirrors `connection_pool.rs`'s use of a host
//! string with `TcpStream::connect`.

use crate::error::ProxyError;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const SENTINEL: &str = "***";

pub struct Denylist {
    path: PathBuf,
    entries: OnceCell<Vec<String>>,
}

impl Denylist {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: OnceCell::new(),
        }
    }

    /// `true` iff `host` literally matches a denylist entry, or resolves
    /// to an address shared with a (resolvable) denylist entry.
    pub async fn is_blocked(&self, host: &str) -> bool {
        let entries = self.entries().await;
        if entries.iter().any(|e| e.eq_ignore_ascii_case(host)) {
            return true;
        }

        let Ok(host_addrs) = resolve(host).await else {
            return false;
        };
        for entry in entries {
            let Ok(entry_addrs) = resolve(entry).await else {
                continue;
            };
            if host_addrs.iter().any(|a| entry_addrs.contains(a)) {
                return true;
            }
        }
        false
    }

    async fn entries(&self) -> &Vec<String> {
        self.entries
            .get_or_init(|| async { load(&self.path).await })
            .await
    }
}

async fn load(path: &std::path::Path) -> Vec<String> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "denylist file missing, creating empty one");
            if let Err(e) = tokio::fs::write(path, format!("{SENTINEL}\n")).await {
                warn!(error = %e, "failed to create denylist file");
            }
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "failed to read denylist file, treating as empty");
            return Vec::new();
        }
    };
    text.lines()
        .take_while(|line| line.trim() != SENTINEL)
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

async fn resolve(host: &str) -> Result<Vec<IpAddr>, ProxyError> {
    tokio::net::lookup_host((host, 0u16))
        .await
        .map(|iter| iter.map(|addr| addr.ip()).collect())
        .map_err(|_| ProxyError::DnsFailure {
            host: host.to_string(),
        })
}
