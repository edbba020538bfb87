//! Command-line configuration.
//!
//! Grounded in `original_source/proxy_main.py`'s `k=v` argument handling
//! and the teacher's constant-based configuration in `main_backup.rs`,
//! merged into one parsed struct. No argument-parsing crate: this stays
//! a deliberately shallow collaborator per spec.md §1.

use crate::error::ProxyError;

pub const DEFAULT_MAX_CONNECTION: usize = 200;
pub const DEFAULT_PORT: u16 = 6298;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub max_connection: usize,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_connection: DEFAULT_MAX_CONNECTION,
            port: DEFAULT_PORT,
        }
    }
}

impl ProxyConfig {
    /// Parses `max_connection=<N>` / `port=<P>` pairs in any order.
    /// Unrecognized keys or unparsable values are an `ArgumentError`.
    pub fn parse<I, S>(args: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                ProxyError::ArgumentError(format!("expected key=value, got `{arg}`"))
            })?;
            match key {
                "max_connection" => {
                    config.max_connection = value.parse().map_err(|_| {
                        ProxyError::ArgumentError(format!("invalid max_connection: `{value}`"))
                    })?;
                }
                "port" => {
                    config.port = value.parse().map_err(|_| {
                        ProxyError::ArgumentError(format!("invalid port: `{value}`"))
                    })?;
                }
                other => {
                    return Err(ProxyError::ArgumentError(format!(
                        "unrecognized option: `{other}`"
                    )))
                }
            }
        }
        Ok(config)
    }
}
