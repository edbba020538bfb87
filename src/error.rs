use thiserror::Error;

/// Crate-wide error kinds, one per row of the error-handling policy table.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to parse HTTP message: {0}")]
    ParseError(String),

    #[error("buffer is not an HTTP response")]
    NotAResponse,

    #[error("DNS resolution failed for host {host}")]
    DnsFailure { host: String },

    #[error("connect to upstream {host}:{port} timed out")]
    UpstreamConnectTimeout { host: String, port: u16 },

    #[error("connection idle timeout")]
    IdleTimeout,

    #[error("connection reset or broken pipe")]
    ConnectionReset,

    #[error("cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("cache index/disk mismatch for resource")]
    CacheCorruption,

    #[error("denylist file missing, treating as empty")]
    DenylistFileMissing,

    #[error("invalid argument: {0}")]
    ArgumentError(String),

    #[error("failed to bind listening socket: {0}")]
    BindFailure(std::io::Error),
}
