//! HTTP-date parsing and arithmetic, mirroring `original_source/TimeComparator.py`.

use crate::error::ProxyError;
use std::time::{Duration, SystemTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpDate(SystemTime);

impl HttpDate {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }

    pub fn parse(s: &str) -> Result<Self, ProxyError> {
        httpdate::parse_http_date(s.trim())
            .map(Self)
            .map_err(|_| ProxyError::ParseError(format!("invalid HTTP-date: {s}")))
    }

    pub fn add_secs(&self, secs: u64) -> Self {
        Self(self.0 + Duration::from_secs(secs))
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for HttpDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", httpdate::fmt_http_date(self.0))
    }
}
