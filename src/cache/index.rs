//! In-memory cache index, persisted as one JSON document.
//!
//! Grounded in `original_source/CacheHandler.py`'s `__entryExists`,
//! `__updateLookup` and `__generateJSON` — the on-disk shape (one object
//! per entry, six always-present encoding fields, `"nil"` for both the
//! absent-encoding count key and an unknown expiry) is kept verbatim.

use crate::error::ProxyError;
use crate::key::{Encoding, ResourceKey};
use crate::time::HttpDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Either "never/unknown" or a concrete absolute instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Unknown,
    At(HttpDate),
}

impl Expiry {
    pub fn is_future(&self) -> bool {
        match self {
            Expiry::Unknown => false,
            Expiry::At(when) => when.is_after(&HttpDate::now()),
        }
    }

    fn to_wire(self) -> String {
        match self {
            Expiry::Unknown => "nil".to_string(),
            Expiry::At(when) => when.to_string(),
        }
    }

    fn from_wire(s: &str) -> Self {
        if s == "nil" {
            Expiry::Unknown
        } else {
            HttpDate::parse(s).map(Expiry::At).unwrap_or(Expiry::Unknown)
        }
    }
}

/// Per-resource-key chunk counts, one slot per fixed encoding token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodingCounts {
    pub gzip: u32,
    pub compress: u32,
    pub deflate: u32,
    pub br: u32,
    pub identity: u32,
    pub none: u32,
}

impl EncodingCounts {
    pub fn get(&self, encoding: Encoding) -> u32 {
        match encoding {
            Encoding::Gzip => self.gzip,
            Encoding::Compress => self.compress,
            Encoding::Deflate => self.deflate,
            Encoding::Br => self.br,
            Encoding::Identity => self.identity,
            Encoding::None => self.none,
        }
    }

    pub fn set(&mut self, encoding: Encoding, value: u32) {
        match encoding {
            Encoding::Gzip => self.gzip = value,
            Encoding::Compress => self.compress = value,
            Encoding::Deflate => self.deflate = value,
            Encoding::Br => self.br = value,
            Encoding::Identity => self.identity = value,
            Encoding::None => self.none = value,
        }
    }

    pub fn is_live(&self) -> bool {
        Encoding::ALL.iter().any(|e| self.get(*e) > 0)
    }

    pub fn zero_all(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub expiry: Expiry,
    pub counts: EncodingCounts,
}

impl CacheEntry {
    pub fn new() -> Self {
        Self {
            expiry: Expiry::Unknown,
            counts: EncodingCounts::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.counts.is_live()
    }
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk record shape, matching `CacheHandler.py::__generateJSON` field
/// names exactly so an existing `cache_lookup_table.json` stays readable.
#[derive(Serialize, Deserialize)]
struct IndexRecord {
    #[serde(rename = "cacheFileNameFH")]
    cache_file_name_fh: String,
    expiry: String,
    gzip: u32,
    compress: u32,
    deflate: u32,
    br: u32,
    identity: u32,
    nil: u32,
}

pub struct CacheIndex {
    entries: Vec<(ResourceKey, CacheEntry)>,
}

impl CacheIndex {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Loads the index document at `path`. A missing file is not an
    /// error: it means no cache has been written yet.
    pub async fn load(path: &Path) -> Result<Self, ProxyError> {
        let data = match tokio::fs::read(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty());
            }
            Err(e) => return Err(ProxyError::CacheIo(e)),
        };
        let records: Vec<IndexRecord> = serde_json::from_slice(&data)
            .map_err(|e| ProxyError::ParseError(format!("corrupt cache index: {e}")))?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let Some(key) = key_from_joined(&record.cache_file_name_fh) else {
                continue;
            };
            let mut counts = EncodingCounts::default();
            counts.gzip = record.gzip;
            counts.compress = record.compress;
            counts.deflate = record.deflate;
            counts.br = record.br;
            counts.identity = record.identity;
            counts.none = record.nil;
            let entry = CacheEntry {
                expiry: Expiry::from_wire(&record.expiry),
                counts,
            };
            entries.push((key, entry));
        }
        Ok(Self { entries })
    }

    pub async fn persist(&self, path: &Path) -> Result<(), ProxyError> {
        let records: Vec<IndexRecord> = self
            .entries
            .iter()
            .map(|(key, entry)| IndexRecord {
                cache_file_name_fh: key.joined().to_string(),
                expiry: entry.expiry.to_wire(),
                gzip: entry.counts.gzip,
                compress: entry.counts.compress,
                deflate: entry.counts.deflate,
                br: entry.counts.br,
                identity: entry.counts.identity,
                nil: entry.counts.none,
            })
            .collect();
        let data = serde_json::to_vec_pretty(&records)
            .map_err(|e| ProxyError::ParseError(e.to_string()))?;
        tokio::fs::write(path, data)
            .await
            .map_err(ProxyError::CacheIo)
    }

    pub fn find(&self, key: &ResourceKey) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, e)| e)
    }

    pub fn upsert(&mut self, key: ResourceKey, entry: CacheEntry) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = entry;
        } else {
            self.entries.push((key, entry));
        }
    }

    pub fn remove(&mut self, key: &ResourceKey) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Drops entries whose every encoding count is zero. Part of `Shutdown`.
    pub fn prune_dead_entries(&mut self) {
        self.entries.retain(|(_, entry)| entry.is_live());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn key_from_joined(joined: &str) -> Option<ResourceKey> {
    let mut parts = joined.splitn(2, '/');
    let host = parts.next()?;
    let rest = parts.next().unwrap_or("");
    let path = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{rest}")
    };
    ResourceKey::new(host, &path)
}
