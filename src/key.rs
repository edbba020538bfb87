//! Resource keys and content-encoding tokens.
//!
//! Grounded in `original_source/CacheHandler.py`'s `__getCacheFileNameFH`
//! (key construction) and `__generateJSON` (the six fixed encoding slots).

const MAX_KEY_BYTES: usize = 255;

/// The six content-encoding tokens the cache index tracks a chunk count for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Compress,
    Deflate,
    Br,
    Identity,
    /// Absent `Content-Encoding` header. Serialized as the JSON key `nil`,
    /// matching the original's lookup-table template.
    None,
}

impl Encoding {
    pub const ALL: [Encoding; 6] = [
        Encoding::Gzip,
        Encoding::Compress,
        Encoding::Deflate,
        Encoding::Br,
        Encoding::Identity,
        Encoding::None,
    ];

    /// Parses a single `Content-Encoding` token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" => Some(Encoding::Gzip),
            "compress" => Some(Encoding::Compress),
            "deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Br),
            "identity" => Some(Encoding::Identity),
            "" => Some(Encoding::None),
            _ => None,
        }
    }

    /// Parses a `Content-Encoding` header value, defaulting to `None` when absent.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            None => Encoding::None,
            Some(v) if v.trim().is_empty() => Encoding::None,
            Some(v) => Self::from_token(v).unwrap_or(Encoding::None),
        }
    }

    /// Wire/JSON token, matching the original's template keys exactly.
    pub fn as_json_key(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Compress => "compress",
            Encoding::Deflate => "deflate",
            Encoding::Br => "br",
            Encoding::Identity => "identity",
            Encoding::None => "nil",
        }
    }

    /// On-disk filename fragment (`<key>, <encoding>, <i>`).
    pub fn as_filename_fragment(&self) -> &'static str {
        self.as_json_key()
    }
}

/// A normalized identifier for a cacheable resource: host plus the
/// slash-joined path segments of the request-URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    joined: String,
    segments: Vec<String>,
}

impl ResourceKey {
    /// Builds a key from a host and a request path (e.g. `/a/b/c`).
    /// Returns `None` when the key is uncacheable: an empty path segment
    /// (`//` in the URI) or a joined key longer than 255 bytes.
    pub fn new(host: &str, path: &str) -> Option<Self> {
        let mut segments = vec![host.to_string()];
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if !trimmed.is_empty() {
            for seg in trimmed.split('/') {
                segments.push(seg.to_string());
            }
        }
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let joined = segments.join("/");
        if joined.len() > MAX_KEY_BYTES {
            return None;
        }
        Some(Self { joined, segments })
    }

    pub fn joined(&self) -> &str {
        &self.joined
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.joined)
    }
}
