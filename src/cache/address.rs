//! Cache address discovery.

/// Environment variable naming the cache host.
pub const HOST_VAR: &str = "MEMCACHE_PORT_11211_TCP_ADDR";
/// Environment variable naming the cache port.
pub const PORT_VAR: &str = "MEMCACHE_PORT_11211_TCP_PORT";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "11211";

/// Host and port of the remote cache, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAddress {
    pub host: String,
    pub port: String,
}

impl CacheAddress {
    /// Resolve from a variable lookup. Unset or empty values fall back to
    /// `localhost` and `11211`.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |var: &str, default: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            host: value(HOST_VAR, DEFAULT_HOST),
            port: value(PORT_VAR, DEFAULT_PORT),
        }
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(|var| std::env::var(var).ok())
    }
}

impl std::fmt::Display for CacheAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
