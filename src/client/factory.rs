//! Client factory.

use tower::Layer;

use crate::cache::{CacheAddress, CacheLayer, CacheTransport, MemcacheStore};
use crate::client::http_client::HttpClient;
use crate::config::ClientConfig;
use crate::transport::{Credential, TimeoutTransport};

/// A client whose only transport is the timeout-enforcing transport.
pub fn build_client(config: &ClientConfig, credential: Credential) -> HttpClient<TimeoutTransport> {
    tracing::debug!(
        dial_timeout = ?config.timeouts.dial(),
        request_timeout = ?config.timeouts.request(),
        "Building HTTP client"
    );
    HttpClient::new(TimeoutTransport::new(&config.timeouts, credential))
}

/// A caching layer backed by memcache at the address found in the environment.
///
/// The layer is not attached to anything; see [`build_cached_client`] for the
/// composition used by this crate.
pub fn build_cache_transport(config: &ClientConfig) -> CacheLayer<MemcacheStore> {
    build_cache_transport_at(config, &CacheAddress::from_env())
}

/// A caching layer backed by memcache at `address`.
pub fn build_cache_transport_at(config: &ClientConfig, address: &CacheAddress) -> CacheLayer<MemcacheStore> {
    tracing::info!(address = %address, "Using memcache response cache");
    CacheLayer::new(MemcacheStore::new(address.to_string()).with_op_timeout(config.cache.op_timeout()))
}

/// A client with the cache in front of the timeout transport.
///
/// Cache hits never reach the network; misses and revalidations go through
/// the timeout transport and inherit all of its bounds.
pub fn build_cached_client(
    config: &ClientConfig,
    credential: Credential,
) -> HttpClient<CacheTransport<TimeoutTransport, MemcacheStore>> {
    let transport = TimeoutTransport::new(&config.timeouts, credential);
    HttpClient::new(build_cache_transport(config).layer(transport))
}
