//! Hardened fetch CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   HTTP CLIENT                        │
//!                    │                                                      │
//!   Caller request   │  ┌──────────┐    ┌────────────┐    ┌─────────────┐   │
//!   ─────────────────┼─▶│  cache   │───▶│  timeout   │───▶│   bounded   │───┼──▶ Remote
//!                    │  │ (option) │    │ transport  │    │   dialer    │   │    API
//!                    │  └────┬─────┘    └────────────┘    └──────┬──────┘   │
//!                    │       │                                   ▼          │
//!                    │       ▼                           ┌─────────────┐    │
//!                    │  ┌──────────┐                     │  guarded    │    │
//!                    │  │ memcache │                     │ connection  │    │
//!                    │  └──────────┘                     └─────────────┘    │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use futures_util::future::join_all;
use http::{Request, Response};
use tower::Service;

use hardened_http::cache::X_FROM_CACHE;
use hardened_http::config::{load_config, validate_config, ClientConfig, ConfigError};
use hardened_http::observability::logging;
use hardened_http::{build_cached_client, build_client, Credential, Error, HttpClient};

/// Environment variable holding the API token.
const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Parser)]
#[command(name = "hardened-fetch")]
#[command(about = "Fetch URLs through a timeout-hardened, authenticated HTTP client", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Timeout for dialing an HTTP connection, in milliseconds.
    #[arg(long)]
    dial_timeout_ms: Option<u64>,

    /// Timeout for round-tripping an HTTP request, in milliseconds.
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Put the shared memcache response cache in front of the client.
    #[arg(long)]
    cache: bool,

    /// URLs to fetch concurrently.
    #[arg(required = true)]
    urls: Vec<String>,
}

type Outcome<'a> = (&'a str, Duration, Result<Response<Bytes>, Error>);

/// Fetch every URL concurrently; each request runs against its own timer.
async fn fetch_all<'a, S>(client: &HttpClient<S>, urls: &'a [String]) -> Vec<Outcome<'a>>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone,
{
    join_all(urls.iter().map(|url| async move {
        let started = Instant::now();
        let result = client.get(url).await;
        (url.as_str(), started.elapsed(), result)
    }))
    .await
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    if let Some(dial_ms) = cli.dial_timeout_ms {
        config.timeouts.dial_ms = dial_ms;
    }
    if let Some(request_ms) = cli.request_timeout_ms {
        config.timeouts.request_ms = request_ms;
    }
    config.cache.enabled |= cli.cache;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init(&config.observability.log_level);

    tracing::info!(
        dial_timeout_ms = config.timeouts.dial_ms,
        request_timeout_ms = config.timeouts.request_ms,
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    let credential = Credential::from_env(TOKEN_VAR)?;

    let results = if config.cache.enabled {
        fetch_all(&build_cached_client(&config, credential), &cli.urls).await
    } else {
        fetch_all(&build_client(&config, credential), &cli.urls).await
    };

    let mut failures = 0;
    for (url, elapsed, result) in results {
        match result {
            Ok(response) => {
                let source = if response.headers().contains_key(X_FROM_CACHE) {
                    "cache"
                } else {
                    "network"
                };
                println!(
                    "{} {} {} bytes ({}, {:?})",
                    response.status().as_u16(),
                    url,
                    response.body().len(),
                    source,
                    elapsed
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("ERR {} {:?}: {}", url, e.kind(), e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} of {} requests failed", failures, cli.urls.len()).into());
    }
    Ok(())
}
