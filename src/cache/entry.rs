//! Cached response representation and freshness rules.

use std::time::UNIX_EPOCH;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, PRAGMA, VARY};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::cache::store::CacheError;

/// Headers never copied from a `304 Not Modified` onto a stored response.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// The directives of a `Cache-Control` header this cache acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
    pub only_if_cached: bool,
    pub must_revalidate: bool,
    /// `Some(None)` accepts a stale response of any age.
    pub max_stale: Option<Option<u64>>,
    pub min_fresh: Option<u64>,
}

impl CacheControl {
    /// Parse every `Cache-Control` value of `headers`; `Pragma: no-cache` counts as `no-cache`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::parse(headers.get_all(CACHE_CONTROL).iter().map(HeaderValue::as_bytes));
        let pragma_no_cache = headers.get_all(PRAGMA).iter().any(|v| {
            v.to_str()
                .is_ok_and(|s| s.to_ascii_lowercase().contains("no-cache"))
        });
        cc.no_cache |= pragma_no_cache;
        cc
    }

    fn parse<'a>(values: impl Iterator<Item = &'a [u8]>) -> Self {
        let mut cc = Self::default();
        for value in values {
            let Ok(value) = std::str::from_utf8(value) else {
                continue;
            };
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, arg) = match directive.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                match name.to_ascii_lowercase().as_str() {
                    "no-store" => cc.no_store = true,
                    "no-cache" => cc.no_cache = true,
                    "only-if-cached" => cc.only_if_cached = true,
                    "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                    "must-revalidate" => cc.must_revalidate = true,
                    "max-stale" => cc.max_stale = Some(arg.and_then(|a| a.parse().ok())),
                    "min-fresh" => cc.min_fresh = arg.and_then(|a| a.parse().ok()),
                    _ => {}
                }
            }
        }
        cc
    }
}

/// Whether a stored response may be served without revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// A response as stored in the cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Seconds since the Unix epoch when the response was stored or last revalidated.
    pub stored_at: u64,
    /// Request header values for every header named by the response's `Vary`.
    pub vary: Vec<(String, Vec<Vec<u8>>)>,
}

impl CachedResponse {
    /// Snapshot `response`, recording the request headers it varies on.
    pub fn capture(request_headers: &HeaderMap, response: &Response<Bytes>, now: u64) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        let vary = vary_names(response.headers())
            .into_iter()
            .map(|name| {
                let values = request_headers
                    .get_all(name.as_str())
                    .iter()
                    .map(|v| v.as_bytes().to_vec())
                    .collect();
                (name, values)
            })
            .collect();

        Self {
            status: response.status().as_u16(),
            headers,
            body: response.body().to_vec(),
            stored_at: now,
            vary,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    /// Rebuild an HTTP response from the stored snapshot.
    pub fn to_response(&self) -> Result<Response<Bytes>, CacheError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| CacheError::Corrupt(format!("status {}", self.status)))?;

        let mut response = Response::new(Bytes::from(self.body.clone()));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| CacheError::Corrupt(format!("header name {}", name)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|_| CacheError::Corrupt(format!("header value for {}", name)))?;
            headers.append(name, value);
        }
        Ok(response)
    }

    /// True if the request carries the same values for every header the response varies on.
    pub fn matches_vary(&self, request_headers: &HeaderMap) -> bool {
        self.vary.iter().all(|(name, stored)| {
            let current: Vec<&[u8]> = request_headers
                .get_all(name.as_str())
                .iter()
                .map(HeaderValue::as_bytes)
                .collect();
            current.len() == stored.len()
                && current.iter().zip(stored).all(|(a, b)| *a == b.as_slice())
        })
    }

    /// Freshness lifetime comes from `max-age`, else from `Expires` minus `Date`.
    /// Age is measured from `stored_at`.
    pub fn freshness(&self, request: &CacheControl, now: u64) -> Freshness {
        let response = CacheControl::parse(self.header_values("cache-control"));
        if request.no_cache || response.no_cache {
            return Freshness::Stale;
        }

        let Some(mut lifetime) = response.max_age.or_else(|| self.expires_lifetime()) else {
            return Freshness::Stale;
        };
        if let Some(limit) = request.max_age {
            lifetime = lifetime.min(limit);
        }

        let mut age = now.saturating_sub(self.stored_at);
        if let Some(min_fresh) = request.min_fresh {
            age = age.saturating_add(min_fresh);
        }

        if !response.must_revalidate {
            match request.max_stale {
                Some(None) => return Freshness::Fresh,
                Some(Some(extra)) => lifetime = lifetime.saturating_add(extra),
                None => {}
            }
        }

        if lifetime > age {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// An unparseable `Expires` means already expired.
    fn expires_lifetime(&self) -> Option<u64> {
        let expires = self.header_values("expires").next()?;
        let Some(expires) = parse_http_date(expires) else {
            return Some(0);
        };
        let date = self
            .header_values("date")
            .next()
            .and_then(parse_http_date)
            .unwrap_or(self.stored_at);
        Some(expires.saturating_sub(date))
    }

    pub fn etag(&self) -> Option<&[u8]> {
        self.header_values("etag").next()
    }

    pub fn last_modified(&self) -> Option<&[u8]> {
        self.header_values("last-modified").next()
    }

    /// Merge the end-to-end headers of a `304 Not Modified` and restart the age clock.
    pub fn refresh(&mut self, not_modified: &HeaderMap, now: u64) {
        for name in not_modified.keys() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            self.headers.retain(|(stored, _)| stored != name.as_str());
            for value in not_modified.get_all(name) {
                self.headers
                    .push((name.as_str().to_string(), value.as_bytes().to_vec()));
            }
        }
        self.stored_at = now;
    }

    fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }
}

/// Seconds since the Unix epoch for an HTTP-date header value.
fn parse_http_date(value: &[u8]) -> Option<u64> {
    let value = std::str::from_utf8(value).ok()?;
    let time = httpdate::parse_http_date(value).ok()?;
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Lower-cased header names listed in `Vary`.
fn vary_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Whether a response to a request with `request` directives may be stored.
pub fn is_storable(request: &CacheControl, response: &Response<Bytes>) -> bool {
    let storable_status = matches!(response.status().as_u16(), 200 | 203 | 300 | 301 | 404 | 410);
    let response_cc = CacheControl::from_headers(response.headers());
    let vary_any = vary_names(response.headers()).iter().any(|name| name == "*");

    storable_status && !request.no_store && !response_cc.no_store && !vary_any
}
