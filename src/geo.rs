//! Geolocation lookup over a fixed chain of public IP-lookup providers.
//! Each attempt is bounded by a short timeout and falls through to the next
//! provider; all failures resolve to `None`, never an error. The cache is an
//! explicit injected object with process-lifetime invalidation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country_code: String,
    pub country_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Field layout of a provider's JSON answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderShape {
    /// `{ countryCode, country, city, region }`
    IpApi,
    /// `{ country, city, region }` (country code doubles as the name)
    IpInfo,
    /// `{ country_code, country_name, city, region }`
    IpApiCo,
}

#[derive(Debug, Clone)]
pub struct GeoProvider {
    pub name: &'static str,
    pub url: String,
    pub shape: ProviderShape,
}

pub fn default_providers() -> Vec<GeoProvider> {
    vec![
        GeoProvider {
            name: "ip-api",
            url: "https://ip-api.com/json/?fields=countryCode,country,city,region".to_string(),
            shape: ProviderShape::IpApi,
        },
        GeoProvider {
            name: "ipinfo",
            url: "https://ipinfo.io/json".to_string(),
            shape: ProviderShape::IpInfo,
        },
        GeoProvider {
            name: "ipapi-co",
            url: "https://ipapi.co/json/".to_string(),
            shape: ProviderShape::IpApiCo,
        },
    ]
}

/// Explicit lookup cache. Lives as long as its owner chooses to keep it;
/// there is no module-level singleton.
#[derive(Debug, Default)]
pub struct GeoCache(Mutex<Option<GeoLocation>>);

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<GeoLocation> {
        self.0.lock().clone()
    }

    pub fn put(&self, location: GeoLocation) {
        *self.0.lock() = Some(location);
    }
}

pub struct GeoService {
    providers: Vec<GeoProvider>,
    client: reqwest::Client,
    timeout: Duration,
}

impl GeoService {
    pub fn new(providers: Vec<GeoProvider>) -> Self {
        Self { providers, client: reqwest::Client::new(), timeout: PROVIDER_TIMEOUT }
    }

    pub fn with_default_providers() -> Self {
        Self::new(default_providers())
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// First provider to answer wins and is cached; all-fail resolves to
    /// `None` without blocking past the per-provider timeout.
    pub async fn lookup(&self, cache: &GeoCache) -> Option<GeoLocation> {
        if let Some(hit) = cache.get() {
            return Some(hit);
        }
        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, self.try_provider(provider)).await {
                Ok(Ok(location)) => {
                    cache.put(location.clone());
                    return Some(location);
                }
                Ok(Err(e)) => {
                    warn!(target: "geo", "provider {} failed: {e}", provider.name);
                }
                Err(_) => {
                    warn!(target: "geo", "provider {} timed out", provider.name);
                }
            }
        }
        None
    }

    async fn try_provider(&self, provider: &GeoProvider) -> Result<GeoLocation> {
        let resp = self.client.get(&provider.url).send().await.context("request failed")?;
        if !resp.status().is_success() {
            bail!("HTTP {}", resp.status());
        }
        let v: serde_json::Value = resp.json().await.context("invalid json")?;
        parse_location(&v, provider.shape)
    }
}

fn parse_location(v: &serde_json::Value, shape: ProviderShape) -> Result<GeoLocation> {
    let field = |name: &str| v.get(name).and_then(|x| x.as_str()).map(|s| s.to_string());
    let (country_code, country_name) = match shape {
        ProviderShape::IpApi => (field("countryCode"), field("country")),
        ProviderShape::IpInfo => (field("country"), field("country")),
        ProviderShape::IpApiCo => (field("country_code"), field("country_name")),
    };
    let Some(country_code) = country_code.filter(|c| !c.is_empty()) else {
        bail!("answer carried no country");
    };
    Ok(GeoLocation {
        country_name: country_name.unwrap_or_else(|| country_code.clone()),
        country_code,
        city: field("city"),
        region: field("region"),
    })
}
