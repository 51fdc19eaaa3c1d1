//! Regions, routes and endpoint descriptors.

use crate::config::Config;
use crate::error::Result;
use std::fmt;
use std::str::FromStr;

/// Riot platform regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Br1,
    Eun1,
    Euw1,
    Jp1,
    Kr,
    La1,
    La2,
    Na1,
    Oc1,
    Tr1,
    Ru,
}

impl Region {
    pub const ALL: [Region; 11] = [
        Region::Br1,
        Region::Eun1,
        Region::Euw1,
        Region::Jp1,
        Region::Kr,
        Region::La1,
        Region::La2,
        Region::Na1,
        Region::Oc1,
        Region::Tr1,
        Region::Ru,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Br1 => "br1",
            Region::Eun1 => "eun1",
            Region::Euw1 => "euw1",
            Region::Jp1 => "jp1",
            Region::Kr => "kr",
            Region::La1 => "la1",
            Region::La2 => "la2",
            Region::Na1 => "na1",
            Region::Oc1 => "oc1",
            Region::Tr1 => "tr1",
            Region::Ru => "ru",
        }
    }

    pub fn host(&self) -> String {
        format!("https://{}.api.riotgames.com", self.as_str())
    }

    /// One rate budget per region
    pub fn scope_key(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Region::ALL
            .iter()
            .copied()
            .find(|region| region.as_str() == wanted)
            .ok_or_else(|| format!("Unknown region '{}'", s))
    }
}

/// Whether a call consumes the server-side rate budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    RateLimited,
    /// Static data, not counted against the budget
    Static,
}

/// A fully resolved GET target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub scope_key: String,
    pub category: EndpointCategory,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, scope_key: impl Into<String>, category: EndpointCategory) -> Self {
        Self {
            url: url.into(),
            scope_key: scope_key.into(),
            category,
        }
    }
}

/// URL bases for one region
#[derive(Debug, Clone)]
pub struct Routes {
    region: Region,
    api_base: String,
    static_base: String,
}

impl Routes {
    pub fn new(region: Region) -> Self {
        Self::with_host(region, &region.host())
    }

    /// Use `host` instead of the public Riot host, e.g. a proxy or a test server
    pub fn with_host(region: Region, host: &str) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            region,
            api_base: format!("{}/lol", host),
            static_base: format!("{}/lol/static-data/v3", host),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let region = config.region()?;
        if config.base_url.is_empty() {
            Ok(Self::new(region))
        } else {
            Ok(Self::with_host(region, &config.base_url))
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Rate-limited endpoint under `/lol`
    pub fn api(&self, path: &str) -> Endpoint {
        Endpoint::new(
            join(&self.api_base, path),
            self.region.scope_key(),
            EndpointCategory::RateLimited,
        )
    }

    /// Static-data endpoint, exempt from throttling
    pub fn static_data(&self, path: &str) -> Endpoint {
        Endpoint::new(
            join(&self.static_base, path),
            self.region.scope_key(),
            EndpointCategory::Static,
        )
    }

    /// Describe an absolute URL, treating anything under the static-data base
    /// as static
    pub fn describe(&self, url: &str) -> Endpoint {
        let category = if url.starts_with(&self.static_base) {
            EndpointCategory::Static
        } else {
            EndpointCategory::RateLimited
        };
        Endpoint::new(url, self.region.scope_key(), category)
    }
}

fn join(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
