//! `warpfetch.toml` configuration parser and the typed settings derived from it.
//!
//! The TOML document keeps durations as strings (`"5s"`, `"500ms"`, `"2m"`);
//! the typed accessors validate and convert them.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

/// Default idle lifetime of a pooled client.
pub const DEFAULT_POOL_LIFETIME: Duration = Duration::from_secs(60);

/// Default request timeout for client configurations that do not set one.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub pool: Option<PoolSection>,
    pub upload: Option<UploadSection>,
    #[serde(default)]
    pub clients: Vec<ClientSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    pub lifetime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSection {
    pub fragment_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    pub host: String,
    pub port: Option<u16>,
    pub timeout: Option<String>,
    pub http2: Option<bool>,
    /// Opaque TLS material, passed through to the transport untouched.
    pub tls: Option<String>,
}

impl FetchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FetchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Pool settings, falling back to defaults for anything unset.
    pub fn pool_settings(&self) -> FetchResult<PoolSettings> {
        let lifetime = match self.pool.as_ref().and_then(|p| p.lifetime.as_deref()) {
            Some(raw) => parse_duration(raw)
                .ok_or_else(|| FetchError::Config(format!("invalid pool lifetime: {raw:?}")))?,
            None => DEFAULT_POOL_LIFETIME,
        };
        if lifetime.is_zero() {
            return Err(FetchError::Config("pool lifetime must be non-zero".into()));
        }
        Ok(PoolSettings { lifetime })
    }

    /// Fragment size override for uploads, if configured.
    pub fn fragment_size(&self) -> Option<usize> {
        self.upload.as_ref().and_then(|u| u.fragment_size)
    }

    /// Typed client configurations declared in `[[clients]]`.
    pub fn client_configurations(&self) -> FetchResult<Vec<ClientConfiguration>> {
        self.clients
            .iter()
            .map(|section| {
                let timeout = match section.timeout.as_deref() {
                    Some(raw) => parse_duration(raw).ok_or_else(|| {
                        FetchError::Config(format!(
                            "invalid timeout {raw:?} for client {}",
                            section.host
                        ))
                    })?,
                    None => DEFAULT_CLIENT_TIMEOUT,
                };
                let mut config = ClientConfiguration::new(&section.host)
                    .with_timeout(timeout)
                    .with_http2(section.http2.unwrap_or(false));
                if let Some(port) = section.port {
                    config = config.with_port(port);
                }
                if let Some(tls) = &section.tls {
                    config = config.with_tls(TlsConfiguration::new(tls.clone().into_bytes()));
                }
                Ok(config)
            })
            .collect()
    }
}

/// Settings of the client pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Idle duration after which an unused client becomes eligible for
    /// eviction. Also the sweep interval.
    pub lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_POOL_LIFETIME,
        }
    }
}

/// Opaque TLS configuration. Compared and hashed by content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TlsConfiguration(Bytes);

impl TlsConfiguration {
    pub fn new(material: impl Into<Bytes>) -> Self {
        Self(material.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Per-client configuration. Part of the pool key, so equality is by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientConfiguration {
    pub host: String,
    pub port: Option<u16>,
    pub timeout: Duration,
    pub http2: bool,
    pub tls: Option<TlsConfiguration>,
}

impl ClientConfiguration {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: None,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            http2: false,
            tls: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_http2(mut self, http2: bool) -> Self {
        self.http2 = http2;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfiguration) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[pool]
lifetime = "90s"

[upload]
fragment_size = 4096

[[clients]]
host = "api.example.com"
port = 443
timeout = "5s"
http2 = true
tls = "pinned-ca"
"#;
        let config: FetchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.pool_settings().unwrap().lifetime,
            Duration::from_secs(90)
        );
        assert_eq!(config.fragment_size(), Some(4096));

        let clients = config.client_configurations().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].host, "api.example.com");
        assert_eq!(clients[0].port, Some(443));
        assert_eq!(clients[0].timeout, Duration::from_secs(5));
        assert!(clients[0].http2);
        assert_eq!(clients[0].tls.as_ref().unwrap().as_bytes(), b"pinned-ca");
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: FetchConfig = toml::from_str("").unwrap();
        assert_eq!(config.pool_settings().unwrap(), PoolSettings::default());
        assert_eq!(config.fragment_size(), None);
        assert!(config.client_configurations().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_lifetime_rejected() {
        let config: FetchConfig = toml::from_str("[pool]\nlifetime = \"soon\"\n").unwrap();
        assert!(matches!(config.pool_settings(), Err(FetchError::Config(_))));

        let config: FetchConfig = toml::from_str("[pool]\nlifetime = \"0s\"\n").unwrap();
        assert!(matches!(config.pool_settings(), Err(FetchError::Config(_))));
    }

    #[test]
    fn parse_duration_minutes_overflow() {
        let huge = format!("{}m", u64::MAX / 60 + 1);
        assert_eq!(parse_duration(&huge), None);

        let doc = format!("[pool]\nlifetime = \"{huge}\"\n");
        let config: FetchConfig = toml::from_str(&doc).unwrap();
        assert!(matches!(config.pool_settings(), Err(FetchError::Config(_))));
    }

    #[test]
    fn test_invalid_client_timeout_rejected() {
        let config: FetchConfig =
            toml::from_str("[[clients]]\nhost = \"x\"\ntimeout = \"fast\"\n").unwrap();
        assert!(config.client_configurations().is_err());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = FetchConfig {
            pool: Some(PoolSection {
                lifetime: Some("2m".to_string()),
            }),
            upload: None,
            clients: vec![],
        };
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("2m"));
    }

    #[test]
    fn client_configuration_value_equality() {
        let a = ClientConfiguration::new("x").with_timeout(Duration::from_secs(5));
        let b = ClientConfiguration::new("x").with_timeout(Duration::from_secs(5));
        let c = ClientConfiguration::new("x").with_timeout(Duration::from_secs(6));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tls_configuration_compared_by_content() {
        let a = ClientConfiguration::new("x").with_tls(TlsConfiguration::new(&b"ca"[..]));
        let b = ClientConfiguration::new("x").with_tls(TlsConfiguration::new(b"ca".to_vec()));
        assert_eq!(a, b);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }
}
