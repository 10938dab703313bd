//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable that forces the remote mapping source.
pub const S3_ENDPOINT_ENV: &str = "REMAP_S3_ENDPOINT";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Mapping source and reload configuration
    pub mapping: MappingConfig,
    /// Per-record behavior toggles
    pub behavior: BehaviorConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `REMAP_` prefix with `__` as the
    /// section separator (`REMAP_MAPPING__LOCATION=...`). When
    /// [`S3_ENDPOINT_ENV`] is present the mapping source is forced to
    /// `s3` with that endpoint, regardless of the file value.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("REMAP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Ok(endpoint) = env::var(S3_ENDPOINT_ENV) {
            config.mapping.source = MappingSourceKind::S3;
            config.mapping.remote.endpoint = endpoint;
        }

        config.expand_env_vars();
        Ok(config)
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in remote config values
    fn expand_env_vars(&mut self) {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        let remote = &mut self.mapping.remote;
        remote.endpoint = Self::expand_string(&re, &remote.endpoint);
        remote.bucket = Self::expand_string(&re, &remote.bucket);
        if let Some(token) = &remote.access_token {
            remote.access_token = Some(Self::expand_string(&re, token));
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Where the mapping document lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MappingSourceKind {
    /// Packaged/local file
    #[default]
    File,
    /// S3-compatible object store
    S3,
}

/// Mapping source and reload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Source kind (`file` or `s3`)
    pub source: MappingSourceKind,
    /// Local path or remote object key
    pub location: String,
    /// Remote object-store client configuration
    pub remote: RemoteConfig,
    /// Hot-reload configuration
    pub hot_reload: HotReloadConfig,
    /// Fetch timeout and retry configuration
    pub fetch: FetchConfig,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            source: MappingSourceKind::File,
            location: "mappings/topic-mappings.json".to_string(),
            remote: RemoteConfig::default(),
            hot_reload: HotReloadConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

/// Remote object-store client configuration
///
/// `endpoint` may contain a `{region}` placeholder which is substituted
/// with `region` when building the object URL. `access_token` supports
/// `${VAR}` expansion and is sent as a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
    /// Object-store endpoint, e.g. `https://s3.{region}.example.com`
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Region substituted into the endpoint
    pub region: Option<String>,
    /// Bearer credential
    pub access_token: Option<String>,
}

/// Hot-reload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Start the Reload Controller
    pub enabled: bool,
    /// Poll interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
        }
    }
}

/// Fetch timeout and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-attempt timeout (applied by the HTTP client)
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Per-call timeout across all attempts
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Per-record behavior toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Elevate mapping-miss logs to error
    pub fail_on_missing_mapping: bool,
    /// Emit the `metadata` side-channel (wrapped framing only)
    pub attach_source_metadata: bool,
    /// Emit the `rawPayload` side-channel (wrapped framing only)
    pub store_raw_payload: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            fail_on_missing_mapping: false,
            attach_source_metadata: true,
            store_raw_payload: false,
        }
    }
}
