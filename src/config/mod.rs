//! Layered configuration.
//!
//! Settings come from four layers, lowest precedence first: the built-in
//! target profile, a YAML file, the environment (including `.env`), and the
//! command line. Each layer is a [`ConfigLayer`] of optional fields; the
//! merged result is resolved into a [`LoaderConfig`].

mod connection;

pub use connection::{redact_url, Backend, ConnectionDescriptor};

use crate::planner::{ChunkPolicy, BYTES_PER_MB};
use crate::preflight::PreflightMode;
use crate::target::mysql::{MySqlEndpoint, DEFAULT_PORT};
use crate::uploader::{UploadOptions, DEFAULT_COMMIT_EVERY, DEFAULT_MAX_ERROR_SAMPLES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const APP_DIR_NAME: &str = "sql-uploader";

/// Default retry delay as a multiple of the inter-chunk delay.
pub const RETRY_DELAY_FACTOR: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("no target connection configured; set DATABASE_URL or DB_HOST")]
    MissingConnection,

    #[error("no target database name configured; set DB_NAME or --database")]
    MissingDatabase,
}

/// Preset tuning for a class of target service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProfile {
    /// Small managed instances: small chunks, long pauses.
    #[default]
    Constrained,
    /// Larger instances that take bigger transactions.
    Capable,
}

impl TargetProfile {
    pub fn chunk_mb(&self) -> u64 {
        match self {
            TargetProfile::Constrained => 5,
            TargetProfile::Capable => 15,
        }
    }

    pub fn small_file_threshold_mb(&self) -> u64 {
        match self {
            TargetProfile::Constrained => 5,
            TargetProfile::Capable => 60,
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        match self {
            TargetProfile::Constrained => Duration::from_secs(5),
            TargetProfile::Capable => Duration::from_secs(3),
        }
    }

    /// First retry pass delay, always longer than the inter-chunk delay.
    pub fn retry_delay(&self) -> Duration {
        self.chunk_delay().saturating_mul(RETRY_DELAY_FACTOR)
    }

    pub fn connect_timeout(&self) -> Duration {
        match self {
            TargetProfile::Constrained => Duration::from_secs(30),
            TargetProfile::Capable => Duration::from_secs(60),
        }
    }
}

impl std::str::FromStr for TargetProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constrained" => Ok(TargetProfile::Constrained),
            "capable" => Ok(TargetProfile::Capable),
            _ => Err(format!(
                "Unknown profile: {}. Valid options: constrained, capable",
                s
            )),
        }
    }
}

impl std::fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetProfile::Constrained => write!(f, "constrained"),
            TargetProfile::Capable => write!(f, "capable"),
        }
    }
}

/// One configuration layer. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub profile: Option<TargetProfile>,
    pub database_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub require_tls: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub chunk_size_mb: Option<u64>,
    pub small_file_threshold_mb: Option<u64>,
    pub chunk_delay_secs: Option<f64>,
    pub retry_delay_secs: Option<f64>,
    pub retry_passes: Option<u32>,
    pub commit_every: Option<usize>,
    pub max_error_samples: Option<usize>,
    pub preflight: Option<PreflightMode>,
    pub policy: Option<ChunkPolicy>,
    pub dump: Option<PathBuf>,
    pub keep_chunks: Option<PathBuf>,
}

impl ConfigLayer {
    /// Load a layer from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The per-user config file, if one exists.
    pub fn default_path() -> Option<PathBuf> {
        let path = dirs::config_dir()?.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
        path.is_file().then_some(path)
    }

    /// Reads connection settings from environment variables. `DB_*` names
    /// win over their `MYSQL_*` aliases.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(*name).filter(|v| !v.is_empty()))
        };

        let port = match get(&["DB_PORT", "MYSQL_PORT"]) {
            Some(p) => Some(p.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "DB_PORT".into(),
                value: p.clone(),
            })?),
            None => None,
        };

        Ok(Self {
            database_url: get(&["DATABASE_URL", "MYSQL_URL"]),
            host: get(&["DB_HOST", "MYSQL_HOST"]),
            port,
            user: get(&["DB_USER", "MYSQL_USER"]),
            password: get(&["DB_PASSWORD", "MYSQL_PASSWORD"]),
            database: get(&["DB_NAME", "MYSQL_DATABASE"]),
            ..Self::default()
        })
    }

    /// Overlays `higher` on top of `self`.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            profile: higher.profile.or(self.profile),
            database_url: higher.database_url.or(self.database_url),
            host: higher.host.or(self.host),
            port: higher.port.or(self.port),
            user: higher.user.or(self.user),
            password: higher.password.or(self.password),
            database: higher.database.or(self.database),
            require_tls: higher.require_tls.or(self.require_tls),
            connect_timeout_secs: higher.connect_timeout_secs.or(self.connect_timeout_secs),
            chunk_size_mb: higher.chunk_size_mb.or(self.chunk_size_mb),
            small_file_threshold_mb: higher
                .small_file_threshold_mb
                .or(self.small_file_threshold_mb),
            chunk_delay_secs: higher.chunk_delay_secs.or(self.chunk_delay_secs),
            retry_delay_secs: higher.retry_delay_secs.or(self.retry_delay_secs),
            retry_passes: higher.retry_passes.or(self.retry_passes),
            commit_every: higher.commit_every.or(self.commit_every),
            max_error_samples: higher.max_error_samples.or(self.max_error_samples),
            preflight: higher.preflight.or(self.preflight),
            policy: higher.policy.or(self.policy),
            dump: higher.dump.or(self.dump),
            keep_chunks: higher.keep_chunks.or(self.keep_chunks),
        }
    }

    /// Applies profile defaults and validates.
    pub fn resolve(self) -> Result<LoaderConfig, ConfigError> {
        let profile = self.profile.unwrap_or_default();

        // A URL from any layer takes precedence over discrete host settings.
        let mut connection = match (&self.database_url, &self.host) {
            (Some(url), _) => Some(ConnectionDescriptor::from_url(url)?),
            (None, Some(host)) => {
                let mut endpoint = MySqlEndpoint::new(
                    host.clone(),
                    self.user.clone().unwrap_or_else(|| "root".to_string()),
                );
                endpoint.port = self.port.unwrap_or(DEFAULT_PORT);
                endpoint.password = self.password.clone();
                Some(ConnectionDescriptor::mysql(endpoint, None))
            }
            (None, None) => None,
        };
        if let (Some(conn), Some(true)) = (connection.as_mut(), self.require_tls) {
            conn.set_require_tls(true);
        }

        let database = self
            .database
            .clone()
            .or_else(|| connection.as_ref().and_then(|c| c.database.clone()));

        let chunk_delay = secs(self.chunk_delay_secs, "chunk_delay_secs")?
            .unwrap_or_else(|| profile.chunk_delay());
        let retry_delay = match secs(self.retry_delay_secs, "retry_delay_secs")? {
            Some(delay) => delay,
            None if chunk_delay.is_zero() => profile.retry_delay(),
            None => chunk_delay.saturating_mul(RETRY_DELAY_FACTOR),
        };
        if !chunk_delay.is_zero() && retry_delay <= chunk_delay {
            return Err(ConfigError::InvalidValue {
                key: "retry_delay_secs".into(),
                value: format!(
                    "{}s (must be longer than the {}s chunk delay)",
                    retry_delay.as_secs_f64(),
                    chunk_delay.as_secs_f64()
                ),
            });
        }

        let commit_every = self.commit_every.unwrap_or(DEFAULT_COMMIT_EVERY);
        if commit_every == 0 {
            return Err(ConfigError::InvalidValue {
                key: "commit_every".into(),
                value: "0".into(),
            });
        }
        let chunk_mb = self.chunk_size_mb.unwrap_or_else(|| profile.chunk_mb());
        if chunk_mb == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size_mb".into(),
                value: "0".into(),
            });
        }

        Ok(LoaderConfig {
            profile,
            connection,
            database,
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| profile.connect_timeout()),
            chunk_budget: chunk_mb.saturating_mul(BYTES_PER_MB),
            small_file_threshold: self
                .small_file_threshold_mb
                .unwrap_or_else(|| profile.small_file_threshold_mb())
                .saturating_mul(BYTES_PER_MB),
            chunk_delay,
            retry_delay,
            retry_passes: self.retry_passes.unwrap_or(1),
            commit_every,
            max_error_samples: self.max_error_samples.unwrap_or(DEFAULT_MAX_ERROR_SAMPLES),
            preflight: self.preflight.unwrap_or_default(),
            policy: self.policy.unwrap_or_default(),
            dump: self.dump,
            keep_chunks: self.keep_chunks,
        })
    }
}

fn secs(value: Option<f64>, key: &str) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            Duration::try_from_secs_f64(v).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub profile: TargetProfile,
    pub connection: Option<ConnectionDescriptor>,
    pub database: Option<String>,
    pub connect_timeout: Duration,
    /// Chunk budget in bytes.
    pub chunk_budget: u64,
    /// Dumps at or below this size, in bytes, upload as a single chunk.
    pub small_file_threshold: u64,
    pub chunk_delay: Duration,
    pub retry_delay: Duration,
    pub retry_passes: u32,
    pub commit_every: usize,
    pub max_error_samples: usize,
    pub preflight: PreflightMode,
    pub policy: ChunkPolicy,
    pub dump: Option<PathBuf>,
    pub keep_chunks: Option<PathBuf>,
}

impl LoaderConfig {
    pub fn connection(&self) -> Result<&ConnectionDescriptor, ConfigError> {
        self.connection.as_ref().ok_or(ConfigError::MissingConnection)
    }

    pub fn database(&self) -> Result<&str, ConfigError> {
        self.database
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or(ConfigError::MissingDatabase)
    }

    pub fn upload_options(&self, schema: &str) -> UploadOptions {
        UploadOptions {
            schema: schema.to_string(),
            chunk_delay: self.chunk_delay,
            retry_delay: self.retry_delay,
            retry_passes: self.retry_passes,
            commit_every: self.commit_every,
            max_error_samples: self.max_error_samples,
        }
    }
}
