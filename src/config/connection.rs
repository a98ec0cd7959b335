//! Connection descriptors: `DATABASE_URL` parsing and discrete settings.

use super::ConfigError;
use crate::target::duckdb::DuckDbLocation;
use crate::target::mysql::{MySqlEndpoint, DEFAULT_PORT};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::mysql::MySqlSslMode;
use std::str::FromStr;
use url::{Host, Url};

static CREDENTIALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://(?P<user>[^:@/]*):[^@/]*@").unwrap());

const DEFAULT_USER: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    MySql(MySqlEndpoint),
    DuckDb(DuckDbLocation),
}

/// Where to load, plus the database named in the URL, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub backend: Backend,
    pub database: Option<String>,
}

impl ConnectionDescriptor {
    /// Parses `mysql://[user[:password]@]host[:port][/database][?ssl-mode=...]`,
    /// `duckdb://path` or `duckdb://:memory:`.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if let Some(rest) = url.strip_prefix("duckdb://") {
            let location = match rest {
                "" | ":memory:" => DuckDbLocation::Memory,
                path => DuckDbLocation::file(path),
            };
            return Ok(Self {
                backend: Backend::DuckDb(location),
                database: None,
            });
        }

        let invalid = || ConfigError::InvalidUrl(redact_url(url));
        let parsed = Url::parse(url).map_err(|_| invalid())?;
        if parsed.scheme() != "mysql" {
            return Err(invalid());
        }

        let host = match parsed.host().ok_or_else(invalid)? {
            Host::Domain(domain) => decode(domain).ok_or_else(invalid)?,
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        let user = decode(parsed.username()).ok_or_else(invalid)?;
        let user = if user.is_empty() {
            DEFAULT_USER.to_string()
        } else {
            user
        };

        let mut endpoint = MySqlEndpoint::new(host, user);
        endpoint.port = parsed.port().unwrap_or(DEFAULT_PORT);
        endpoint.password = match parsed.password() {
            Some(password) => Some(decode(password).ok_or_else(invalid)?),
            None => None,
        };
        for (key, value) in parsed.query_pairs() {
            if matches!(key.as_ref(), "ssl-mode" | "sslmode" | "ssl_mode") {
                let mode = MySqlSslMode::from_str(&value.replace('-', "_")).map_err(|_| invalid())?;
                endpoint.require_tls =
                    !matches!(mode, MySqlSslMode::Disabled | MySqlSslMode::Preferred);
            }
        }

        let database = decode(parsed.path().trim_start_matches('/')).ok_or_else(invalid)?;

        Ok(Self {
            backend: Backend::MySql(endpoint),
            database: (!database.is_empty()).then_some(database),
        })
    }

    pub fn mysql(endpoint: MySqlEndpoint, database: Option<String>) -> Self {
        Self {
            backend: Backend::MySql(endpoint),
            database,
        }
    }

    pub fn set_require_tls(&mut self, require: bool) {
        if let Backend::MySql(endpoint) = &mut self.backend {
            endpoint.require_tls = require;
        }
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.backend {
            Backend::MySql(endpoint) => write!(f, "{}", endpoint)?,
            Backend::DuckDb(location) => write!(f, "{}", location)?,
        }
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
        }
        Ok(())
    }
}

fn decode(component: &str) -> Option<String> {
    urlencoding::decode(component).ok().map(|s| s.into_owned())
}

/// Hides the password in a URL before it reaches an error message.
pub fn redact_url(url: &str) -> String {
    CREDENTIALS_RE.replace(url, "://$user:***@").into_owned()
}
