use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE_PATH: &str = "instance/curso.db";
pub const DEFAULT_UPLOAD_ROOT: &str = "uploads";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
    /// Networked store; holds a `postgresql://` connection string.
    Postgres(String),
}

impl DatabaseLocation {
    /// Interprets `DATABASE_URL`: `postgres://`/`postgresql://` select the
    /// networked store, anything else a local SQLite file (or memory).
    pub fn parse(url: Option<&str>) -> Result<Self, ConfigError> {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(DatabaseLocation::File(PathBuf::from(DEFAULT_DATABASE_PATH)));
        };

        if let Some(rest) = url.strip_prefix("postgres://") {
            return Ok(DatabaseLocation::Postgres(format!("postgresql://{}", rest)));
        }
        if url.starts_with("postgresql://") {
            return Ok(DatabaseLocation::Postgres(url.to_string()));
        }

        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        match path {
            ":memory:" => Ok(DatabaseLocation::Memory),
            "" => Err(ConfigError::Invalid {
                var: "DATABASE_URL",
                message: "empty sqlite path".to_string(),
            }),
            path if path.contains("://") => Err(ConfigError::Invalid {
                var: "DATABASE_URL",
                message: format!("unsupported scheme in `{}`", url),
            }),
            path => Ok(DatabaseLocation::File(PathBuf::from(path))),
        }
    }
}

/// Log-safe rendering: the Postgres password never reaches the output.
impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseLocation::File(path) => write!(f, "sqlite:{}", path.display()),
            DatabaseLocation::Memory => f.write_str("sqlite::memory:"),
            DatabaseLocation::Postgres(url) => {
                let rest = url.strip_prefix("postgresql://").unwrap_or(url);
                match rest.rsplit_once('@') {
                    Some((userinfo, host)) => {
                        let user = userinfo.split(':').next().unwrap_or_default();
                        write!(f, "postgresql://{}:***@{}", user, host)
                    }
                    None => write!(f, "postgresql://{}", rest),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseLocation,
    pub upload_root: PathBuf,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
}

impl Config {
    pub fn new(
        database_url: Option<&str>,
        upload_root: impl Into<PathBuf>,
        bind_addr: SocketAddr,
        max_upload_bytes: usize,
    ) -> Result<Self, ConfigError> {
        if max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_UPLOAD_BYTES",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            database: DatabaseLocation::parse(database_url)?,
            upload_root: upload_root.into(),
            bind_addr,
            max_upload_bytes,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        })
    }

    pub fn with_session_ttl_secs(mut self, secs: u64) -> Result<Self, ConfigError> {
        if secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SESSION_TTL_SECS",
                message: "must be greater than zero".to_string(),
            });
        }
        self.session_ttl = Duration::from_secs(secs);
        Ok(self)
    }
}
