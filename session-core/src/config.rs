use std::path::PathBuf;
use std::time::Duration;

use crate::actors::desktop::DEFAULT_PERSIST_DEBOUNCE;
use crate::bus::reconnect::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::bus::{Endpoint, ReconnectPolicy, TransportError};
use crate::window_manager::{ArrangeLayout, DesktopArea};

/// Default budget for correlated requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!(
                "Invalid DESKTOP_LOG_FORMAT '{other}'. Expected 'pretty' or 'json'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Kernel WebSocket endpoint, without the token
    pub kernel_url: String,
    /// Appended to the endpoint as the `token` query parameter
    pub auth_token: String,
    /// Durable identity; `None` disables workspace persistence
    pub principal: Option<String>,
    /// Path to the workspace SQLite database
    pub database_url: String,
    pub persist_debounce: Duration,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
    pub area: DesktopArea,
    pub layout: ArrangeLayout,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_url: "ws://127.0.0.1:8080/ws".to_string(),
            auth_token: String::new(),
            principal: None,
            database_url: "sqlite:./data/workspace.db".to_string(),
            persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
            reconnect: ReconnectPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            area: DesktopArea::default(),
            layout: ArrangeLayout::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env { lookup: &lookup };
        let defaults = Self::default();

        let config = Self {
            kernel_url: env.string("DESKTOP_KERNEL_URL", &defaults.kernel_url),
            auth_token: env.string("DESKTOP_AUTH_TOKEN", ""),
            principal: (env.lookup)("DESKTOP_PRINCIPAL")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            database_url: env.string("DESKTOP_DATABASE_URL", &defaults.database_url),
            persist_debounce: Duration::from_millis(env.parse(
                "DESKTOP_PERSIST_DEBOUNCE_MS",
                DEFAULT_PERSIST_DEBOUNCE.as_millis() as u64,
            )?),
            reconnect: ReconnectPolicy {
                max_attempts: env.parse("DESKTOP_RECONNECT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                base_delay: Duration::from_millis(env.parse(
                    "DESKTOP_RECONNECT_BASE_MS",
                    DEFAULT_BASE_DELAY.as_millis() as u64,
                )?),
            },
            request_timeout: Duration::from_millis(env.parse(
                "DESKTOP_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            )?),
            area: DesktopArea {
                width: env.parse("DESKTOP_WIDTH", defaults.area.width)?,
                height: env.parse("DESKTOP_HEIGHT", defaults.area.height)?,
                top_bar: env.parse("DESKTOP_TOP_BAR_HEIGHT", defaults.area.top_bar)?,
            },
            layout: ArrangeLayout {
                left: env.string("DESKTOP_ARRANGE_LEFT", &defaults.layout.left),
                right: env.string("DESKTOP_ARRANGE_RIGHT", &defaults.layout.right),
            },
            log_format: LogFormat::from_env(&env.string("DESKTOP_LOG_FORMAT", "pretty"))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let area = &self.area;
        if area.width <= 0 {
            anyhow::bail!("DESKTOP_WIDTH must be positive, got {}", area.width);
        }
        if area.top_bar < 0 {
            anyhow::bail!("DESKTOP_TOP_BAR_HEIGHT must not be negative, got {}", area.top_bar);
        }
        if area.height <= area.top_bar {
            anyhow::bail!(
                "DESKTOP_HEIGHT ({}) must exceed DESKTOP_TOP_BAR_HEIGHT ({})",
                area.height,
                area.top_bar
            );
        }
        if self.layout.left == self.layout.right {
            anyhow::bail!(
                "DESKTOP_ARRANGE_LEFT and DESKTOP_ARRANGE_RIGHT must differ, both are '{}'",
                self.layout.left
            );
        }
        Ok(())
    }

    /// Kernel endpoint with the auth token attached.
    pub fn endpoint(&self) -> Result<Endpoint, TransportError> {
        Endpoint::new(&self.kernel_url, &self.auth_token)
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
            None => Ok(default),
        }
    }
}

/// Outcome of the `.env` search, reported once logging is up
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    Invalid { path: PathBuf, error: String },
    NotFound { cwd: PathBuf },
    NoCwd(String),
}

impl EnvFile {
    pub fn log(&self) {
        match self {
            EnvFile::Loaded(path) => {
                tracing::info!(path = %path.display(), "Loaded environment from .env");
            }
            EnvFile::Invalid { path, error } => {
                tracing::warn!(path = %path.display(), error = %error, "Failed to load .env file");
            }
            EnvFile::NotFound { cwd } => {
                tracing::info!(
                    cwd = %cwd.display(),
                    "No .env file found in current directory or ancestors; using process environment only"
                );
            }
            EnvFile::NoCwd(error) => {
                tracing::warn!(error = %error, "Could not determine current directory for .env lookup");
            }
        }
    }
}

/// Load the first `.env` found in the current directory or its ancestors.
pub fn load_env_file() -> EnvFile {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => return EnvFile::NoCwd(e.to_string()),
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            return match dotenvy::from_path(&candidate) {
                Ok(()) => EnvFile::Loaded(candidate),
                Err(e) => EnvFile::Invalid {
                    path: candidate,
                    error: e.to_string(),
                },
            };
        }
        if !current.pop() {
            return EnvFile::NotFound { cwd };
        }
    }
}
