use crate::services::connectivity::HttpConnectivityProbe;
use anyhow::{Context, Result, bail};
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Router endpoint, credentials and reboot preferences
    pub router: RouterConfig,

    /// Automation API configuration
    pub api: ApiConfig,

    /// Background internet probe configuration
    pub connectivity: ConnectivityConfig,

    /// Path configuration
    pub paths: PathConfig,

    /// External program invoked for notifications
    pub notify_command: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub ask_confirm_before_reboot: bool,
    pub notify_on_recovery: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            ask_confirm_before_reboot: true,
            notify_on_recovery: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct ConnectivityConfig {
    pub url: String,
    pub interval: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub run_log_file: PathBuf,
    pub estimate_file: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// all configuration from environment variables. Subsequent calls return
    /// the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The application cannot function
    /// without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let router = RouterConfig::load()?;
        let api = ApiConfig::load()?;
        let connectivity = ConnectivityConfig::load()?;
        let paths = PathConfig::load()?;
        let notify_command = env::var("NOTIFY_COMMAND")
            .ok()
            .filter(|cmd| !cmd.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            router,
            api,
            connectivity,
            paths,
            notify_command,
        })
    }
}

impl RouterConfig {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        let host = env::var("ROUTER_HOST").unwrap_or(defaults.host);
        let username = env::var("ROUTER_USERNAME").unwrap_or(defaults.username);
        let password = env::var("ROUTER_PASSWORD").unwrap_or(defaults.password);
        let ask_confirm_before_reboot = bool_var(
            "ASK_CONFIRM_BEFORE_REBOOT",
            defaults.ask_confirm_before_reboot,
        )?;
        let notify_on_recovery = bool_var("NOTIFY_ON_RECOVERY", defaults.notify_on_recovery)?;

        Ok(Self {
            host,
            username,
            password,
            ask_confirm_before_reboot,
            notify_on_recovery,
        })
    }
}

impl ApiConfig {
    fn load() -> Result<Self> {
        let port = env::var("API_PORT")
            .unwrap_or_else(|_| "1977".to_string())
            .parse::<u16>()
            .context("failed to parse API_PORT: invalid format")?;

        Ok(Self { port })
    }
}

impl ConnectivityConfig {
    fn load() -> Result<Self> {
        let url = env::var("CONNECTIVITY_URL")
            .unwrap_or_else(|_| HttpConnectivityProbe::DEFAULT_URL.to_string());

        let interval_ms = env::var("CONNECTIVITY_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse::<u64>()
            .context("failed to parse CONNECTIVITY_INTERVAL_MS: invalid format")?;

        anyhow::ensure!(
            interval_ms > 0,
            "failed to parse CONNECTIVITY_INTERVAL_MS: must be positive"
        );

        Ok(Self {
            url,
            interval: Duration::from_millis(interval_ms),
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir = match env::var("DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => Self::default_data_dir()?,
        };

        Ok(Self {
            run_log_file: data_dir.join("run.log"),
            estimate_file: data_dir.join("reboot_estimate.json"),
            data_dir,
        })
    }

    // In test/mock mode, keep state out of the user's cache directory
    #[cfg(any(test, feature = "mock"))]
    fn default_data_dir() -> Result<PathBuf> {
        Ok(env::temp_dir().join(env!("CARGO_PKG_NAME")))
    }

    #[cfg(not(any(test, feature = "mock")))]
    fn default_data_dir() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join(env!("CARGO_PKG_NAME")))
            .context("failed to determine cache directory: set DATA_DIR")
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => parse_bool(&value).with_context(|| format!("failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean: {other:?}"),
    }
}
