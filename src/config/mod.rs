use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "HMI_BRIDGE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub proxy: ProxyConfig,
    pub session: SessionConfig,
    pub resources: ResourcesConfig,
    pub playback: PlaybackConfig,
    pub server: ServerConfig,
}

/// Identity the bridge registers with on the head unit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub id: String,
    pub is_media_app: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Hello Sdl".to_string(),
            id: "8675309".to_string(),
            is_media_app: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_backoff_min_ms: u64,
    pub reconnect_backoff_max_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12345,
            reconnect_backoff_min_ms: 1000,
            reconnect_backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub watchdog_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_secs: 180,
        }
    }
}

impl SessionConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub dir: String,
    pub icon_name: String,
    pub welcome_image_name: String,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            dir: "resources".to_string(),
            icon_name: "ic_launcher.png".to_string(),
            welcome_image_name: "sdl_icon.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub track_name: String,
    pub track_duration_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            track_name: "audio_01".to_string(),
            track_duration_ms: 215_000,
        }
    }
}

impl PlaybackConfig {
    pub fn track_duration(&self) -> Duration {
        Duration::from_millis(self.track_duration_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7071,
            token: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "config file ignored, using defaults"
                ),
            }
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        // App identity
        if let Ok(val) = env::var(format!("{}APP_NAME", ENV_PREFIX)) {
            self.app.name = val;
        }
        if let Ok(val) = env::var(format!("{}APP_ID", ENV_PREFIX)) {
            self.app.id = val;
        }

        // Proxy link
        if let Ok(val) = env::var(format!("{}PROXY_HOST", ENV_PREFIX)) {
            self.proxy.host = val;
        }
        if let Ok(val) = env::var(format!("{}PROXY_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.proxy.port = port;
            }
        }

        // Session
        if let Ok(val) = env::var(format!("{}WATCHDOG_TIMEOUT_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.session.watchdog_timeout_secs = secs;
            }
        }

        // Resources
        if let Ok(val) = env::var(format!("{}RESOURCES_DIR", ENV_PREFIX)) {
            self.resources.dir = val;
        }

        // Status server
        if let Ok(val) = env::var(format!("{}SERVER_ENABLED", ENV_PREFIX)) {
            self.server.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}SERVER_TOKEN", ENV_PREFIX)) {
            self.server.token = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.app.name.trim().is_empty() {
            return Err("app.name must be set".into());
        }
        if self.app.id.trim().is_empty() {
            return Err("app.id must be set".into());
        }
        if self.proxy.host.trim().is_empty() {
            return Err("proxy.host must be set".into());
        }
        if self.proxy.port == 0 {
            return Err("proxy.port must be non-zero".into());
        }
        if self.proxy.reconnect_backoff_min_ms == 0 {
            return Err("proxy.reconnect_backoff_min_ms must be non-zero".into());
        }
        if self.proxy.reconnect_backoff_min_ms > self.proxy.reconnect_backoff_max_ms {
            return Err(
                "proxy.reconnect_backoff_min_ms must not exceed reconnect_backoff_max_ms".into(),
            );
        }
        if self.session.watchdog_timeout_secs == 0 {
            return Err("session.watchdog_timeout_secs must be >= 1".into());
        }
        if self.resources.icon_name.trim().is_empty()
            || self.resources.welcome_image_name.trim().is_empty()
        {
            return Err("resources.icon_name and resources.welcome_image_name must be set".into());
        }
        if self.playback.track_duration_ms == 0 {
            return Err("playback.track_duration_ms must be non-zero".into());
        }
        if self.server.enabled && self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    Path::new(&appdata).join("HmiBridge").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
