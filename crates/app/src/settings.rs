use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use novaviz_chat::{ControlMarkers, SessionConfig};
use novaviz_transport::TransportConfig;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3001/chat";
pub const DEFAULT_NOTICE_TTL_MS: u64 = 3000;
pub const DEFAULT_STALL_WARNING_AFTER_SECS: u64 = 60;
pub const SETTINGS_DIRECTORY_NAME: &str = "novaviz";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const CONFIG_PATH_ENV: &str = "NOVAVIZ_CONFIG";
pub const ENV_PREFIX: &str = "NOVAVIZ_";

/// Which renderer draws the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenterKind {
    #[default]
    Plain,
    Html,
}

impl PresenterKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_notice_ttl_ms")]
    pub notice_ttl_ms: u64,
    /// Zero disables the stall warning.
    #[serde(default = "default_stall_warning_after_secs")]
    pub stall_warning_after_secs: u64,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_presenter",
        deserialize_with = "deserialize_presenter"
    )]
    pub presenter: PresenterKind,
    #[serde(default)]
    pub markers: ControlMarkers,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            download_dir: default_download_dir(),
            notice_ttl_ms: default_notice_ttl_ms(),
            stall_warning_after_secs: default_stall_warning_after_secs(),
            greeting: None,
            presenter: PresenterKind::default(),
            markers: ControlMarkers::default(),
        }
    }
}

impl ClientSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".novaviz"))
    }

    /// `NOVAVIZ_CONFIG` wins over the per-user config directory.
    pub fn default_config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::default_config_dir().join(SETTINGS_FILE_NAME))
    }

    /// Defaults, then the settings file, then `NOVAVIZ_*` environment variables.
    pub fn load() -> Self {
        Self::load_from(&Self::default_config_path(), Some(ENV_PREFIX))
    }

    pub fn load_from(path: &Path, env_prefix: Option<&str>) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        if let Some(prefix) = env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }

        match figment.extract::<Self>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.server_url = if self.server_url.trim().is_empty() {
            default_server_url()
        } else {
            self.server_url.trim().to_string()
        };
        if self.download_dir.as_os_str().is_empty() {
            self.download_dir = default_download_dir();
        }
        if self.notice_ttl_ms == 0 {
            self.notice_ttl_ms = default_notice_ttl_ms();
        }
        self.greeting = self
            .greeting
            .map(|greeting| greeting.trim().to_string())
            .filter(|greeting| !greeting.is_empty());

        let defaults = ControlMarkers::default();
        self.markers.start = non_blank_or(&self.markers.start, defaults.start);
        self.markers.end = non_blank_or(&self.markers.end, defaults.end);
        self.markers.end_aliases = self
            .markers
            .end_aliases
            .into_iter()
            .map(|alias| alias.trim().to_string())
            .filter(|alias| !alias.is_empty())
            .collect();

        self
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    pub fn stall_warning_after(&self) -> Option<Duration> {
        (self.stall_warning_after_secs > 0)
            .then(|| Duration::from_secs(self.stall_warning_after_secs))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            markers: self.markers.clone(),
            greeting: self.greeting.clone(),
            notice_ttl: self.notice_ttl(),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(&self.server_url)
    }
}

fn non_blank_or(value: &str, fallback: String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback
    } else {
        value.to_string()
    }
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_notice_ttl_ms() -> u64 {
    DEFAULT_NOTICE_TTL_MS
}

fn default_stall_warning_after_secs() -> u64 {
    DEFAULT_STALL_WARNING_AFTER_SECS
}

fn serialize_presenter<S>(value: &PresenterKind, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.name())
}

fn deserialize_presenter<'de, D>(deserializer: D) -> Result<PresenterKind, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(parse_presenter(&value))
}

fn parse_presenter(value: &str) -> PresenterKind {
    if value.trim().eq_ignore_ascii_case("html") {
        PresenterKind::Html
    } else {
        PresenterKind::Plain
    }
}
