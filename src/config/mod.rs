use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::{Path, PathBuf},
};

pub mod validation;

use validation::ConfigValidator;

pub const DEFAULT_PORT: u16 = 49152;
pub const DEFAULT_ALIVE_INTERVAL: u32 = 1800;
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "opencds.db";

fn default_true() -> bool {
    true
}

fn default_filesystem_charset() -> String {
    "UTF-8".to_string()
}

fn default_autoscan_interval() -> u64 {
    1800
}

/// Main application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub import: ImportConfig,
}

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    /// Unique Device Name persisted across restarts.
    pub udn: String,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub home: PathBuf,
    pub webroot: PathBuf,
    /// SSDP alive notification interval in seconds.
    pub alive: u32,
    /// Hide the "PC Directory" subtree from UPnP browse results.
    #[serde(default)]
    pub hide_pc_directory: bool,
    /// Truncate dc:title / dc:description to this many characters for
    /// control points with string-length limits.
    #[serde(default)]
    pub string_limit: Option<usize>,
    #[serde(default)]
    pub mark_played: MarkPlayedConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarkPlayedConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub string: String,
    /// Prepend the marker when true, append otherwise.
    #[serde(default = "default_true")]
    pub prepend: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub driver: StorageDriver,
    /// Database file, relative paths resolve under the server home.
    pub database_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Sqlite3,
    Mysql,
}

/// Import pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub hidden_files: bool,
    #[serde(default)]
    pub ignore_unknown_extensions: bool,
    #[serde(default = "default_filesystem_charset")]
    pub filesystem_charset: String,
    #[serde(default = "default_filesystem_charset")]
    pub metadata_charset: String,
    pub mappings: MappingsConfig,
    #[serde(default)]
    pub autoscan: Vec<AutoscanConfig>,
    #[serde(default)]
    pub virtual_layout: VirtualLayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingsConfig {
    pub extension_mimetype: BTreeMap<String, String>,
    pub mimetype_upnpclass: BTreeMap<String, String>,
    pub mimetype_contenttype: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscanConfig {
    pub location: PathBuf,
    pub mode: ScanModeConfig,
    #[serde(default)]
    pub level: ScanLevelConfig,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub hidden_files: bool,
    #[serde(default = "default_autoscan_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanModeConfig {
    Timed,
    Inotify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanLevelConfig {
    Basic,
    #[default]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualLayoutConfig {
    #[serde(rename = "type")]
    pub kind: LayoutKind,
}

impl Default for VirtualLayoutConfig {
    fn default() -> Self {
        Self {
            kind: LayoutKind::Builtin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Builtin,
    Disabled,
}

impl AppConfig {
    /// Default configuration rooted in the given home directory.
    pub fn default_with_home(home: &Path) -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| format!("OpenCDS ({})", h))
            .unwrap_or_else(|| "OpenCDS Media Server".to_string());

        Self {
            server: ServerConfig {
                name,
                udn: format!("uuid:{}", uuid::Uuid::new_v4()),
                ip: None,
                port: DEFAULT_PORT,
                home: home.to_path_buf(),
                webroot: home.join("web"),
                alive: DEFAULT_ALIVE_INTERVAL,
                hide_pc_directory: false,
                string_limit: None,
                mark_played: MarkPlayedConfig::default(),
                storage: StorageConfig {
                    driver: StorageDriver::Sqlite3,
                    database_file: Some(PathBuf::from(DATABASE_FILE_NAME)),
                },
            },
            import: ImportConfig {
                hidden_files: false,
                ignore_unknown_extensions: false,
                filesystem_charset: default_filesystem_charset(),
                metadata_charset: default_filesystem_charset(),
                mappings: MappingsConfig::default(),
                autoscan: Vec::new(),
                virtual_layout: VirtualLayoutConfig::default(),
            },
        }
    }

    /// Default home directory for the current user.
    pub fn default_home() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opencds")
    }

    /// Load configuration from file or create it with defaults, so
    /// subsequent saves round-trip the effective configuration.
    pub fn load_or_create(config_path: &Path, home: &Path) -> Result<Self> {
        if config_path.exists() {
            let config = Self::load_from_file(config_path)?;
            Ok(config)
        } else {
            std::fs::create_dir_all(home)
                .with_context(|| format!("failed to create home directory: {}", home.display()))?;
            let default_config = Self::default_with_home(home);
            default_config.save_to_file(config_path).with_context(|| {
                format!(
                    "failed to create default configuration file at: {}",
                    config_path.display()
                )
            })?;
            tracing::info!(
                "created default configuration file at: {}",
                config_path.display()
            );
            Ok(default_config)
        }
    }

    pub fn load_from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", config_path.display()))?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    pub fn save_to_file(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            toml::to_string_pretty(self).context("failed to serialize configuration to TOML")?;

        std::fs::write(config_path, content)
            .with_context(|| format!("failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Resolved path of the catalog database file.
    pub fn database_file(&self) -> PathBuf {
        match &self.server.storage.database_file {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.server.home.join(p),
            None => self.server.home.join(DATABASE_FILE_NAME),
        }
    }

    /// Path of the active configuration file; the importer must never
    /// add it to the catalog.
    pub fn config_file(&self) -> PathBuf {
        self.server.home.join(CONFIG_FILE_NAME)
    }

    pub fn extension_to_mimetype(&self, extension: &str) -> Option<&str> {
        self.import
            .mappings
            .extension_mimetype
            .get(&extension.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Map a MIME type to a upnp:class, falling back to `major/*`.
    pub fn mimetype_to_upnpclass(&self, mime_type: &str) -> Option<&str> {
        let map = &self.import.mappings.mimetype_upnpclass;
        if let Some(class) = map.get(mime_type) {
            return Some(class);
        }
        let major = mime_type.split('/').next()?;
        map.get(&format!("{}/*", major)).map(|s| s.as_str())
    }

    pub fn mimetype_to_contenttype(&self, mime_type: &str) -> Option<&str> {
        self.import
            .mappings
            .mimetype_contenttype
            .get(mime_type)
            .map(|s| s.as_str())
    }
}

impl Default for MappingsConfig {
    fn default() -> Self {
        let extension_mimetype: BTreeMap<String, String> = [
            ("mp3", "audio/mpeg"),
            ("flac", "audio/x-flac"),
            ("ogg", "application/ogg"),
            ("wav", "audio/x-wav"),
            ("m4a", "audio/mp4"),
            ("aac", "audio/aac"),
            ("wma", "audio/x-ms-wma"),
            ("m3u", "audio/x-mpegurl"),
            ("pls", "audio/x-scpls"),
            ("mp4", "video/mp4"),
            ("mkv", "video/x-matroska"),
            ("avi", "video/x-msvideo"),
            ("mov", "video/quicktime"),
            ("mpg", "video/mpeg"),
            ("mpeg", "video/mpeg"),
            ("webm", "video/webm"),
            ("wmv", "video/x-ms-wmv"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png", "image/png"),
            ("gif", "image/gif"),
            ("bmp", "image/bmp"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mimetype_upnpclass: BTreeMap<String, String> = [
            ("audio/*", "object.item.audioItem.musicTrack"),
            ("application/ogg", "object.item.audioItem.musicTrack"),
            ("video/*", "object.item.videoItem"),
            ("image/*", "object.item.imageItem"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mimetype_contenttype: BTreeMap<String, String> = [
            ("audio/mpeg", "mp3"),
            ("audio/x-flac", "flac"),
            ("application/ogg", "ogg"),
            ("audio/mp4", "m4a"),
            ("image/jpeg", "jpg"),
            ("audio/x-mpegurl", "playlist"),
            ("audio/x-scpls", "playlist"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            extension_mimetype,
            mimetype_upnpclass,
            mimetype_contenttype,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let config = AppConfig::default_with_home(dir.path());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.server.udn, config.server.udn);
        assert_eq!(
            parsed.import.mappings.extension_mimetype,
            config.import.mappings.extension_mimetype
        );
    }

    #[test]
    fn test_load_or_create_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let created = AppConfig::load_or_create(&path, dir.path()).unwrap();
        assert!(path.exists());
        let loaded = AppConfig::load_or_create(&path, dir.path()).unwrap();
        assert_eq!(created.server.udn, loaded.server.udn);
    }

    #[test]
    fn test_mimetype_class_fallback() {
        let dir = tempdir().unwrap();
        let config = AppConfig::default_with_home(dir.path());
        assert_eq!(
            config.mimetype_to_upnpclass("audio/x-flac"),
            Some("object.item.audioItem.musicTrack")
        );
        assert_eq!(
            config.mimetype_to_upnpclass("video/x-matroska"),
            Some("object.item.videoItem")
        );
        assert_eq!(config.mimetype_to_upnpclass("text/plain"), None);
    }
}
