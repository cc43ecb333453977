use anyhow::{anyhow, Result};

use super::{AppConfig, AutoscanConfig, StorageDriver};

/// Configuration validator for ensuring configuration integrity.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> Result<()> {
        Self::validate_server_config(config)?;
        Self::validate_storage_config(config)?;
        Self::validate_import_config(config)?;
        Ok(())
    }

    fn validate_server_config(config: &AppConfig) -> Result<()> {
        if config.server.port == 0 {
            return Err(anyhow!("server port cannot be 0"));
        }

        if config.server.name.trim().is_empty() {
            return Err(anyhow!("server name cannot be empty"));
        }

        if !config.server.udn.starts_with("uuid:") {
            return Err(anyhow!(
                "server UDN must be of the form uuid:<uuid>: {}",
                config.server.udn
            ));
        }

        if config.server.home.as_os_str().is_empty() {
            return Err(anyhow!("server home directory cannot be empty"));
        }

        if let Some(limit) = config.server.string_limit {
            if limit < 4 {
                return Err(anyhow!("string limit must leave room for an ellipsis"));
            }
        }

        if config.server.mark_played.enabled && config.server.mark_played.string.is_empty() {
            return Err(anyhow!("mark-played is enabled but the marker string is empty"));
        }

        Ok(())
    }

    fn validate_storage_config(config: &AppConfig) -> Result<()> {
        match config.server.storage.driver {
            StorageDriver::Sqlite3 => Ok(()),
            // The configuration surface accepts mysql, this build ships
            // only the sqlite3 driver.
            StorageDriver::Mysql => Err(anyhow!(
                "storage driver 'mysql' is not available in this build; use 'sqlite3'"
            )),
        }
    }

    fn validate_import_config(config: &AppConfig) -> Result<()> {
        if config.import.mappings.extension_mimetype.is_empty() {
            return Err(anyhow!(
                "at least one extension-to-mimetype mapping must be configured"
            ));
        }

        for (index, autoscan) in config.import.autoscan.iter().enumerate() {
            Self::validate_autoscan(autoscan, index)?;
        }

        Ok(())
    }

    fn validate_autoscan(autoscan: &AutoscanConfig, index: usize) -> Result<()> {
        if autoscan.location.as_os_str().is_empty() {
            return Err(anyhow!("autoscan directory {} has an empty location", index));
        }

        if !autoscan.location.is_absolute() {
            return Err(anyhow!(
                "autoscan directory {} must be an absolute path: {}",
                index,
                autoscan.location.display()
            ));
        }

        if autoscan.interval == 0 {
            return Err(anyhow!(
                "autoscan directory {} has a zero scan interval",
                index
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScanLevelConfig, ScanModeConfig};
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let dir = tempdir().unwrap();
        let config = AppConfig::default_with_home(dir.path());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_mysql_driver_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default_with_home(dir.path());
        config.server.storage.driver = StorageDriver::Mysql;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_relative_autoscan_location_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default_with_home(dir.path());
        config.import.autoscan.push(AutoscanConfig {
            location: "music".into(),
            mode: ScanModeConfig::Timed,
            level: ScanLevelConfig::Full,
            recursive: true,
            hidden_files: false,
            interval: 60,
        });
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
