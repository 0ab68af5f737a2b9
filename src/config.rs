use crate::device;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration du démon
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Configuration du récepteur GPS
    pub gps: GpsConfig,

    /// Configuration des capteurs AHRS (IMU + baromètre)
    pub ahrs: AhrsConfig,

    /// Configuration des logs
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpsConfig {
    /// Activer le sous-système GPS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Nœuds série candidats, sondés dans l'ordre
    /// (vide = liste par défaut vk172, vk162, prolific0, ttyAMA0)
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AhrsConfig {
    /// Activer le sous-système AHRS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Numéro de bus I²C du baromètre et de l'IMU
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    /// Émettre aussi le rapport attitude texte FF-sim (débogage)
    #[serde(default = "default_false")]
    pub ffsim: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Niveau de log: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Journalisation détaillée trame par trame et satellite par satellite
    #[serde(default = "default_false")]
    pub debug: bool,
}

// Fonctions par défaut pour serde
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_i2c_bus() -> u8 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gps: GpsConfig {
                enabled: true,
                devices: Vec::new(),
            },
            ahrs: AhrsConfig {
                enabled: true,
                i2c_bus: 1,
                ffsim: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                debug: false,
            },
        }
    }
}

impl Config {
    /// Charge la configuration depuis un fichier TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Sauvegarde la configuration dans un fichier TOML
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path.as_ref(), content).context("Failed to write config file")?;

        Ok(())
    }

    /// Valide la configuration
    fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }
        Ok(())
    }

    /// Liste effective des nœuds série à sonder
    pub fn gps_devices(&self) -> Vec<String> {
        if self.gps.devices.is_empty() {
            device::default_device_paths()
        } else {
            self.gps.devices.clone()
        }
    }

    /// Crée un fichier de configuration exemple
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let example_config = Config {
            gps: GpsConfig {
                enabled: true,
                devices: Vec::new(),
            },
            ahrs: AhrsConfig {
                enabled: true,
                i2c_bus: 1,
                ffsim: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                debug: false,
            },
        };

        example_config.to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.gps.enabled);
        assert!(config.ahrs.enabled);
        assert_eq!(config.ahrs.i2c_bus, 1);
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_devices_falls_back_to_probe_list() {
        let config = Config::default();
        assert_eq!(config.gps_devices()[0], "/dev/vk172");

        let mut config = config;
        config.gps.devices = vec!["/dev/ttyUSB3".to_string()];
        assert_eq!(config.gps_devices(), ["/dev/ttyUSB3"]);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [gps]
            [ahrs]
            enabled = false
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(config.gps.enabled);
        assert!(!config.ahrs.enabled);
        assert_eq!(config.logging.level, "debug");
    }
}
