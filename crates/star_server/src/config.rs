//! Server configuration
//!
//! Read from a TOML file. Every key is optional; a missing file means all
//! defaults.
//!
//! ```toml
//! tick_rate = 60.0
//! admins = ["kae"]
//! hot_reload = true
//! asset_cleanup_interval = 10.0
//!
//! [assets]
//! sources = ["assets", "mods/frackin.pak"]
//!
//! [assets.settings]
//! workerPoolSize = 2
//! digestIgnore = ["\\.txt$"]
//!
//! [world]
//! width = 3000
//! height = 2000
//! gravity = 80.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use star_asset::AssetsSettings;
use star_world::{Vec2I, WorldSettings};

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directories and packed files, later sources override earlier ones
    pub sources: Vec<PathBuf>,
    pub settings: AssetsSettings,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            sources: vec![PathBuf::from("assets")],
            settings: AssetsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: i32,
    pub height: i32,
    pub gravity: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let defaults = WorldSettings::default();
        Self {
            width: defaults.size.x,
            height: defaults.size.y,
            gravity: defaults.gravity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub assets: AssetsConfig,
    pub world: WorldConfig,
    /// World steps per second
    pub tick_rate: f64,
    /// Player names that connect as admins
    pub admins: Vec<String>,
    /// Reload assets when files under a directory source change
    pub hot_reload: bool,
    /// Highest number of clients connected at once
    pub max_clients: usize,
    /// Seconds between sweeps evicting cached assets past their time to live
    pub asset_cleanup_interval: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            assets: AssetsConfig::default(),
            world: WorldConfig::default(),
            tick_rate: 60.0,
            admins: Vec::new(),
            hot_reload: false,
            max_clients: 8,
            asset_cleanup_interval: 10.0,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path`, or the defaults when it does not exist. Relative asset
    /// sources are resolved against the file's directory.
    pub fn load(path: &Path) -> ServerResult<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text).map_err(|e| ServerError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if let Some(base) = path.parent() {
            for source in &mut config.assets.sources {
                if source.is_relative() {
                    *source = base.join(&*source);
                }
            }
        }
        config.validate(path)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self, path: &Path) -> ServerResult<()> {
        let invalid = |reason: &str| ServerError::Config {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(invalid("tick_rate must be positive"));
        }
        if self.world.width <= 0 || self.world.height <= 0 {
            return Err(invalid("world size must be positive"));
        }
        if !(self.asset_cleanup_interval.is_finite() && self.asset_cleanup_interval >= 0.0) {
            return Err(invalid("asset_cleanup_interval must not be negative"));
        }
        Ok(())
    }

    pub fn world_settings(&self) -> WorldSettings {
        WorldSettings {
            size: Vec2I::new(self.world.width, self.world.height),
            gravity: self.world.gravity,
            timestep: (1.0 / self.tick_rate) as f32,
            ..Default::default()
        }
    }

    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.iter().any(|admin| admin.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.assets.sources, vec![PathBuf::from("assets")]);
    }

    #[test]
    fn test_parse_full() {
        let config = ServerConfig::from_toml(
            r#"
            tick_rate = 30.0
            admins = ["Kae"]
            hot_reload = true
            asset_cleanup_interval = 5.0

            [assets]
            sources = ["base", "mods/extra.pak"]

            [assets.settings]
            workerPoolSize = 2
            digestIgnore = ["\\.txt$"]

            [world]
            width = 300
            height = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.assets.sources.len(), 2);
        assert_eq!(config.asset_cleanup_interval, 5.0);
        assert_eq!(config.assets.settings.worker_pool_size, 2);
        assert_eq!(config.assets.settings.digest_ignore, vec!["\\.txt$".to_string()]);
        assert!(config.is_admin("kae"));
        assert!(!config.is_admin("nova"));

        let settings = config.world_settings();
        assert_eq!(settings.size, Vec2I::new(300, 200));
        assert_eq!(settings.gravity, WorldSettings::default().gravity);
        assert!((settings.timestep - 1.0 / 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_resolves_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[assets]\nsources = [\"assets\"]\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.assets.sources, vec![dir.path().join("assets")]);

        assert_eq!(ServerConfig::load(&dir.path().join("missing.toml")).unwrap(), ServerConfig::default());

        std::fs::write(&path, "tick_rate = 0.0\n").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ServerError::Config { .. })));
        std::fs::write(&path, "asset_cleanup_interval = -1.0\n").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ServerError::Config { .. })));
        std::fs::write(&path, "tick_rate = \"fast\"\n").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ServerError::Config { .. })));
    }
}
