//! Configuration management for the abrcast client

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upload endpoint configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Playback configuration (manifest origin, transport defaults)
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Presentation settings shared by both flows
    #[serde(default)]
    pub app: AppConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Multipart upload endpoint of the packaging backend
    #[serde(default = "default_upload_endpoint")]
    pub endpoint: String,

    /// Name of the multipart field carrying the file
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Whole-request timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Origin serving `/output/{videoId}/master.m3u8`
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Seconds moved by the skip back/forward controls
    #[serde(default = "default_skip_seconds")]
    pub skip_seconds: f64,

    /// Clock tick of the headless player (ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL prefixed to `/stream/{id}` watch links
    #[serde(default = "default_origin")]
    pub watch_base: String,
}

// Default value functions
fn default_upload_endpoint() -> String {
    "http://localhost:3000/api/v1/videos/upload".to_string()
}

fn default_field_name() -> String {
    "video".to_string()
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_skip_seconds() -> f64 {
    10.0
}

fn default_tick_ms() -> u64 {
    250
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_upload_endpoint(),
            field_name: default_field_name(),
            timeout_secs: 0,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            skip_seconds: default_skip_seconds(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_base: default_origin(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "abrcast", "client")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Absolute link to the playback page of a video
    pub fn watch_url(&self, video_id: &str) -> String {
        format!(
            "{}{}",
            self.app.watch_base.trim_end_matches('/'),
            crate::upload::watch_path(video_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_backend_contract() {
        let config = Config::default();
        assert_eq!(
            config.upload.endpoint,
            "http://localhost:3000/api/v1/videos/upload"
        );
        assert_eq!(config.upload.field_name, "video");
        assert_eq!(config.playback.origin, "http://localhost:3000");
        assert_eq!(config.playback.skip_seconds, 10.0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            origin = "https://cdn.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.origin, "https://cdn.example.com");
        assert_eq!(config.playback.tick_ms, 250);
        assert_eq!(config.upload.field_name, "video");
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_path().unwrap(), path);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.upload.endpoint, config.upload.endpoint);
    }

    #[test]
    fn test_watch_url() {
        let mut config = Config::default();
        config.app.watch_base = "https://watch.example.com/".into();
        assert_eq!(
            config.watch_url("abc123"),
            "https://watch.example.com/stream/abc123"
        );
    }
}
