use std::path::{Path, PathBuf};

use clipper_engine::ClipperConfig;
use clipper_engine::source::TWITCH_PLAYLIST_TEMPLATE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

const CONFIG_DIR_NAME: &str = "clipper";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Playlist URL template for `--platform twitch`; `{channel}` is replaced
    pub twitch_template: String,

    #[serde(flatten)]
    pub engine: ClipperConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            twitch_template: TWITCH_PLAYLIST_TEMPLATE.to_string(),
            engine: ClipperConfig {
                clips_dir: default_clips_dir(),
                ..ClipperConfig::default()
            },
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the per-user config file when `path` is
    /// `None`. A missing per-user file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(AppError::Config {
                    path: path.display().to_string(),
                    reason: "file does not exist".to_string(),
                });
            }
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: AppConfig = toml::from_str(&content).map_err(|e| AppError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if config.engine.clips_dir.as_os_str().is_empty() {
            config.engine.clips_dir = default_clips_dir();
        }
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Overwrite the config file with the defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path().ok_or_else(|| {
                AppError::InvalidInput("no config directory on this platform".to_string())
            })?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_clips_dir() -> PathBuf {
    dirs::video_dir()
        .map(|dir| dir.join("clips"))
        .unwrap_or_else(|| PathBuf::from("clips"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
clips_dir = "/srv/clips"

[muxer]
binary_path = "/opt/ffmpeg/bin/ffmpeg"

[fetch]
max_concurrent = 4
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.clips_dir, PathBuf::from("/srv/clips"));
        assert_eq!(config.engine.muxer.binary_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.engine.muxer.output_format, "mp4");
        assert_eq!(config.engine.fetch.max_concurrent, 4);
        assert_eq!(config.engine.resolver.max_retries, 3);
        assert_eq!(config.twitch_template, TWITCH_PLAYLIST_TEMPLATE);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }

    #[test]
    fn reset_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        AppConfig::reset(Some(&path)).unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.engine.http.timeout.as_secs(), 60);
        assert_eq!(config.engine.resolver.master_ttl.as_secs(), 3600);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "clips_dir = [").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)).unwrap_err(),
            AppError::Config { .. }
        ));
    }
}
