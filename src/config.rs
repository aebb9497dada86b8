use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::paths;
use crate::merge::compose::EncodeProfile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Music volume (0.0-1.0)
    pub music_level: f64,
    /// Volume of the original video audio when it is kept (0.0-1.0)
    pub original_level: f64,
    /// Keep the original video audio ducked under the music
    pub keep_original_audio: bool,
    /// Explicit ffmpeg binary to use when none is on PATH
    pub engine_path: Option<PathBuf>,
    /// x264 preset for the re-encoded video
    pub video_preset: String,
    /// x264 constant rate factor
    pub video_crf: u8,
    /// AAC bitrate of the output audio
    pub audio_bitrate: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let profile = EncodeProfile::default();
        Self {
            music_level: Self::DEFAULT_MUSIC_LEVEL,
            original_level: Self::DEFAULT_ORIGINAL_LEVEL,
            keep_original_audio: true,
            engine_path: None,
            video_preset: profile.preset,
            video_crf: profile.crf,
            audio_bitrate: profile.audio_bitrate,
        }
    }
}

impl MergeConfig {
    pub const DEFAULT_MUSIC_LEVEL: f64 = 1.0;
    pub const DEFAULT_ORIGINAL_LEVEL: f64 = 0.2;

    pub fn load() -> Result<Self> {
        Self::load_from_path(paths::config_file()?)
    }

    /// Read the config, writing the defaults first if the file does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.music_level = sanitize_level(config.music_level, Self::DEFAULT_MUSIC_LEVEL);
        config.original_level = sanitize_level(config.original_level, Self::DEFAULT_ORIGINAL_LEVEL);
        Ok(config)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, toml).with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    pub fn encode_profile(&self) -> EncodeProfile {
        EncodeProfile {
            preset: self.video_preset.clone(),
            crf: self.video_crf,
            audio_bitrate: self.audio_bitrate.clone(),
            ..EncodeProfile::default()
        }
    }
}

fn sanitize_level(level: f64, default: f64) -> f64 {
    if level.is_finite() && (0.0..=1.0).contains(&level) {
        level
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = MergeConfig::load_from_path(&path).unwrap();

        assert_eq!(config, MergeConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn out_of_range_levels_fall_back_to_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "music_level = 3.5\noriginal_level = -1.0\nvideo_crf = 18\n").unwrap();

        let config = MergeConfig::load_from_path(&path).unwrap();

        assert_eq!(config.music_level, MergeConfig::DEFAULT_MUSIC_LEVEL);
        assert_eq!(config.original_level, MergeConfig::DEFAULT_ORIGINAL_LEVEL);
        assert_eq!(config.encode_profile().crf, 18);
        assert_eq!(config.encode_profile().video_codec, "libx264");
    }

    #[test]
    fn saved_config_round_trips() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        let config = MergeConfig {
            keep_original_audio: false,
            engine_path: Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")),
            ..MergeConfig::default()
        };

        config.save_to_path(&path).unwrap();

        assert_eq!(MergeConfig::load_from_path(&path).unwrap(), config);
    }
}
