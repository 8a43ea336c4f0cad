//! Persisted user settings
//!
//! Stored as TOML in the platform configuration directory. Missing keys
//! fall back to their defaults so older files keep loading.

use crate::recorder::{LoggerConfig, OutputFormat};
use crate::utils::{AppError, AppResult};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Unit of the retention window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionUnit {
    #[default]
    Days,
    Hours,
}

impl RetentionUnit {
    pub fn seconds(&self) -> u64 {
        match self {
            RetentionUnit::Days => 24 * 60 * 60,
            RetentionUnit::Hours => 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// MP3 bitrate in kbit/s
    pub bitrate: u32,
    /// Segment length in minutes
    pub length: u32,
    /// Output folder; empty means the platform music directory
    pub folder: String,
    /// Write into YYYY/MM/DD sub-folders
    pub organise_folder: bool,
    pub delete_old: bool,
    /// Retention window, in `delete_unit`s
    pub delete_time: u32,
    pub delete_unit: RetentionUnit,
    pub format: OutputFormat,
    /// Start segments on clock multiples of `length`
    pub align_segments: bool,
    /// Input device name; default input when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bitrate: 128,
            length: 60,
            folder: String::new(),
            organise_folder: true,
            delete_old: false,
            delete_time: 30,
            delete_unit: RetentionUnit::Days,
            format: OutputFormat::Mp3,
            align_segments: true,
            device: None,
        }
    }
}

impl Settings {
    /// Load settings, writing defaults on first run
    pub fn load_or_create_at(path: &Path) -> AppResult<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            let settings = Self::default();
            settings.save_to(path)?;
            tracing::info!("Created default settings at {:?}", path);
            Ok(settings)
        }
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> AppResult<PathBuf> {
        let proj_dirs =
            ProjectDirs::from("com", "shocklog", "shocklog").ok_or(AppError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("settings.toml"))
    }

    /// Folder segments are written to
    pub fn resolved_folder(&self) -> PathBuf {
        if self.folder.trim().is_empty() {
            default_music_dir()
        } else {
            PathBuf::from(&self.folder)
        }
    }

    /// Start-time configuration for the logger
    pub fn snapshot(&self) -> LoggerConfig {
        LoggerConfig {
            bitrate: self.bitrate,
            segment_length: Duration::from_secs(u64::from(self.length) * 60),
            folder: self.resolved_folder(),
            organise_folder: self.organise_folder,
            delete_old: self.delete_old,
            retention: Duration::from_secs(u64::from(self.delete_time) * self.delete_unit.seconds()),
            format: self.format,
            align_segments: self.align_segments,
        }
    }
}

/// The platform music directory, or the best available fallback
pub fn default_music_dir() -> PathBuf {
    if let Some(dirs) = UserDirs::new() {
        if let Some(audio) = dirs.audio_dir() {
            return audio.to_path_buf();
        }
        return dirs.home_dir().join("Music");
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
