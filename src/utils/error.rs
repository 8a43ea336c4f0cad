//! Error types and handling
//!
//! Errors raised by the settings layer and the presentation shell.
//! Pipeline errors live next to the code that raises them.

use crate::recorder::LoggerError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Settings are locked while logging")]
    SettingsLocked,

    #[error("Logger error: {0}")]
    Logger(#[from] LoggerError),
}

impl AppError {
    /// Short machine-readable code, used when reporting errors as JSON
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::SettingsParse(_) => "SETTINGS_PARSE_ERROR",
            AppError::SettingsSerialize(_) => "SETTINGS_SERIALIZE_ERROR",
            AppError::NoConfigDir => "NO_CONFIG_DIR",
            AppError::SettingsLocked => "SETTINGS_LOCKED",
            AppError::Logger(_) => "LOGGER_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_errors_convert() {
        let err: AppError = LoggerError::NotLogging.into();
        assert_eq!(err.code(), "LOGGER_ERROR");
        assert!(err.to_string().contains("not logging"));
    }
}
