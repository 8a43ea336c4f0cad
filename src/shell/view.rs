//! Presentation state derived from the logger status

use crate::recorder::{LevelSample, LoggerStatus};
use serde::Serialize;
use std::path::PathBuf;

/// What the controls show for a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Affordances {
    pub status_text: &'static str,
    pub toggle_label: &'static str,
    /// Settings can be edited
    pub options_enabled: bool,
}

impl Affordances {
    pub fn for_status(status: LoggerStatus) -> Self {
        match status {
            LoggerStatus::Logging => Self {
                status_text: "Logging",
                toggle_label: "Stop Logging",
                options_enabled: false,
            },
            LoggerStatus::NotLogging => Self {
                status_text: "Not Logging",
                toggle_label: "Start Logging",
                options_enabled: true,
            },
        }
    }
}

/// Everything the front-end renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellView {
    pub status: LoggerStatus,
    pub affordances: Affordances,
    pub folder_label: String,
    pub left: f32,
    pub right: f32,
    pub last_error: Option<String>,
    pub current_segment: Option<PathBuf>,
}

impl ShellView {
    pub fn new(status: LoggerStatus, folder_label: String) -> Self {
        Self {
            status,
            affordances: Affordances::for_status(status),
            folder_label,
            left: 0.0,
            right: 0.0,
            last_error: None,
            current_segment: None,
        }
    }

    pub fn set_status(&mut self, status: LoggerStatus) {
        self.status = status;
        self.affordances = Affordances::for_status(status);
        if !status.is_logging() {
            self.left = 0.0;
            self.right = 0.0;
            self.current_segment = None;
        }
    }

    pub fn set_level(&mut self, level: LevelSample) {
        self.left = level.left.clamp(0.0, 1.0);
        self.right = level.right.clamp(0.0, 1.0);
    }

    /// One-line rendering for the console
    pub fn status_line(&self, width: usize) -> String {
        let mut line = format!(
            "[{}] L {} R {}  {}",
            self.affordances.status_text,
            meter_bar(self.left, width),
            meter_bar(self.right, width),
            self.folder_label
        );
        if let Some(error) = &self.last_error {
            line.push_str(&format!("  error: {}", error));
        }
        line
    }
}

fn meter_bar(value: f32, width: usize) -> String {
    let filled = ((value.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
}
