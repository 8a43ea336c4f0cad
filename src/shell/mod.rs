//! Presentation shell
//!
//! Owns the logger and the user's settings, turns button presses into
//! start/stop calls and applies logger events to the view. Everything here
//! runs on the presentation side; logger events only reach the view
//! through `pump`.

pub mod view;

pub use view::{Affordances, ShellView};

use crate::config::Settings;
use crate::recorder::{
    EventReceiver, Logger, LoggerEvent, LoggerStatus, SessionSummary, StopReason,
};
use crate::utils::{AppError, AppResult};

pub struct Shell {
    logger: Logger,
    events: EventReceiver,
    settings: Settings,
    view: ShellView,
}

impl Shell {
    pub fn new(logger: Logger, events: EventReceiver, settings: Settings) -> Self {
        let folder_label = settings.resolved_folder().display().to_string();
        let view = ShellView::new(logger.current_status(), folder_label);
        Self {
            logger,
            events,
            settings,
            view,
        }
    }

    pub fn view(&self) -> &ShellView {
        &self.view
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Start or stop logging, like pressing the toggle button
    pub fn toggle(&mut self) -> AppResult<LoggerStatus> {
        let result = match self.logger.current_status() {
            LoggerStatus::NotLogging => self.start(),
            LoggerStatus::Logging => self.stop().map(|_| ()),
        };
        if let Err(e) = &result {
            tracing::error!("Toggle failed: {}", e);
            self.view.last_error = Some(e.to_string());
        }
        self.pump();
        result.map(|_| self.view.status)
    }

    fn start(&mut self) -> AppResult<()> {
        self.view.last_error = None;
        self.logger.start(self.settings.snapshot())?;
        Ok(())
    }

    fn stop(&mut self) -> AppResult<SessionSummary> {
        Ok(self.logger.stop()?)
    }

    /// Apply every pending logger event. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: LoggerEvent) {
        match event {
            LoggerEvent::StatusChanged { reason, .. } => {
                // The event may be stale by now; the logger is authoritative
                let status = self.logger.current_status();
                self.view.set_status(status);
                if let Some(StopReason::Failed(message)) = reason {
                    self.view.last_error = Some(message);
                }
            }
            LoggerEvent::Level(level) => {
                if self.view.status.is_logging() {
                    self.view.set_level(level);
                }
            }
            LoggerEvent::SegmentStarted(path) => {
                tracing::debug!("Writing {:?}", path);
                self.view.current_segment = Some(path);
            }
            LoggerEvent::SegmentFinished(path) => {
                tracing::debug!("Finished {:?}", path);
            }
        }
    }

    /// Edit the settings. Rejected while logging.
    pub fn update_settings(&mut self, edit: impl FnOnce(&mut Settings)) -> AppResult<()> {
        if self.logger.is_logging() {
            return Err(AppError::SettingsLocked);
        }
        edit(&mut self.settings);
        self.view.folder_label = self.settings.resolved_folder().display().to_string();
        Ok(())
    }

    /// Stop any running session and hand back the settings to persist
    pub fn shutdown(mut self) -> Settings {
        if self.logger.is_logging() {
            match self.logger.stop() {
                Ok(summary) => tracing::info!(
                    "Stopped on shutdown after {} segment(s)",
                    summary.segments.len()
                ),
                Err(e) => tracing::warn!("Failed to stop logger on shutdown: {}", e),
            }
        }
        self.pump();
        self.settings
    }
}
