//! Notifications a session sends to its host.

use crate::appearance::ChromeColors;

/// Receiver for session notifications. Payloads are JSON documents.
pub trait HostBridge {
    /// A book finished loading: its metadata fields plus `toc`.
    fn on_book_loaded(&mut self, json: &str);

    /// Opening failed: `{"kind": ..., "message": ...}`.
    fn on_book_load_failed(&mut self, json: &str);

    /// The reading position changed.
    fn on_relocated(&mut self, json: &str);

    /// The user activated a highlight that carries a note.
    fn show_note(&mut self, note: &str) {
        log::debug!("note: {note}");
    }

    /// Resolved chrome colors after an appearance change.
    fn on_chrome_colors(&mut self, colors: &ChromeColors) {
        log::debug!("chrome colors: {} on {}", colors.fg, colors.bg);
    }
}

/// Record of every notification, in order. Handy for hosts that poll.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordingBridge {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    BookLoaded(String),
    BookLoadFailed(String),
    Relocated(String),
    Note(String),
    ChromeColors(ChromeColors),
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded notifications.
    pub fn take(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

impl HostBridge for RecordingBridge {
    fn on_book_loaded(&mut self, json: &str) {
        self.notifications
            .push(Notification::BookLoaded(json.to_string()));
    }

    fn on_book_load_failed(&mut self, json: &str) {
        self.notifications
            .push(Notification::BookLoadFailed(json.to_string()));
    }

    fn on_relocated(&mut self, json: &str) {
        self.notifications
            .push(Notification::Relocated(json.to_string()));
    }

    fn show_note(&mut self, note: &str) {
        self.notifications.push(Notification::Note(note.to_string()));
    }

    fn on_chrome_colors(&mut self, colors: &ChromeColors) {
        self.notifications
            .push(Notification::ChromeColors(colors.clone()));
    }
}
