//! Severity classification for notifications
//!
//! The severity decides the color bar of a Slack attachment:
//! - ALERT: something stopped or failed (stop, exit, error, exception, kill, ...)
//! - NEUTRAL: everything else (start, restart, log lines)

use super::event::EventKind;

/// Color used for alert attachments
pub const ALERT_COLOR: &str = "#F44336";
/// Color used for neutral attachments
pub const NEUTRAL_COLOR: &str = "#2196F3";

/// Severity level for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Alert,
    Neutral,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Alert => "ALERT",
            Severity::Neutral => "NEUTRAL",
        }
    }

    /// Attachment color for this severity
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Alert => ALERT_COLOR,
            Severity::Neutral => NEUTRAL_COLOR,
        }
    }
}

/// Classify severity based on event kind
///
/// Unknown lifecycle events passed through as `EventKind::Other` are neutral.
pub fn get_severity(kind: &EventKind) -> Severity {
    match kind {
        EventKind::Stop
        | EventKind::Exit
        | EventKind::Delete
        | EventKind::Error
        | EventKind::Kill
        | EventKind::Exception
        | EventKind::RestartOverlimit
        | EventKind::Suppressed => Severity::Alert,
        EventKind::Log | EventKind::Start | EventKind::Restart | EventKind::Other(_) => {
            Severity::Neutral
        }
    }
}
