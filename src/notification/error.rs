//! Error types for notification delivery.

use thiserror::Error;

/// Ways a batch can fail to reach Slack. None of them is fatal: the batch is
/// logged and dropped.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No webhook URL in the resolved destination settings.
    #[error(
        "There is no Slack URL set, set `slack_url` in the config file or PM2_SLACK_SLACK_URL"
    )]
    MissingUrl,

    /// Connection, timeout or other transport-level failure.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The endpoint answered with something other than the acknowledgement token.
    #[error("Slack rejected the message (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The payload could not be turned into JSON.
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}
