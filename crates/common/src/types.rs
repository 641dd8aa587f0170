use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatch status of a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientStatus::Pending => write!(f, "pending"),
            RecipientStatus::Sent => write!(f, "sent"),
            RecipientStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A recipient queued for the current dispatch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecipientRecord {
    pub identifier: String,
    pub status: RecipientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecipientRecord {
    pub fn pending(identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            status: RecipientStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Where the recipients of a start command come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Generated by the number generator (`quantity` required).
    Random,
    /// Pasted free-form text (`numberList` required).
    Paste,
    /// Uploaded file contents, delivered as text (`numberList` required).
    File,
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Random => write!(f, "random"),
            InputSource::Paste => write!(f, "paste"),
            InputSource::File => write!(f, "file"),
        }
    }
}

/// Observer command that starts a dispatch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    /// Text sent to every recipient.
    pub message: String,
    /// Number of recipients to generate (source = random).
    #[serde(default)]
    pub quantity: Option<usize>,
    pub source: InputSource,
    /// Free-form recipient list (source = paste | file).
    #[serde(default)]
    pub number_list: Option<String>,
    /// Attachment location. Accepted but not dispatched.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Continue with the recipients still pending from an earlier session
    /// instead of purging them.
    #[serde(default)]
    pub resume: bool,
}

/// Counters reported to observers after every recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    pub remaining: u64,
}

impl Progress {
    pub fn new(sent: u64, failed: u64, total: u64) -> Self {
        Self {
            sent,
            failed,
            total,
            remaining: total.saturating_sub(sent + failed),
        }
    }
}

/// Lifecycle phase of the dispatch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Preparing,
    Sending,
    Completed,
    Stopped,
    Failed,
}

impl SessionPhase {
    /// Whether a session currently owns the dispatch loop.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Preparing | SessionPhase::Sending)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Preparing => write!(f, "preparing"),
            SessionPhase::Sending => write!(f, "sending"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Stopped => write!(f, "stopped"),
            SessionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Event published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum DispatchEvent {
    /// Code the operator enters on the transport's companion device.
    PairingCode(String),
    /// Session or connection state ("connected", "completed", "stopped", ...).
    Status(String),
    /// Per-recipient trace line.
    Log(String),
    Progress(Progress),
}

impl DispatchEvent {
    pub fn status(text: impl Into<String>) -> Self {
        DispatchEvent::Status(text.into())
    }

    pub fn log(text: impl Into<String>) -> Self {
        DispatchEvent::Log(text.into())
    }

    /// Wire name of the event, as used by SSE `event:` fields.
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::PairingCode(_) => "pairing-code",
            DispatchEvent::Status(_) => "status",
            DispatchEvent::Log(_) => "log",
            DispatchEvent::Progress(_) => "progress",
        }
    }
}
