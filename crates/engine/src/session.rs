//! Per-session dispatch state.
//!
//! Replaces process-wide mutable flags: the controller creates one context
//! per session and threads it through the send loop.

use uuid::Uuid;

use relay_common::types::{Progress, RecipientStatus};

/// State of one dispatch session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub cancel_requested: bool,
    sent: u64,
    failed: u64,
    total: u64,
}

impl SessionContext {
    /// A freshly started session: nothing cancelled, no counts yet.
    ///
    /// Whether a session is running at all is published by the controller's
    /// phase, not stored here.
    pub fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel_requested: false,
            sent: 0,
            failed: 0,
            total: 0,
        }
    }

    /// Fix the number of recipients this session will work through.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Count one recipient that reached a terminal status.
    pub fn record(&mut self, status: RecipientStatus) {
        match status {
            RecipientStatus::Sent => self.sent += 1,
            RecipientStatus::Failed => self.failed += 1,
            RecipientStatus::Pending => {}
        }
    }

    /// Clear the cancel flag once the session has ended, for whatever reason.
    pub fn finish(&mut self) {
        self.cancel_requested = false;
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.sent, self.failed, self.total)
    }
}
