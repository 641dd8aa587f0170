//! Dispatch controller: the single-flight, resumable send loop.
//!
//! One controller task owns the dispatch loop. Observers talk to it through a
//! cloneable [`DispatchHandle`], which feeds a single ordered command channel;
//! the controller is its only reader, so session flags are never written from
//! outside the loop and a stop is always applied relative to the starts
//! queued around it.
//!
//! Session lifecycle:
//! `Idle → Preparing → Sending → {Completed | Stopped | Failed} → Idle`
//!
//! Per recipient the loop runs: honour pending commands → existence lookup →
//! send → persist status → publish progress → pacing delay. A failing
//! recipient is recorded as `failed` and the loop moves on.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use relay_common::config::AppConfig;
use relay_common::error::AppError;
use relay_common::types::{
    DispatchEvent, Progress, RecipientStatus, SessionPhase, StartCommand,
};

use crate::generator::NumberGenerator;
use crate::input::resolve_recipients;
use crate::session::SessionContext;
use crate::sink::EventSink;
use crate::store::{PendingCursor, RecipientStore};
use crate::transport::Transport;

/// Queued commands before senders wait.
const COMMAND_BUFFER: usize = 16;

/// Observer command, in arrival order.
enum Command {
    /// Start a session. `reply` learns whether it was accepted.
    Start {
        command: StartCommand,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Stop,
}

fn already_running() -> AppError {
    AppError::Conflict("a dispatch session is already running".to_string())
}

fn controller_gone() -> AppError {
    AppError::Internal("dispatch controller is not running".to_string())
}

/// Tunables of the send loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Shortest pause between two recipients.
    pub delay_min: Duration,
    /// Longest pause between two recipients.
    pub delay_max: Duration,
    /// Pending recipients fetched per cursor page.
    pub page_size: usize,
    /// Honour `resume: true` on start commands.
    pub resume_enabled: bool,
}

impl DispatchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            delay_min: Duration::from_millis(config.dispatch_delay_min_ms),
            delay_max: Duration::from_millis(config.dispatch_delay_max_ms),
            page_size: config.dispatch_page_size,
            resume_enabled: config.dispatch_resume_enabled,
        }
    }

    /// Uniformly random pause from the inclusive `[delay_min, delay_max]` window.
    pub fn pacing_delay(&self) -> Duration {
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        Duration::from_millis(rand::rng().random_range(low..=high))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay_min: Duration::from_secs(4),
            delay_max: Duration::from_secs(9),
            page_size: 100,
            resume_enabled: false,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// `Completed`, `Stopped` or `Failed`.
    pub phase: SessionPhase,
    pub progress: Progress,
}

/// Observer-side entry point to the controller.
#[derive(Clone)]
pub struct DispatchHandle {
    command_tx: mpsc::Sender<Command>,
    phase_rx: watch::Receiver<SessionPhase>,
}

impl DispatchHandle {
    /// Ask the controller to start a session and wait for its answer.
    ///
    /// `Ok` means the session has begun. Fails with `Conflict` when a session
    /// is already running, whether that is visible here or only once the
    /// controller reaches the command.
    pub async fn start(&self, command: StartCommand) -> Result<(), AppError> {
        if self.phase().is_active() {
            tracing::warn!(source = %command.source, "Start rejected: dispatch already running");
            return Err(already_running());
        }

        let (reply, accepted) = oneshot::channel();
        self.command_tx
            .send(Command::Start { command, reply })
            .await
            .map_err(|_| controller_gone())?;
        accepted.await.map_err(|_| controller_gone())?
    }

    /// Ask the running session to stop at its next iteration boundary.
    ///
    /// Applies to whatever session is running when the controller reads it;
    /// with nothing running it is ignored.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.command_tx
            .send(Command::Stop)
            .await
            .map_err(|_| controller_gone())
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    pub fn is_sending(&self) -> bool {
        self.phase().is_active()
    }

    /// Watch phase changes (for status reporting).
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }
}

/// Owns the dispatch loop and everything it touches.
pub struct DispatchController {
    store: Arc<dyn RecipientStore>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    generator: NumberGenerator,
    config: DispatchConfig,
    connected: watch::Receiver<bool>,
    phase_tx: watch::Sender<SessionPhase>,
    command_rx: mpsc::Receiver<Command>,
}

impl DispatchController {
    pub fn new(
        store: Arc<dyn RecipientStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        generator: NumberGenerator,
        config: DispatchConfig,
        connected: watch::Receiver<bool>,
    ) -> (Self, DispatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);

        let controller = Self {
            store,
            transport,
            sink,
            generator,
            config,
            connected,
            phase_tx,
            command_rx,
        };
        let handle = DispatchHandle {
            command_tx,
            phase_rx,
        };
        (controller, handle)
    }

    /// Serve commands in arrival order until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(transport = self.transport.name(), "Dispatch controller started");

        while let Some(command) = self.command_rx.recv().await {
            match command {
                Command::Start { command, reply } => {
                    self.set_phase(SessionPhase::Preparing);
                    if reply.send(Ok(())).is_err() {
                        tracing::debug!("Start requester went away; running the session anyway");
                    }
                    self.run_session(command).await;
                }
                Command::Stop => tracing::debug!("Stop requested while idle, ignoring"),
            }
        }

        tracing::info!("Dispatch controller stopped");
    }

    /// Run one complete session for `command` and return to `Idle`.
    pub async fn run_session(&mut self, command: StartCommand) -> SessionOutcome {
        let mut session = SessionContext::begin();
        let span = tracing::info_span!(
            "dispatch.session",
            session_id = %session.id,
            source = %command.source,
        );

        async {
            let phase = self.drive(&mut session, &command).await;
            session.finish();
            self.finish(phase, session.progress()).await
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, session: &mut SessionContext, command: &StartCommand) -> SessionPhase {
        self.set_phase(SessionPhase::Preparing);

        let total = match self.prepare(command).await {
            Ok(total) => total,
            Err(e) => {
                tracing::error!(error = %e, "Dispatch session failed during preparation");
                self.emit(DispatchEvent::log(format!("Critical error: {}", e)))
                    .await;
                self.emit(DispatchEvent::status(format!("error: {}", e))).await;
                return SessionPhase::Failed;
            }
        };

        session.set_total(total);
        self.set_phase(SessionPhase::Sending);
        tracing::info!(total, "Dispatch started");
        self.emit(DispatchEvent::status("sending")).await;
        self.emit(DispatchEvent::Progress(session.progress())).await;

        self.send_loop(session, command).await
    }

    /// Purge (or keep, for a resume), resolve and load the recipients.
    /// Returns the number of pending recipients the loop will work through.
    async fn prepare(&self, command: &StartCommand) -> Result<u64, AppError> {
        let connected = *self.connected.borrow();
        if !connected {
            return Err(AppError::Transport(
                "transport is not connected".to_string(),
            ));
        }

        if command.resume
            && let Some(pending) = self.resumable_pending().await?
        {
            return Ok(pending);
        }

        self.store.reset().await?;

        let recipients = resolve_recipients(command, &self.generator)?;
        if recipients.is_empty() {
            return Err(AppError::Validation(
                "no valid recipients were provided".to_string(),
            ));
        }

        let report = self.store.bulk_insert(&recipients).await?;
        if report.duplicates > 0 {
            self.emit(DispatchEvent::log(format!(
                "Skipped {} duplicate recipients",
                report.duplicates
            )))
            .await;
        }
        self.emit(DispatchEvent::log(format!(
            "Loaded {} recipients",
            report.inserted
        )))
        .await;

        self.store.count_pending().await
    }

    /// Pending count to resume with, or `None` when a fresh session is needed.
    async fn resumable_pending(&self) -> Result<Option<u64>, AppError> {
        if !self.config.resume_enabled {
            tracing::warn!("Resume requested but disabled by configuration");
            self.emit(DispatchEvent::log(
                "Resume is disabled; starting a new session",
            ))
            .await;
            return Ok(None);
        }

        let pending = self.store.count_pending().await?;
        if pending == 0 {
            self.emit(DispatchEvent::log(
                "Nothing left to resume; starting a new session",
            ))
            .await;
            return Ok(None);
        }

        tracing::info!(pending, "Resuming pending recipients");
        self.emit(DispatchEvent::log(format!(
            "Resuming {} pending recipients",
            pending
        )))
        .await;
        Ok(Some(pending))
    }

    async fn send_loop(&mut self, session: &mut SessionContext, command: &StartCommand) -> SessionPhase {
        if command.image_url.is_some() {
            tracing::warn!("Attachment dispatch is not supported; sending text only");
            self.emit(DispatchEvent::log(
                "Attachments are not supported yet; sending text only",
            ))
            .await;
        }

        let mut cursor = PendingCursor::new(self.store.clone(), self.config.page_size);

        loop {
            self.drain_commands(session).await;
            if session.cancel_requested {
                let progress = session.progress();
                tracing::info!(
                    sent = progress.sent,
                    failed = progress.failed,
                    remaining = progress.remaining,
                    "Dispatch stopped"
                );
                self.emit(DispatchEvent::status("stopped")).await;
                self.emit(DispatchEvent::log(format!(
                    "Dispatch stopped: {} sent, {} failed, {} left pending",
                    progress.sent, progress.failed, progress.remaining
                )))
                .await;
                return SessionPhase::Stopped;
            }

            let record = match cursor.next_pending().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read pending recipients");
                    self.emit(DispatchEvent::log(format!(
                        "Critical error reading recipients: {}",
                        e
                    )))
                    .await;
                    self.emit(DispatchEvent::status(format!("error: {}", e))).await;
                    return SessionPhase::Failed;
                }
            };

            let outcome = self.dispatch_one(&record.identifier, &command.message).await;
            let status = match self.store.update_status(&record.identifier, outcome).await {
                Ok(()) => outcome,
                Err(e) => {
                    tracing::error!(
                        identifier = %record.identifier,
                        outcome = %outcome,
                        error = %e,
                        "Failed to persist recipient status"
                    );
                    self.emit(DispatchEvent::log(format!(
                        "Could not record status for {}: {}",
                        record.identifier, e
                    )))
                    .await;
                    RecipientStatus::Failed
                }
            };

            session.record(status);
            self.emit(DispatchEvent::Progress(session.progress())).await;

            self.pace(session).await;
        }

        let progress = session.progress();
        tracing::info!(
            sent = progress.sent,
            failed = progress.failed,
            total = progress.total,
            "Dispatch completed"
        );
        self.emit(DispatchEvent::status("completed")).await;
        self.emit(DispatchEvent::log(format!(
            "Dispatch finished: {} sent, {} failed",
            progress.sent, progress.failed
        )))
        .await;
        SessionPhase::Completed
    }

    /// One transport attempt. Every outcome maps to a terminal status.
    async fn dispatch_one(&self, identifier: &str, message: &str) -> RecipientStatus {
        match self.transport.lookup(identifier).await {
            Ok(Some(address)) => match self.transport.send(&address, message).await {
                Ok(()) => {
                    tracing::info!(identifier, "Message sent");
                    self.emit(DispatchEvent::log(format!("Message sent to {}", identifier)))
                        .await;
                    RecipientStatus::Sent
                }
                Err(e) => {
                    tracing::warn!(identifier, error = %e, "Send failed");
                    self.emit(DispatchEvent::log(format!(
                        "Error sending to {}: {}",
                        identifier, e
                    )))
                    .await;
                    RecipientStatus::Failed
                }
            },
            Ok(None) => {
                tracing::info!(identifier, "Recipient not on network");
                self.emit(DispatchEvent::log(format!(
                    "Number {} does not exist on the network",
                    identifier
                )))
                .await;
                RecipientStatus::Failed
            }
            Err(e) => {
                tracing::warn!(identifier, error = %e, "Existence lookup failed");
                self.emit(DispatchEvent::log(format!(
                    "Error checking {}: {}",
                    identifier, e
                )))
                .await;
                RecipientStatus::Failed
            }
        }
    }

    /// Apply commands that arrived since the last boundary.
    async fn drain_commands(&mut self, session: &mut SessionContext) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply_in_session(session, command).await;
        }
    }

    /// A command read while a session owns the loop: stops cancel it, starts
    /// are turned away.
    async fn apply_in_session(&self, session: &mut SessionContext, command: Command) {
        match command {
            Command::Stop => {
                if !session.cancel_requested {
                    tracing::info!("Stop requested");
                }
                session.request_cancel();
            }
            Command::Start { command, reply } => {
                tracing::warn!(
                    source = %command.source,
                    "Start rejected: dispatch already running"
                );
                self.emit(DispatchEvent::log(
                    "A dispatch is already in progress; start request ignored",
                ))
                .await;
                let _ = reply.send(Err(already_running()));
            }
        }
    }

    /// Wait out the pacing delay; a stop command cuts it short.
    async fn pace(&mut self, session: &mut SessionContext) {
        let delay = self.config.pacing_delay();
        if delay.is_zero() {
            return;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let command = tokio::select! {
                _ = &mut sleep => return,
                command = self.command_rx.recv() => command,
            };

            match command {
                Some(command) => {
                    self.apply_in_session(session, command).await;
                    if session.cancel_requested {
                        tracing::info!("Stop requested during pacing delay");
                        return;
                    }
                }
                None => {
                    (&mut sleep).await;
                    return;
                }
            }
        }
    }

    /// Publish the terminal phase and return to `Idle`. Commands still queued
    /// belong to whoever reads the channel next.
    async fn finish(&mut self, phase: SessionPhase, progress: Progress) -> SessionOutcome {
        self.set_phase(phase);
        self.set_phase(SessionPhase::Idle);
        SessionOutcome { phase, progress }
    }

    fn set_phase(&self, phase: SessionPhase) {
        tracing::debug!(phase = %phase, "Dispatch phase changed");
        self.phase_tx.send_replace(phase);
    }

    async fn emit(&self, event: DispatchEvent) {
        self.sink.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_delay_stays_in_window() {
        let config = DispatchConfig {
            delay_min: Duration::from_millis(10),
            delay_max: Duration::from_millis(20),
            ..DispatchConfig::default()
        };
        for _ in 0..200 {
            let delay = config.pacing_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_pacing_delay_fixed_window() {
        let config = DispatchConfig {
            delay_min: Duration::from_millis(7),
            delay_max: Duration::from_millis(7),
            ..DispatchConfig::default()
        };
        assert_eq!(config.pacing_delay(), Duration::from_millis(7));
    }

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig {
            dispatch_delay_min_ms: 100,
            dispatch_delay_max_ms: 200,
            dispatch_page_size: 7,
            dispatch_resume_enabled: true,
            ..AppConfig::default()
        };
        let config = DispatchConfig::from_app_config(&app);
        assert_eq!(config.delay_min, Duration::from_millis(100));
        assert_eq!(config.delay_max, Duration::from_millis(200));
        assert_eq!(config.page_size, 7);
        assert!(config.resume_enabled);
    }
}
