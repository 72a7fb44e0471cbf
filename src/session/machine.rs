//! Recognition session controller
//!
//! Owns the single capture session and keeps it listening: every result or
//! recoverable error launches the next recognition attempt, final transcripts
//! go to the translation dispatcher, and errors are resolved through the
//! [`ErrorPolicy`] without ever escaping the controller.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::events::{status, Presenter};
use crate::recognition::{
    AttemptId, ErrorCode, RecognitionEngine, RecognitionEvent, RecognitionEventKind,
};
use crate::translation::{TranslationDispatcher, TranslationEngine};

use super::classify::{ErrorPolicy, Outcome};
use super::model::{Session, SessionSnapshot, SessionState, Utterance};

/// Reported when the recognizer stops delivering events
const RECOGNIZER_STOPPED: &str = "speech recognizer stopped";

/// Requests from outside the controller
#[derive(Debug)]
pub enum ControlCommand {
    /// Open a session if none is active
    Start,
    /// Stop the active session
    Stop,
    /// Report the current state
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// The state machine driving recognition sessions
pub struct SessionController {
    recognizer: Arc<dyn RecognitionEngine>,
    dispatcher: TranslationDispatcher,
    presenter: Arc<dyn Presenter>,
    policy: ErrorPolicy,
    /// Offline preference each new session starts with
    prefer_offline_default: bool,
    session: Option<Session>,
    next_session_id: u64,
    next_attempt: AttemptId,
    next_sequence: u64,
    /// Time when the current non-Idle state was entered
    state_entered_at: Option<Instant>,
    /// Session activity, read by the dispatcher when a job completes
    active_tx: watch::Sender<bool>,
    /// Cleared once the recognizer's event channel closes
    recognizer_available: bool,
}

impl SessionController {
    /// Create a controller in the Idle state
    pub fn new(
        recognizer: Arc<dyn RecognitionEngine>,
        translator: Arc<dyn TranslationEngine>,
        presenter: Arc<dyn Presenter>,
        settings: &RecognitionConfig,
    ) -> Self {
        let (active_tx, active_rx) = watch::channel(false);
        let dispatcher = TranslationDispatcher::new(translator, Arc::clone(&presenter), active_rx);

        Self {
            recognizer,
            dispatcher,
            presenter,
            policy: ErrorPolicy::with_fatal_codes(settings.fatal_codes.iter().copied()),
            prefer_offline_default: settings.prefer_offline,
            session: None,
            next_session_id: 0,
            next_attempt: 0,
            next_sequence: 0,
            state_entered_at: None,
            active_tx,
            recognizer_available: true,
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().map_or(false, |session| session.active)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            active: self.is_active(),
            prefer_offline: self
                .session
                .as_ref()
                .map_or(self.prefer_offline_default, |session| session.prefer_offline),
            session_id: self.session.as_ref().map(|session| session.id),
            utterances: self.next_sequence,
        }
    }

    /// Run the controller, processing recognition events and commands until
    /// the command channel closes
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
        mut commands: mpsc::Receiver<ControlCommand>,
    ) {
        info!(engine = self.recognizer.name(), "session controller started");

        loop {
            tokio::select! {
                event = events.recv(), if self.recognizer_available => match event {
                    Some(event) => self.handle_event(event),
                    None => self.recognizer_lost(),
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.stop();
        info!("session controller stopped");
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start => self.start(),
            ControlCommand::Stop => self.stop(),
            ControlCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Open a session and launch its first attempt. No-op while active.
    pub fn start(&mut self) {
        if self.is_active() {
            debug!("start ignored, session already active");
            return;
        }
        if !self.recognizer_available {
            warn!("start refused, speech recognizer has stopped");
            self.presenter.set_status(&status::error(RECOGNIZER_STOPPED));
            return;
        }

        self.next_session_id += 1;
        let session = Session::new(self.next_session_id, self.prefer_offline_default);
        info!(
            session_id = session.id,
            prefer_offline = session.prefer_offline,
            "session started"
        );
        self.session = Some(session);
        self.active_tx.send_replace(true);

        self.presenter.clear_transcript();
        self.presenter.clear_translation();
        self.launch_attempt(status::LISTENING);
    }

    /// Stop the active session, its attempt and any running translation. Idempotent.
    pub fn stop(&mut self) {
        let Some(session) = self.session.as_mut().filter(|session| session.active) else {
            debug!("stop ignored, no active session");
            return;
        };

        session.active = false;
        info!(session_id = session.id, "session stopped");
        self.active_tx.send_replace(false);

        self.recognizer.stop_attempt();
        self.dispatcher.cancel_active();
        self.transition_to(SessionState::Idle, status::READY);
    }

    /// The recognizer will never deliver another event: end the session and
    /// disable capture
    fn recognizer_lost(&mut self) {
        warn!(engine = self.recognizer.name(), "recognition event channel closed");
        self.recognizer_available = false;

        if let Some(session) = self.session.as_mut().filter(|session| session.active) {
            session.active = false;
            info!(session_id = session.id, "session ended, recognizer gone");
            self.active_tx.send_replace(false);
            self.dispatcher.cancel_active();
        }

        self.presenter.set_capture_enabled(false);
        if self.session.is_some() {
            self.transition_to(SessionState::Idle, &status::error(RECOGNIZER_STOPPED));
        } else {
            self.presenter.set_status(&status::error(RECOGNIZER_STOPPED));
        }
    }

    /// Process one recognition event to completion
    pub fn handle_event(&mut self, event: RecognitionEvent) {
        let current = self
            .session
            .as_ref()
            .filter(|session| session.active)
            .map(|session| session.attempt);
        if current != Some(event.attempt) {
            debug!(
                attempt = event.attempt,
                ?current,
                kind = ?event.kind,
                "ignoring event from inactive attempt"
            );
            return;
        }

        match event.kind {
            RecognitionEventKind::Ready => self.advance(SessionState::Listening, status::SPEAK_NOW),
            RecognitionEventKind::SpeechStart => self.advance(SessionState::Hearing, status::HEARING),
            RecognitionEventKind::SpeechEnd => {
                self.advance(SessionState::Processing, status::PROCESSING)
            }
            RecognitionEventKind::Partial(text) => {
                debug!(attempt = event.attempt, partial = %text, "interim hypothesis");
            }
            RecognitionEventKind::Result(text) => self.on_result(&text),
            RecognitionEventKind::Error(code) => self.on_error(code),
        }
    }

    /// Apply a lifecycle transition the engine reported, if it fits the current state
    fn advance(&mut self, target: SessionState, status_text: &str) {
        let state = self.state();
        if state.can_transition_to(&target) {
            self.transition_to(target, status_text);
        } else {
            debug!(from = %state, to = %target, "ignoring out-of-order engine event");
        }
    }

    fn on_result(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("empty recognition result");
            self.relaunch_or_idle(status::LISTENING);
            return;
        }

        self.next_sequence += 1;
        let utterance = Utterance {
            text: text.to_string(),
            sequence: self.next_sequence,
        };
        info!(sequence = utterance.sequence, text = %utterance.text, "utterance recognized");

        self.presenter.append_transcript(&format!("{}\n", utterance.text));
        let job = self.dispatcher.dispatch(utterance);
        debug!(job = job.id(), sequence = job.utterance_sequence(), "utterance handed to translation");
        self.relaunch_or_idle(status::TRANSLATING);
    }

    fn on_error(&mut self, code: ErrorCode) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let outcome = self.policy.classify(code, session.prefer_offline);
        warn!(
            %code,
            reason = %code.reason(),
            prefer_offline = session.prefer_offline,
            ?outcome,
            "recognition error"
        );

        match outcome {
            Outcome::Retry => self.relaunch_or_idle(&status::retrying(&code.reason())),
            Outcome::FallbackToOnline => {
                if session.fall_back_to_online() {
                    info!(session_id = session.id, "falling back to online recognition");
                }
                self.relaunch_or_idle(status::ONLINE_FALLBACK);
            }
            Outcome::Fatal => {
                session.active = false;
                self.active_tx.send_replace(false);
                self.recognizer.stop_attempt();
                self.transition_to(SessionState::Idle, &status::error(&code.reason()));
            }
        }
    }

    fn relaunch_or_idle(&mut self, status_text: &str) {
        if self.is_active() {
            self.launch_attempt(status_text);
        } else {
            self.transition_to(SessionState::Idle, status::READY);
        }
    }

    /// Enter Starting and ask the recognizer for a new attempt
    fn launch_attempt(&mut self, status_text: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.next_attempt += 1;
        session.attempt = self.next_attempt;
        let (attempt, prefer_offline) = (session.attempt, session.prefer_offline);

        self.transition_to(SessionState::Starting, status_text);
        debug!(attempt, prefer_offline, "launching recognition attempt");
        self.recognizer.start_attempt(attempt, prefer_offline);
    }

    /// Perform a state transition and report its status text
    fn transition_to(&mut self, new_state: SessionState, status_text: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let old_state = session.state;
        let duration_ms = self
            .state_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        debug!(
            session_id = session.id,
            from = %old_state,
            to = %new_state,
            duration_ms,
            "state transition"
        );

        session.state = new_state;
        self.state_entered_at = if new_state != SessionState::Idle {
            Some(Instant::now())
        } else {
            None
        };

        self.presenter.set_status(status_text);
    }
}
