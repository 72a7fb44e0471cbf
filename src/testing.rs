//! Fake engines and presenter helpers shared by unit tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::events::{BroadcastPresenter, PresentationEvent};
use crate::recognition::{AttemptId, RecognitionEngine};
use crate::translation::{JobId, TokenStream, TranslationEngine, TranslationError};

/// Presenter wired to a receiver the test can drain
pub fn presenter_channel() -> (Arc<BroadcastPresenter>, broadcast::Receiver<PresentationEvent>) {
    let (tx, rx) = broadcast::channel(256);
    (Arc::new(BroadcastPresenter::new(tx)), rx)
}

/// Everything published so far
pub fn drain(rx: &mut broadcast::Receiver<PresentationEvent>) -> Vec<PresentationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn statuses(events: &[PresentationEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            PresentationEvent::Status { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn translation_tokens(events: &[PresentationEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            PresentationEvent::Translation { token } => Some(token.clone()),
            _ => None,
        })
        .collect()
}

/// Let spawned tasks run until they block again
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Recognizer that only records what it was asked to do
#[derive(Default)]
pub struct FakeRecognizer {
    starts: Mutex<Vec<(AttemptId, bool)>>,
    stops: Mutex<usize>,
}

impl FakeRecognizer {
    pub fn starts(&self) -> Vec<(AttemptId, bool)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock().unwrap()
    }

    pub fn last_attempt(&self) -> AttemptId {
        self.starts.lock().unwrap().last().expect("no attempt started").0
    }
}

impl RecognitionEngine for FakeRecognizer {
    fn start_attempt(&self, attempt: AttemptId, prefer_offline: bool) {
        self.starts.lock().unwrap().push((attempt, prefer_offline));
    }

    fn stop_attempt(&self) {
        *self.stops.lock().unwrap() += 1;
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Translator whose token streams the test feeds by hand
#[derive(Default)]
pub struct ManualTranslator {
    senders: Mutex<HashMap<JobId, futures_mpsc::UnboundedSender<Result<String, TranslationError>>>>,
    inputs: Mutex<Vec<(JobId, String)>>,
    cancelled: Mutex<Vec<JobId>>,
    fail_open: Mutex<bool>,
}

impl ManualTranslator {
    /// Push a token into a job's stream
    pub fn send(&self, job: JobId, token: &str) {
        if let Some(tx) = self.senders.lock().unwrap().get(&job) {
            let _ = tx.unbounded_send(Ok(token.to_string()));
        }
    }

    /// Make a job's stream yield an error
    pub fn fail(&self, job: JobId, message: &str) {
        if let Some(tx) = self.senders.lock().unwrap().get(&job) {
            let _ = tx.unbounded_send(Err(TranslationError::Engine(message.to_string())));
        }
    }

    /// End a job's stream
    pub fn finish(&self, job: JobId) {
        self.senders.lock().unwrap().remove(&job);
    }

    /// Make the next `translate_stream` call fail to open
    pub fn fail_next_open(&self) {
        *self.fail_open.lock().unwrap() = true;
    }

    pub fn inputs(&self) -> Vec<(JobId, String)> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationEngine for ManualTranslator {
    async fn initialize(&self, _model_dir: &Path, _model_file: &str) -> Result<(), TranslationError> {
        Ok(())
    }

    fn translate_stream(&self, input: &str, job: JobId) -> Result<TokenStream, TranslationError> {
        self.inputs.lock().unwrap().push((job, input.to_string()));
        if std::mem::take(&mut *self.fail_open.lock().unwrap()) {
            return Err(TranslationError::NotInitialized);
        }
        let (tx, rx) = futures_mpsc::unbounded();
        self.senders.lock().unwrap().insert(job, tx);
        Ok(rx.boxed())
    }

    fn cancel(&self, job: JobId) {
        self.cancelled.lock().unwrap().push(job);
    }

    fn name(&self) -> &str {
        "manual"
    }
}

/// Translator that replays fixed tokens per input text
#[derive(Default)]
pub struct ScriptedTranslator {
    scripts: HashMap<String, Vec<String>>,
}

impl ScriptedTranslator {
    pub fn with(mut self, input: &str, tokens: &[&str]) -> Self {
        self.scripts.insert(
            input.to_string(),
            tokens.iter().map(|token| token.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl TranslationEngine for ScriptedTranslator {
    async fn initialize(&self, _model_dir: &Path, _model_file: &str) -> Result<(), TranslationError> {
        Ok(())
    }

    fn translate_stream(&self, input: &str, _job: JobId) -> Result<TokenStream, TranslationError> {
        let items: Vec<Result<String, TranslationError>> = match self.scripts.get(input) {
            Some(tokens) => tokens.iter().cloned().map(Ok).collect(),
            None => vec![Err(TranslationError::Engine(format!("no script for {:?}", input)))],
        };
        Ok(futures::stream::iter(items).boxed())
    }

    fn cancel(&self, _job: JobId) {}

    fn name(&self) -> &str {
        "scripted"
    }
}
