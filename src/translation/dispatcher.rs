//! Translation job dispatch
//!
//! Keeps at most one translation running. A new utterance cancels the job in
//! flight before its own job starts, and a cancelled job never reaches the
//! presenter again: every token is checked against the job status under the
//! same lock that cancellation takes.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{status, Presenter};
use crate::session::Utterance;

use super::engine::{JobId, TokenStream, TranslationEngine, TranslationError};

/// Appended after every completed translation
const SEPARATOR: &str = "\n";

/// Appended in place of a translation that failed
const ERROR_MARKER: &str = "[translation error]\n";

/// Lifecycle of a translation job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug)]
struct TranslationJob {
    id: JobId,
    utterance_sequence: u64,
    status: watch::Sender<JobStatus>,
}

/// Shared handle to a translation job
#[derive(Debug, Clone)]
pub struct JobHandle(Arc<TranslationJob>);

impl JobHandle {
    fn new(id: JobId, utterance_sequence: u64) -> Self {
        let (status, _) = watch::channel(JobStatus::Running);
        Self(Arc::new(TranslationJob {
            id,
            utterance_sequence,
            status,
        }))
    }

    pub fn id(&self) -> JobId {
        self.0.id
    }

    pub fn utterance_sequence(&self) -> u64 {
        self.0.utterance_sequence
    }

    pub fn status(&self) -> JobStatus {
        *self.0.status.borrow()
    }

    /// Wait until the job leaves `Running`
    #[cfg(test)]
    pub async fn settled(&self) -> JobStatus {
        let mut rx = self.0.status.subscribe();
        let settled = match rx.wait_for(|status| *status != JobStatus::Running).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        settled
    }

    /// Move a running job to `Cancelled`. Returns false if it had already ended.
    fn cancel(&self) -> bool {
        self.0.status.send_if_modified(|current| {
            if *current != JobStatus::Running {
                return false;
            }
            *current = JobStatus::Cancelled;
            true
        })
    }

    /// Hand a token to the presenter if the job is still running
    fn deliver(&self, token: &str, presenter: &dyn Presenter) -> bool {
        let status = self.0.status.borrow();
        if *status != JobStatus::Running {
            return false;
        }
        presenter.append_translation(token);
        true
    }

    fn complete(&self, presenter: &dyn Presenter, session_active: bool) {
        let completed = self.0.status.send_if_modified(|current| {
            if *current != JobStatus::Running {
                return false;
            }
            *current = JobStatus::Completed;
            presenter.append_translation(SEPARATOR);
            presenter.set_status(if session_active {
                status::LISTENING
            } else {
                status::READY
            });
            true
        });

        if completed {
            info!(job = self.id(), "translation complete");
        }
    }

    fn fail(&self, presenter: &dyn Presenter, error: &TranslationError) {
        let failed = self.0.status.send_if_modified(|current| {
            if *current != JobStatus::Running {
                return false;
            }
            *current = JobStatus::Failed;
            presenter.append_translation(ERROR_MARKER);
            true
        });

        if failed {
            warn!(job = self.id(), %error, "translation failed");
        }
    }
}

/// Runs translation jobs for utterances, one at a time
pub struct TranslationDispatcher {
    engine: Arc<dyn TranslationEngine>,
    presenter: Arc<dyn Presenter>,
    /// Whether the recognition session is active, published by the controller
    session_active: watch::Receiver<bool>,
    next_job_id: JobId,
    active: Option<JobHandle>,
}

impl TranslationDispatcher {
    pub fn new(
        engine: Arc<dyn TranslationEngine>,
        presenter: Arc<dyn Presenter>,
        session_active: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            presenter,
            session_active,
            next_job_id: 0,
            active: None,
        }
    }

    /// Translate `utterance` in the background, cancelling the job in flight.
    ///
    /// Never waits on the engine. Must be called from within a tokio runtime.
    pub fn dispatch(&mut self, utterance: Utterance) -> JobHandle {
        self.cancel_active();

        self.next_job_id += 1;
        let job = JobHandle::new(self.next_job_id, utterance.sequence);
        info!(
            job = job.id(),
            sequence = utterance.sequence,
            engine = self.engine.name(),
            "translation started"
        );

        let stream = self.engine.translate_stream(&utterance.text, job.id());
        tokio::spawn(run_job(
            job.clone(),
            stream,
            Arc::clone(&self.presenter),
            self.session_active.clone(),
        ));

        self.active = Some(job.clone());
        job
    }

    /// Cancel the running job, if any, and tell the engine to stop it
    pub fn cancel_active(&mut self) -> Option<JobHandle> {
        let job = self.active.take()?;
        if job.cancel() {
            info!(job = job.id(), "translation cancelled");
            self.engine.cancel(job.id());
        } else {
            debug!(job = job.id(), status = ?job.status(), "translation already settled");
        }
        Some(job)
    }

    /// The most recently dispatched job
    #[cfg(test)]
    pub fn active_job(&self) -> Option<&JobHandle> {
        self.active.as_ref()
    }
}

async fn run_job(
    job: JobHandle,
    stream: Result<TokenStream, TranslationError>,
    presenter: Arc<dyn Presenter>,
    session_active: watch::Receiver<bool>,
) {
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            job.fail(presenter.as_ref(), &e);
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => {
                if !job.deliver(&token, presenter.as_ref()) {
                    debug!(job = job.id(), "job no longer running, dropping its stream");
                    return;
                }
            }
            Err(e) => {
                job.fail(presenter.as_ref(), &e);
                return;
            }
        }
    }

    let active = *session_active.borrow();
    job.complete(presenter.as_ref(), active);
}
