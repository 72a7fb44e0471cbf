//! Line-based recognizer reading utterances from an async reader
//!
//! Each line of input stands for one spoken utterance. A line of the form
//! `!<code>` makes the attempt fail with that error code instead, which lets
//! a terminal session exercise the retry and fallback paths.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{
    AttemptId, ErrorCode, RecognitionEngine, RecognitionEvent, RecognitionEventKind,
};

/// Commands sent from the engine handle to its worker task
#[derive(Debug)]
enum AttemptCommand {
    Start {
        attempt: AttemptId,
        prefer_offline: bool,
    },
    Stop,
}

/// Recognizer that turns input lines into recognition events
pub struct ConsoleRecognizer {
    commands: mpsc::UnboundedSender<AttemptCommand>,
    reader_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

impl ConsoleRecognizer {
    /// Spawn the reader and attempt worker tasks.
    ///
    /// `offline_available` says whether an offline language pack exists; when it
    /// doesn't, attempts that prefer offline recognition fail immediately with
    /// [`ErrorCode::OfflineUnavailable`].
    pub fn spawn<R>(
        reader: R,
        events: mpsc::UnboundedSender<RecognitionEvent>,
        offline_available: bool,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_lines(reader, line_tx));
        let worker_task = tokio::spawn(run_attempts(
            command_rx,
            line_rx,
            events,
            offline_available,
        ));

        Self {
            commands: command_tx,
            reader_task,
            worker_task,
        }
    }

    /// Spawn a recognizer reading from the process's standard input
    pub fn stdin(events: mpsc::UnboundedSender<RecognitionEvent>, offline_available: bool) -> Self {
        Self::spawn(
            tokio::io::BufReader::new(tokio::io::stdin()),
            events,
            offline_available,
        )
    }

    fn send(&self, command: AttemptCommand) {
        if self.commands.send(command).is_err() {
            debug!("console recognizer worker has exited, command dropped");
        }
    }
}

impl RecognitionEngine for ConsoleRecognizer {
    fn start_attempt(&self, attempt: AttemptId, prefer_offline: bool) {
        self.send(AttemptCommand::Start {
            attempt,
            prefer_offline,
        });
    }

    fn stop_attempt(&self) {
        self.send(AttemptCommand::Stop);
    }

    fn name(&self) -> &str {
        "console"
    }
}

impl Drop for ConsoleRecognizer {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.worker_task.abort();
    }
}

/// Forward non-blank input lines until end of input
async fn read_lines<R>(reader: R, line_tx: mpsc::UnboundedSender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("console input closed");
                break;
            }
            Err(e) => {
                warn!(?e, "failed to read console input");
                break;
            }
        }
    }
}

/// Serve attempts one at a time, each consuming one buffered line
async fn run_attempts(
    mut commands: mpsc::UnboundedReceiver<AttemptCommand>,
    mut lines: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    offline_available: bool,
) {
    let emit = |attempt: AttemptId, kind: RecognitionEventKind| {
        if events.send(RecognitionEvent::new(attempt, kind)).is_err() {
            debug!(attempt, "recognition event receiver dropped");
        }
    };

    let mut current: Option<AttemptId> = None;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(AttemptCommand::Start { attempt, prefer_offline }) => {
                    if prefer_offline && !offline_available {
                        debug!(attempt, "offline recognition requested but unavailable");
                        current = None;
                        emit(attempt, RecognitionEventKind::Error(ErrorCode::OfflineUnavailable));
                    } else {
                        current = Some(attempt);
                        emit(attempt, RecognitionEventKind::Ready);
                    }
                }
                Some(AttemptCommand::Stop) => {
                    if let Some(attempt) = current.take() {
                        debug!(attempt, "attempt abandoned");
                    }
                }
                None => break,
            },

            line = lines.recv(), if current.is_some() => {
                let Some(line) = line else {
                    break;
                };
                if let Some(attempt) = current.take() {
                    for kind in interpret_line(&line) {
                        emit(attempt, kind);
                    }
                }
            }
        }
    }

    debug!("console recognizer worker stopped");
}

/// Turn one input line into the events of a finished attempt
fn interpret_line(line: &str) -> Vec<RecognitionEventKind> {
    let line = line.trim();

    if let Some(code) = line.strip_prefix('!') {
        let code = code.parse().unwrap_or_else(|e| {
            warn!(%e, "treating unknown error code as unrecognized");
            ErrorCode::Unrecognized(0)
        });
        return vec![RecognitionEventKind::Error(code)];
    }

    let mut kinds = vec![RecognitionEventKind::SpeechStart];
    if !line.is_empty() {
        kinds.push(RecognitionEventKind::Partial(line.to_string()));
    }
    kinds.push(RecognitionEventKind::SpeechEnd);
    kinds.push(RecognitionEventKind::Result(line.to_string()));
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_kind(rx: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> (AttemptId, RecognitionEventKind) {
        let event = rx.recv().await.expect("event channel closed");
        (event.attempt, event.kind)
    }

    #[test]
    fn test_interpret_plain_line() {
        assert_eq!(
            interpret_line("  hello there "),
            vec![
                RecognitionEventKind::SpeechStart,
                RecognitionEventKind::Partial("hello there".to_string()),
                RecognitionEventKind::SpeechEnd,
                RecognitionEventKind::Result("hello there".to_string()),
            ]
        );
        assert_eq!(
            interpret_line("   "),
            vec![
                RecognitionEventKind::SpeechStart,
                RecognitionEventKind::SpeechEnd,
                RecognitionEventKind::Result(String::new()),
            ]
        );
    }

    #[test]
    fn test_interpret_error_line() {
        assert_eq!(
            interpret_line("!network-timeout"),
            vec![RecognitionEventKind::Error(ErrorCode::NetworkTimeout)]
        );
        assert_eq!(
            interpret_line("!what"),
            vec![RecognitionEventKind::Error(ErrorCode::Unrecognized(0))]
        );
    }

    #[tokio::test]
    async fn test_attempts_consume_lines_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &'static [u8] = b"hello\n!network-timeout\n";
        let recognizer = ConsoleRecognizer::spawn(input, tx, true);

        recognizer.start_attempt(1, true);
        assert_eq!(next_kind(&mut rx).await, (1, RecognitionEventKind::Ready));
        assert_eq!(next_kind(&mut rx).await, (1, RecognitionEventKind::SpeechStart));
        assert_eq!(
            next_kind(&mut rx).await,
            (1, RecognitionEventKind::Partial("hello".to_string()))
        );
        assert_eq!(next_kind(&mut rx).await, (1, RecognitionEventKind::SpeechEnd));
        assert_eq!(
            next_kind(&mut rx).await,
            (1, RecognitionEventKind::Result("hello".to_string()))
        );

        recognizer.start_attempt(2, true);
        assert_eq!(next_kind(&mut rx).await, (2, RecognitionEventKind::Ready));
        assert_eq!(
            next_kind(&mut rx).await,
            (2, RecognitionEventKind::Error(ErrorCode::NetworkTimeout))
        );
    }

    #[tokio::test]
    async fn test_offline_preference_without_pack_fails_fast() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &'static [u8] = b"hello\n";
        let recognizer = ConsoleRecognizer::spawn(input, tx, false);

        recognizer.start_attempt(1, true);
        assert_eq!(
            next_kind(&mut rx).await,
            (1, RecognitionEventKind::Error(ErrorCode::OfflineUnavailable))
        );

        recognizer.start_attempt(2, false);
        assert_eq!(next_kind(&mut rx).await, (2, RecognitionEventKind::Ready));
        assert_eq!(next_kind(&mut rx).await, (2, RecognitionEventKind::SpeechStart));
    }

    #[tokio::test]
    async fn test_stopped_attempt_leaves_line_buffered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &'static [u8] = b"later\n";
        let recognizer = ConsoleRecognizer::spawn(input, tx, true);

        recognizer.start_attempt(1, false);
        recognizer.stop_attempt();
        recognizer.start_attempt(2, false);

        // Attempt 1 may or may not get its Ready out before the stop lands,
        // but the line must go to attempt 2.
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.is_terminal();
            seen.push(event);
            if done {
                break;
            }
        }
        let last = seen.last().expect("no events");
        assert_eq!(last.attempt, 2);
        assert_eq!(last.kind, RecognitionEventKind::Result("later".to_string()));
    }

    #[tokio::test]
    async fn test_end_of_input_closes_event_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &'static [u8] = b"hello\n";
        let recognizer = ConsoleRecognizer::spawn(input, tx, true);

        recognizer.start_attempt(1, true);
        while let Some(event) = rx.recv().await {
            if event.is_terminal() {
                break;
            }
        }

        recognizer.start_attempt(2, true);
        assert_eq!(next_kind(&mut rx).await, (2, RecognitionEventKind::Ready));
        assert!(rx.recv().await.is_none());
    }
}
