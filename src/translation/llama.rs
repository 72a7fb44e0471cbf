//! Translation through the llama.cpp command line tool
//!
//! Every job runs the configured binary once with a greedy-sampling prompt
//! and streams its stdout back as tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TranslationConfig;

use super::engine::{JobId, TokenStream, TranslationEngine, TranslationError};

/// Leading bytes of every GGUF model file
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

type JobRegistry = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Translator backed by `llama-cli`
pub struct LlamaCliTranslator {
    config: TranslationConfig,
    model_path: RwLock<Option<PathBuf>>,
    jobs: JobRegistry,
}

impl LlamaCliTranslator {
    pub fn new(config: TranslationConfig) -> Self {
        Self {
            config,
            model_path: RwLock::new(None),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Llama 3 chat prompt asking for a bare translation
    fn prompt(&self, input: &str) -> String {
        let source = &self.config.source_language;
        let target = &self.config.target_language;
        format!(
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\n\
             You are a translator. Translate the user's {source} text into {target}. \
             Output ONLY the {target} translation, nothing else.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\n\
             {input}<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        )
    }

    fn spawn_engine(&self, model: &Path, input: &str) -> Result<Child, TranslationError> {
        let child = Command::new(&self.config.command)
            .arg("-m")
            .arg(model)
            .arg("-p")
            .arg(self.prompt(input))
            .arg("-n")
            .arg(self.config.max_output_tokens.to_string())
            .arg("-c")
            .arg(self.config.context_size.to_string())
            .args(["--temp", "0", "--no-display-prompt", "-no-cnv", "--log-disable"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

#[async_trait]
impl TranslationEngine for LlamaCliTranslator {
    async fn initialize(&self, model_dir: &Path, model_file: &str) -> Result<(), TranslationError> {
        let path = model_dir.join(model_file);
        info!(path = %path.display(), "loading translation model");

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranslationError::ModelMissing(path));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(TranslationError::ModelMalformed {
                path,
                reason: "not a regular file".to_string(),
            });
        }

        let mut magic = [0u8; 4];
        let mut file = tokio::fs::File::open(&path).await?;
        match file.read_exact(&mut magic).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TranslationError::ModelMalformed {
                    path,
                    reason: "shorter than the GGUF header".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if &magic != GGUF_MAGIC {
            return Err(TranslationError::ModelMalformed {
                path,
                reason: "missing GGUF magic".to_string(),
            });
        }

        info!(
            size_bytes = metadata.len(),
            command = %self.config.command,
            "translation model ready"
        );
        *self.model_path.write().unwrap_or_else(PoisonError::into_inner) = Some(path);
        Ok(())
    }

    fn translate_stream(&self, input: &str, job: JobId) -> Result<TokenStream, TranslationError> {
        let model = self
            .model_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TranslationError::NotInitialized)?;

        let mut child = self.spawn_engine(&model, input)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranslationError::Engine("engine stdout was not captured".to_string()))?;

        let cancel = CancellationToken::new();
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job, cancel.clone());

        debug!(job, input_len = input.len(), "translation engine spawned");

        let reader = TokenReader {
            job,
            child,
            stdout,
            cancel,
            pending: Vec::new(),
            finished: false,
            jobs: Arc::clone(&self.jobs),
        };

        Ok(futures::stream::unfold(reader, |mut reader| async move {
            let item = reader.next_token().await?;
            Some((item, reader))
        })
        .boxed())
    }

    fn cancel(&self, job: JobId) {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = jobs.get(&job) {
            debug!(job, "cancelling translation engine job");
            token.cancel();
        }
    }

    fn name(&self) -> &str {
        "llama-cli"
    }
}

/// Reads one engine process's stdout as a sequence of tokens
struct TokenReader {
    job: JobId,
    child: Child,
    stdout: ChildStdout,
    cancel: CancellationToken,
    /// Bytes read but not yet forming complete UTF-8
    pending: Vec<u8>,
    finished: bool,
    jobs: JobRegistry,
}

impl TokenReader {
    async fn next_token(&mut self) -> Option<Result<String, TranslationError>> {
        if self.finished {
            return None;
        }

        let mut buf = [0u8; 256];
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => None,
                read = self.stdout.read(&mut buf) => Some(read),
            };

            let Some(read) = read else {
                debug!(job = self.job, "translation cancelled, stopping engine");
                self.finished = true;
                if let Err(e) = self.child.start_kill() {
                    warn!(job = self.job, ?e, "failed to kill translation engine");
                }
                return None;
            };

            match read {
                Ok(0) => {
                    self.finished = true;
                    return self.finish().await;
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    if let Some(token) = take_utf8_prefix(&mut self.pending) {
                        return Some(Ok(token));
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Reap the process once stdout is exhausted
    async fn finish(&mut self) -> Option<Result<String, TranslationError>> {
        match self.child.wait().await {
            Ok(status) if status.success() => {
                if self.pending.is_empty() {
                    None
                } else {
                    let rest = std::mem::take(&mut self.pending);
                    Some(Ok(String::from_utf8_lossy(&rest).into_owned()))
                }
            }
            Ok(status) => Some(Err(TranslationError::Engine(format!(
                "engine exited with {}",
                status
            )))),
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl Drop for TokenReader {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job);
    }
}

/// Split off the longest prefix of `pending` that is complete UTF-8.
///
/// A multi-byte character cut by a read boundary stays in `pending`; invalid
/// bytes are replaced rather than held back forever.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> Option<String> {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_some() => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            return Some(text);
        }
        Err(e) => e.valid_up_to(),
    };

    if valid == 0 {
        return None;
    }

    let rest = pending.split_off(valid);
    let complete = std::mem::replace(pending, rest);
    String::from_utf8(complete).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use futures::StreamExt;
    use tokio_test::assert_ok;

    use super::*;

    fn translator_with(command: &str) -> LlamaCliTranslator {
        LlamaCliTranslator::new(TranslationConfig {
            command: command.to_string(),
            ..TranslationConfig::default()
        })
    }

    fn write_model(dir: &Path, name: &str, bytes: &[u8]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_take_utf8_prefix_holds_split_character() {
        let mut pending = "bon".as_bytes().to_vec();
        pending.extend_from_slice(&"é".as_bytes()[..1]);

        assert_eq!(take_utf8_prefix(&mut pending), Some("bon".to_string()));
        assert_eq!(pending.len(), 1);
        assert_eq!(take_utf8_prefix(&mut pending), None);

        pending.extend_from_slice(&"é".as_bytes()[1..]);
        assert_eq!(take_utf8_prefix(&mut pending), Some("é".to_string()));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_utf8_prefix_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xff, b'b'];
        assert_eq!(take_utf8_prefix(&mut pending), Some("a\u{fffd}b".to_string()));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_prompt_names_languages() {
        let translator = translator_with("llama-cli");
        let prompt = translator.prompt("hello");
        assert!(prompt.contains("Translate the user's English text into French."));
        assert!(prompt.contains("\n\nhello<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[tokio::test]
    async fn test_initialize_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let translator = translator_with("llama-cli");

        let result = translator.initialize(dir.path(), "absent.gguf").await;
        assert!(matches!(result, Err(TranslationError::ModelMissing(_))));
    }

    #[tokio::test]
    async fn test_initialize_rejects_malformed_model() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), "bad.gguf", b"NOPE and more");
        write_model(dir.path(), "short.gguf", b"GG");
        std::fs::create_dir(dir.path().join("folder.gguf")).unwrap();
        let translator = translator_with("llama-cli");

        for name in ["bad.gguf", "short.gguf", "folder.gguf"] {
            let result = translator.initialize(dir.path(), name).await;
            assert!(
                matches!(result, Err(TranslationError::ModelMalformed { .. })),
                "{} should be malformed",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_translate_before_initialize() {
        let translator = translator_with("llama-cli");
        assert!(matches!(
            translator.translate_stream("hello", 1),
            Err(TranslationError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_stream_reads_engine_output() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), "model.gguf", b"GGUF\x03\x00\x00\x00");
        // echo prints its arguments, which include the prompt
        let translator = translator_with("echo");
        assert_ok!(translator.initialize(dir.path(), "model.gguf").await);

        let stream = translator.translate_stream("hello", 7).unwrap();
        let tokens: Vec<String> = stream.map(|token| token.unwrap()).collect().await;
        let output = tokens.concat();

        assert!(output.contains("into French"));
        assert!(output.contains("hello"));
        assert!(translator.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_engine_ends_stream_with_error() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), "model.gguf", b"GGUF");
        let translator = translator_with("false");
        assert_ok!(translator.initialize(dir.path(), "model.gguf").await);

        let items: Vec<_> = translator.translate_stream("hello", 1).unwrap().collect().await;
        assert!(matches!(items.last(), Some(Err(TranslationError::Engine(_)))));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_engine() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), "model.gguf", b"GGUF");
        let script = dir.path().join("slow-engine.sh");
        std::fs::write(&script, "#!/bin/sh\nprintf bon\nsleep 10\nprintf jour\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let translator = translator_with(&script.to_string_lossy());
        assert_ok!(translator.initialize(dir.path(), "model.gguf").await);

        let mut stream = translator.translate_stream("hello", 3).unwrap();
        let first = stream.next().await;
        assert!(matches!(first, Some(Ok(ref token)) if token == "bon"));

        translator.cancel(3);
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("cancelled stream kept waiting on the engine");
        assert!(next.is_none());

        drop(stream);
        assert!(translator.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_noop() {
        let translator = translator_with("llama-cli");
        translator.cancel(99);
        assert!(translator.jobs.lock().unwrap().is_empty());
    }
}
