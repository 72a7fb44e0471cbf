//! Translation engine boundary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Identifies one streaming translation
pub type JobId = u64;

/// Lazily produced translation tokens. Finite and not restartable.
pub type TokenStream = BoxStream<'static, Result<String, TranslationError>>;

/// Errors raised by translation engines
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("translation engine is not initialized")]
    NotInitialized,

    #[error("model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    #[error("model file {} is malformed: {reason}", .path.display())]
    ModelMalformed { path: PathBuf, reason: String },

    #[error("translation engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("translation engine failed: {0}")]
    Engine(String),
}

/// A token-streaming translator
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Load the model artifact `model_file` from `model_dir`
    async fn initialize(&self, model_dir: &Path, model_file: &str) -> Result<(), TranslationError>;

    /// Start translating `input` for `job` and return its tokens
    fn translate_stream(&self, input: &str, job: JobId) -> Result<TokenStream, TranslationError>;

    /// Ask the engine to stop producing tokens for `job`. Best effort.
    fn cancel(&self, job: JobId);

    /// Engine name for logging
    fn name(&self) -> &str;
}
