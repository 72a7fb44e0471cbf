//! Streaming translation
//!
//! - [`TranslationEngine`]: the engine boundary
//! - [`LlamaCliTranslator`]: engine running llama.cpp's command line tool
//! - [`TranslationDispatcher`]: at most one running job, cancelled by the next

mod dispatcher;
mod engine;
mod llama;

pub use dispatcher::TranslationDispatcher;
pub use engine::TranslationEngine;
pub use llama::LlamaCliTranslator;

#[cfg(test)]
pub use dispatcher::JobStatus;
#[cfg(test)]
pub use engine::{JobId, TokenStream, TranslationError};
