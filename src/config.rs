//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::recognition::ErrorCode;

const ENV_PREFIX: &str = "SPEECH_RELAY_";

/// Default model artifact looked up in the model directory
pub const DEFAULT_MODEL_FILE: &str = "Llama-3.2-1B-Instruct-Q4_K_M.gguf";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Start a capture session as soon as the translation engine is ready
    pub auto_start: bool,

    pub recognition: RecognitionConfig,

    pub translation: TranslationConfig,
}

/// Recognition session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Whether each new session starts out preferring offline recognition
    pub prefer_offline: bool,

    /// Whether an offline language pack is installed
    pub offline_available: bool,

    /// Error codes that end the session instead of retrying
    pub fatal_codes: Vec<ErrorCode>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            prefer_offline: true,
            offline_available: true,
            fatal_codes: Vec::new(),
        }
    }
}

/// Translation engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationConfig {
    /// Directory holding the model artifact
    pub model_dir: PathBuf,

    /// Model artifact file name
    pub model_file: String,

    /// llama.cpp command line binary
    pub command: String,

    pub source_language: String,

    pub target_language: String,

    /// Cap on generated tokens per utterance
    pub max_output_tokens: u32,

    /// Context window handed to the model
    pub context_size: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("."),
            model_file: DEFAULT_MODEL_FILE.to_string(),
            command: "llama-cli".to_string(),
            source_language: "English".to_string(),
            target_language: "French".to_string(),
            max_output_tokens: 128,
            context_size: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let home = lookup("HOME").map(PathBuf::from);

        let data_dir = match var("DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home
                .as_ref()
                .context("HOME is not set and SPEECH_RELAY_DATA_DIR is not given")?
                .join(".local")
                .join("share")
                .join("speech-relay"),
        };

        let socket_path = data_dir.join("daemon.sock");

        let mut translation = TranslationConfig::default();
        if let Some(dir) = var("MODEL_DIR") {
            translation.model_dir = PathBuf::from(dir);
        } else if let Some(home) = &home {
            translation.model_dir = home.join("Downloads");
        }
        if let Some(file) = var("MODEL_FILE") {
            translation.model_file = file;
        }
        if let Some(command) = var("LLAMA_BIN") {
            translation.command = command;
        }
        if let Some(lang) = var("SOURCE_LANG") {
            translation.source_language = lang;
        }
        if let Some(lang) = var("TARGET_LANG") {
            translation.target_language = lang;
        }

        let mut recognition = RecognitionConfig::default();
        if let Some(value) = var("PREFER_OFFLINE") {
            recognition.prefer_offline = parse_bool("PREFER_OFFLINE", &value)?;
        }
        if let Some(value) = var("OFFLINE_AVAILABLE") {
            recognition.offline_available = parse_bool("OFFLINE_AVAILABLE", &value)?;
        }
        if let Some(value) = var("FATAL_CODES") {
            recognition.fatal_codes = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| code.parse::<ErrorCode>())
                .collect::<Result<Vec<ErrorCode>, _>>()
                .context("invalid SPEECH_RELAY_FATAL_CODES")?;
        }

        let auto_start = match var("AUTO_START") {
            Some(value) => parse_bool("AUTO_START", &value)?,
            None => false,
        };

        Ok(Self {
            socket_path,
            data_dir,
            auto_start,
            recognition,
            translation,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean for {}{}: {:?}", ENV_PREFIX, name, other),
    }
}
