// reqscope/src/error.rs
use thiserror::Error;

/// Recoverable failures surfaced by reqscope.
///
/// Most context operations cannot fail: a missing key is `None`/`false`, and a
/// lost `set_if_absent` race is `false`. Broken internal invariants are
/// programming errors and panic instead of showing up here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
  #[error("Type mismatch for context data '{key}' (expected {expected_type})")]
  TypeMismatch { key: String, expected_type: String },

  #[error("Invalid configuration value for '{var}': {message}")]
  InvalidConfig { var: String, message: String },

  #[error("Context configuration was already installed for this process")]
  ConfigAlreadyInstalled,
}

pub type ContextResult<T, E = ContextError> = std::result::Result<T, E>;
