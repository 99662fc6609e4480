// reqscope/src/config.rs

//! Process-wide tuning for context behaviour.
//!
//! The configuration is resolved once: either installed explicitly with
//! [`ContextConfig::install`] before first use, or read lazily from the
//! environment by [`ContextConfig::global`].

use crate::error::{ContextError, ContextResult};
use once_cell::sync::OnceCell;
use std::env;
use tracing::{event, Level};

/// Environment variable holding the overwrite advisory limit.
pub const OVERWRITE_WARNING_LIMIT_VAR: &str = "REQSCOPE_OVERWRITE_WARNING_LIMIT";

static GLOBAL_CONFIG: OnceCell<ContextConfig> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
  /// How many times per process a loud `set` over an existing key is reported
  /// with a `WARN` event. `0` silences the advisory entirely.
  pub overwrite_warning_limit: u64,
}

impl Default for ContextConfig {
  fn default() -> Self {
    Self {
      overwrite_warning_limit: 1,
    }
  }
}

impl ContextConfig {
  /// Builds a config from `REQSCOPE_*` environment variables, using defaults
  /// for anything unset.
  pub fn from_env() -> ContextResult<Self> {
    let mut config = Self::default();

    if let Ok(raw) = env::var(OVERWRITE_WARNING_LIMIT_VAR) {
      config.overwrite_warning_limit = raw.trim().parse::<u64>().map_err(|e| ContextError::InvalidConfig {
        var: OVERWRITE_WARNING_LIMIT_VAR.to_string(),
        message: format!("'{}' is not a non-negative integer: {}", raw, e),
      })?;
    }

    Ok(config)
  }

  /// Installs `self` as the process configuration.
  ///
  /// Fails if a configuration was already installed or already resolved by a
  /// call to [`ContextConfig::global`].
  pub fn install(self) -> ContextResult<()> {
    GLOBAL_CONFIG.set(self).map_err(|_| ContextError::ConfigAlreadyInstalled)?;
    event!(Level::DEBUG, "Context configuration installed.");
    Ok(())
  }

  /// Returns the process configuration, resolving it from the environment on
  /// first access.
  pub fn global() -> &'static ContextConfig {
    GLOBAL_CONFIG.get_or_init(|| match Self::from_env() {
      Ok(config) => config,
      Err(e) => {
        event!(Level::WARN, error = %e, "Falling back to default context configuration.");
        Self::default()
      }
    })
  }
}
