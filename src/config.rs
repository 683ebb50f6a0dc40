//! Runtime Configuration
//!
//! Settings for the coroutine threads that back suspending capture
//! scopes. Configuration can be built programmatically, read from the
//! environment, or taken from the process-wide default.
//!
//! ## Environment variables
//!
//! | Variable            | Default            | Meaning                          |
//! |---------------------|--------------------|----------------------------------|
//! | `EFFECT_STACK_SIZE` | `524288` (512 KiB) | Stack size for coroutine threads |
//! | `EFFECT_CORO_NAME`  | (unset)            | Name prefix for coroutine threads |

use std::env;
use std::sync::OnceLock;

use tracing::warn;

/// Default stack size for coroutine threads, in bytes.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

/// Configuration for coroutine threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineConfig {
    /// Optional name prefix for coroutine threads. The coroutine ID is
    /// appended to keep thread names unique.
    pub name: Option<String>,
    /// Stack size for coroutine threads, in bytes.
    pub stack_size: usize,
}

impl Default for CoroutineConfig {
    fn default() -> Self {
        Self {
            name: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl CoroutineConfig {
    /// Create a configuration with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name prefix.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the coroutine stack size in bytes.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Build a configuration from the environment, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("EFFECT_STACK_SIZE") {
            match raw.parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.stack_size = bytes,
                _ => warn!(value = %raw, "ignoring invalid EFFECT_STACK_SIZE"),
            }
        }
        if let Ok(name) = env::var("EFFECT_CORO_NAME") {
            if !name.is_empty() {
                config.name = Some(name);
            }
        }

        config
    }
}

/// Process-wide configuration, read from the environment on first use.
pub fn global() -> &'static CoroutineConfig {
    static GLOBAL: OnceLock<CoroutineConfig> = OnceLock::new();
    GLOBAL.get_or_init(CoroutineConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoroutineConfig::default();
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert!(config.name.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = CoroutineConfig::new()
            .named("worker")
            .with_stack_size(1024 * 1024);
        assert_eq!(config.name.as_deref(), Some("worker"));
        assert_eq!(config.stack_size, 1024 * 1024);
    }

    #[test]
    fn test_global_is_stable() {
        assert_eq!(global(), global());
    }
}
