//! Effect Runtime
//!
//! A library for structured effect handling: computations declare the
//! effects they perform, enclosing scopes decide how those effects are
//! handled, and control can leave a scope early or be reified as a
//! reusable continuation.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Public surface                        |
//! |  capture / perform / escape / abort        continuation::*   |
//! +-----------------------+--------------------------------------+
//! |  scope (callback)     |  continuation (suspending)           |
//! |  inline handlers,     |  coroutine bodies, driver loop,      |
//! |  non-local exit       |  journal replay, multi-shot resume   |
//! +-----------------------+--------------------------------------+
//! |  context: dynamically scoped handler chains (thread-local)   |
//! +--------------------------------------------------------------+
//! |  effect / handler / value: descriptors, dispatch, payloads   |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Two capture strategies
//!
//! [`capture`] runs its body inline. Handlers execute on the caller's
//! stack and [`escape`] unwinds straight to the scope boundary. This is
//! the cheap default.
//!
//! [`continuation::capture`] runs its body as a coroutine. Escapes can
//! then reify the rest of the computation as a [`Continuation`] that is
//! invocable any number of times.
//!
//! ## Example
//!
//! ```rust,ignore
//! use effect_runtime::{capture, perform, Handler, Handlers, Value};
//!
//! let out = capture(
//!     Handlers::new().on("greeting", Handler::nullary(|| Ok(Value::of("hello".to_string())))),
//!     || perform("greeting"),
//! )?;
//! assert_eq!(out.extract::<String>().as_deref(), Some("hello"));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod continuation;
pub mod effect;
pub mod error;
pub mod handler;
pub mod scope;
pub mod value;

mod coroutine;
mod driver;

pub use config::CoroutineConfig;
pub use context::{current_context, perform, EffectContext};
pub use continuation::{Continuation, ContinuationId};
pub use effect::{Effect, EffectKey};
pub use error::{EffectError, ReuseError};
pub use handler::{Handler, HandlerTable, Handlers};
pub use scope::{
    abort, abort_with, capture, capture_in, escape, escape_with, Aborted, ScopeId,
};
pub use value::Value;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_surface_round_trip() {
        let out = capture(
            Handlers::new().on("two", Handler::nullary(|| Ok(Value::of(2_i64)))),
            || {
                let two = perform("two")?.extract::<i64>().unwrap();
                Ok(Value::of(two + 40))
            },
        )
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(42));
    }
}
