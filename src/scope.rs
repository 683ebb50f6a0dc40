//! Capture Scopes — the Callback Engine
//!
//! `capture` runs a body with a handler set active; `escape` performs an
//! immediate non-local exit from the nearest enclosing capture call,
//! skipping every intervening frame between the escape site and that
//! scope. Handlers invoked through `perform` run inline and return before
//! control goes back to the body, so this engine never suspends anything.
//!
//! ## Escape mechanics
//!
//! Each entered scope gets a `ScopeId` that is unique per nesting level,
//! so nested escapes always target the correct enclosing scope. An escape
//! unwinds carrying its target id and a lazily evaluated exit thunk;
//! `capture` intercepts an unwind aimed at its own id, evaluates the thunk
//! and returns its value. Unwinds aimed elsewhere — an outer scope or a
//! genuine panic — pass through untouched. The unwind is raised with
//! `resume_unwind`, so control-flow escapes never trip the panic hook.
//!
//! The multi-shot variant of `escape` lives in [`crate::continuation`];
//! this engine's escapes abort their computation for good.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::context::{self, ContextGuard, EffectContext};
use crate::coroutine;
use crate::error::EffectError;
use crate::handler::Handlers;
use crate::value::Value;

/// Unique identifier for one in-flight `capture` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Global scope ID counter.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> ScopeId {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<ScopeId>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard {
    _private: (),
}

impl ScopeGuard {
    fn push(id: ScopeId) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(id));
        ScopeGuard { _private: () }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Unwind payload for an in-flight escape.
struct EscapeSignal {
    target: ScopeId,
    thunk: Option<Box<dyn FnOnce() -> Value + Send>>,
}

/// Sentinel exit value produced by [`abort`].
///
/// Distinguishes "aborted with the default marker" from "escaped with an
/// explicit value" at the capture call site: `value.is::<Aborted>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Open a capture scope: run `body` with `handlers` active.
///
/// The new context encloses whatever context was active on this thread, so
/// effects the new handler set does not cover keep resolving outward. The
/// scope's context is pushed on entry and popped exactly once on every
/// exit path — normal return, escape, abort, or propagating failure.
///
/// Returns the body's result, or the exit value supplied by an escape
/// targeting this scope.
pub fn capture<F>(handlers: Handlers, body: F) -> Result<Value, EffectError>
where
    F: FnOnce() -> Result<Value, EffectError>,
{
    let parent = context::current_context_opt();
    let ctx = Arc::new(EffectContext::new(handlers.into_table(), parent));
    capture_in(ctx, body)
}

/// Open a capture scope over a pre-built context.
///
/// This is the explicit-context form: the caller controls the context's
/// table and parent linkage. `capture` is sugar over this.
pub fn capture_in<F>(ctx: Arc<EffectContext>, body: F) -> Result<Value, EffectError>
where
    F: FnOnce() -> Result<Value, EffectError>,
{
    match enter(ctx, body) {
        ScopeExit::Normal(result) => result,
        ScopeExit::Escaped(value) => Ok(value),
    }
}

/// How an entered scope was left.
pub(crate) enum ScopeExit<T> {
    /// `f` returned.
    Normal(T),
    /// An escape targeted this scope; its exit thunk already ran.
    Escaped(Value),
}

/// Run `f` inside a fresh scope: context and scope id pushed on entry,
/// popped on every exit path. Escapes aimed at enclosing scopes and real
/// panics keep unwinding. Shared by both capture engines.
pub(crate) fn enter<T>(ctx: Arc<EffectContext>, f: impl FnOnce() -> T) -> ScopeExit<T> {
    let scope = next_scope_id();
    trace!(scope = scope.as_u64(), "entering capture scope");
    let outcome = {
        let _context_guard = ContextGuard::push(ctx);
        let _scope_guard = ScopeGuard::push(scope);
        panic::catch_unwind(AssertUnwindSafe(f))
        // Guards drop here: the scope is fully exited before any escape
        // thunk runs, so a thunk that escapes again targets the enclosing
        // scope, not this one.
    };

    match outcome {
        Ok(result) => ScopeExit::Normal(result),
        Err(payload) => match payload.downcast::<EscapeSignal>() {
            Ok(mut signal) if signal.target == scope => {
                trace!(scope = scope.as_u64(), "scope exited via escape");
                let thunk = signal.thunk.take().expect("escape thunk already consumed");
                ScopeExit::Escaped(thunk())
            }
            Ok(signal) => panic::resume_unwind(signal),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Escape the nearest enclosing capture scope with `value`.
///
/// Never returns to its call site. Calling this with no enclosing scope on
/// the current execution unit is a programmer error and panics with
/// [`EffectError::EscapeOutsideCapture`].
pub fn escape<T: Any + Send + Sync>(value: T) -> ! {
    let value = Value::of(value);
    escape_thunk(Box::new(move || value))
}

/// Escape the nearest enclosing capture scope with the result of `thunk`.
///
/// The thunk is evaluated lazily, once the escape reaches its target
/// scope — never before.
pub fn escape_with<F>(thunk: F) -> !
where
    F: FnOnce() -> Value + Send + 'static,
{
    escape_thunk(Box::new(thunk))
}

/// Escape with the [`Aborted`] sentinel.
pub fn abort() -> ! {
    escape(Aborted)
}

/// Escape with an explicit value; convenience twin of [`abort`].
pub fn abort_with<T: Any + Send + Sync>(value: T) -> ! {
    escape(value)
}

fn escape_thunk(thunk: Box<dyn FnOnce() -> Value + Send>) -> ! {
    let target = SCOPE_STACK.with(|stack| stack.borrow().last().copied());
    match target {
        Some(target) => {
            trace!(scope = target.as_u64(), "escape raised");
            panic::resume_unwind(Box::new(EscapeSignal {
                target,
                thunk: Some(thunk),
            }))
        }
        // Inside a suspending body with no local scope the escape is
        // yielded outward and resolved by the scope's driver.
        None if coroutine::in_coroutine() => coroutine::yield_escape_value(thunk),
        None => panic!("{}", EffectError::EscapeOutsideCapture),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{context_stack_depth, perform};
    use crate::handler::Handler;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;

    fn constant(n: i64) -> Handler {
        Handler::nullary(move || Ok(Value::of(n)))
    }

    #[test]
    fn test_capture_returns_body_result() {
        let out = capture(Handlers::new(), || Ok(Value::of(5_i64))).unwrap();
        assert_eq!(out.extract::<i64>(), Some(5));
    }

    #[test]
    fn test_perform_resolves_inline() {
        let out = capture(Handlers::new().on("get", constant(7)), || {
            perform("get")
        })
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(7));
    }

    #[test]
    fn test_escape_short_circuits_body() {
        let reached = Arc::new(AtomicBool::new(false));
        let reached_in_body = reached.clone();
        let out = capture(Handlers::new(), move || {
            escape(99_i64);
            #[allow(unreachable_code)]
            {
                reached_in_body.store(true, Ordering::SeqCst);
                Ok(Value::unit())
            }
        })
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(99));
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[test]
    fn test_escape_block_evaluated_lazily() {
        let out = capture(Handlers::new(), || escape_with(|| Value::of(7_i64 * 6))).unwrap();
        assert_eq!(out.extract::<i64>(), Some(42));
    }

    #[test]
    fn test_escape_skips_intervening_frames() {
        fn deep(levels: usize) -> ! {
            if levels == 0 {
                escape(13_i64);
            }
            deep(levels - 1)
        }
        let out = capture(Handlers::new(), || deep(20)).unwrap();
        assert_eq!(out.extract::<i64>(), Some(13));
    }

    #[test]
    fn test_nested_escape_targets_inner_scope() {
        let out = capture(Handlers::new(), || {
            let inner = capture(Handlers::new(), || escape(1_i64))?;
            assert_eq!(inner.extract::<i64>(), Some(1));
            Ok(Value::of(2_i64))
        })
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(2));
    }

    #[test]
    fn test_escape_through_inner_scope_to_outer() {
        // The inner body escapes with a thunk that escapes again, this
        // time unwinding the outer scope as well.
        let out = capture(Handlers::new(), || {
            let _ = capture(Handlers::new(), || {
                escape_with(|| escape(3_i64));
            })?;
            Ok(Value::of(0_i64))
        })
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(3));
    }

    #[test]
    fn test_abort_sentinel() {
        let out = capture(Handlers::new(), || abort()).unwrap();
        assert!(out.is::<Aborted>());

        let out = capture(Handlers::new(), || abort_with(5_i64)).unwrap();
        assert!(!out.is::<Aborted>());
        assert_eq!(out.extract::<i64>(), Some(5));
    }

    #[test]
    fn test_stack_restored_after_normal_exit() {
        assert_eq!(context_stack_depth(), 0);
        let _ = capture(Handlers::new(), || Ok(Value::unit()));
        assert_eq!(context_stack_depth(), 0);
    }

    #[test]
    fn test_stack_restored_after_escape() {
        let _ = capture(Handlers::new(), || escape(1_i64));
        assert_eq!(context_stack_depth(), 0);
    }

    #[test]
    fn test_stack_restored_after_failure() {
        let result = capture(Handlers::new(), || perform("missing"));
        assert!(result.unwrap_err().is_unhandled());
        assert_eq!(context_stack_depth(), 0);
    }

    #[test]
    fn test_stack_restored_after_panic() {
        let result = panic::catch_unwind(|| {
            let _ = capture(Handlers::new(), || panic!("genuine bug"));
        });
        assert!(result.is_err());
        assert_eq!(context_stack_depth(), 0);
    }

    #[test]
    fn test_foreign_panic_passes_through() {
        let result = panic::catch_unwind(|| capture(Handlers::new(), || panic!("not an escape")));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"not an escape"));
    }

    #[test]
    fn test_escape_outside_capture_panics() {
        let result = panic::catch_unwind(|| escape(1_i64));
        let payload = result.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.contains("outside of any capture scope"));
    }

    #[test]
    fn test_unhandled_effect_propagates_out_of_capture() {
        let err = capture(Handlers::new(), || perform("missing")).unwrap_err();
        assert!(matches!(err, EffectError::Unhandled(_)));
    }

    #[test]
    fn test_nearest_scope_handlers_win_then_restore() {
        let out = capture(Handlers::new().on("foo", constant(1)), || {
            let inner = capture(Handlers::new().on("foo", constant(2)), || perform("foo"))?;
            assert_eq!(inner.extract::<i64>(), Some(2));
            perform("foo")
        })
        .unwrap();
        assert_eq!(out.extract::<i64>(), Some(1));
    }
}
