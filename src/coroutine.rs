//! Suspendable Execution Units
//!
//! The suspending strategy runs a capture body as an independently
//! resumable unit: a dedicated thread that communicates with its driver
//! over a pair of rendezvous channels. Suspension is a blocking send of a
//! [`Yielded`] message; resumption is the driver delivering a value back.
//!
//! A body parked at a suspension point whose scope has already exited is
//! *abandoned*: the driver drops its channel ends, the parked operation
//! observes the disconnect, and the body thread unwinds quietly.
//!
//! Everything here is crate-internal machinery; it is driven by
//! [`crate::driver`] on behalf of [`crate::continuation`].

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::trace;

use crate::config::CoroutineConfig;
use crate::continuation::Continuation;
use crate::effect::Effect;
use crate::error::EffectError;
use crate::value::Value;

/// Unique identifier for a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CoroutineId(u64);

impl CoroutineId {
    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Global coroutine ID counter.
static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

fn next_coroutine_id() -> CoroutineId {
    CoroutineId(NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A re-invocable capture body; replay requires `Fn`, not `FnOnce`.
pub(crate) type BodyFn = dyn Fn() -> Result<Value, EffectError> + Send + Sync;

/// Escape block receiving the reified continuation.
pub(crate) type EscapeBlock =
    Box<dyn FnOnce(Continuation) -> Result<Value, EffectError> + Send>;

/// The two flavors of escape a body can yield.
pub(crate) enum EscapeKind {
    /// Exit with a value; the computation is over.
    Plain(Box<dyn FnOnce() -> Value + Send>),
    /// Exit with a block that receives the reified continuation.
    WithContinuation(EscapeBlock),
}

impl std::fmt::Debug for EscapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscapeKind::Plain(_) => f.write_str("EscapeKind::Plain(..)"),
            EscapeKind::WithContinuation(_) => f.write_str("EscapeKind::WithContinuation(..)"),
        }
    }
}

/// One suspension message from the body to its driver.
pub(crate) enum Yielded {
    /// A pending effect no in-body context handled.
    Effect(Effect),
    /// A non-local exit.
    Escape(EscapeKind),
    /// The body ran to completion.
    Done(Result<Value, EffectError>),
}

struct YieldHandle {
    yield_tx: Sender<Yielded>,
    resume_rx: Receiver<Value>,
}

thread_local! {
    static YIELD_HANDLE: RefCell<Option<YieldHandle>> = const { RefCell::new(None) };
}

/// Quiet unwind payload tearing down an abandoned body thread.
struct AbandonSignal;

fn abandon() -> ! {
    panic::resume_unwind(Box::new(AbandonSignal))
}

fn handle_channels() -> Option<(Sender<Yielded>, Receiver<Value>)> {
    YIELD_HANDLE.with(|handle| {
        handle
            .borrow()
            .as_ref()
            .map(|h| (h.yield_tx.clone(), h.resume_rx.clone()))
    })
}

/// Whether the current thread is a coroutine body.
pub(crate) fn in_coroutine() -> bool {
    YIELD_HANDLE.with(|handle| handle.borrow().is_some())
}

/// Suspend the current body, yielding a pending effect to the driver.
/// Returns the handler's result once the driver delivers it.
pub(crate) fn yield_effect(effect: Effect) -> Result<Value, EffectError> {
    let Some((tx, rx)) = handle_channels() else {
        return Err(EffectError::ContextMissing);
    };
    if tx.send(Yielded::Effect(effect)).is_err() {
        abandon();
    }
    match rx.recv() {
        Ok(value) => Ok(value),
        Err(_) => abandon(),
    }
}

/// Suspend the current body with a value escape. Never resumes.
pub(crate) fn yield_escape_value(thunk: Box<dyn FnOnce() -> Value + Send>) -> ! {
    let Some((tx, rx)) = handle_channels() else {
        panic!("{}", EffectError::EscapeOutsideCapture);
    };
    if tx.send(Yielded::Escape(EscapeKind::Plain(thunk))).is_err() {
        abandon();
    }
    match rx.recv() {
        Ok(_) => unreachable!("a value escape cannot be resumed"),
        Err(_) => abandon(),
    }
}

/// Suspend the current body with a continuation-reifying escape.
///
/// During a replay, the driver delivers the resume value here and the
/// escape call evaluates to it.
pub(crate) fn yield_escape_cont(block: EscapeBlock) -> Result<Value, EffectError> {
    let Some((tx, rx)) = handle_channels() else {
        return Err(EffectError::EscapeOutsideCapture);
    };
    if tx
        .send(Yielded::Escape(EscapeKind::WithContinuation(block)))
        .is_err()
    {
        abandon();
    }
    match rx.recv() {
        Ok(value) => Ok(value),
        Err(_) => abandon(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A body running on its own thread, suspendable at effect and escape
/// boundaries.
pub(crate) struct Coroutine {
    id: CoroutineId,
    yield_rx: Option<Receiver<Yielded>>,
    resume_tx: Option<Sender<Value>>,
    join: Option<JoinHandle<()>>,
}

impl Coroutine {
    /// Spawn `body` as a suspendable unit.
    pub(crate) fn spawn(body: Arc<BodyFn>, config: &CoroutineConfig) -> Result<Self, EffectError> {
        let id = next_coroutine_id();
        let (yield_tx, yield_rx) = bounded::<Yielded>(0);
        let (resume_tx, resume_rx) = bounded::<Value>(0);
        let name = match &config.name {
            Some(prefix) => format!("{prefix}-{}", id.as_u64()),
            None => format!("effect-coroutine-{}", id.as_u64()),
        };

        let done_tx = yield_tx.clone();
        let join = thread::Builder::new()
            .name(name)
            .stack_size(config.stack_size)
            .spawn(move || {
                YIELD_HANDLE.with(|handle| {
                    *handle.borrow_mut() = Some(YieldHandle {
                        yield_tx,
                        resume_rx,
                    });
                });
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| body()));
                YIELD_HANDLE.with(|handle| {
                    *handle.borrow_mut() = None;
                });
                match outcome {
                    Ok(result) => {
                        let _ = done_tx.send(Yielded::Done(result));
                    }
                    Err(payload) if payload.is::<AbandonSignal>() => {
                        // Scope exited while this body was parked.
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        let _ = done_tx.send(Yielded::Done(Err(EffectError::failure(format!(
                            "body panicked: {message}"
                        )))));
                    }
                }
            })
            .map_err(|e| EffectError::internal(format!("failed to spawn coroutine: {e}")))?;

        trace!(coroutine = id.as_u64(), "spawned coroutine");
        Ok(Coroutine {
            id,
            yield_rx: Some(yield_rx),
            resume_tx: Some(resume_tx),
            join: Some(join),
        })
    }

    pub(crate) fn id(&self) -> CoroutineId {
        self.id
    }

    /// Block until the body suspends or completes.
    pub(crate) fn next(&self) -> Result<Yielded, EffectError> {
        let rx = self
            .yield_rx
            .as_ref()
            .ok_or_else(|| EffectError::internal("coroutine channels already torn down"))?;
        rx.recv().map_err(|_| {
            EffectError::internal("coroutine body terminated outside the suspension protocol")
        })
    }

    /// Resume a suspended body with `value`.
    pub(crate) fn deliver(&self, value: Value) -> Result<(), EffectError> {
        let tx = self
            .resume_tx
            .as_ref()
            .ok_or_else(|| EffectError::internal("coroutine channels already torn down"))?;
        tx.send(value)
            .map_err(|_| EffectError::internal("coroutine body went away awaiting resume"))
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        // Disconnect both channels first so a parked body unwinds, then
        // join so no thread outlives its scope.
        self.resume_tx.take();
        self.yield_rx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        trace!(coroutine = self.id.as_u64(), "coroutine torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::perform;

    fn spawn_body(
        body: impl Fn() -> Result<Value, EffectError> + Send + Sync + 'static,
    ) -> Coroutine {
        Coroutine::spawn(Arc::new(body), &CoroutineConfig::default()).unwrap()
    }

    #[test]
    fn test_body_completes_without_suspending() {
        let co = spawn_body(|| Ok(Value::of(5_i64)));
        match co.next().unwrap() {
            Yielded::Done(Ok(v)) => assert_eq!(v.extract::<i64>(), Some(5)),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn test_yield_and_resume_roundtrip() {
        let co = spawn_body(|| {
            let v = perform("ask")?;
            Ok(Value::of(v.extract::<i64>().unwrap() + 1))
        });
        match co.next().unwrap() {
            Yielded::Effect(effect) => assert_eq!(effect.key(), &"ask".into()),
            _ => panic!("expected a pending effect"),
        }
        co.deliver(Value::of(41_i64)).unwrap();
        match co.next().unwrap() {
            Yielded::Done(Ok(v)) => assert_eq!(v.extract::<i64>(), Some(42)),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn test_abandoned_body_unwinds_quietly() {
        let co = spawn_body(|| {
            let _ = perform("never-answered")?;
            Ok(Value::unit())
        });
        match co.next().unwrap() {
            Yielded::Effect(_) => {}
            _ => panic!("expected a pending effect"),
        }
        // Dropping the coroutine while the body is parked must not hang.
        drop(co);
    }

    #[test]
    fn test_body_panic_is_reported() {
        let co = spawn_body(|| panic!("kaboom"));
        match co.next().unwrap() {
            Yielded::Done(Err(err)) => assert!(err.to_string().contains("kaboom")),
            _ => panic!("expected a reported failure"),
        }
    }

    #[test]
    fn test_fresh_ids() {
        let a = spawn_body(|| Ok(Value::unit()));
        let b = spawn_body(|| Ok(Value::unit()));
        assert_ne!(a.id(), b.id());
        let _ = a.next();
        let _ = b.next();
    }

    #[test]
    fn test_not_in_coroutine_on_owner_thread() {
        assert!(!in_coroutine());
    }
}
