//! Multi-Shot Continuations
//!
//! The suspending variant of `capture`. Bodies run as coroutines, so an
//! escape can reify "the rest of the computation" as a [`Continuation`]:
//! an invocable value that resumes the aborted body at its exact escape
//! point, as many times as it is invoked.
//!
//! ## Replay model
//!
//! A continuation is not a frozen machine stack; it is an immutable
//! snapshot — the (re-invocable) body plus the journal of every value
//! delivered at a suspension before the escape. Resuming replays the body
//! against that journal without consulting any handler, re-establishing
//! the context frames the body builds along the way, then delivers the
//! resume value at the escape and lets the session run live from there.
//! Every invocation starts from the same snapshot; invocations are
//! independent and the originating `capture` call still returns exactly
//! once.
//!
//! The price of the snapshot model is determinism: a body whose
//! suspension sequence differs between runs cannot be rewound, and resume
//! reports that instead of producing a wrong result.
//!
//! ```rust,ignore
//! let k = continuation::capture(Handlers::new(), || {
//!     let n = continuation::escape(|k| Ok(Value::of(k)))?;
//!     Ok(Value::of(2 * n.extract::<i64>().unwrap()))
//! })?;
//! let k = k.extract::<Continuation>().unwrap();
//! assert_eq!(k.resume(3_i64)?.extract::<i64>(), Some(6));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::config::{self, CoroutineConfig};
use crate::context::{self, EffectContext};
use crate::coroutine::{self, BodyFn, Coroutine, EscapeKind};
use crate::driver::{self, Drive, JournalEntry};
use crate::error::{EffectError, ReuseError};
use crate::handler::Handlers;
use crate::scope::{self, ScopeExit};
use crate::value::Value;

/// Unique identifier for a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationId(u64);

impl ContinuationId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Global continuation ID counter.
static NEXT_CONTINUATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_continuation_id() -> ContinuationId {
    ContinuationId(NEXT_CONTINUATION_ID.fetch_add(1, Ordering::Relaxed))
}

/// A reified, replayable remainder of a suspended computation.
///
/// Cloning is cheap; all state is shared and immutable. A continuation
/// may be invoked zero, one, or many times, from the thread that captured
/// it. Invocation from any other thread is refused with
/// [`ReuseError::ForeignThread`].
#[derive(Clone)]
pub struct Continuation {
    id: ContinuationId,
    body: Arc<BodyFn>,
    context: Arc<EffectContext>,
    journal: Arc<Vec<JournalEntry>>,
    origin: ThreadId,
    config: CoroutineConfig,
}

impl Continuation {
    /// Get the continuation ID.
    pub fn id(&self) -> ContinuationId {
        self.id
    }

    /// Number of recorded suspensions in the snapshot.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Resume the suspended computation with `value`.
    ///
    /// The escape that captured this continuation evaluates to `value`
    /// and the body runs on to completion; its final result is returned.
    /// Each call is an independent replay of the same snapshot.
    pub fn resume(&self, value: impl Into<Value>) -> Result<Value, EffectError> {
        if thread::current().id() != self.origin {
            return Err(EffectError::ContinuationReuse(ReuseError::ForeignThread));
        }

        let mut journal = self.journal.as_ref().clone();
        journal.push(JournalEntry::Resume(value.into()));
        debug!(
            continuation = self.id.as_u64(),
            replay_len = journal.len(),
            "resuming continuation"
        );

        let co = Coroutine::spawn(self.body.clone(), &self.config)
            .map_err(|_| EffectError::ContinuationReuse(ReuseError::TornDown))?;
        drive_session(co, &self.body, &self.context, journal, &self.config)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.id)
            .field("journal_len", &self.journal.len())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Open a suspending capture scope.
///
/// Like [`crate::capture`], but the body runs as a coroutine so
/// [`escape`] can reify continuations. The body must be re-invocable
/// (`Fn`) and thread-portable; replay depends on both.
pub fn capture<F>(handlers: Handlers, body: F) -> Result<Value, EffectError>
where
    F: Fn() -> Result<Value, EffectError> + Send + Sync + 'static,
{
    capture_with_config(handlers, config::global().clone(), body)
}

/// [`capture`] with an explicit coroutine configuration.
pub fn capture_with_config<F>(
    handlers: Handlers,
    config: CoroutineConfig,
    body: F,
) -> Result<Value, EffectError>
where
    F: Fn() -> Result<Value, EffectError> + Send + Sync + 'static,
{
    let parent = context::current_context_opt();
    let ctx = Arc::new(EffectContext::new(handlers.into_table(), parent));
    let body: Arc<BodyFn> = Arc::new(body);

    trace!("entering suspending capture scope");
    let co = Coroutine::spawn(body.clone(), &config)?;
    drive_session(co, &body, &ctx, Vec::new(), &config)
}

/// Escape the enclosing suspending capture, reifying the remainder of the
/// computation.
///
/// On the first execution the body suspends for good: `block` receives
/// the captured [`Continuation`] and its result becomes the result of the
/// enclosing `capture`. During a replay the suspension is transparent —
/// the call evaluates to the resume value and the body continues.
///
/// Fails with [`EffectError::EscapeOutsideCapture`] when the caller is
/// not running inside a suspending capture body.
pub fn escape<F>(block: F) -> Result<Value, EffectError>
where
    F: FnOnce(Continuation) -> Result<Value, EffectError> + Send + 'static,
{
    if !coroutine::in_coroutine() {
        return Err(EffectError::EscapeOutsideCapture);
    }
    coroutine::yield_escape_cont(Box::new(block))
}

/// Drive one coroutine session and translate its boundary into the
/// scope's result, capturing a continuation if the body escaped with one.
fn drive_session(
    co: Coroutine,
    body: &Arc<BodyFn>,
    ctx: &Arc<EffectContext>,
    journal: Vec<JournalEntry>,
    config: &CoroutineConfig,
) -> Result<Value, EffectError> {
    // The drive runs inside a scope of its own, so handlers resolve
    // within the capture scope and can abort it like in the callback
    // engine.
    let outcome = match scope::enter(ctx.clone(), || driver::run(co, ctx, journal)) {
        ScopeExit::Escaped(value) => return Ok(value),
        ScopeExit::Normal(drive) => drive?,
    };

    match outcome {
        Drive::Completed(value) => Ok(value),
        Drive::Escaped {
            kind: EscapeKind::Plain(thunk),
            ..
        } => Ok(thunk()),
        Drive::Escaped {
            kind: EscapeKind::WithContinuation(block),
            journal,
        } => {
            let k = Continuation {
                id: next_continuation_id(),
                body: body.clone(),
                context: ctx.clone(),
                journal: Arc::new(journal),
                origin: thread::current().id(),
                config: config.clone(),
            };
            debug!(continuation = k.id.as_u64(), "captured continuation");
            block(k)
        }
    }
}
