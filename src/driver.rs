//! The Resume Loop
//!
//! `run` drives one coroutine session to its next boundary: completion or
//! an escape. Pending effects are resolved against the scope's context
//! chain and the delivered values are journaled, so a continuation
//! captured at an escape can later replay the session from an immutable
//! snapshot instead of re-running handlers.
//!
//! A session starts in **replay** over whatever journal prefix it was
//! given (empty on a first run): each recorded entry is matched against
//! the body's next suspension and its value is delivered without
//! consulting any handler. Once the prefix is exhausted the session is
//! **live** and new deliveries are appended to the journal. A body whose
//! suspensions stop lining up with the prefix — a different suspension
//! kind, or an effect with a different key — has diverged, which is
//! reported rather than silently mis-resumed.

use tracing::trace;

use crate::context::EffectContext;
use crate::coroutine::{self, Coroutine, EscapeKind, Yielded};
use crate::effect::EffectKey;
use crate::error::{EffectError, ReuseError};
use crate::value::Value;

/// One recorded suspension outcome.
#[derive(Debug, Clone)]
pub(crate) enum JournalEntry {
    /// A handler's result, delivered at a pending-effect suspension.
    /// Keyed by the effect it answered, so a replay that performs a
    /// different effect is caught rather than fed the wrong value.
    Effect {
        /// Key of the effect the recorded value answered.
        key: EffectKey,
        /// The delivered handler result.
        value: Value,
    },
    /// A resume value, delivered at an escape suspension.
    Resume(Value),
}

/// Where a driven session stopped.
#[derive(Debug)]
pub(crate) enum Drive {
    /// The body ran to completion.
    Completed(Value),
    /// The body escaped; the journal snapshot covers every suspension
    /// before the escape.
    Escaped {
        /// How the body escaped.
        kind: EscapeKind,
        /// Recorded suspension outcomes up to the escape.
        journal: Vec<JournalEntry>,
    },
}

/// Drive `co` until it completes or escapes.
pub(crate) fn run(
    co: Coroutine,
    ctx: &EffectContext,
    mut journal: Vec<JournalEntry>,
) -> Result<Drive, EffectError> {
    let replay_len = journal.len();
    let mut cursor = 0;

    loop {
        let replaying = cursor < replay_len;
        let yielded = match co.next() {
            Ok(yielded) => yielded,
            Err(_) if replaying => {
                return Err(EffectError::ContinuationReuse(ReuseError::TornDown));
            }
            Err(err) => return Err(err),
        };

        if replaying {
            let value = match (&journal[cursor], &yielded) {
                (JournalEntry::Effect { key, value }, Yielded::Effect(effect))
                    if key == effect.key() =>
                {
                    value.clone()
                }
                (JournalEntry::Resume(value), Yielded::Escape(EscapeKind::WithContinuation(_))) => {
                    value.clone()
                }
                _ => return Err(EffectError::ContinuationReuse(ReuseError::Diverged)),
            };
            trace!(coroutine = co.id().as_u64(), cursor, "replaying suspension");
            if co.deliver(value).is_err() {
                return Err(EffectError::ContinuationReuse(ReuseError::TornDown));
            }
            cursor += 1;
        } else {
            match yielded {
                Yielded::Done(result) => return result.map(Drive::Completed),
                Yielded::Escape(kind) => {
                    trace!(coroutine = co.id().as_u64(), "body escaped");
                    return Ok(Drive::Escaped { kind, journal });
                }
                Yielded::Effect(effect) => {
                    // When this driver itself runs inside an enclosing
                    // suspending body, a locally unhandled effect is
                    // yielded outward so the enclosing scope resolves it.
                    // At the outermost driver it propagates out of the
                    // scope; the parked body is abandoned when `co` drops.
                    let key = effect.key().clone();
                    let value = match ctx.perform(&effect) {
                        Err(EffectError::Unhandled(_)) if coroutine::in_coroutine() => {
                            coroutine::yield_effect(effect)?
                        }
                        other => other?,
                    };
                    journal.push(JournalEntry::Effect {
                        key,
                        value: value.clone(),
                    });
                    co.deliver(value)?;
                }
            }
        }
    }
}
