//! Effect Contexts and the Per-Thread Context Stack
//!
//! An [`EffectContext`] is one node of the dynamically scoped handler
//! chain: its own handler table plus a reference to the enclosing context.
//! Contexts are immutable once built; entering a capture scope creates one
//! and pushes it onto the current thread's context stack, leaving pops it.
//!
//! ## Resolution
//!
//! Resolution is nearest-enclosing-first: a context consults its own table
//! (exact key, category, wildcard — in that order) before delegating to
//! its parent. Two `perform` calls from the same body resolve in program
//! order; there is no concurrency within one execution unit.
//!
//! Each thread owns exactly one private stack. Nothing here is shared
//! across threads, so nothing here takes a lock.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::trace;

use crate::coroutine;
use crate::effect::Effect;
use crate::error::EffectError;
use crate::handler::{Handler, HandlerTable};
use crate::value::Value;

/// One node of the dynamically scoped handler chain.
#[derive(Debug)]
pub struct EffectContext {
    table: HandlerTable,
    parent: Option<Arc<EffectContext>>,
}

impl EffectContext {
    /// Build a context over `table`, enclosed by `parent`.
    pub fn new(table: HandlerTable, parent: Option<Arc<EffectContext>>) -> Self {
        EffectContext { table, parent }
    }

    /// The enclosing context, if any.
    pub fn parent(&self) -> Option<&Arc<EffectContext>> {
        self.parent.as_ref()
    }

    /// Local lookup only; never consults the parent.
    pub fn resolve(&self, key: &crate::effect::EffectKey) -> Option<&Handler> {
        self.table.resolve(key)
    }

    /// Resolve and invoke a handler for `effect`, walking the chain
    /// outward from this context. This is the primary, explicit-context
    /// form of `perform`; the ambient [`perform`] free function is sugar
    /// over it.
    pub fn perform(&self, effect: &Effect) -> Result<Value, EffectError> {
        let mut ctx = self;
        loop {
            if let Some(handler) = ctx.table.resolve(effect.key()) {
                trace!(key = %effect.key(), "dispatching effect");
                return handler.call(effect);
            }
            match &ctx.parent {
                Some(parent) => ctx = parent,
                None => {
                    trace!(key = %effect.key(), "effect unhandled at chain root");
                    return Err(EffectError::Unhandled(effect.key().clone()));
                }
            }
        }
    }
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<EffectContext>>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard pairing a context push with its pop. The pop happens on
/// every exit path, including escapes and propagating failures.
pub(crate) struct ContextGuard {
    _private: (),
}

impl ContextGuard {
    pub(crate) fn push(ctx: Arc<EffectContext>) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(ctx));
        ContextGuard { _private: () }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pub(crate) fn current_context_opt() -> Option<Arc<EffectContext>> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

#[cfg(test)]
pub(crate) fn context_stack_depth() -> usize {
    CONTEXT_STACK.with(|stack| stack.borrow().len())
}

/// The currently active context for this thread.
///
/// Fails with [`EffectError::ContextMissing`] when no capture scope is
/// active. The returned handle can be held across scope exits; it stays
/// valid for explicit [`EffectContext::perform`] calls.
pub fn current_context() -> Result<Arc<EffectContext>, EffectError> {
    current_context_opt().ok_or(EffectError::ContextMissing)
}

/// Perform an effect against the ambient context chain.
///
/// Resolution tries the current thread's context stack first. Inside a
/// suspending capture body, an effect that no local context handles is
/// yielded outward to the scope's driver instead of failing. With no
/// active scope at all this fails with [`EffectError::ContextMissing`].
pub fn perform(effect: impl Into<Effect>) -> Result<Value, EffectError> {
    let effect = effect.into();
    match current_context_opt() {
        Some(ctx) => match ctx.perform(&effect) {
            Err(EffectError::Unhandled(_)) if coroutine::in_coroutine() => {
                coroutine::yield_effect(effect)
            }
            other => other,
        },
        None if coroutine::in_coroutine() => coroutine::yield_effect(effect),
        None => Err(EffectError::ContextMissing),
    }
}
