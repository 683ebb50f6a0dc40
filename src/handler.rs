//! Handler Tables
//!
//! A handler supplies the meaning of one effect. Handlers are registered
//! in a [`HandlerTable`] under an [`EffectKey`], with at most one wildcard
//! entry matched only when nothing more specific does.
//!
//! ## Calling convention
//!
//! Registration fixes the shape a handler is invoked with, mirroring the
//! arity-sensitive convention of dynamically typed effect systems:
//!
//! - [`Handler::nullary`] — invoked with nothing; the payload is ignored.
//! - [`Handler::descriptor`] — invoked with the [`Effect`] descriptor
//!   itself (key, payload, tagged instance, attached block).
//! - [`Handler::payload`] — invoked with the payload arguments.
//!
//! This lets call sites and handlers disagree slightly on shape without
//! failing: a zero-argument handler can satisfy a payload-carrying
//! `perform`, and a descriptor handler can inspect whatever arrived.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::effect::{Effect, EffectKey};
use crate::error::EffectError;
use crate::value::Value;

type NullaryFn = dyn Fn() -> Result<Value, EffectError> + Send + Sync;
type DescriptorFn = dyn Fn(&Effect) -> Result<Value, EffectError> + Send + Sync;
type PayloadFn = dyn Fn(&[Value]) -> Result<Value, EffectError> + Send + Sync;

/// The function chosen to satisfy a given effect.
#[derive(Clone)]
pub enum Handler {
    /// Ignores the payload entirely.
    Nullary(Arc<NullaryFn>),
    /// Receives the effect descriptor itself.
    Descriptor(Arc<DescriptorFn>),
    /// Receives the payload arguments.
    Payload(Arc<PayloadFn>),
}

impl Handler {
    /// A handler that takes no input.
    pub fn nullary(f: impl Fn() -> Result<Value, EffectError> + Send + Sync + 'static) -> Self {
        Handler::Nullary(Arc::new(f))
    }

    /// A handler that receives the effect descriptor.
    pub fn descriptor(
        f: impl Fn(&Effect) -> Result<Value, EffectError> + Send + Sync + 'static,
    ) -> Self {
        Handler::Descriptor(Arc::new(f))
    }

    /// A handler that receives the payload arguments.
    pub fn payload(
        f: impl Fn(&[Value]) -> Result<Value, EffectError> + Send + Sync + 'static,
    ) -> Self {
        Handler::Payload(Arc::new(f))
    }

    /// Invoke per the calling convention fixed at registration.
    pub fn call(&self, effect: &Effect) -> Result<Value, EffectError> {
        match self {
            Handler::Nullary(f) => f(),
            Handler::Descriptor(f) => f(effect),
            Handler::Payload(f) => f(effect.args()),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::Nullary(_) => "Nullary",
            Handler::Descriptor(_) => "Descriptor",
            Handler::Payload(_) => "Payload",
        };
        f.debug_tuple("Handler").field(&kind).finish()
    }
}

/// Mapping from effect key to handler, plus an optional wildcard.
#[derive(Clone, Default)]
pub struct HandlerTable {
    entries: HashMap<EffectKey, Handler>,
    wildcard: Option<Handler>,
}

impl HandlerTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a key. Last write wins on duplicates.
    pub fn register(&mut self, key: impl Into<EffectKey>, handler: Handler) {
        self.entries.insert(key.into(), handler);
    }

    /// Register the fallback handler.
    pub fn register_wildcard(&mut self, handler: Handler) {
        self.wildcard = Some(handler);
    }

    /// Local lookup only: exact key (which for a categorical effect is its
    /// category), then wildcard. Never consults an enclosing table.
    pub fn resolve(&self, key: &EffectKey) -> Option<&Handler> {
        self.entries.get(key).or(self.wildcard.as_ref())
    }

    /// Fold another table's entries into this one. Incoming entries win on
    /// duplicate keys; an incoming wildcard replaces the existing one.
    pub fn merge(&mut self, other: HandlerTable) {
        self.entries.extend(other.entries);
        if other.wildcard.is_some() {
            self.wildcard = other.wildcard;
        }
    }

    /// Number of keyed entries (the wildcard is not counted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries and no wildcard.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.wildcard.is_none()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("entries", &self.entries.len())
            .field("wildcard", &self.wildcard.is_some())
            .finish()
    }
}

/// Fluent builder for a handler set, consumed by `capture`.
///
/// ```rust,ignore
/// let handlers = Handlers::new()
///     .on("get", Handler::nullary(|| Ok(Value::of(1_i64))))
///     .on_category::<OpenFile>(Handler::descriptor(|e| { /* ... */ }))
///     .wildcard(Handler::descriptor(|e| Err(EffectError::failure(e.key()))));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Handlers {
    table: HandlerTable,
}

impl Handlers {
    /// An empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a key.
    pub fn on(mut self, key: impl Into<EffectKey>, handler: Handler) -> Self {
        self.table.register(key, handler);
        self
    }

    /// Register a handler for every instance of `T`.
    pub fn on_category<T: Any>(mut self, handler: Handler) -> Self {
        self.table.register(EffectKey::category::<T>(), handler);
        self
    }

    /// Register handlers from an iterator of pairs.
    pub fn on_all(mut self, entries: impl IntoIterator<Item = (EffectKey, Handler)>) -> Self {
        for (key, handler) in entries {
            self.table.register(key, handler);
        }
        self
    }

    /// Register the fallback handler.
    pub fn wildcard(mut self, handler: Handler) -> Self {
        self.table.register_wildcard(handler);
        self
    }

    /// Fold another handler set into this one.
    pub fn merge(mut self, other: Handlers) -> Self {
        self.table.merge(other.table);
        self
    }

    /// Finish building.
    pub fn into_table(self) -> HandlerTable {
        self.table
    }

    /// Run `body` in a capture scope with this handler set active.
    ///
    /// Sugar for [`crate::capture`] with `self` as the handler set.
    pub fn capture<F>(self, body: F) -> Result<Value, EffectError>
    where
        F: FnOnce() -> Result<Value, EffectError>,
    {
        crate::scope::capture(self, body)
    }
}

impl From<Handlers> for HandlerTable {
    fn from(handlers: Handlers) -> Self {
        handlers.into_table()
    }
}
