//! Effect Descriptors
//!
//! An effect is a named request for externally supplied behavior. The
//! request names what it wants (its key), carries a payload, and may attach
//! a block the handler can call back into to delegate work to the perform
//! site.
//!
//! Keys come in two shapes:
//!
//! - **Named** — a plain identifier, the common case: `Effect::named("ask")`.
//! - **Categorical** — a Rust type stands in for a whole category; every
//!   instance of the type routes to the handler registered for the type:
//!   `Effect::of(OpenFile { path })`.

use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::EffectError;
use crate::value::Value;

/// The key under which handlers for an effect are registered and resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EffectKey {
    /// A plain identifier.
    Name(Cow<'static, str>),
    /// A category: all instances of one Rust type.
    Category {
        /// Type identity of the category.
        id: TypeId,
        /// Type path, kept for diagnostics.
        name: &'static str,
    },
}

impl EffectKey {
    /// Key for a named effect.
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        EffectKey::Name(name.into())
    }

    /// Key for a categorical effect.
    pub fn category<T: Any>() -> Self {
        EffectKey::Category {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectKey::Name(name) => write!(f, "{name}"),
            EffectKey::Category { name, .. } => write!(f, "{name}"),
        }
    }
}

impl From<&'static str> for EffectKey {
    fn from(name: &'static str) -> Self {
        EffectKey::Name(Cow::Borrowed(name))
    }
}

impl From<String> for EffectKey {
    fn from(name: String) -> Self {
        EffectKey::Name(Cow::Owned(name))
    }
}

/// A block attached to an effect, callable by its handler.
pub type EffectBlock = Arc<dyn Fn(&[Value]) -> Result<Value, EffectError> + Send + Sync>;

/// One performed effect: key, payload, and optional attached block.
#[derive(Clone)]
pub struct Effect {
    key: EffectKey,
    args: Vec<Value>,
    instance: Option<Value>,
    block: Option<EffectBlock>,
}

impl Effect {
    /// A named effect with no payload.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Effect {
            key: EffectKey::name(name),
            args: Vec::new(),
            instance: None,
            block: None,
        }
    }

    /// A categorical effect carrying `instance` as its tagged value.
    pub fn of<T: Any + Send + Sync>(instance: T) -> Self {
        Effect {
            key: EffectKey::category::<T>(),
            args: Vec::new(),
            instance: Some(Value::of(instance)),
            block: None,
        }
    }

    /// Append one payload argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Replace the payload arguments wholesale.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Attach a block the handler can call back into.
    pub fn with_block(
        mut self,
        block: impl Fn(&[Value]) -> Result<Value, EffectError> + Send + Sync + 'static,
    ) -> Self {
        self.block = Some(Arc::new(block));
        self
    }

    /// The resolution key.
    pub fn key(&self) -> &EffectKey {
        &self.key
    }

    /// The payload arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The tagged instance of a categorical effect.
    pub fn instance(&self) -> Option<&Value> {
        self.instance.as_ref()
    }

    /// The attached block, if any.
    pub fn block(&self) -> Option<&EffectBlock> {
        self.block.as_ref()
    }

    /// Call the attached block. Fails if the perform site attached none.
    pub fn call_block(&self, args: &[Value]) -> Result<Value, EffectError> {
        match &self.block {
            Some(block) => block(args),
            None => Err(EffectError::failure(format!(
                "effect `{}` has no attached block",
                self.key
            ))),
        }
    }
}

impl From<&'static str> for Effect {
    fn from(name: &'static str) -> Self {
        Effect::named(name)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("key", &self.key)
            .field("args", &self.args.len())
            .field("instance", &self.instance.is_some())
            .field("block", &self.block.is_some())
            .finish()
    }
}
