//! Dynamically Typed Payload Values
//!
//! Effects carry payloads whose types are chosen by the call site, not by
//! the runtime. `Value` wraps any `Send + Sync` value behind a shared,
//! cheaply clonable handle so the same payload can be delivered to a
//! handler, recorded in a replay journal, and observed again by every
//! invocation of a captured continuation.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// A shared, dynamically typed value.
///
/// Cloning a `Value` is an `Arc` clone; the underlying payload is never
/// copied. Use [`Value::downcast_ref`] to view the payload and
/// [`Value::extract`] to clone it back out.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Wrap a payload value.
    pub fn of<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// The unit value, used when an effect or handler has nothing to say.
    pub fn unit() -> Self {
        Self::of(())
    }

    /// Check whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrow the payload as a `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clone the payload back out as a `T`.
    pub fn extract<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// The type name the payload was wrapped with.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.type_name).finish()
    }
}

macro_rules! value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::of(v)
                }
            }
        )*
    };
}

value_from!(i32, i64, u32, u64, usize, f64, bool, String);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::of(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let v = Value::of(42_i64);
        assert!(v.is::<i64>());
        assert_eq!(v.downcast_ref::<i64>(), Some(&42));
        assert_eq!(v.extract::<i64>(), Some(42));
        assert!(v.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_value_clone_shares_payload() {
        let v = Value::of(vec![1, 2, 3]);
        let w = v.clone();
        assert_eq!(w.extract::<Vec<i32>>(), Some(vec![1, 2, 3]));
        // Both handles still observe the same payload.
        assert_eq!(v.extract::<Vec<i32>>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_value_type_name() {
        let v = Value::of(1.5_f64);
        assert_eq!(v.type_name(), "f64");
    }

    #[test]
    fn test_value_from_impls() {
        let v: Value = "hello".into();
        assert_eq!(v.extract::<String>(), Some("hello".to_string()));
        let n: Value = 7_i64.into();
        assert_eq!(n.extract::<i64>(), Some(7));
    }

    #[test]
    fn test_unit_value() {
        let v = Value::unit();
        assert!(v.is::<()>());
    }
}
