//! Property-based tests for the effect runtime.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use effect_runtime::{capture, continuation, escape, perform, Continuation, Handler, Handlers, Value};
use proptest::prelude::*;

/// Build a nest of `depth` capture scopes, each handling "level" with its
/// own depth, and perform "level" at the innermost point.
fn innermost_level(depth: u32) -> i64 {
    fn nest(remaining: u32, depth: u32) -> Result<Value, effect_runtime::EffectError> {
        if remaining == 0 {
            return perform("level");
        }
        let level = (depth - remaining) as i64;
        capture(
            Handlers::new().on("level", Handler::nullary(move || Ok(Value::of(level)))),
            move || nest(remaining - 1, depth),
        )
    }
    nest(depth, depth).unwrap().extract::<i64>().unwrap()
}

proptest! {
    /// The innermost handler wins at any nesting depth.
    #[test]
    fn nearest_handler_wins_at_any_depth(depth in 1u32..32) {
        prop_assert_eq!(innermost_level(depth), (depth - 1) as i64);
    }

    /// Escape delivers an arbitrary payload unchanged through any number
    /// of intervening scopes.
    #[test]
    fn escape_payload_roundtrip(payload in any::<i64>(), depth in 0u32..16) {
        fn nest(remaining: u32, payload: i64) -> Result<Value, effect_runtime::EffectError> {
            if remaining == 0 {
                escape(payload);
            }
            capture(Handlers::new(), move || nest(remaining - 1, payload))
        }
        let out = capture(Handlers::new(), move || nest(depth, payload)).unwrap();
        // Inner scopes are transparent to their own bodies' results, so
        // the payload surfaces from whichever scope the escape targeted.
        prop_assert_eq!(out.extract::<i64>(), Some(payload));
    }

    /// Every invocation of a continuation is an independent replay: the
    /// results for a batch of resume values match the pure function the
    /// body computes, regardless of invocation order.
    #[test]
    fn multi_shot_resume_matches_pure_function(values in prop::collection::vec(any::<i32>(), 1..12)) {
        let out = continuation::capture(Handlers::new(), || {
            let n = continuation::escape(|k| Ok(Value::of(k)))?
                .extract::<i64>()
                .unwrap();
            Ok(Value::of(n.wrapping_mul(3).wrapping_add(1)))
        })
        .unwrap();
        let k = out.extract::<Continuation>().unwrap();

        for v in values {
            let v = v as i64;
            let got = k.resume(v).unwrap().extract::<i64>().unwrap();
            prop_assert_eq!(got, v.wrapping_mul(3).wrapping_add(1));
        }
    }

    /// A scope returns its body's value untouched when nothing escapes.
    #[test]
    fn transparent_scope_returns_body_value(n in any::<i64>()) {
        let out = capture(Handlers::new(), move || Ok(Value::of(n))).unwrap();
        prop_assert_eq!(out.extract::<i64>(), Some(n));
    }
}
