//! Weak references across the bridge.
//!
//! A weak reference never keeps its referent alive. When a held token is
//! supplied, the referent is registered with the [`LivenessOracle`] and the
//! token is reported to the guest after collection. General values report
//! through `reportGarbageCollectedValue` only if the guest exports it; strings
//! report through `reportGarbageCollectedString` unconditionally.

use crate::{
    error::{BridgeError, BridgeResult},
    guest::GuestValue,
    liveness::{LivenessOracle, ReportChannel, WeakTarget},
    value::{HostObject, HostValue, ObjectKind, WeakIdentity},
};

/// Creates a weak reference to an object or symbol.
pub fn create_weak_ref(
    oracle: &LivenessOracle,
    value: &HostValue,
    held: Option<GuestValue>,
) -> BridgeResult<HostObject> {
    let Some((_, identity)) = WeakIdentity::of(value) else {
        return Err(BridgeError::InvalidWeakTarget(value.kind_name()));
    };
    let target = WeakTarget::Value(identity);
    if let Some(token) = held {
        oracle.register(target.clone(), token, ReportChannel::Value);
    }
    Ok(HostObject::from_kind(ObjectKind::WeakRef(target)))
}

/// Creates a weak reference to a host string.
pub fn create_string_weak_ref(
    oracle: &LivenessOracle,
    value: &HostValue,
    held: Option<GuestValue>,
) -> BridgeResult<HostObject> {
    let HostValue::String(string) = value else {
        return Err(BridgeError::InvalidWeakTarget(value.kind_name()));
    };
    let target = WeakTarget::string(string);
    if let Some(token) = held {
        oracle.register(target.clone(), token, ReportChannel::String);
    }
    Ok(HostObject::from_kind(ObjectKind::WeakRef(target)))
}

fn target_of(weak_ref: &HostValue) -> BridgeResult<&WeakTarget> {
    weak_ref
        .as_object()
        .and_then(HostObject::weak_target)
        .ok_or(BridgeError::TypeMismatch {
            expected: "weak reference",
            found: weak_ref.kind_name(),
        })
}

/// The referent, or `undefined` once it has been collected.
///
/// The answer is only as fresh as the moment it was taken; the referent may be
/// collected right after a successful deref once the caller drops it.
pub fn deref(weak_ref: &HostValue) -> BridgeResult<HostValue> {
    Ok(target_of(weak_ref)?.upgrade().unwrap_or(HostValue::Undefined))
}

/// [`deref`] for string weak references.
pub fn string_deref(weak_ref: &HostValue) -> BridgeResult<HostValue> {
    let target = target_of(weak_ref)?;
    if matches!(target, WeakTarget::Value(_)) {
        return Err(BridgeError::TypeMismatch {
            expected: "string weak reference",
            found: "weak reference",
        });
    }
    Ok(target.upgrade().unwrap_or(HostValue::Undefined))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn deref_follows_the_referent() {
        let oracle = LivenessOracle::new();
        let object = HostValue::Object(HostObject::new());
        let weak = HostValue::Object(create_weak_ref(&oracle, &object, None).unwrap());
        assert!(deref(&weak).unwrap().strict_equals(&object));
        assert_eq!(oracle.watched(), 0);

        drop(object);
        assert!(deref(&weak).unwrap().is_undefined());
    }

    #[test]
    fn primitives_cannot_be_weakly_referenced() {
        let oracle = LivenessOracle::new();
        let err = create_weak_ref(&oracle, &HostValue::Number(1.0), None).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidWeakTarget("number")));
        let err = create_string_weak_ref(&oracle, &HostValue::Null, None).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidWeakTarget("null")));
    }

    #[test]
    fn held_tokens_are_registered() {
        let oracle = LivenessOracle::new();
        let symbol = HostValue::symbol(Some("s"));
        let _weak = create_weak_ref(&oracle, &symbol, Some(GuestValue::I32(9))).unwrap();
        assert_eq!(oracle.watched(), 1);
        drop(symbol);
        let collected = oracle.poll();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].token.as_i32().unwrap(), 9);
    }

    #[test]
    fn string_weak_refs() {
        let oracle = LivenessOracle::new();
        let string = HostValue::String(Rc::from("hello"));
        let weak = HostValue::Object(create_string_weak_ref(&oracle, &string, Some(GuestValue::I32(1))).unwrap());
        assert_eq!(string_deref(&weak).unwrap().as_str(), Some("hello"));
        drop(string);
        assert!(string_deref(&weak).unwrap().is_undefined());
        assert_eq!(oracle.poll()[0].channel, ReportChannel::String);
    }

    #[test]
    fn deref_rejects_non_weak_values() {
        let err = deref(&HostValue::Object(HostObject::new())).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { expected: "weak reference", .. }));
    }
}
