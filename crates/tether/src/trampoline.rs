//! Call adapters between the guest calling convention and host callables.
//!
//! Every call shape goes through one variadic path: the guest hands over an
//! ordered argument slice, however many arguments it has.

use crate::{
    dispatch::DispatchTable,
    error::{BridgeError, BridgeResult},
    value::{HostObject, HostValue},
};

fn callable(value: &HostValue) -> BridgeResult<&HostObject> {
    value
        .as_object()
        .ok_or_else(|| BridgeError::NotCallable(value.to_display_string()))
}

/// Calls `function` with `this` bound to `undefined`.
pub fn call_function(function: &HostValue, args: &[HostValue]) -> BridgeResult<HostValue> {
    callable(function)?.call(&HostValue::Undefined, args)
}

/// Constructs a new value with `constructor`.
pub fn construct(constructor: &HostValue, args: &[HostValue]) -> BridgeResult<HostValue> {
    let Some(constructor) = constructor.as_object() else {
        return Err(BridgeError::NotConstructible);
    };
    constructor.construct(args)
}

/// Calls `instance[method](...args)`.
///
/// A `null` instance resolves `method` in the dispatch table instead.
pub fn call_method(
    globals: &DispatchTable,
    instance: &HostValue,
    method: &str,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    let object = match instance {
        HostValue::Null => return globals.call(method, args),
        HostValue::Object(object) => object,
        other => return Err(BridgeError::NotAnObject(other.kind_name())),
    };
    let function = object.get(method)?;
    let Some(function) = function.as_object() else {
        return Err(BridgeError::NotCallable(method.to_owned()));
    };
    function.call(instance, args)
}

/// Extracts `instance[property]` as a callable bound to `instance`.
///
/// The callable is cached on the instance, so extracting the same property
/// twice yields the identical callable while the first one is alive. The
/// property is looked up when the callable runs, not when it is extracted.
pub fn as_function(instance: &HostValue, property: &str) -> BridgeResult<HostObject> {
    let Some(object) = instance.as_object() else {
        return Err(BridgeError::NotAnObject(instance.kind_name()));
    };
    if let Some(cached) = object.cached_method(property) {
        return Ok(cached);
    }
    let receiver = object.clone();
    let name = property.to_owned();
    let bound = HostObject::bound(object, property, move |_, args| {
        let this = HostValue::Object(receiver.clone());
        let function = receiver.get(&name)?;
        let Some(function) = function.as_object() else {
            return Err(BridgeError::NotCallable(name.clone()));
        };
        function.call(&this, args)
    });
    object.cache_method(property, &bound);
    Ok(bound)
}

/// Recovers an object exposing `function` under `property`.
///
/// A callable extracted by [`as_function`] hands back its origin instance,
/// as long as that instance still caches this exact callable under
/// `property`. Anything else gets a fresh `{ [property]: function }`.
pub fn function_as_object(function: &HostValue, property: &str) -> BridgeResult<HostObject> {
    let Some(callable) = function.as_object() else {
        return Err(BridgeError::NotCallable(function.to_display_string()));
    };
    if let Some(origin) = callable.origin()
        && origin.property() == property
        && let Some(instance) = origin.instance()
        && instance
            .cached_method(property)
            .is_some_and(|cached| cached.ptr_eq(callable))
    {
        return Ok(instance);
    }
    Ok(HostObject::with_properties([(property, function.clone())]))
}
