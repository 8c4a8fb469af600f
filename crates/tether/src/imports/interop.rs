//! `teavmJso`: the identity, weak reference and trampoline surface.
//!
//! Host values cross as externrefs, guest objects as refs. Names (class,
//! method and property names) arrive as guest strings and are read back with
//! the reverse string marshal; host strings passed as externrefs are accepted
//! too. Trailing arguments of the call imports are the variadic argument list.

use std::rc::Rc;

use super::{INTEROP_MODULE, ImportObject, arg};
use crate::{
    context::BridgeContext,
    error::{BridgeError, BridgeResult},
    guest::{GuestEntry, GuestValue},
    marshal,
    value::{ArgVec, HostObject, HostString, HostValue},
};

fn host(value: HostValue) -> Option<GuestValue> {
    Some(GuestValue::Extern(value))
}

fn object(value: impl Into<HostValue>) -> Option<GuestValue> {
    host(value.into())
}

/// A name argument: a guest string, or a host string passed through.
fn name_arg(context: &BridgeContext, args: &[GuestValue], index: usize) -> BridgeResult<HostString> {
    match arg(args, index)? {
        GuestValue::Ref(Some(string)) => marshal::guest_string_to_host(&*context.guest()?, *string),
        GuestValue::Extern(HostValue::String(string)) => Ok(Rc::clone(string)),
        other => Err(BridgeError::TypeMismatch {
            expected: "string",
            found: other.kind(),
        }),
    }
}

fn extern_arg(args: &[GuestValue], index: usize) -> BridgeResult<&HostValue> {
    arg(args, index)?.as_extern()
}

/// Host values of `args[from..]`.
fn rest(args: &[GuestValue], from: usize) -> BridgeResult<ArgVec> {
    args.iter().skip(from).map(marshal::guest_to_host).collect()
}

/// A held token; the null reference means "none".
fn held_arg(args: &[GuestValue], index: usize) -> Option<GuestValue> {
    match args.get(index) {
        None | Some(GuestValue::Ref(None)) => None,
        Some(token) => Some(token.clone()),
    }
}

fn class_arg(args: &[GuestValue], index: usize) -> BridgeResult<&HostObject> {
    let value = extern_arg(args, index)?;
    value.as_object().ok_or(BridgeError::TypeMismatch {
        expected: "wrapper class",
        found: value.kind_name(),
    })
}

fn entry_arg(args: &[GuestValue], index: usize) -> BridgeResult<GuestEntry> {
    arg(args, index)?.as_entry().cloned()
}

pub(super) fn install(imports: &mut ImportObject, context: &Rc<BridgeContext>) {
    let mut define = |name: &str, f: fn(&BridgeContext, &[GuestValue]) -> BridgeResult<Option<GuestValue>>| {
        let context = Rc::clone(context);
        imports.define(INTEROP_MODULE, name, move |args| f(&context, args));
    };

    define("wrap", |cx, args| {
        let handle = cx.wrap(&marshal::guest_to_host(arg(args, 0)?)?)?;
        Ok(Some(GuestValue::Ref(handle)))
    });
    define("unwrap", |cx, args| {
        let handle = arg(args, 0)?.as_handle()?;
        Ok(host(cx.unwrap(handle, class_arg(args, 1)?)?))
    });
    define("synthesizeClass", |cx, args| {
        let name = name_arg(cx, args, 0)?;
        Ok(object(cx.synthesize_class(&name)))
    });
    define("defineMethod", |cx, args| {
        let name = name_arg(cx, args, 1)?;
        cx.define_method(class_arg(args, 0)?, &name, entry_arg(args, 2)?)?;
        Ok(None)
    });
    define("defineProperty", |cx, args| {
        let name = name_arg(cx, args, 1)?;
        let setter = match args.get(3) {
            None | Some(GuestValue::Ref(None)) => None,
            Some(setter) => Some(setter.as_entry()?.clone()),
        };
        cx.define_property(class_arg(args, 0)?, &name, entry_arg(args, 2)?, setter)?;
        Ok(None)
    });
    define("hashCode", |cx, args| {
        let value = marshal::guest_to_host(arg(args, 0)?)?;
        Ok(Some(GuestValue::I32(cx.hash_code(&value))))
    });
    define("createWeakRef", |cx, args| {
        Ok(object(cx.create_weak_ref(extern_arg(args, 0)?, held_arg(args, 1))?))
    });
    define("deref", |cx, args| Ok(host(cx.deref(extern_arg(args, 0)?)?)));
    define("createStringWeakRef", |cx, args| {
        Ok(object(cx.create_string_weak_ref(extern_arg(args, 0)?, held_arg(args, 1))?))
    });
    define("stringDeref", |cx, args| Ok(host(cx.string_deref(extern_arg(args, 0)?)?)));
    define("callFunction", |cx, args| {
        Ok(host(cx.call_function(extern_arg(args, 0)?, &rest(args, 1)?)?))
    });
    define("construct", |cx, args| {
        Ok(host(cx.construct(extern_arg(args, 0)?, &rest(args, 1)?)?))
    });
    define("callMethod", |cx, args| {
        let instance = marshal::guest_to_host(arg(args, 0)?)?;
        let method = name_arg(cx, args, 1)?;
        Ok(host(cx.call_method(&instance, &method, &rest(args, 2)?)?))
    });
    define("asFunction", |cx, args| {
        let property = name_arg(cx, args, 1)?;
        Ok(object(cx.as_function(extern_arg(args, 0)?, &property)?))
    });
    define("functionAsObject", |cx, args| {
        let property = name_arg(cx, args, 1)?;
        Ok(object(cx.function_as_object(extern_arg(args, 0)?, &property)?))
    });
    define("getProperty", |cx, args| {
        let target = extern_arg(args, 0)?;
        let Some(target) = target.as_object() else {
            return Err(BridgeError::NotAnObject(target.kind_name()));
        };
        Ok(host(target.get(&name_arg(cx, args, 1)?)?))
    });
    define("setProperty", |cx, args| {
        let target = extern_arg(args, 0)?;
        let Some(target) = target.as_object() else {
            return Err(BridgeError::NotAnObject(target.kind_name()));
        };
        let value = marshal::guest_to_host(arg(args, 2)?)?;
        target.set(&name_arg(cx, args, 1)?, value)?;
        Ok(None)
    });
    define("createObject", |_, _| Ok(object(HostObject::new())));
    define("typeOf", |cx, args| {
        let tag: &'static str = extern_arg(args, 0)?.type_of().into();
        let string = marshal::host_string_to_guest(&*cx.guest()?, tag)?;
        Ok(Some(GuestValue::Ref(Some(string))))
    });
}
