//! Primitive marshalling between host values and the guest calling convention.
//!
//! Strings are the only values with an explicit conversion in both
//! directions. Host strings are fed to a guest string builder one UTF-16 code
//! unit at a time; guest strings are read back through the `stringLength` /
//! `stringCharAt` exports. Numeric conversions are identity functions today
//! and exist so every crossing point has a name if the representation changes.

use std::rc::Rc;

use crate::{
    error::{BridgeError, BridgeResult},
    guest::{GuestHandle, GuestInstance, GuestValue},
    value::{HostString, HostValue},
};

/// Builds an immutable guest string from a host string.
pub fn host_string_to_guest(guest: &dyn GuestInstance, value: &str) -> BridgeResult<GuestHandle> {
    let builder = guest.create_string_builder()?;
    for unit in value.encode_utf16() {
        guest.append_char(builder, i32::from(unit))?;
    }
    guest.build_string(builder)
}

/// Reads a guest string back into a host string.
///
/// Lone surrogates are replaced, matching a lossy UTF-16 decode.
pub fn guest_string_to_host(guest: &dyn GuestInstance, string: GuestHandle) -> BridgeResult<HostString> {
    let length = guest.string_length(string)?;
    let mut units = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
    for index in 0..length {
        units.push(char_from_code(guest.string_char_at(string, index)?));
    }
    Ok(Rc::from(String::from_utf16_lossy(&units)))
}

/// Builds a guest `String[]` for entry-point arguments.
pub fn string_array_to_guest<S: AsRef<str>>(guest: &dyn GuestInstance, values: &[S]) -> BridgeResult<GuestHandle> {
    let length = i32::try_from(values.len()).map_err(|_| BridgeError::IndexOutOfBounds {
        index: i32::MAX,
        length: values.len(),
    })?;
    let array = guest.create_string_array(length)?;
    for (index, value) in (0..length).zip(values) {
        let string = host_string_to_guest(guest, value.as_ref())?;
        guest.set_to_string_array(array, index, string)?;
    }
    Ok(array)
}

/// Truncates a calling-convention integer to one UTF-16 code unit.
#[must_use]
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "masked to 16 bits")]
pub fn char_from_code(code: i32) -> u16 {
    (code & 0xFFFF) as u16
}

#[must_use]
pub fn bool_to_guest(value: bool) -> i32 {
    i32::from(value)
}

/// Any non-zero integer is `true`.
#[must_use]
pub fn guest_to_bool(value: i32) -> bool {
    value != 0
}

#[must_use]
pub const fn wrap_byte(value: i8) -> i8 {
    value
}

#[must_use]
pub const fn unwrap_byte(value: i8) -> i8 {
    value
}

#[must_use]
pub const fn wrap_short(value: i16) -> i16 {
    value
}

#[must_use]
pub const fn unwrap_short(value: i16) -> i16 {
    value
}

#[must_use]
pub const fn wrap_char(value: u16) -> u16 {
    value
}

#[must_use]
pub const fn unwrap_char(value: u16) -> u16 {
    value
}

#[must_use]
pub const fn wrap_int(value: i32) -> i32 {
    value
}

#[must_use]
pub const fn unwrap_int(value: i32) -> i32 {
    value
}

#[must_use]
pub const fn wrap_float(value: f32) -> f32 {
    value
}

#[must_use]
pub const fn unwrap_float(value: f32) -> f32 {
    value
}

#[must_use]
pub const fn wrap_double(value: f64) -> f64 {
    value
}

#[must_use]
pub const fn unwrap_double(value: f64) -> f64 {
    value
}

/// Converts a calling-convention value into the host value it denotes.
///
/// Numbers become host numbers, the null reference becomes `null`, and
/// extern values pass through. Guest object references need a wrapper class
/// to cross and are rejected here.
pub fn guest_to_host(value: &GuestValue) -> BridgeResult<HostValue> {
    match value {
        GuestValue::I32(v) => Ok(HostValue::Number(f64::from(unwrap_int(*v)))),
        GuestValue::I64(v) => Ok(HostValue::Number(*v as f64)),
        GuestValue::F32(v) => Ok(HostValue::Number(f64::from(unwrap_float(*v)))),
        GuestValue::F64(v) => Ok(HostValue::Number(unwrap_double(*v))),
        GuestValue::Ref(None) => Ok(HostValue::Null),
        GuestValue::Extern(value) => Ok(value.clone()),
        other => Err(BridgeError::TypeMismatch {
            expected: "host value",
            found: other.kind(),
        }),
    }
}
