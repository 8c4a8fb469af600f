//! Closed dispatch table for global-name resolution.
//!
//! `callMethod` with a null receiver resolves the method name as a global. The
//! set of resolvable globals is fixed when the bridge is built: the embedder
//! lists the host functions the guest may reach and picks which built-in
//! globals to expose. Nothing outside that list can be named.
//!
//! # Usage
//!
//! ```
//! use tether::{DispatchTable, HostObject, HostValue};
//!
//! let mut table = DispatchTable::with_builtins(["parseInt"]).unwrap();
//! table.bind("answer", HostValue::Object(HostObject::function("answer", |_, _| Ok(42.into()))));
//!
//! assert!(table.contains("parseInt"));
//! assert!(!table.contains("isNaN"));
//! let result = table.call("answer", &[]).unwrap();
//! assert_eq!(result.as_number(), Some(42.0));
//! ```

use std::str::FromStr;

use indexmap::IndexMap;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    error::{BridgeError, BridgeResult},
    value::{HostObject, HostValue},
};

/// Built-in host globals the table can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum BuiltinGlobal {
    #[strum(serialize = "parseInt")]
    ParseInt,
    #[strum(serialize = "parseFloat")]
    ParseFloat,
    #[strum(serialize = "isNaN")]
    IsNaN,
    #[strum(serialize = "isFinite")]
    IsFinite,
    String,
    Number,
}

impl BuiltinGlobal {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    fn into_function(self) -> HostObject {
        HostObject::function(self.name(), move |_, args| {
            let arg = args.first().cloned().unwrap_or(HostValue::Undefined);
            Ok(match self {
                Self::ParseInt => {
                    let radix = args.get(1).and_then(HostValue::as_number);
                    HostValue::Number(parse_int(&arg.to_display_string(), radix))
                }
                Self::ParseFloat => HostValue::Number(parse_float(&arg.to_display_string())),
                Self::IsNaN => HostValue::Bool(to_number(&arg).is_nan()),
                Self::IsFinite => HostValue::Bool(to_number(&arg).is_finite()),
                Self::String => HostValue::string(&arg.to_display_string()),
                Self::Number => HostValue::Number(if args.is_empty() { 0.0 } else { to_number(&arg) }),
            })
        })
    }
}

/// Host `ToNumber` for the primitive kinds.
#[must_use]
pub fn to_number(value: &HostValue) -> f64 {
    match value {
        HostValue::Undefined | HostValue::Symbol(_) | HostValue::Object(_) => f64::NAN,
        HostValue::Null => 0.0,
        HostValue::Bool(b) => f64::from(u8::from(*b)),
        HostValue::Number(n) => *n,
        HostValue::BigInt(b) => num_traits::ToPrimitive::to_f64(b.as_ref()).unwrap_or(f64::NAN),
        HostValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64)
            } else {
                match trimmed {
                    "Infinity" | "+Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ if trimmed.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
                    _ => trimmed.parse().unwrap_or(f64::NAN),
                }
            }
        }
    }
}

fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let text = text.trim_start();
    let (negative, mut digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let explicit = match radix {
        Some(r) if r.is_finite() && r.trunc() != 0.0 => {
            let r = r.trunc();
            if !(2.0..=36.0).contains(&r) {
                return f64::NAN;
            }
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "checked range")]
            let r = r as u32;
            Some(r)
        }
        _ => None,
    };
    let mut radix = explicit.unwrap_or(10);
    if matches!(explicit, None | Some(16))
        && let Some(rest) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        digits = rest;
        radix = 16;
    }
    let mut value = 0.0;
    let mut seen = false;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(radix) else { break };
        value = value * f64::from(radix) + f64::from(digit);
        seen = true;
    }
    if !seen {
        return f64::NAN;
    }
    if negative { -value } else { value }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if text.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    // longest prefix that parses as a decimal literal
    let end = text
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Globals reachable through a null-receiver `callMethod`.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    bindings: IndexMap<String, HostValue>,
}

impl DispatchTable {
    /// An empty table: every name is `NotFound`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table exposing the named built-in globals.
    ///
    /// Unknown built-in names are a configuration error.
    pub fn with_builtins<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> BridgeResult<Self> {
        let mut table = Self::new();
        for name in names {
            let name = name.as_ref();
            let builtin =
                BuiltinGlobal::from_str(name).map_err(|_| BridgeError::Config(format!("unknown global '{name}'")))?;
            table.bind(builtin.name(), HostValue::Object(builtin.into_function()));
        }
        Ok(table)
    }

    /// A table exposing every built-in global.
    #[must_use]
    pub fn all_builtins() -> Self {
        let mut table = Self::new();
        for builtin in BuiltinGlobal::iter() {
            table.bind(builtin.name(), HostValue::Object(builtin.into_function()));
        }
        table
    }

    /// Binds `name` to a host value. Later bindings replace earlier ones.
    pub fn bind(&mut self, name: impl Into<String>, value: HostValue) {
        self.bindings.insert(name.into(), value);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound names in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Resolves `name` to a callable.
    pub fn resolve(&self, name: &str) -> BridgeResult<&HostObject> {
        let value = self
            .bindings
            .get(name)
            .ok_or_else(|| BridgeError::NotFound(name.to_owned()))?;
        value
            .as_object()
            .filter(|object| object.is_callable())
            .ok_or_else(|| BridgeError::NotCallable(name.to_owned()))
    }

    /// Resolves and calls `name` with `this` bound to `undefined`.
    pub fn call(&self, name: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        let function = self.resolve(name)?.clone();
        tracing::trace!(global = name, argc = args.len(), "dispatching global call");
        function.call(&HostValue::Undefined, args)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn call(table: &DispatchTable, name: &str, args: &[HostValue]) -> HostValue {
        table.call(name, args).unwrap()
    }

    #[test]
    fn unknown_and_non_callable_names() {
        let mut table = DispatchTable::new();
        table.bind("answer", 42.into());
        assert!(matches!(table.call("missing", &[]), Err(BridgeError::NotFound(name)) if name == "missing"));
        assert!(matches!(table.call("answer", &[]), Err(BridgeError::NotCallable(name)) if name == "answer"));
    }

    #[test]
    fn builtins_respect_the_allow_list() {
        let table = DispatchTable::with_builtins(["isNaN", "String"]).unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["isNaN", "String"]);
        assert!(matches!(table.call("parseInt", &[]), Err(BridgeError::NotFound(_))));

        let err = DispatchTable::with_builtins(["eval"]).unwrap_err();
        assert!(matches!(err, BridgeError::Config(message) if message.contains("eval")));
    }

    #[test]
    fn parse_int_semantics() {
        let table = DispatchTable::all_builtins();
        assert_eq!(call(&table, "parseInt", &["  42px".into()]).as_number(), Some(42.0));
        assert_eq!(call(&table, "parseInt", &["-ff".into(), 16.into()]).as_number(), Some(-255.0));
        assert_eq!(call(&table, "parseInt", &["0x1A".into()]).as_number(), Some(26.0));
        assert!(call(&table, "parseInt", &["px".into()]).as_number().unwrap().is_nan());
        assert!(call(&table, "parseInt", &["1".into(), 40.into()]).as_number().unwrap().is_nan());
    }

    #[test]
    fn parse_float_and_number() {
        let table = DispatchTable::all_builtins();
        assert_eq!(call(&table, "parseFloat", &["3.5e1rest".into()]).as_number(), Some(35.0));
        assert_eq!(call(&table, "parseFloat", &["-Infinity".into()]).as_number(), Some(f64::NEG_INFINITY));
        assert_eq!(call(&table, "Number", &["  12 ".into()]).as_number(), Some(12.0));
        assert_eq!(call(&table, "Number", &["0x10".into()]).as_number(), Some(16.0));
        assert_eq!(call(&table, "Number", &[]).as_number(), Some(0.0));
        assert!(call(&table, "Number", &["abc".into()]).as_number().unwrap().is_nan());
    }

    #[test]
    fn predicates_and_string() {
        let table = DispatchTable::all_builtins();
        assert!(matches!(call(&table, "isNaN", &["x".into()]), HostValue::Bool(true)));
        assert!(matches!(call(&table, "isFinite", &["7".into()]), HostValue::Bool(true)));
        assert!(matches!(call(&table, "isFinite", &[HostValue::Undefined]), HostValue::Bool(false)));
        assert_eq!(call(&table, "String", &[1.5.into()]).as_str(), Some("1.5"));
        assert_eq!(call(&table, "String", &[HostValue::Null]).as_str(), Some("null"));
    }
}
