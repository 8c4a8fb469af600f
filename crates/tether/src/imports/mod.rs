//! The import object handed to the guest module at instantiation.
//!
//! Imports are grouped by module name. The bridge installs four modules by
//! default; embedders can add or replace entries through
//! [`BridgeOptions::install_imports`](crate::BridgeOptions::install_imports)
//! before the module is instantiated.

mod console;
mod date;
mod interop;
mod math;

use std::rc::Rc;

use indexmap::IndexMap;

pub use self::console::{CollectConsole, ConsoleShim, ConsoleSink, LogConsole, NoConsole, StdConsole, Stream, sink_for};
use crate::{
    context::BridgeContext,
    error::{BridgeError, BridgeResult},
    guest::GuestValue,
};

/// Console output and the clock.
pub const TEAVM_MODULE: &str = "teavm";
/// Epoch-millisecond date primitives.
pub const DATE_MODULE: &str = "teavmDate";
/// Host math library.
pub const MATH_MODULE: &str = "teavmMath";
/// Identity, weak reference and trampoline surface.
pub const INTEROP_MODULE: &str = "teavmJso";

/// A host function the guest imports. `None` means the import returns nothing.
pub type ImportFn = Rc<dyn Fn(&[GuestValue]) -> BridgeResult<Option<GuestValue>>>;

/// Module name -> import name -> function.
#[derive(Clone, Default)]
pub struct ImportObject {
    modules: IndexMap<String, IndexMap<String, ImportFn>>,
}

impl ImportObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `module.name`.
    pub fn define(
        &mut self,
        module: &str,
        name: &str,
        function: impl Fn(&[GuestValue]) -> BridgeResult<Option<GuestValue>> + 'static,
    ) {
        self.modules
            .entry(module.to_owned())
            .or_default()
            .insert(name.to_owned(), Rc::new(function));
    }

    #[must_use]
    pub fn get(&self, module: &str, name: &str) -> Option<&ImportFn> {
        self.modules.get(module)?.get(name)
    }

    #[must_use]
    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    /// Removes `module.name`, returning the previous function.
    pub fn remove(&mut self, module: &str, name: &str) -> Option<ImportFn> {
        self.modules.get_mut(module)?.shift_remove(name)
    }

    /// Looks up an import the way an instantiating module would.
    pub fn resolve(&self, module: &str, name: &str) -> BridgeResult<ImportFn> {
        self.get(module, name).cloned().ok_or_else(|| BridgeError::MissingImport {
            module: module.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Module names in definition order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Import names of one module in definition order.
    pub fn names(&self, module: &str) -> Vec<&str> {
        self.modules
            .get(module)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Installs the default modules, all bound to `context`.
pub fn install_defaults(imports: &mut ImportObject, context: &Rc<BridgeContext>) {
    install_teavm(imports, context);
    date::install(imports);
    math::install(imports);
    interop::install(imports, context);
}

fn install_teavm(imports: &mut ImportObject, context: &Rc<BridgeContext>) {
    for (name, stream) in [("putcharStdout", Stream::Stdout), ("putcharStderr", Stream::Stderr)] {
        let context = Rc::clone(context);
        imports.define(TEAVM_MODULE, name, move |args| {
            context.console().putchar(stream, arg(args, 0)?.as_i32()?);
            Ok(None)
        });
    }
    imports.define(TEAVM_MODULE, "currentTimeMillis", |_| {
        Ok(Some(GuestValue::F64(date::now())))
    });
}

/// The argument at `index`.
pub(crate) fn arg(args: &[GuestValue], index: usize) -> BridgeResult<&GuestValue> {
    args.get(index).ok_or(BridgeError::TypeMismatch {
        expected: "argument",
        found: "nothing",
    })
}

/// A numeric argument of any width.
pub(crate) fn number_arg(args: &[GuestValue], index: usize) -> BridgeResult<f64> {
    match arg(args, index)? {
        GuestValue::I32(v) => Ok(f64::from(*v)),
        GuestValue::I64(v) => Ok(*v as f64),
        other => other.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn define_replace_and_remove() {
        let mut imports = ImportObject::new();
        imports.define("env", "one", |_| Ok(Some(GuestValue::I32(1))));
        imports.define("env", "two", |_| Ok(None));
        imports.define("env", "one", |_| Ok(Some(GuestValue::I32(11))));
        assert_eq!(imports.names("env"), vec!["one", "two"]);

        let one = imports.resolve("env", "one").unwrap();
        assert_eq!(one(&[]).unwrap().unwrap().as_i32().unwrap(), 11);

        assert!(imports.remove("env", "two").is_some());
        assert!(!imports.contains("env", "two"));
        let err = imports.resolve("env", "two").err().unwrap();
        assert_eq!(err.to_string(), "missing import env.two");
    }

    #[test]
    fn numeric_arguments_accept_any_width() {
        let args = [GuestValue::I32(2), GuestValue::I64(3), GuestValue::F32(0.5), GuestValue::F64(1.5)];
        let values: Vec<f64> = (0..4).map(|i| number_arg(&args, i).unwrap()).collect();
        assert_eq!(values, vec![2.0, 3.0, 0.5, 1.5]);
        assert!(number_arg(&args, 4).is_err());
        assert!(number_arg(&[GuestValue::Ref(None)], 0).is_err());
    }
}
