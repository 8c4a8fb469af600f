//! Host constructors synthesized for guest classes.
//!
//! A guest class gets one [`WrapperClass`] for the lifetime of the bridge.
//! Its host-visible value is a class constructor object; instances are created
//! only by the identity registry, each carrying the guest handle it proxies.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    error::{BridgeError, BridgeResult},
    guest::{GuestEntry, GuestHandle},
    value::{ArgVec, HostObject, HostValue, ObjectKind},
};

#[derive(Debug, Clone)]
pub(crate) struct Accessor {
    pub getter: GuestEntry,
    pub setter: Option<GuestEntry>,
}

/// Prototype table of a synthesized class.
pub struct WrapperClass {
    name: String,
    methods: RefCell<IndexMap<String, HostObject>>,
    accessors: RefCell<IndexMap<String, Accessor>>,
}

impl WrapperClass {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn method(&self, name: &str) -> Option<HostObject> {
        self.methods.borrow().get(name).cloned()
    }

    pub(crate) fn accessor(&self, name: &str) -> Option<Accessor> {
        self.accessors.borrow().get(name).cloned()
    }

    pub(crate) fn getter(&self, name: &str) -> Option<GuestEntry> {
        self.accessors.borrow().get(name).map(|a| a.getter.clone())
    }

    pub(crate) fn has_member(&self, name: &str) -> bool {
        self.methods.borrow().contains_key(name) || self.accessors.borrow().contains_key(name)
    }

    /// Method names in definition order.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        self.methods.borrow().keys().cloned().collect()
    }
}

/// Rewrites `name` into a valid identifier.
///
/// The first character must be an ASCII letter, `_` or `$`; later characters
/// may also be ASCII digits. Anything else becomes `_`. An empty name becomes
/// `_`.
#[must_use]
pub fn sanitize_class_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_owned();
    }
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_' || c == '$'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == '$'
            };
            if valid { c } else { '_' }
        })
        .collect()
}

/// Builds a fresh class constructor for a guest class.
#[must_use]
pub fn synthesize_class(name: &str) -> HostObject {
    let name = sanitize_class_name(name);
    tracing::debug!(class = %name, "synthesized wrapper class");
    HostObject::from_kind(ObjectKind::Class(Rc::new(WrapperClass {
        name,
        methods: RefCell::new(IndexMap::new()),
        accessors: RefCell::new(IndexMap::new()),
    })))
}

fn definition(class: &HostObject) -> BridgeResult<&Rc<WrapperClass>> {
    class.class_definition().ok_or(BridgeError::TypeMismatch {
        expected: "wrapper class",
        found: HostValue::Object(class.clone()).kind_name(),
    })
}

/// Installs a prototype method that forwards `(this, ...args)` to `entry`.
pub fn define_method(class: &HostObject, name: &str, entry: GuestEntry) -> BridgeResult<()> {
    let definition = definition(class)?;
    let method = HostObject::function(name, move |this, args| {
        let mut forwarded = ArgVec::with_capacity(args.len() + 1);
        forwarded.push(this.clone());
        forwarded.extend(args.iter().cloned());
        entry.invoke(&forwarded)
    });
    definition.methods.borrow_mut().insert(name.to_owned(), method);
    Ok(())
}

/// Installs an accessor. Without a setter the property is read-only on the
/// host side.
pub fn define_property(
    class: &HostObject,
    name: &str,
    getter: GuestEntry,
    setter: Option<GuestEntry>,
) -> BridgeResult<()> {
    let definition = definition(class)?;
    definition
        .accessors
        .borrow_mut()
        .insert(name.to_owned(), Accessor { getter, setter });
    Ok(())
}

/// Creates the host wrapper instance for `handle`.
pub(crate) fn instantiate(class: &Rc<WrapperClass>, handle: GuestHandle) -> HostObject {
    HostObject::from_kind(ObjectKind::Wrapper {
        class: Rc::clone(class),
        handle,
    })
}
