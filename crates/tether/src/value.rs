//! Host-domain value model.
//!
//! The host is a dynamic environment: values are either primitives or
//! reference-counted objects. "Collection" on the host side is the last strong
//! `Rc` going away; weak links observe that through `Weak` and never keep a
//! value alive.
//!
//! Objects come in a few kinds. Plain objects and native functions are what
//! embedders create; wrapper classes and wrapper instances are synthesized by
//! the bridge for guest classes and guest objects; weak references are created
//! by the weak reference bridge.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::{
    class::WrapperClass,
    error::{BridgeError, BridgeResult},
    guest::GuestHandle,
    liveness::WeakTarget,
};

/// Host strings keep `Rc` identity so string weak references have a referent.
pub type HostString = Rc<str>;

/// Native host callable: receives `this` and the positional arguments.
pub type NativeFn = dyn Fn(&HostValue, &[HostValue]) -> BridgeResult<HostValue>;

/// Native host constructor: receives the positional arguments.
pub type NativeCtor = dyn Fn(&[HostValue]) -> BridgeResult<HostValue>;

/// Argument lists built while forwarding calls.
pub(crate) type ArgVec = SmallVec<[HostValue; 8]>;

/// Result of the host `typeof` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TypeTag {
    Undefined,
    Object,
    Boolean,
    Number,
    Bigint,
    String,
    Symbol,
    Function,
}

/// A unique host symbol. Identity is the allocation, not the description.
#[derive(Debug)]
pub struct Symbol {
    description: Option<String>,
}

impl Symbol {
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// A value living in the host domain.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(Rc<BigInt>),
    String(HostString),
    Symbol(Rc<Symbol>),
    Object(HostObject),
}

impl HostValue {
    /// Creates a host string value.
    #[must_use]
    pub fn string(value: &str) -> Self {
        Self::String(Rc::from(value))
    }

    /// Creates a fresh symbol, distinct from every other symbol.
    #[must_use]
    pub fn symbol(description: Option<&str>) -> Self {
        Self::Symbol(Rc::new(Symbol {
            description: description.map(str::to_owned),
        }))
    }

    /// Creates a big integer value.
    #[must_use]
    pub fn bigint(value: impl Into<BigInt>) -> Self {
        Self::BigInt(Rc::new(value.into()))
    }

    /// The host `typeof` of this value. `null` reports `object`.
    #[must_use]
    pub fn type_of(&self) -> TypeTag {
        match self {
            Self::Undefined => TypeTag::Undefined,
            Self::Null => TypeTag::Object,
            Self::Bool(_) => TypeTag::Boolean,
            Self::Number(_) => TypeTag::Number,
            Self::BigInt(_) => TypeTag::Bigint,
            Self::String(_) => TypeTag::String,
            Self::Symbol(_) => TypeTag::Symbol,
            Self::Object(object) if object.is_callable() || object.is_class() => TypeTag::Function,
            Self::Object(_) => TypeTag::Object,
        }
    }

    /// Name used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            other => other.type_of().into(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// True for objects and symbols: the values that can be weakly referenced
    /// and carry a stable identity.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Symbol(_))
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Strict equality: objects and symbols compare by identity, strings by
    /// content, numbers numerically (so `NaN` is never equal to itself).
    #[must_use]
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Converts the value to the string the host would print for it.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::BigInt(b) => b.to_string(),
            Self::String(s) => s.to_string(),
            Self::Symbol(sym) => format!("Symbol({})", sym.description().unwrap_or_default()),
            Self::Object(object) => object.to_display_string(),
        }
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else {
        n.to_string()
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(object) => write!(f, "{object:?}"),
            other => f.write_str(&other.to_display_string()),
        }
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        Self::Object(value)
    }
}

/// Records which instance a bound callable was extracted from.
///
/// Lives inside the callable, so it is dropped together with it.
#[derive(Debug, Clone)]
pub struct FunctionOrigin {
    instance: Weak<ObjectCell>,
    property: String,
}

impl FunctionOrigin {
    /// The origin instance, if it is still alive.
    #[must_use]
    pub fn instance(&self) -> Option<HostObject> {
        self.instance.upgrade().map(HostObject)
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }
}

pub(crate) struct Callable {
    name: String,
    call: Rc<NativeFn>,
    construct: Option<Rc<NativeCtor>>,
    origin: Option<FunctionOrigin>,
}

pub(crate) enum ObjectKind {
    Plain,
    Function(Callable),
    /// Constructor value of a synthesized wrapper class.
    Class(Rc<WrapperClass>),
    /// Host proxy of one guest object; the handle is the hidden slot.
    Wrapper { class: Rc<WrapperClass>, handle: GuestHandle },
    WeakRef(WeakTarget),
}

/// Shared storage behind a [`HostObject`].
pub struct ObjectCell {
    kind: ObjectKind,
    properties: RefCell<IndexMap<String, HostValue>>,
    /// Bound callables extracted from this instance, keyed by property.
    method_cache: RefCell<AHashMap<String, Weak<ObjectCell>>>,
}

/// A reference to a host object. Cloning shares the same object.
#[derive(Clone)]
pub struct HostObject(Rc<ObjectCell>);

impl Default for HostObject {
    fn default() -> Self {
        Self::new()
    }
}

impl HostObject {
    /// Creates an empty plain object.
    #[must_use]
    pub fn new() -> Self {
        Self::from_kind(ObjectKind::Plain)
    }

    /// Creates a plain object with the given own properties.
    #[must_use]
    pub fn with_properties<K: Into<String>>(properties: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        let object = Self::new();
        object
            .0
            .properties
            .borrow_mut()
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        object
    }

    /// Creates a native function.
    pub fn function(
        name: impl Into<String>,
        call: impl Fn(&HostValue, &[HostValue]) -> BridgeResult<HostValue> + 'static,
    ) -> Self {
        Self::from_kind(ObjectKind::Function(Callable {
            name: name.into(),
            call: Rc::new(call),
            construct: None,
            origin: None,
        }))
    }

    /// Creates a native function that can also be used with `construct`.
    pub fn constructor(
        name: impl Into<String>,
        call: impl Fn(&HostValue, &[HostValue]) -> BridgeResult<HostValue> + 'static,
        construct: impl Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static,
    ) -> Self {
        Self::from_kind(ObjectKind::Function(Callable {
            name: name.into(),
            call: Rc::new(call),
            construct: Some(Rc::new(construct)),
            origin: None,
        }))
    }

    /// Creates a function tagged with the instance and property it was bound from.
    pub(crate) fn bound(
        instance: &Self,
        property: &str,
        call: impl Fn(&HostValue, &[HostValue]) -> BridgeResult<HostValue> + 'static,
    ) -> Self {
        Self::from_kind(ObjectKind::Function(Callable {
            name: format!("bound {property}"),
            call: Rc::new(call),
            construct: None,
            origin: Some(FunctionOrigin {
                instance: instance.downgrade(),
                property: property.to_owned(),
            }),
        }))
    }

    pub(crate) fn from_kind(kind: ObjectKind) -> Self {
        Self(Rc::new(ObjectCell {
            kind,
            properties: RefCell::new(IndexMap::new()),
            method_cache: RefCell::new(AHashMap::new()),
        }))
    }

    /// Reference identity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity key. Unique for as long as a strong or weak
    /// reference to the object exists.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0).addr()
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectCell> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<ObjectCell>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Function(_))
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Class(_))
    }

    /// Function or class name, if this object has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.0.kind {
            ObjectKind::Function(callable) => Some(&callable.name),
            ObjectKind::Class(class) => Some(class.name()),
            _ => None,
        }
    }

    /// The guest handle embedded in a wrapper instance.
    #[must_use]
    pub fn guest_handle(&self) -> Option<GuestHandle> {
        match &self.0.kind {
            ObjectKind::Wrapper { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// The class definition behind a wrapper class constructor.
    pub(crate) fn class_definition(&self) -> Option<&Rc<WrapperClass>> {
        match &self.0.kind {
            ObjectKind::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Origin of a bound callable produced by `as_function`.
    #[must_use]
    pub fn origin(&self) -> Option<&FunctionOrigin> {
        match &self.0.kind {
            ObjectKind::Function(callable) => callable.origin.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn weak_target(&self) -> Option<&WeakTarget> {
        match &self.0.kind {
            ObjectKind::WeakRef(target) => Some(target),
            _ => None,
        }
    }

    /// Reads an own property without consulting the class.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<HostValue> {
        self.0.properties.borrow().get(name).cloned()
    }

    /// Reads a property.
    ///
    /// Own properties win; wrapper instances then consult their class
    /// accessors (the getter runs with `this` bound to the instance) and class
    /// methods. Anything else reads as `undefined`.
    pub fn get(&self, name: &str) -> BridgeResult<HostValue> {
        if let Some(value) = self.get_own(name) {
            return Ok(value);
        }
        if let ObjectKind::Wrapper { class, .. } = &self.0.kind {
            if let Some(getter) = class.getter(name) {
                return getter.invoke(&[HostValue::Object(self.clone())]);
            }
            if let Some(method) = class.method(name) {
                return Ok(HostValue::Object(method));
            }
        }
        Ok(HostValue::Undefined)
    }

    /// Writes a property. Accessors without a setter are read-only.
    pub fn set(&self, name: &str, value: HostValue) -> BridgeResult<()> {
        if let ObjectKind::Wrapper { class, .. } = &self.0.kind
            && let Some(accessor) = class.accessor(name)
        {
            let Some(setter) = accessor.setter else {
                return Err(BridgeError::ReadOnlyProperty(name.to_owned()));
            };
            setter.invoke(&[HostValue::Object(self.clone()), value])?;
            return Ok(());
        }
        self.0.properties.borrow_mut().insert(name.to_owned(), value);
        Ok(())
    }

    /// True if the object has an own property or a class member named `name`.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        if self.0.properties.borrow().contains_key(name) {
            return true;
        }
        match &self.0.kind {
            ObjectKind::Wrapper { class, .. } => class.has_member(name),
            _ => false,
        }
    }

    /// Own property names in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.properties.borrow().keys().cloned().collect()
    }

    /// Invokes the object as a function.
    pub fn call(&self, this: &HostValue, args: &[HostValue]) -> BridgeResult<HostValue> {
        match &self.0.kind {
            ObjectKind::Function(callable) => {
                let call = Rc::clone(&callable.call);
                call(this, args)
            }
            ObjectKind::Class(class) => Err(BridgeError::NotCallable(class.name().to_owned())),
            _ => Err(BridgeError::NotCallable(self.to_display_string())),
        }
    }

    /// Invokes the object as a constructor.
    pub fn construct(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        match &self.0.kind {
            ObjectKind::Function(Callable {
                construct: Some(construct),
                ..
            }) => {
                let construct = Rc::clone(construct);
                construct(args)
            }
            _ => Err(BridgeError::NotConstructible),
        }
    }

    /// A live bound callable previously cached under `property`.
    pub(crate) fn cached_method(&self, property: &str) -> Option<Self> {
        self.0.method_cache.borrow().get(property).and_then(Self::upgrade)
    }

    pub(crate) fn cache_method(&self, property: &str, callable: &Self) {
        self.0
            .method_cache
            .borrow_mut()
            .insert(property.to_owned(), callable.downgrade());
    }

    fn to_display_string(&self) -> String {
        match &self.0.kind {
            ObjectKind::Plain => "[object Object]".to_owned(),
            ObjectKind::Function(callable) => format!("function {}() {{ [native code] }}", callable.name),
            ObjectKind::Class(class) => format!("class {}", class.name()),
            ObjectKind::Wrapper { class, .. } => format!("[object {}]", class.name()),
            ObjectKind::WeakRef(_) => "[object WeakRef]".to_owned(),
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            ObjectKind::Wrapper { class, handle } => write!(f, "{}({handle})", class.name()),
            _ => f.write_str(&self.to_display_string()),
        }
    }
}

/// Weak link to a value with identity.
#[derive(Clone)]
pub(crate) enum WeakIdentity {
    Object(Weak<ObjectCell>),
    Symbol(Weak<Symbol>),
}

impl WeakIdentity {
    /// Identity key and weak link for values that have identity.
    pub(crate) fn of(value: &HostValue) -> Option<(usize, Self)> {
        match value {
            HostValue::Object(object) => Some((object.identity(), Self::Object(object.downgrade()))),
            HostValue::Symbol(symbol) => Some((Rc::as_ptr(symbol).addr(), Self::Symbol(Rc::downgrade(symbol)))),
            _ => None,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Object(weak) => weak.strong_count() > 0,
            Self::Symbol(weak) => weak.strong_count() > 0,
        }
    }

    pub(crate) fn upgrade(&self) -> Option<HostValue> {
        match self {
            Self::Object(weak) => HostObject::upgrade(weak).map(HostValue::Object),
            Self::Symbol(weak) => weak.upgrade().map(HostValue::Symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_of_tags() {
        assert_eq!(HostValue::Null.type_of().to_string(), "object");
        assert_eq!(HostValue::bigint(5).type_of().to_string(), "bigint");
        let f = HostObject::function("f", |_, _| Ok(HostValue::Undefined));
        assert_eq!(HostValue::Object(f).type_of(), TypeTag::Function);
        assert_eq!(HostValue::Object(HostObject::new()).type_of(), TypeTag::Object);
    }

    #[test]
    fn numbers_print_like_the_host() {
        assert_eq!(HostValue::Number(1.0).to_display_string(), "1");
        assert_eq!(HostValue::Number(-0.0).to_display_string(), "0");
        assert_eq!(HostValue::Number(f64::INFINITY).to_display_string(), "Infinity");
        assert_eq!(HostValue::Number(1.5).to_display_string(), "1.5");
    }

    #[test]
    fn properties_keep_insertion_order() {
        let object = HostObject::new();
        object.set("b", 1.into()).unwrap();
        object.set("a", 2.into()).unwrap();
        assert_eq!(object.keys(), vec!["b".to_owned(), "a".to_owned()]);
        assert!(object.has_property("a"));
        assert!(object.get("missing").unwrap().is_undefined());
    }

    #[test]
    fn constructors_and_plain_calls() {
        let ctor = HostObject::constructor(
            "Point",
            |_, _| Ok(HostValue::Undefined),
            |args| {
                let point = HostObject::new();
                point.set("x", args.first().cloned().unwrap_or(HostValue::Undefined))?;
                Ok(point.into())
            },
        );
        let point = ctor.construct(&[3.into()]).unwrap();
        assert_eq!(point.as_object().unwrap().get("x").unwrap().as_number(), Some(3.0));

        let plain = HostObject::new();
        assert!(matches!(plain.construct(&[]), Err(BridgeError::NotConstructible)));
        assert!(matches!(plain.call(&HostValue::Undefined, &[]), Err(BridgeError::NotCallable(_))));
    }

    #[test]
    fn weak_identity_observes_drop() {
        let object = HostValue::Object(HostObject::new());
        let (_, weak) = WeakIdentity::of(&object).unwrap();
        assert!(weak.is_alive());
        drop(object);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
        assert!(WeakIdentity::of(&HostValue::string("s")).is_none());
    }
}
