//! The identity registry: two weak, inverse maps between host values and
//! guest handles.
//!
//! `wrap` turns a host value into a guest handle and `unwrap` turns a guest
//! handle into a host value. As long as nothing is collected in between, the
//! two are inverses and repeated crossings hand back the reference-identical
//! result:
//! - a wrapper instance always wraps to the handle it embeds;
//! - a host object wraps to the one guest wrapper recorded for it;
//! - a guest handle unwraps to its one live host wrapper, or to the host value
//!   it was created for.
//!
//! Every association is weak on the host side and generation-checked on the
//! guest side, so stale entries are simply ignored until [`sweep`] removes
//! them.
//!
//! [`sweep`]: IdentityRegistry::sweep

use std::{cell::RefCell, rc::Weak};

use ahash::AHashMap;
use num_bigint::BigInt;

use crate::{
    class,
    error::{BridgeError, BridgeResult},
    guest::{GuestHandle, GuestInstance},
    value::{HostObject, HostString, HostValue, ObjectCell, WeakIdentity},
};

/// Cache key for primitives, compared with SameValueZero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PrimitiveKey {
    Undefined,
    Bool(bool),
    Number(u64),
    BigInt(BigInt),
    String(HostString),
}

impl PrimitiveKey {
    fn of(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::Undefined => Some(Self::Undefined),
            HostValue::Bool(b) => Some(Self::Bool(*b)),
            HostValue::Number(n) => {
                let n = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                Some(Self::Number(n.to_bits()))
            }
            HostValue::BigInt(b) => Some(Self::BigInt(b.as_ref().clone())),
            HostValue::String(s) => Some(Self::String(s.clone())),
            HostValue::Null | HostValue::Symbol(_) | HostValue::Object(_) => None,
        }
    }
}

/// Host side of a host-to-guest association.
struct HostLink {
    target: WeakIdentity,
    handle: GuestHandle,
}

/// Host side of a guest-to-host association.
enum Backlink {
    /// A host wrapper created by `unwrap`.
    Wrapper(Weak<ObjectCell>),
    /// The host object a guest wrapper was created for by `wrap`.
    Host(WeakIdentity),
    /// The primitive a guest wrapper was created for by `wrap`.
    Primitive(HostValue),
}

impl Backlink {
    fn resolve(&self) -> Option<HostValue> {
        match self {
            Self::Wrapper(weak) => HostObject::upgrade(weak).map(HostValue::Object),
            Self::Host(identity) => identity.upgrade(),
            Self::Primitive(value) => Some(value.clone()),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Self::Wrapper(weak) => weak.strong_count() > 0,
            Self::Host(identity) => identity.is_alive(),
            Self::Primitive(_) => true,
        }
    }
}

/// Current size of each registry map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Host objects and symbols with a recorded guest wrapper.
    pub host_links: usize,
    /// Guest handles with a recorded host counterpart.
    pub guest_links: usize,
    /// Primitives with a cached guest wrapper.
    pub primitives: usize,
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub host_links: usize,
    pub guest_links: usize,
    pub primitives: usize,
}

impl SweepStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.host_links + self.guest_links + self.primitives
    }
}

/// Weak, inverse associations between host values and guest handles.
#[derive(Default)]
pub struct IdentityRegistry {
    host_to_guest: AHashMap<usize, HostLink>,
    guest_to_host: AHashMap<GuestHandle, Backlink>,
    primitives: AHashMap<PrimitiveKey, GuestHandle>,
}

enum Lookup {
    Identity(usize, WeakIdentity),
    Primitive(PrimitiveKey),
}

impl Lookup {
    fn of(value: &HostValue) -> Option<Self> {
        if let Some((key, identity)) = WeakIdentity::of(value) {
            return Some(Self::Identity(key, identity));
        }
        PrimitiveKey::of(value).map(Self::Primitive)
    }
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, lookup: &Lookup, guest: &dyn GuestInstance) -> Option<GuestHandle> {
        let handle = match lookup {
            Lookup::Identity(key, _) => {
                let link = self.host_to_guest.get(key)?;
                link.target.is_alive().then_some(link.handle)?
            }
            Lookup::Primitive(key) => *self.primitives.get(key)?,
        };
        guest.is_live(handle).then_some(handle)
    }

    fn record(&mut self, lookup: Lookup, value: &HostValue, handle: GuestHandle) {
        match lookup {
            Lookup::Identity(key, target) => {
                self.guest_to_host.insert(handle, Backlink::Host(target.clone()));
                self.host_to_guest.insert(key, HostLink { target, handle });
            }
            Lookup::Primitive(key) => {
                self.guest_to_host.insert(handle, Backlink::Primitive(value.clone()));
                self.primitives.insert(key, handle);
            }
        }
    }

    fn resolve(&self, handle: GuestHandle) -> Option<HostValue> {
        self.guest_to_host.get(&handle)?.resolve()
    }

    /// Converts a host value into a guest handle.
    ///
    /// `null` maps to the null reference. No registry borrow is held while the
    /// guest creates a wrapper, so the guest may cross back into the bridge;
    /// if such a nested crossing already recorded a live wrapper for the same
    /// value, that one wins and stays canonical.
    pub fn wrap(
        registry: &RefCell<Self>,
        guest: &dyn GuestInstance,
        value: &HostValue,
    ) -> BridgeResult<Option<GuestHandle>> {
        if value.is_null() {
            return Ok(None);
        }
        if let HostValue::Object(object) = value
            && let Some(handle) = object.guest_handle()
        {
            return Ok(Some(handle));
        }
        let Some(lookup) = Lookup::of(value) else {
            return Ok(None);
        };
        if let Some(handle) = registry.borrow().find(&lookup, guest) {
            return Ok(Some(handle));
        }

        let handle = guest.create_wrapper(value)?;
        let mut registry = registry.borrow_mut();
        if let Some(existing) = registry.find(&lookup, guest) {
            tracing::trace!(%existing, discarded = %handle, "wrapper recorded by nested crossing");
            return Ok(Some(existing));
        }
        tracing::trace!(%handle, kind = value.kind_name(), "recorded guest wrapper");
        registry.record(lookup, value, handle);
        Ok(Some(handle))
    }

    /// Converts a guest handle into a host value, creating an instance of
    /// `class` if the handle has no live host counterpart.
    pub fn unwrap(
        registry: &RefCell<Self>,
        guest: &dyn GuestInstance,
        handle: Option<GuestHandle>,
        class: &HostObject,
    ) -> BridgeResult<HostValue> {
        let Some(handle) = handle else {
            return Ok(HostValue::Null);
        };
        let Some(definition) = class.class_definition() else {
            return Err(BridgeError::TypeMismatch {
                expected: "wrapper class",
                found: HostValue::Object(class.clone()).kind_name(),
            });
        };
        if let Some(value) = registry.borrow().resolve(handle) {
            return Ok(value);
        }
        if !guest.is_live(handle) {
            return Err(BridgeError::StaleHandle(handle));
        }

        let wrapper = class::instantiate(definition, handle);
        tracing::trace!(%handle, class = definition.name(), "created host wrapper");
        registry
            .borrow_mut()
            .guest_to_host
            .insert(handle, Backlink::Wrapper(wrapper.downgrade()));
        Ok(HostValue::Object(wrapper))
    }

    /// Removes associations whose host side was collected or whose guest
    /// handle is no longer live.
    pub fn sweep(&mut self, guest: Option<&dyn GuestInstance>) -> SweepStats {
        let is_live = |handle: GuestHandle| guest.is_some_and(|g| g.is_live(handle));
        let before = self.stats();
        self.host_to_guest
            .retain(|_, link| link.target.is_alive() && is_live(link.handle));
        self.guest_to_host
            .retain(|handle, backlink| backlink.is_alive() && is_live(*handle));
        self.primitives.retain(|_, handle| is_live(*handle));
        let after = self.stats();
        SweepStats {
            host_links: before.host_links - after.host_links,
            guest_links: before.guest_links - after.guest_links,
            primitives: before.primitives - after.primitives,
        }
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            host_links: self.host_to_guest.len(),
            guest_links: self.guest_to_host.len(),
            primitives: self.primitives.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        class::synthesize_class,
        imports::ImportObject,
        reference::ReferenceGuest,
    };

    fn idle(_: &ReferenceGuest, _: GuestHandle) -> BridgeResult<()> {
        Ok(())
    }

    fn setup() -> (RefCell<IdentityRegistry>, ReferenceGuest, HostObject) {
        let guest = ReferenceGuest::new(ImportObject::new(), Rc::new(idle));
        (RefCell::new(IdentityRegistry::new()), guest, synthesize_class("Thing"))
    }

    #[test]
    fn null_crosses_as_null() {
        let (registry, guest, class) = setup();
        assert_eq!(IdentityRegistry::wrap(&registry, &guest, &HostValue::Null).unwrap(), None);
        assert!(IdentityRegistry::unwrap(&registry, &guest, None, &class).unwrap().is_null());
        assert_eq!(guest.heap_len(), 0);
    }

    #[test]
    fn objects_wrap_to_one_handle() {
        let (registry, guest, _) = setup();
        let object = HostValue::Object(HostObject::new());
        let first = IdentityRegistry::wrap(&registry, &guest, &object).unwrap();
        let second = IdentityRegistry::wrap(&registry, &guest, &object).unwrap();
        assert_eq!(first, second);
        assert_eq!(guest.heap_len(), 1);
        assert!(guest.wrapped_value(first.unwrap()).unwrap().strict_equals(&object));
    }

    #[test]
    fn unwrap_of_wrap_is_identity() {
        let (registry, guest, class) = setup();
        let symbol = HostValue::symbol(Some("id"));
        let handle = IdentityRegistry::wrap(&registry, &guest, &symbol).unwrap();
        let back = IdentityRegistry::unwrap(&registry, &guest, handle, &class).unwrap();
        assert!(back.strict_equals(&symbol));

        let number = HostValue::Number(2.5);
        let handle = IdentityRegistry::wrap(&registry, &guest, &number).unwrap();
        let back = IdentityRegistry::unwrap(&registry, &guest, handle, &class).unwrap();
        assert_eq!(back.as_number(), Some(2.5));
    }

    #[test]
    fn wrap_of_unwrap_is_identity() {
        let (registry, guest, class) = setup();
        let handle = guest.alloc_string("guest object");
        let wrapper = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &class).unwrap();
        let again = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &class).unwrap();
        assert!(wrapper.strict_equals(&again));
        assert_eq!(wrapper.as_object().unwrap().guest_handle(), Some(handle));
        assert_eq!(IdentityRegistry::wrap(&registry, &guest, &wrapper).unwrap(), Some(handle));
    }

    #[test]
    fn dropped_wrappers_are_recreated() {
        let (registry, guest, class) = setup();
        let handle = guest.alloc_string("guest object");
        let wrapper = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &class).unwrap();
        let first = wrapper.as_object().unwrap().downgrade();
        drop(wrapper);
        assert_eq!(first.strong_count(), 0);

        let recreated = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &class).unwrap();
        assert_eq!(recreated.as_object().unwrap().guest_handle(), Some(handle));
    }

    #[test]
    fn stale_handles_are_rejected() {
        let (registry, guest, class) = setup();
        let handle = guest.alloc_string("short lived");
        guest.free(handle);
        let err = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &class).unwrap_err();
        assert!(matches!(err, BridgeError::StaleHandle(h) if h == handle));

        let err = IdentityRegistry::unwrap(&registry, &guest, Some(handle), &HostObject::new()).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { expected: "wrapper class", .. }));
    }

    #[test]
    fn primitives_use_same_value_zero() {
        let (registry, guest, _) = setup();
        let wrap = |value: HostValue| IdentityRegistry::wrap(&registry, &guest, &value).unwrap();
        assert_eq!(wrap(HostValue::Number(0.0)), wrap(HostValue::Number(-0.0)));
        assert_eq!(wrap(HostValue::Number(f64::NAN)), wrap(HostValue::Number(f64::NAN)));
        assert_eq!(wrap("text".into()), wrap("text".into()));
        assert_eq!(wrap(HostValue::Undefined), wrap(HostValue::Undefined));
        assert_ne!(wrap(HostValue::Bool(true)), wrap(HostValue::Bool(false)));
        assert_ne!(wrap(HostValue::Number(1.0)), wrap(HostValue::bigint(1)));
        assert_eq!(registry.borrow().stats().primitives, 8);
    }

    #[test]
    fn sweep_prunes_dead_entries() {
        let (registry, guest, class) = setup();
        let kept = HostValue::Object(HostObject::new());
        IdentityRegistry::wrap(&registry, &guest, &kept).unwrap();
        let dropped = HostValue::Object(HostObject::new());
        let dropped_handle = IdentityRegistry::wrap(&registry, &guest, &dropped).unwrap().unwrap();
        let number = IdentityRegistry::wrap(&registry, &guest, &HostValue::Number(3.0)).unwrap().unwrap();
        let guest_object = guest.alloc_string("wrapper");
        drop(IdentityRegistry::unwrap(&registry, &guest, Some(guest_object), &class).unwrap());

        // the guest-side wrapper held `dropped` strongly until it is freed
        drop(dropped);
        guest.free(dropped_handle);
        guest.free(number);

        let swept = registry.borrow_mut().sweep(Some(&guest));
        assert_eq!(
            swept,
            SweepStats {
                host_links: 1,
                guest_links: 3,
                primitives: 1,
            }
        );
        assert_eq!(swept.total(), 5);
        assert_eq!(
            registry.borrow().stats(),
            RegistryStats {
                host_links: 1,
                guest_links: 1,
                primitives: 0,
            }
        );
    }

    /// Guest whose `create_wrapper` crosses back into the registry for the same
    /// value before returning its own handle.
    struct ReentrantGuest {
        inner: ReferenceGuest,
        registry: Rc<RefCell<IdentityRegistry>>,
        nested: RefCell<Option<GuestHandle>>,
    }

    impl GuestInstance for ReentrantGuest {
        fn create_string_array(&self, length: i32) -> BridgeResult<GuestHandle> {
            self.inner.create_string_array(length)
        }

        fn create_string_builder(&self) -> BridgeResult<GuestHandle> {
            self.inner.create_string_builder()
        }

        fn append_char(&self, builder: GuestHandle, code: i32) -> BridgeResult<()> {
            self.inner.append_char(builder, code)
        }

        fn build_string(&self, builder: GuestHandle) -> BridgeResult<GuestHandle> {
            self.inner.build_string(builder)
        }

        fn set_to_string_array(&self, array: GuestHandle, index: i32, value: GuestHandle) -> BridgeResult<()> {
            self.inner.set_to_string_array(array, index, value)
        }

        fn main(&self, args: GuestHandle) -> BridgeResult<()> {
            self.inner.main(args)
        }

        fn create_wrapper(&self, value: &HostValue) -> BridgeResult<GuestHandle> {
            if self.nested.borrow().is_none() {
                *self.nested.borrow_mut() = Some(self.inner.create_wrapper(value)?);
                let nested = IdentityRegistry::wrap(&self.registry, self, value)?;
                *self.nested.borrow_mut() = nested;
            }
            self.inner.create_wrapper(value)
        }

        fn is_live(&self, handle: GuestHandle) -> bool {
            self.inner.is_live(handle)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn nested_crossings_keep_the_first_recorded_wrapper() {
        let registry = Rc::new(RefCell::new(IdentityRegistry::new()));
        let guest = ReentrantGuest {
            inner: ReferenceGuest::new(ImportObject::new(), Rc::new(idle)),
            registry: Rc::clone(&registry),
            nested: RefCell::new(None),
        };
        let object = HostValue::Object(HostObject::new());
        let outer = IdentityRegistry::wrap(&registry, &guest, &object).unwrap();
        let nested = *guest.nested.borrow();
        assert!(nested.is_some());
        assert_eq!(outer, nested);
        assert_eq!(IdentityRegistry::wrap(&registry, &guest, &object).unwrap(), outer);
    }
}
