//! The bridge context: all state shared by one guest module instance.
//!
//! One context exists per instantiated module. It owns the identity registry,
//! the identity hasher, the liveness oracle, the global dispatch table and the
//! console shim, and reaches the guest through a weak link so the import
//! closures that capture the context do not keep the instance alive.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    class,
    dispatch::DispatchTable,
    error::{BridgeError, BridgeResult},
    guest::{GuestEntry, GuestHandle, GuestInstance, GuestValue, OptionalExport},
    hash::IdentityHasher,
    imports::{ConsoleShim, ConsoleSink},
    liveness::{LivenessOracle, ReportChannel},
    registry::{IdentityRegistry, RegistryStats, SweepStats},
    trampoline, weak,
    value::{HostObject, HostValue},
};

/// Outcome of one [`BridgeContext::collect_garbage`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Tokens delivered to `reportGarbageCollectedValue`.
    pub values_reported: usize,
    /// Tokens delivered to `reportGarbageCollectedString`.
    pub strings_reported: usize,
    /// Value tokens dropped because the guest lacks the report export.
    pub skipped: usize,
    /// Reports the guest rejected.
    pub failed: usize,
    pub registry: SweepStats,
    /// Identity hash assignments dropped.
    pub hashes: usize,
}

/// Tracked crossings between automatic collection passes.
///
/// Hash assignments, registry crossings and weak reference registrations all
/// count. Once the count reaches this interval the next tracked crossing runs
/// [`BridgeContext::collect_garbage`] before doing its own work.
pub const COLLECT_INTERVAL: u32 = 1_000;

pub struct BridgeContext {
    guest: RefCell<Option<Weak<dyn GuestInstance>>>,
    crossings_since_collect: Cell<u32>,
    collecting: Cell<bool>,
    registry: RefCell<IdentityRegistry>,
    hasher: IdentityHasher,
    oracle: LivenessOracle,
    globals: DispatchTable,
    console: ConsoleShim,
}

impl BridgeContext {
    pub fn new(hash_seed: u32, globals: DispatchTable, console: Rc<dyn ConsoleSink>) -> Self {
        Self {
            guest: RefCell::new(None),
            crossings_since_collect: Cell::new(0),
            collecting: Cell::new(false),
            registry: RefCell::new(IdentityRegistry::new()),
            hasher: IdentityHasher::new(hash_seed),
            oracle: LivenessOracle::new(),
            globals,
            console: ConsoleShim::new(console),
        }
    }

    /// Binds the instantiated module. The context only holds it weakly.
    pub fn bind(&self, guest: &Rc<dyn GuestInstance>) {
        *self.guest.borrow_mut() = Some(Rc::downgrade(guest));
    }

    /// The bound guest instance.
    pub fn guest(&self) -> BridgeResult<Rc<dyn GuestInstance>> {
        self.guest
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(BridgeError::NotInstantiated)
    }

    #[must_use]
    pub fn globals(&self) -> &DispatchTable {
        &self.globals
    }

    #[must_use]
    pub fn console(&self) -> &ConsoleShim {
        &self.console
    }

    #[must_use]
    pub fn hasher(&self) -> &IdentityHasher {
        &self.hasher
    }

    #[must_use]
    pub fn oracle(&self) -> &LivenessOracle {
        &self.oracle
    }

    #[must_use]
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.borrow().stats()
    }

    /// Host value to guest handle; `null` becomes the null reference.
    pub fn wrap(&self, value: &HostValue) -> BridgeResult<Option<GuestHandle>> {
        self.track_crossing();
        let guest = self.guest()?;
        IdentityRegistry::wrap(&self.registry, &*guest, value)
    }

    /// Guest handle to host value, instantiating `class` for new guest objects.
    pub fn unwrap(&self, handle: Option<GuestHandle>, class: &HostObject) -> BridgeResult<HostValue> {
        self.track_crossing();
        let guest = self.guest()?;
        IdentityRegistry::unwrap(&self.registry, &*guest, handle, class)
    }

    pub fn hash_code(&self, value: &HostValue) -> i32 {
        if value.has_identity() {
            self.track_crossing();
        }
        self.hasher.hash_code(value)
    }

    pub fn create_weak_ref(&self, value: &HostValue, held: Option<GuestValue>) -> BridgeResult<HostObject> {
        self.track_crossing();
        weak::create_weak_ref(&self.oracle, value, held)
    }

    pub fn create_string_weak_ref(&self, value: &HostValue, held: Option<GuestValue>) -> BridgeResult<HostObject> {
        self.track_crossing();
        weak::create_string_weak_ref(&self.oracle, value, held)
    }

    /// Counts one crossing that may grow the registries and runs a collection
    /// pass every [`COLLECT_INTERVAL`] crossings.
    fn track_crossing(&self) {
        let crossings = self.crossings_since_collect.get() + 1;
        if crossings < COLLECT_INTERVAL || self.collecting.get() {
            self.crossings_since_collect.set(crossings);
            return;
        }
        tracing::trace!(crossings, "collection interval reached");
        self.collect_garbage();
    }

    pub fn call_method(&self, instance: &HostValue, method: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        trampoline::call_method(&self.globals, instance, method, args)
    }

    /// Runs one collection pass.
    ///
    /// Collected tokens are reported to the guest first: value tokens only if
    /// the guest exports `reportGarbageCollectedValue`, string tokens always.
    /// A rejected report is logged and never surfaces as an error. Afterwards
    /// the registry and hash map drop entries for collected values and dead
    /// guest handles.
    ///
    /// Reports may cross back into the host; crossings made while a pass is
    /// running never start a nested pass.
    pub fn collect_garbage(&self) -> CollectionReport {
        let mut report = CollectionReport::default();
        if self.collecting.replace(true) {
            return report;
        }
        self.crossings_since_collect.set(0);
        let guest = self.guest().ok();
        for collected in self.oracle.poll() {
            let Some(guest) = guest.as_deref() else {
                report.skipped += 1;
                continue;
            };
            let result = match collected.channel {
                ReportChannel::Value if !guest.provides(OptionalExport::ReportGarbageCollectedValue) => {
                    tracing::debug!("guest has no reportGarbageCollectedValue export, dropping token");
                    report.skipped += 1;
                    continue;
                }
                ReportChannel::Value => guest
                    .report_garbage_collected_value(&collected.token)
                    .map(|()| report.values_reported += 1),
                ReportChannel::String => guest
                    .report_garbage_collected_string(&collected.token)
                    .map(|()| report.strings_reported += 1),
            };
            if let Err(err) = result {
                tracing::error!(channel = %collected.channel, error = %err, "collection report failed");
                report.failed += 1;
            }
        }
        report.registry = self.registry.borrow_mut().sweep(guest.as_deref());
        report.hashes = self.hasher.sweep();
        self.collecting.set(false);
        tracing::debug!(?report, "collection pass finished");
        report
    }
}

/// Stateless operations, exposed on the context for the import modules.
#[expect(clippy::unused_self, reason = "uniform context surface for the imports")]
impl BridgeContext {
    #[must_use]
    pub fn synthesize_class(&self, name: &str) -> HostObject {
        class::synthesize_class(name)
    }

    pub fn define_method(&self, class: &HostObject, name: &str, entry: GuestEntry) -> BridgeResult<()> {
        class::define_method(class, name, entry)
    }

    pub fn define_property(
        &self,
        class: &HostObject,
        name: &str,
        getter: GuestEntry,
        setter: Option<GuestEntry>,
    ) -> BridgeResult<()> {
        class::define_property(class, name, getter, setter)
    }

    pub fn deref(&self, weak_ref: &HostValue) -> BridgeResult<HostValue> {
        weak::deref(weak_ref)
    }

    pub fn string_deref(&self, weak_ref: &HostValue) -> BridgeResult<HostValue> {
        weak::string_deref(weak_ref)
    }

    pub fn call_function(&self, function: &HostValue, args: &[HostValue]) -> BridgeResult<HostValue> {
        trampoline::call_function(function, args)
    }

    pub fn construct(&self, constructor: &HostValue, args: &[HostValue]) -> BridgeResult<HostValue> {
        trampoline::construct(constructor, args)
    }

    pub fn as_function(&self, instance: &HostValue, property: &str) -> BridgeResult<HostObject> {
        trampoline::as_function(instance, property)
    }

    pub fn function_as_object(&self, function: &HostValue, property: &str) -> BridgeResult<HostObject> {
        trampoline::function_as_object(function, property)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        imports::{ImportObject, NoConsole},
        reference::ReferenceGuest,
    };

    fn idle(_: &ReferenceGuest, _: GuestHandle) -> BridgeResult<()> {
        Ok(())
    }

    fn context() -> BridgeContext {
        BridgeContext::new(0, DispatchTable::new(), Rc::new(NoConsole))
    }

    #[test]
    fn unbound_context_has_no_guest() {
        let context = context();
        assert!(matches!(context.guest(), Err(BridgeError::NotInstantiated)));
        let err = context.wrap(&HostValue::Number(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "no guest module instance is bound to this bridge");
    }

    #[test]
    fn context_does_not_keep_the_guest_alive() {
        let context = context();
        let guest: Rc<dyn GuestInstance> = Rc::new(ReferenceGuest::new(ImportObject::new(), Rc::new(idle)));
        context.bind(&guest);
        assert!(context.guest().is_ok());
        drop(guest);
        assert!(matches!(context.guest(), Err(BridgeError::NotInstantiated)));
    }

    #[test]
    fn crossings_trigger_collection_passes() {
        let context = context();
        for _ in 0..COLLECT_INTERVAL * 3 {
            let object = HostValue::Object(HostObject::new());
            context.hash_code(&object);
            context.create_weak_ref(&object, Some(GuestValue::I32(1))).unwrap();
        }
        assert!(context.hasher().len() < COLLECT_INTERVAL as usize);
        assert!(context.oracle().watched() < COLLECT_INTERVAL as usize);
    }

    #[test]
    fn primitive_hashes_are_not_counted() {
        let context = context();
        let object = HostValue::Object(HostObject::new());
        context.hash_code(&object);
        drop(object);
        for n in 0..COLLECT_INTERVAL * 2 {
            context.hash_code(&HostValue::Number(f64::from(n)));
        }
        assert_eq!(context.hasher().len(), 1);
    }

    #[test]
    fn collection_without_a_guest_skips_reports() {
        let context = context();
        let object = HostValue::Object(HostObject::new());
        context.create_weak_ref(&object, Some(GuestValue::I32(1))).unwrap();
        drop(object);
        let report = context.collect_garbage();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.values_reported, 0);
    }
}
