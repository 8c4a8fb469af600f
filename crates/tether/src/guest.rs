//! Guest-domain handles, the calling convention, and the export surface.
//!
//! The guest owns its heap. The host only ever sees [`GuestHandle`]s: a slot
//! index plus a generation. When the guest frees a slot and later reuses it,
//! the generation moves on, so a handle held across that reuse reads as dead
//! instead of aliasing the new occupant.

use std::{any::Any, fmt, rc::Rc};

use strum::{EnumIter, IntoStaticStr};

use crate::{
    error::{BridgeError, BridgeResult},
    value::HostValue,
};

/// Opaque reference into the guest heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct GuestHandle {
    index: u32,
    generation: u32,
}

impl GuestHandle {
    #[must_use]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-checked slot arena for guest objects.
///
/// Freed slots go on a free list and are reused by later inserts with a bumped
/// generation, keeping the table compact for long-running guests.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    /// Indices of freed slots available for reuse.
    free_list: Vec<u32>,
    live: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Stores a value and returns its handle.
    ///
    /// # Panics
    /// Panics if the table outgrows `u32` indices.
    pub fn insert(&mut self, value: T) -> GuestHandle {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            GuestHandle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("HandleTable::insert: index space exhausted");
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            GuestHandle::new(index, 0)
        }
    }

    fn slot(&self, handle: GuestHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    #[must_use]
    pub fn get(&self, handle: GuestHandle) -> Option<&T> {
        self.slot(handle)?.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: GuestHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_mut()
    }

    /// Frees the slot behind `handle`. Stale handles are ignored.
    pub fn remove(&mut self, handle: GuestHandle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        self.free_list.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    #[must_use]
    pub fn is_live(&self, handle: GuestHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (GuestHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((GuestHandle::new(index, slot.generation), value))
        })
    }
}

/// A guest function reference, callable from the host with host values.
#[derive(Clone)]
pub struct GuestEntry {
    name: Rc<str>,
    func: Rc<dyn Fn(&[HostValue]) -> BridgeResult<HostValue>>,
}

impl GuestEntry {
    pub fn new(name: &str, func: impl Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static) -> Self {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        (self.func)(args)
    }
}

impl fmt::Debug for GuestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestEntry({})", self.name)
    }
}

/// A value in the guest calling convention.
///
/// Everything crosses as direct call arguments and results; there is no
/// serialized form.
#[derive(Debug, Clone)]
pub enum GuestValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Reference to a guest object, `None` for the null reference.
    Ref(Option<GuestHandle>),
    /// An opaque host value held by the guest.
    Extern(HostValue),
    /// A guest function reference.
    Entry(GuestEntry),
}

impl GuestValue {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Ref(_) => "ref",
            Self::Extern(_) => "externref",
            Self::Entry(_) => "funcref",
        }
    }

    fn mismatch(&self, expected: &'static str) -> BridgeError {
        BridgeError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_i32(&self) -> BridgeResult<i32> {
        match self {
            Self::I32(v) => Ok(*v),
            other => Err(other.mismatch("i32")),
        }
    }

    /// Reads a floating-point argument; `f32` widens losslessly.
    pub fn as_f64(&self) -> BridgeResult<f64> {
        match self {
            Self::F64(v) => Ok(*v),
            Self::F32(v) => Ok(f64::from(*v)),
            other => Err(other.mismatch("f64")),
        }
    }

    pub fn as_handle(&self) -> BridgeResult<Option<GuestHandle>> {
        match self {
            Self::Ref(handle) => Ok(*handle),
            other => Err(other.mismatch("ref")),
        }
    }

    pub fn as_extern(&self) -> BridgeResult<&HostValue> {
        match self {
            Self::Extern(value) => Ok(value),
            other => Err(other.mismatch("externref")),
        }
    }

    pub fn as_entry(&self) -> BridgeResult<&GuestEntry> {
        match self {
            Self::Entry(entry) => Ok(entry),
            other => Err(other.mismatch("funcref")),
        }
    }
}

/// Exports a guest module may leave out. Absence means "capability absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum OptionalExport {
    ReportGarbageCollectedValue,
    ReportGarbageCollectedString,
    StringLength,
    StringCharAt,
}

impl OptionalExport {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// The export surface the bridge drives.
///
/// Every method takes `&self`: a guest call may cross back into the host and
/// from there into the guest again, so implementations keep their interior
/// borrows short and never hold one across an import call. `is_live` is the
/// exception: the bridge may call it while inspecting its own registries, so
/// it must not cross back into the host.
pub trait GuestInstance {
    fn create_string_array(&self, length: i32) -> BridgeResult<GuestHandle>;

    fn create_string_builder(&self) -> BridgeResult<GuestHandle>;

    /// Appends one UTF-16 code unit.
    fn append_char(&self, builder: GuestHandle, code: i32) -> BridgeResult<()>;

    fn build_string(&self, builder: GuestHandle) -> BridgeResult<GuestHandle>;

    fn set_to_string_array(&self, array: GuestHandle, index: i32, value: GuestHandle) -> BridgeResult<()>;

    /// The module entry point.
    fn main(&self, args: GuestHandle) -> BridgeResult<()>;

    /// Materializes a guest-side wrapper for an arbitrary host value.
    fn create_wrapper(&self, value: &HostValue) -> BridgeResult<GuestHandle>;

    /// Whether `handle` still refers to a live guest object.
    fn is_live(&self, handle: GuestHandle) -> bool;

    /// Whether an optional export is present.
    fn provides(&self, _export: OptionalExport) -> bool {
        false
    }

    fn report_garbage_collected_value(&self, _token: &GuestValue) -> BridgeResult<()> {
        Err(BridgeError::MissingExport(OptionalExport::ReportGarbageCollectedValue.name()))
    }

    fn report_garbage_collected_string(&self, _token: &GuestValue) -> BridgeResult<()> {
        Err(BridgeError::MissingExport(OptionalExport::ReportGarbageCollectedString.name()))
    }

    /// Length of a guest string in UTF-16 code units.
    fn string_length(&self, _string: GuestHandle) -> BridgeResult<i32> {
        Err(BridgeError::MissingExport(OptionalExport::StringLength.name()))
    }

    fn string_char_at(&self, _string: GuestHandle, _index: i32) -> BridgeResult<i32> {
        Err(BridgeError::MissingExport(OptionalExport::StringCharAt.name()))
    }

    /// Access to the concrete instance for embedders.
    fn as_any(&self) -> &dyn Any;
}
