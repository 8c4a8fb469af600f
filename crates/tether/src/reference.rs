//! An in-process guest module.
//!
//! [`ReferenceGuest`] implements the full export surface on a
//! [`HandleTable`], so the bridge can be driven end to end without a wasm
//! engine. Programs are plain closures that call back into their imports the
//! way compiled guest code would. Guest-side collection is simulated with
//! [`ReferenceGuest::free`], and optional exports can be switched off to model
//! modules that leave them out.

use std::{any::Any, cell::RefCell, rc::Rc};

use ahash::AHashSet;
use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::{
    bridge::ModuleLoader,
    error::{BridgeError, BridgeResult},
    guest::{GuestHandle, GuestInstance, GuestValue, HandleTable, OptionalExport},
    imports::{ImportObject, TEAVM_MODULE},
    liveness::ReportChannel,
    marshal::char_from_code,
    value::HostValue,
};

/// Entry point of a reference program: receives the guest and its argument
/// array.
pub type Program = Rc<dyn Fn(&ReferenceGuest, GuestHandle) -> BridgeResult<()>>;

/// Objects living in the reference guest heap.
#[derive(Debug, Clone)]
pub enum GuestObject {
    String(Vec<u16>),
    Builder(Vec<u16>),
    StringArray(Vec<Option<GuestHandle>>),
    /// Guest-side wrapper of a host value. Holds the value strongly until the
    /// slot is freed.
    Wrapper(HostValue),
}

impl GuestObject {
    fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Builder(_) => "string builder",
            Self::StringArray(_) => "string array",
            Self::Wrapper(_) => "wrapper",
        }
    }
}

pub struct ReferenceGuest {
    heap: RefCell<HandleTable<GuestObject>>,
    imports: ImportObject,
    program: Program,
    exports: RefCell<AHashSet<OptionalExport>>,
    reports: RefCell<Vec<(ReportChannel, GuestValue)>>,
    main_args: RefCell<Option<GuestHandle>>,
}

impl ReferenceGuest {
    /// Instantiates `program` against `imports`, with every optional export
    /// present.
    pub fn new(imports: ImportObject, program: Program) -> Self {
        Self {
            heap: RefCell::new(HandleTable::new()),
            imports,
            program,
            exports: RefCell::new(OptionalExport::iter().collect()),
            reports: RefCell::new(Vec::new()),
            main_args: RefCell::new(None),
        }
    }

    /// Calls an import. No heap borrow is held during the call, so the import
    /// may cross back into this guest.
    pub fn call_import(&self, module: &str, name: &str, args: &[GuestValue]) -> BridgeResult<Option<GuestValue>> {
        let function = self.imports.resolve(module, name)?;
        function(args)
    }

    /// Turns an optional export on or off.
    pub fn set_export(&self, export: OptionalExport, present: bool) {
        let mut exports = self.exports.borrow_mut();
        if present {
            exports.insert(export);
        } else {
            exports.remove(&export);
        }
    }

    /// Frees a heap slot, as the guest collector would.
    pub fn free(&self, handle: GuestHandle) -> bool {
        // the removed object may drop host values; release the borrow first
        let removed = self.heap.borrow_mut().remove(handle);
        removed.is_some()
    }

    /// Allocates a guest-authored string.
    pub fn alloc_string(&self, value: &str) -> GuestHandle {
        self.heap
            .borrow_mut()
            .insert(GuestObject::String(value.encode_utf16().collect()))
    }

    /// Contents of a guest string.
    pub fn string_value(&self, handle: GuestHandle) -> BridgeResult<String> {
        match self.object(handle)? {
            GuestObject::String(units) => Ok(String::from_utf16_lossy(&units)),
            other => Err(mismatch("string", &other)),
        }
    }

    /// Elements of a guest string array.
    pub fn string_array(&self, handle: GuestHandle) -> BridgeResult<Vec<Option<GuestHandle>>> {
        match self.object(handle)? {
            GuestObject::StringArray(items) => Ok(items),
            other => Err(mismatch("string array", &other)),
        }
    }

    /// The host value behind a guest-side wrapper.
    pub fn wrapped_value(&self, handle: GuestHandle) -> BridgeResult<HostValue> {
        match self.object(handle)? {
            GuestObject::Wrapper(value) => Ok(value),
            other => Err(mismatch("wrapper", &other)),
        }
    }

    /// Argument array of the last `main` call.
    #[must_use]
    pub fn main_args(&self) -> Option<GuestHandle> {
        *self.main_args.borrow()
    }

    /// Collection reports received so far, in arrival order.
    #[must_use]
    pub fn reports(&self) -> Vec<(ReportChannel, GuestValue)> {
        self.reports.borrow().clone()
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn heap_len(&self) -> usize {
        self.heap.borrow().len()
    }

    fn object(&self, handle: GuestHandle) -> BridgeResult<GuestObject> {
        self.heap
            .borrow()
            .get(handle)
            .cloned()
            .ok_or(BridgeError::StaleHandle(handle))
    }

    fn require(&self, export: OptionalExport) -> BridgeResult<()> {
        if self.provides(export) {
            Ok(())
        } else {
            Err(BridgeError::MissingExport(export.name()))
        }
    }
}

fn mismatch(expected: &'static str, found: &GuestObject) -> BridgeError {
    BridgeError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

impl GuestInstance for ReferenceGuest {
    fn create_string_array(&self, length: i32) -> BridgeResult<GuestHandle> {
        let length = usize::try_from(length).map_err(|_| BridgeError::guest(format!("negative array size {length}")))?;
        Ok(self.heap.borrow_mut().insert(GuestObject::StringArray(vec![None; length])))
    }

    fn create_string_builder(&self) -> BridgeResult<GuestHandle> {
        Ok(self.heap.borrow_mut().insert(GuestObject::Builder(Vec::new())))
    }

    fn append_char(&self, builder: GuestHandle, code: i32) -> BridgeResult<()> {
        match self.heap.borrow_mut().get_mut(builder) {
            Some(GuestObject::Builder(units)) => {
                units.push(char_from_code(code));
                Ok(())
            }
            Some(other) => Err(mismatch("string builder", other)),
            None => Err(BridgeError::StaleHandle(builder)),
        }
    }

    fn build_string(&self, builder: GuestHandle) -> BridgeResult<GuestHandle> {
        let units = match self.object(builder)? {
            GuestObject::Builder(units) => units,
            other => return Err(mismatch("string builder", &other)),
        };
        Ok(self.heap.borrow_mut().insert(GuestObject::String(units)))
    }

    fn set_to_string_array(&self, array: GuestHandle, index: i32, value: GuestHandle) -> BridgeResult<()> {
        if !matches!(self.object(value)?, GuestObject::String(_)) {
            return Err(BridgeError::guest("array store of a non-string"));
        }
        let mut heap = self.heap.borrow_mut();
        let items = match heap.get_mut(array) {
            Some(GuestObject::StringArray(items)) => items,
            Some(other) => return Err(mismatch("string array", other)),
            None => return Err(BridgeError::StaleHandle(array)),
        };
        let length = items.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| items.get_mut(i))
            .ok_or(BridgeError::IndexOutOfBounds { index, length })?;
        *slot = Some(value);
        Ok(())
    }

    fn main(&self, args: GuestHandle) -> BridgeResult<()> {
        *self.main_args.borrow_mut() = Some(args);
        let program = Rc::clone(&self.program);
        program(self, args)
    }

    fn create_wrapper(&self, value: &HostValue) -> BridgeResult<GuestHandle> {
        Ok(self.heap.borrow_mut().insert(GuestObject::Wrapper(value.clone())))
    }

    fn is_live(&self, handle: GuestHandle) -> bool {
        self.heap.borrow().is_live(handle)
    }

    fn provides(&self, export: OptionalExport) -> bool {
        self.exports.borrow().contains(&export)
    }

    fn report_garbage_collected_value(&self, token: &GuestValue) -> BridgeResult<()> {
        self.require(OptionalExport::ReportGarbageCollectedValue)?;
        self.reports.borrow_mut().push((ReportChannel::Value, token.clone()));
        Ok(())
    }

    fn report_garbage_collected_string(&self, token: &GuestValue) -> BridgeResult<()> {
        self.require(OptionalExport::ReportGarbageCollectedString)?;
        self.reports.borrow_mut().push((ReportChannel::String, token.clone()));
        Ok(())
    }

    fn string_length(&self, string: GuestHandle) -> BridgeResult<i32> {
        self.require(OptionalExport::StringLength)?;
        match self.object(string)? {
            GuestObject::String(units) => {
                i32::try_from(units.len()).map_err(|_| BridgeError::guest("string too long"))
            }
            other => Err(mismatch("string", &other)),
        }
    }

    fn string_char_at(&self, string: GuestHandle, index: i32) -> BridgeResult<i32> {
        self.require(OptionalExport::StringCharAt)?;
        let units = match self.object(string)? {
            GuestObject::String(units) => units,
            other => return Err(mismatch("string", &other)),
        };
        usize::try_from(index)
            .ok()
            .and_then(|i| units.get(i))
            .map(|unit| i32::from(*unit))
            .ok_or(BridgeError::IndexOutOfBounds {
                index,
                length: units.len(),
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes every argument to stdout, one per line.
fn echo(guest: &ReferenceGuest, args: GuestHandle) -> BridgeResult<()> {
    for item in guest.string_array(args)? {
        let text = match item {
            Some(string) => guest.string_value(string)?,
            None => "null".to_owned(),
        };
        for unit in text.encode_utf16().chain([10]) {
            guest.call_import(TEAVM_MODULE, "putcharStdout", &[GuestValue::I32(i32::from(unit))])?;
        }
    }
    Ok(())
}

/// Loads reference programs by name.
///
/// The locator `echo` is always available; embedders register more with
/// [`ReferenceLoader::program`].
pub struct ReferenceLoader {
    programs: IndexMap<String, Program>,
}

impl Default for ReferenceLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceLoader {
    #[must_use]
    pub fn new() -> Self {
        let mut loader = Self {
            programs: IndexMap::new(),
        };
        loader.programs.insert("echo".to_owned(), Rc::new(echo));
        loader
    }

    /// Registers a program under `locator`.
    #[must_use]
    pub fn program(
        mut self,
        locator: &str,
        program: impl Fn(&ReferenceGuest, GuestHandle) -> BridgeResult<()> + 'static,
    ) -> Self {
        self.programs.insert(locator.to_owned(), Rc::new(program));
        self
    }
}

impl ModuleLoader for ReferenceLoader {
    fn instantiate(&self, locator: &str, imports: ImportObject) -> BridgeResult<Rc<dyn GuestInstance>> {
        let Some(program) = self.programs.get(locator) else {
            return Err(BridgeError::Load {
                locator: locator.to_owned(),
                message: "no such program".to_owned(),
            });
        };
        Ok(Rc::new(ReferenceGuest::new(imports, Rc::clone(program))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::marshal;

    fn idle(_: &ReferenceGuest, _: GuestHandle) -> BridgeResult<()> {
        Ok(())
    }

    fn guest() -> ReferenceGuest {
        ReferenceGuest::new(ImportObject::new(), Rc::new(idle))
    }

    #[test]
    fn strings_round_trip_through_the_exports() {
        let guest = guest();
        let handle = marshal::host_string_to_guest(&guest, "héllo 😀").unwrap();
        assert_eq!(guest.string_value(handle).unwrap(), "héllo 😀");
        assert_eq!(&*marshal::guest_string_to_host(&guest, handle).unwrap(), "héllo 😀");
    }

    #[test]
    fn string_arrays_are_bounds_checked() {
        let guest = guest();
        let array = guest.create_string_array(1).unwrap();
        let string = guest.alloc_string("x");
        let err = guest.set_to_string_array(array, 1, string).unwrap_err();
        assert!(matches!(err, BridgeError::IndexOutOfBounds { index: 1, length: 1 }));
        guest.set_to_string_array(array, 0, string).unwrap();
        assert_eq!(guest.string_array(array).unwrap(), vec![Some(string)]);
    }

    #[test]
    fn missing_exports_are_reported() {
        let guest = guest();
        let string = guest.alloc_string("x");
        guest.set_export(OptionalExport::StringLength, false);
        assert!(!guest.provides(OptionalExport::StringLength));
        let err = marshal::guest_string_to_host(&guest, string).unwrap_err();
        assert!(matches!(err, BridgeError::MissingExport("stringLength")));
    }

    #[test]
    fn freed_handles_are_stale() {
        let guest = guest();
        let string = guest.alloc_string("gone");
        assert!(guest.free(string));
        assert!(!guest.is_live(string));
        assert!(matches!(guest.string_value(string), Err(BridgeError::StaleHandle(_))));
        assert!(!guest.free(string));
    }

    #[test]
    fn unknown_programs_fail_to_load() {
        let err = ReferenceLoader::new()
            .instantiate("missing.wasm", ImportObject::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "failed to load module 'missing.wasm': no such program");
    }
}
