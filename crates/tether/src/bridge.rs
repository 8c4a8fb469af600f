//! Loading a guest module and running its entry point.

use std::{fmt, future::Ready, rc::Rc};

use crate::{
    config::BridgeConfig,
    context::{BridgeContext, CollectionReport},
    dispatch::DispatchTable,
    error::BridgeResult,
    guest::GuestInstance,
    hash::DEFAULT_HASH_SEED,
    imports::{self, ConsoleSink, ImportObject, LogConsole},
    marshal,
    value::HostValue,
};

/// Fetches and instantiates guest modules.
///
/// How a locator maps to module bytes and how the module is instantiated is
/// up to the implementation; the bridge only supplies the import object.
pub trait ModuleLoader {
    fn instantiate(&self, locator: &str, imports: ImportObject) -> BridgeResult<Rc<dyn GuestInstance>>;
}

type InstallHook = Box<dyn FnOnce(&mut ImportObject)>;

/// Options for [`Bridge::load`].
pub struct BridgeOptions {
    install_imports: Option<InstallHook>,
    globals: DispatchTable,
    console: Rc<dyn ConsoleSink>,
    hash_seed: u32,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            install_imports: None,
            globals: DispatchTable::new(),
            console: Rc::new(LogConsole),
            hash_seed: DEFAULT_HASH_SEED,
        }
    }
}

impl fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("install_imports", &self.install_imports.is_some())
            .field("globals", &self.globals.names().collect::<Vec<_>>())
            .field("hash_seed", &self.hash_seed)
            .finish_non_exhaustive()
    }
}

impl BridgeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options described by a configuration file.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            globals: config.dispatch_table()?,
            console: imports::sink_for(config.console),
            hash_seed: config.hash_seed,
            ..Self::default()
        })
    }

    /// Hook that can extend or replace imports before instantiation.
    #[must_use]
    pub fn install_imports(mut self, hook: impl FnOnce(&mut ImportObject) + 'static) -> Self {
        self.install_imports = Some(Box::new(hook));
        self
    }

    /// Replaces the global dispatch table.
    #[must_use]
    pub fn globals(mut self, globals: DispatchTable) -> Self {
        self.globals = globals;
        self
    }

    /// Makes one host value reachable as a global.
    #[must_use]
    pub fn global(mut self, name: &str, value: HostValue) -> Self {
        self.globals.bind(name, value);
        self
    }

    #[must_use]
    pub fn console(mut self, sink: Rc<dyn ConsoleSink>) -> Self {
        self.console = sink;
        self
    }

    /// Seed of the identity hash sequence. Zero selects the default seed.
    #[must_use]
    pub fn hash_seed(mut self, seed: u32) -> Self {
        self.hash_seed = seed;
        self
    }
}

/// Future returned by [`Bridge::main`].
///
/// The guest entry point runs synchronously, so the future is already
/// complete when it is returned; it exists so callers can treat `main` like
/// any other asynchronous entry point.
pub type MainFuture = Ready<BridgeResult<()>>;

/// One instantiated guest module together with its bridge context.
pub struct Bridge {
    instance: Rc<dyn GuestInstance>,
    context: Rc<BridgeContext>,
}

impl Bridge {
    /// Builds the default imports, runs the install hook, instantiates the
    /// module behind `locator` and binds it to a fresh context.
    pub fn load(loader: &dyn ModuleLoader, locator: &str, options: BridgeOptions) -> BridgeResult<Self> {
        let BridgeOptions {
            install_imports,
            globals,
            console,
            hash_seed,
        } = options;
        let context = Rc::new(BridgeContext::new(hash_seed, globals, console));
        let mut import_object = ImportObject::new();
        imports::install_defaults(&mut import_object, &context);
        if let Some(hook) = install_imports {
            hook(&mut import_object);
        }

        let instance = loader.instantiate(locator, import_object)?;
        context.bind(&instance);
        tracing::debug!(locator, "guest module instantiated");
        Ok(Self { instance, context })
    }

    /// Runs the guest entry point with `args`.
    ///
    /// The arguments are marshalled into a guest string array and the entry
    /// point is called once. An error raised by the guest rejects the future
    /// verbatim; nothing is retried.
    pub fn main<S: AsRef<str>>(&self, args: &[S]) -> MainFuture {
        let result = self.run_main(args);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "guest main rejected");
        }
        std::future::ready(result)
    }

    fn run_main<S: AsRef<str>>(&self, args: &[S]) -> BridgeResult<()> {
        let guest = &*self.instance;
        let array = marshal::string_array_to_guest(guest, args)?;
        guest.main(array)
    }

    /// The raw module instance.
    #[must_use]
    pub fn instance(&self) -> &Rc<dyn GuestInstance> {
        &self.instance
    }

    /// The raw module instance as its concrete type.
    #[must_use]
    pub fn instance_as<T: 'static>(&self) -> Option<&T> {
        self.instance.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn context(&self) -> &Rc<BridgeContext> {
        &self.context
    }

    /// Forces a collection pass; see [`BridgeContext::collect_garbage`].
    pub fn collect_garbage(&self) -> CollectionReport {
        self.context.collect_garbage()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.context.registry_stats())
            .finish_non_exhaustive()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.context.console().flush();
    }
}
