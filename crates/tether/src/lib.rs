#![doc = include_str!("../../../README.md")]
#![expect(clippy::float_cmp, reason = "host number semantics need exact comparisons")]

mod bridge;
mod class;
mod config;
mod context;
pub mod dispatch;
mod error;
mod guest;
mod hash;
pub mod imports;
mod liveness;
pub mod marshal;
pub mod reference;
mod registry;
mod trampoline;
mod value;
mod weak;

pub use crate::{
    bridge::{Bridge, BridgeOptions, MainFuture, ModuleLoader},
    class::{WrapperClass, define_method, define_property, sanitize_class_name, synthesize_class},
    config::{BridgeConfig, ConsoleMode},
    context::{BridgeContext, COLLECT_INTERVAL, CollectionReport},
    dispatch::{BuiltinGlobal, DispatchTable},
    error::{BridgeError, BridgeResult},
    guest::{GuestEntry, GuestHandle, GuestInstance, GuestValue, HandleTable, OptionalExport},
    hash::{DEFAULT_HASH_SEED, IdentityHasher, bigint_hash, number_hash},
    imports::{ImportFn, ImportObject},
    liveness::{Collected, LivenessOracle, ReportChannel},
    registry::{IdentityRegistry, RegistryStats, SweepStats},
    trampoline::{as_function, call_function, call_method, construct, function_as_object},
    value::{FunctionOrigin, HostObject, HostString, HostValue, NativeCtor, NativeFn, Symbol, TypeTag},
    weak::{create_string_weak_ref, create_weak_ref, deref, string_deref},
};
