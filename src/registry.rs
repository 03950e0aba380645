//! The component registry: capability tags, type entries, and the collaborator
//! interfaces the engine drives a container through.
//!
//! A type takes part in the bootstrap pipeline by registering an entry against
//! one or more capability tags, either compiled into the running set
//! (`register_component_types!`) or exported from a component pack binary
//! (`export_manifest!`). There is no structural inspection anywhere; the
//! registry is the single source of truth for what a binary contains.

use crate::config::BusConfig;
use async_trait::async_trait;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;

/// The four recognized pipeline capabilities, in phase order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Registered with the container in phase 1, resolved and run through the
    /// builder after the pipeline completes.
    RunWhenComplete,
    /// Constructed directly and run in phase 2, before configuration settles.
    RunBeforeConfiguration,
    /// Constructed directly and initialized in phase 3.
    NeedsInitialization,
    /// Constructed directly and run in phase 4, last before the latch.
    RunBeforeFinalized,
}

/// Shape of a cataloged type. Only `Concrete` entries are processed by the
/// pipeline phases; `Value` entries never enter the catalog at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeShape {
    Concrete,
    Abstract,
    Value,
}

/// Component lifetime handed to the registrar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// New instance per resolution.
    PerCall,
    Singleton,
}

#[async_trait]
pub trait RunBeforeConfiguration: Send {
    async fn run(&mut self, config: &mut BusConfig) -> anyhow::Result<()>;
}

#[async_trait]
pub trait NeedsInitialization: Send {
    async fn init(&mut self, config: &mut BusConfig) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RunBeforeFinalized: Send {
    async fn run(&mut self, config: &mut BusConfig) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RunWhenComplete: Send + Sync {
    async fn run(&self, config: &BusConfig) -> anyhow::Result<()>;
}

/// A component that supplies one configuration section of type `T`.
pub trait ProvideConfiguration<T>: Send {
    fn provide(&self) -> T;
}

/// Phase entry point: constructs the type directly and invokes its
/// capability method against the live configuration.
pub type SetupFn = for<'a> fn(
    config: &'a mut BusConfig,
) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Constructor handed to the registrar for phase-1 registrations. A real
/// container is free to ignore it and wire the type its own way.
pub type WhenCompleteCtor = fn() -> Box<dyn RunWhenComplete>;

/// Produces the section value a configuration provider supplies.
pub type ProvideSectionFn = fn() -> Box<dyn Any + Send + Sync>;

/// One capability carried by a type, with the means to act on it.
#[derive(Clone, Copy)]
pub enum CapabilityBinding {
    RunWhenComplete(WhenCompleteCtor),
    RunBeforeConfiguration(SetupFn),
    NeedsInitialization(SetupFn),
    RunBeforeFinalized(SetupFn),
}

impl CapabilityBinding {
    pub fn tag(&self) -> Capability {
        match self {
            CapabilityBinding::RunWhenComplete(_) => Capability::RunWhenComplete,
            CapabilityBinding::RunBeforeConfiguration(_) => Capability::RunBeforeConfiguration,
            CapabilityBinding::NeedsInitialization(_) => Capability::NeedsInitialization,
            CapabilityBinding::RunBeforeFinalized(_) => Capability::RunBeforeFinalized,
        }
    }

    fn setup(&self) -> Option<SetupFn> {
        match self {
            CapabilityBinding::RunWhenComplete(_) => None,
            CapabilityBinding::RunBeforeConfiguration(f)
            | CapabilityBinding::NeedsInitialization(f)
            | CapabilityBinding::RunBeforeFinalized(f) => Some(*f),
        }
    }
}

/// Declares that a type provides exactly one configuration section.
/// Identities are deferred fn pointers so entries stay plain data.
#[derive(Clone, Copy)]
pub struct ConfigProviderSpec {
    pub section: fn() -> TypeId,
    pub section_name: fn() -> &'static str,
    pub provide: ProvideSectionFn,
}

/// One candidate type as the catalog sees it.
#[derive(Clone)]
pub struct TypeEntry {
    /// Qualified name when known; unnamed entries are legal and are retained
    /// by the catalog filter (no name cannot match an exclusion prefix).
    pub qualified_name: Option<String>,
    pub shape: TypeShape,
    pub bindings: SmallVec<[CapabilityBinding; 4]>,
    pub config_provider: Option<ConfigProviderSpec>,
}

impl TypeEntry {
    /// Concrete entry named after `T`.
    pub fn of<T: 'static>() -> Self {
        Self::named(std::any::type_name::<T>(), TypeShape::Concrete)
    }

    pub fn named(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            qualified_name: Some(name.into()),
            shape,
            bindings: SmallVec::new(),
            config_provider: None,
        }
    }

    pub fn unnamed(shape: TypeShape) -> Self {
        Self {
            qualified_name: None,
            shape,
            bindings: SmallVec::new(),
            config_provider: None,
        }
    }

    pub fn with_binding(mut self, binding: CapabilityBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_provider(mut self, spec: ConfigProviderSpec) -> Self {
        self.config_provider = Some(spec);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.bindings.iter().any(|b| b.tag() == capability)
    }

    pub fn is_concrete(&self) -> bool {
        self.shape == TypeShape::Concrete
    }

    pub fn setup_for(&self, capability: Capability) -> Option<SetupFn> {
        self.bindings
            .iter()
            .find(|b| b.tag() == capability)
            .and_then(|b| b.setup())
    }

    pub fn when_complete_ctor(&self) -> Option<WhenCompleteCtor> {
        self.bindings.iter().find_map(|b| match b {
            CapabilityBinding::RunWhenComplete(ctor) => Some(*ctor),
            _ => None,
        })
    }
}

impl std::fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEntry")
            .field("qualified_name", &self.qualified_name)
            .field("shape", &self.shape)
            .field(
                "capabilities",
                &self.bindings.iter().map(|b| b.tag()).collect::<Vec<_>>(),
            )
            .field("provides_config", &self.config_provider.is_some())
            .finish()
    }
}

// --- binding constructors (used by the registration macros) ---

pub fn bind_run_before_configuration<T>() -> CapabilityBinding
where
    T: RunBeforeConfiguration + Default + Send + 'static,
{
    fn thunk<T: RunBeforeConfiguration + Default + Send + 'static>(
        config: &mut BusConfig,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut instance = T::default();
            instance.run(config).await
        })
    }
    CapabilityBinding::RunBeforeConfiguration(thunk::<T>)
}

pub fn bind_needs_initialization<T>() -> CapabilityBinding
where
    T: NeedsInitialization + Default + Send + 'static,
{
    fn thunk<T: NeedsInitialization + Default + Send + 'static>(
        config: &mut BusConfig,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut instance = T::default();
            instance.init(config).await
        })
    }
    CapabilityBinding::NeedsInitialization(thunk::<T>)
}

pub fn bind_run_before_finalized<T>() -> CapabilityBinding
where
    T: RunBeforeFinalized + Default + Send + 'static,
{
    fn thunk<T: RunBeforeFinalized + Default + Send + 'static>(
        config: &mut BusConfig,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut instance = T::default();
            instance.run(config).await
        })
    }
    CapabilityBinding::RunBeforeFinalized(thunk::<T>)
}

pub fn bind_run_when_complete<T>() -> CapabilityBinding
where
    T: RunWhenComplete + Default + 'static,
{
    fn ctor<T: RunWhenComplete + Default + 'static>() -> Box<dyn RunWhenComplete> {
        Box::new(T::default())
    }
    CapabilityBinding::RunWhenComplete(ctor::<T>)
}

/// Provider spec for `P: ProvideConfiguration<T>`: one section type per
/// registration, by design.
pub fn provides_section<P, T>() -> ConfigProviderSpec
where
    P: ProvideConfiguration<T> + Default + 'static,
    T: Send + Sync + 'static,
{
    fn section_id<T: 'static>() -> TypeId {
        TypeId::of::<T>()
    }
    fn section_name<T>() -> &'static str {
        std::any::type_name::<T>()
    }
    fn provide<P, T>() -> Box<dyn Any + Send + Sync>
    where
        P: ProvideConfiguration<T> + Default,
        T: Send + Sync + 'static,
    {
        Box::new(P::default().provide())
    }
    ConfigProviderSpec {
        section: section_id::<T>,
        section_name: section_name::<T>,
        provide: provide::<P, T>,
    }
}

// --- collaborator interfaces (consumed, never implemented here) ---

/// What a component registration tells the container to resolve later.
pub enum ComponentSource {
    WhenComplete(WhenCompleteCtor),
    ConfigSection {
        section: TypeId,
        provide: ProvideSectionFn,
    },
}

pub struct ComponentRegistration {
    pub type_name: String,
    pub lifetime: Lifetime,
    pub source: ComponentSource,
}

/// Records which types are available for later resolution.
pub trait ComponentRegistrar: Send + Sync {
    fn register(&mut self, registration: ComponentRegistration);
    fn has_component(&self, type_name: &str) -> bool;
}

/// Resolves previously registered types.
pub trait ComponentBuilder: Send + Sync {
    /// Builds the section value of a registered configuration provider.
    fn build_section(&self, section: TypeId) -> Option<Box<dyn Any + Send + Sync>>;
    /// Resolves the complete set of phase-1 registrations, in the builder's
    /// own order.
    fn build_all_when_complete(&self) -> Vec<Box<dyn RunWhenComplete>>;
}

// --- running set ---

/// One type compiled into the running process, collected via inventory.
/// `binary` is the logical name of the unit that defines the type.
pub struct RunningSetEntry {
    pub binary: &'static str,
    pub entry: fn() -> TypeEntry,
}

inventory::collect!(RunningSetEntry);

/// Logical names of the binaries represented in the running set, deduplicated,
/// in registration order.
pub fn running_binaries() -> Vec<&'static str> {
    let mut seen: Vec<&'static str> = Vec::new();
    for reg in inventory::iter::<RunningSetEntry> {
        if !seen.contains(&reg.binary) {
            seen.push(reg.binary);
        }
    }
    seen
}

/// All registered entries belonging to one running-set binary.
pub fn running_entries(binary: &str) -> Vec<TypeEntry> {
    inventory::iter::<RunningSetEntry>
        .into_iter()
        .filter(|reg| reg.binary == binary)
        .map(|reg| (reg.entry)())
        .collect()
}

// --- manifest ABI for component pack binaries ---
//
// 组件包与宿主分别编译，Rust ABI 不稳定；跨边界只允许 #[repr(C)] 布局：
// UTF-8 指针/长度对 + 按能力分槽的函数指针（空指针表示缺省）。
// 宿主侧在 loader 中将 RawTypeEntry 还原为 TypeEntry。

/// Bumped whenever the raw manifest layout changes.
pub const MANIFEST_ABI: u32 = 1;

/// Symbol a component pack binary exports.
pub const MANIFEST_SYMBOL: &[u8] = b"mmg_busboot_manifest";

impl TypeShape {
    pub fn as_raw(self) -> u32 {
        match self {
            TypeShape::Concrete => 0,
            TypeShape::Abstract => 1,
            TypeShape::Value => 2,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TypeShape::Concrete),
            1 => Some(TypeShape::Abstract),
            2 => Some(TypeShape::Value),
            _ => None,
        }
    }
}

/// One type entry in the C-compatible layout that crosses the component pack
/// boundary. The name is a UTF-8 pointer/length pair (null for unnamed); each
/// capability occupies one slot, null meaning the capability is not carried.
#[repr(C)]
pub struct RawTypeEntry {
    pub name: *const u8,
    pub name_len: usize,
    pub shape: u32,
    pub run_when_complete: *const (),
    pub run_before_configuration: *const (),
    pub needs_initialization: *const (),
    pub run_before_finalized: *const (),
    pub section_id: *const (),
    pub section_name: *const (),
    pub provide_section: *const (),
}

impl RawTypeEntry {
    /// Concrete raw entry named after `T`. The name points into the pack's
    /// static memory and stays valid while the library is loaded.
    pub fn of<T: 'static>() -> Self {
        let name = std::any::type_name::<T>();
        RawTypeEntry {
            name: name.as_ptr(),
            name_len: name.len(),
            shape: TypeShape::Concrete.as_raw(),
            run_when_complete: std::ptr::null(),
            run_before_configuration: std::ptr::null(),
            needs_initialization: std::ptr::null(),
            run_before_finalized: std::ptr::null(),
            section_id: std::ptr::null(),
            section_name: std::ptr::null(),
            provide_section: std::ptr::null(),
        }
    }

    pub fn with_binding(mut self, binding: CapabilityBinding) -> Self {
        match binding {
            CapabilityBinding::RunWhenComplete(f) => self.run_when_complete = f as *const (),
            CapabilityBinding::RunBeforeConfiguration(f) => {
                self.run_before_configuration = f as *const ()
            }
            CapabilityBinding::NeedsInitialization(f) => self.needs_initialization = f as *const (),
            CapabilityBinding::RunBeforeFinalized(f) => self.run_before_finalized = f as *const (),
        }
        self
    }

    pub fn with_provider(mut self, spec: ConfigProviderSpec) -> Self {
        self.section_id = spec.section as *const ();
        self.section_name = spec.section_name as *const ();
        self.provide_section = spec.provide as *const ();
        self
    }
}

/// C-compatible manifest returned by the exported symbol.
#[repr(C)]
pub struct RawManifest {
    pub abi: u32,
    pub name: *const u8,
    pub name_len: usize,
    pub entries: *const RawTypeEntry,
    pub entries_len: usize,
}

/// Pack-side helper behind `export_manifest!`. The entry array is leaked on
/// purpose: the host reads it through raw pointers for as long as the library
/// stays loaded, and the library is never unloaded.
pub fn leak_manifest(name: &'static str, entries: Vec<RawTypeEntry>) -> RawManifest {
    let slice: &'static [RawTypeEntry] = Box::leak(entries.into_boxed_slice());
    RawManifest {
        abi: MANIFEST_ABI,
        name: name.as_ptr(),
        name_len: name.len(),
        entries: slice.as_ptr(),
        entries_len: slice.len(),
    }
}

/// Registers component types into the running set of this crate's binary.
///
/// ```ignore
/// mmg_busboot::register_component_types! {
///     TransportWarmup: NeedsInitialization;
///     AuditTap: RunBeforeFinalized + RunWhenComplete;
/// }
/// ```
#[macro_export]
macro_rules! register_component_types {
    ( $( $ty:ty : $cap:ident $( + $cap_rest:ident )* );+ $(;)? ) => {
        $(
            $crate::inventory::submit! {
                $crate::registry::RunningSetEntry {
                    binary: env!("CARGO_PKG_NAME"),
                    entry: || {
                        let mut entry = $crate::registry::TypeEntry::of::<$ty>();
                        entry = entry.with_binding($crate::__capability_binding!($ty, $cap));
                        $( entry = entry.with_binding($crate::__capability_binding!($ty, $cap_rest)); )*
                        entry
                    },
                }
            }
        )+
    };
}

/// Registers a configuration provider into the running set:
/// `register_config_provider!(Defaults => TransportConfig)`.
#[macro_export]
macro_rules! register_config_provider {
    ( $provider:ty => $section:ty ) => {
        $crate::inventory::submit! {
            $crate::registry::RunningSetEntry {
                binary: env!("CARGO_PKG_NAME"),
                entry: || {
                    $crate::registry::TypeEntry::of::<$provider>().with_provider(
                        $crate::registry::provides_section::<$provider, $section>(),
                    )
                },
            }
        }
    };
}

/// Exports the manifest symbol from a component pack `cdylib`. Only the
/// `#[repr(C)]` raw layout crosses the boundary; the host rebuilds
/// [`TypeEntry`](crate::registry::TypeEntry) values from it after checking
/// the ABI stamp.
///
/// ```ignore
/// mmg_busboot::export_manifest! {
///     TransportWarmup: NeedsInitialization;
///     AuditTap: RunWhenComplete;
/// }
/// ```
#[macro_export]
macro_rules! export_manifest {
    ( $( $ty:ty : $( $cap:ident )++ );+ $(;)? ) => {
        #[no_mangle]
        pub extern "C" fn mmg_busboot_manifest() -> $crate::registry::RawManifest {
            let entries = vec![
                $(
                    {
                        let mut entry = $crate::registry::RawTypeEntry::of::<$ty>();
                        $( entry = entry.with_binding($crate::__capability_binding!($ty, $cap)); )+
                        entry
                    }
                ),+
            ];
            $crate::registry::leak_manifest(env!("CARGO_PKG_NAME"), entries)
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __capability_binding {
    ( $ty:ty, RunWhenComplete ) => {
        $crate::registry::bind_run_when_complete::<$ty>()
    };
    ( $ty:ty, RunBeforeConfiguration ) => {
        $crate::registry::bind_run_before_configuration::<$ty>()
    };
    ( $ty:ty, NeedsInitialization ) => {
        $crate::registry::bind_needs_initialization::<$ty>()
    };
    ( $ty:ty, RunBeforeFinalized ) => {
        $crate::registry::bind_run_before_finalized::<$ty>()
    };
}
