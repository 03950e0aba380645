//! The endpoint configuration context: the catalog, the container seams, and
//! the boot state machine.
//!
//! One `BusConfig` is created per bootstrap and passed explicitly to
//! everything that needs it; there is no process-wide instance and no ambient
//! access. Independent configurations can coexist, which is what the tests do.

use crate::catalog::TypeCatalog;
use crate::error::{BusbootError, Result};
use crate::loader::{BinaryLoader, NativeLoader};
use crate::registry::{
    Capability, ComponentBuilder, ComponentRegistrar, ComponentRegistration, ComponentSource,
    Lifetime, TypeEntry, WhenCompleteCtor,
};
use crate::scan::{self, ScanOptions};
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the bootstrap stands. Monotonic; `Initialized` is the one-shot latch
/// behind [`BusConfig::initialize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootState {
    /// Catalog established, no container attached yet.
    Unconfigured,
    /// A registrar has been supplied.
    Configured,
    /// The pipeline ran to completion. Never leaves this state.
    Initialized,
}

/// Pluggable fallback consulted by [`BusConfig::config_section`] when no
/// provider component answers for the section type.
pub trait ConfigurationSource: Send + Sync {
    fn section(&self, name: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// A source with nothing in it; the default.
pub struct NullConfigSource;

impl ConfigurationSource for NullConfigSource {
    fn section(&self, _name: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Reads named sections from one JSON document on disk. A missing file is an
/// empty source, not an error.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigurationSource for JsonFileSource {
    fn section(&self, name: &str) -> anyhow::Result<Option<serde_json::Value>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        let root: serde_json::Value = serde_json::from_str(&text)?;
        Ok(root.get(name).cloned())
    }
}

type EndpointNameFn = Box<dyn Fn() -> String + Send + Sync>;
type CompletionListener = Box<dyn Fn(&BusConfig) + Send + Sync>;

pub struct BusConfig {
    catalog: Arc<TypeCatalog>,
    registrar: Option<Box<dyn ComponentRegistrar>>,
    builder: Option<Arc<dyn ComponentBuilder>>,
    endpoint_name: EndpointNameFn,
    send_only: bool,
    state: BootState,
    container_wired: bool,
    // 已注册的 run-when-complete 构造指针：按条目身份去重，名字可能缺失。
    when_complete_seen: Vec<WhenCompleteCtor>,
    listeners: Vec<CompletionListener>,
    fallback_source: Box<dyn ConfigurationSource>,
}

impl BusConfig {
    fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            registrar: None,
            builder: None,
            endpoint_name: Box::new(default_endpoint_name),
            send_only: false,
            state: BootState::Unconfigured,
            container_wired: false,
            when_complete_seen: Vec::new(),
            listeners: Vec::new(),
            fallback_source: Box::new(NullConfigSource),
        }
    }

    /// Bootstrap against the default probe directory (the running
    /// executable's directory) with the native loader.
    pub fn bootstrap() -> Result<Self> {
        Self::scan_with(ScanOptions::new(default_probe_dir()), &mut NativeLoader::new())
    }

    /// Bootstrap by scanning per `options` and loading what the scan yields.
    pub fn scan_with(options: ScanOptions, loader: &mut dyn BinaryLoader) -> Result<Self> {
        Self::from_binaries(scan::scan(options), loader)
    }

    /// Bootstrap from an explicit binary set.
    pub fn from_binaries<I>(binaries: I, loader: &mut dyn BinaryLoader) -> Result<Self>
    where
        I: IntoIterator<Item = scan::CandidateBinary>,
    {
        Ok(Self::new(TypeCatalog::extract(binaries, loader)?))
    }

    /// Bootstrap from an explicit type set. The catalog retention filter
    /// still applies.
    pub fn with_types<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = TypeEntry>,
    {
        Self::new(TypeCatalog::from_entries(entries))
    }

    pub fn from_catalog(catalog: TypeCatalog) -> Self {
        Self::new(catalog)
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub(crate) fn catalog_arc(&self) -> Arc<TypeCatalog> {
        self.catalog.clone()
    }

    /// Replaces the catalog. After initialization the pipeline will not run
    /// again, so a replacement is ignored with a warning.
    pub fn set_types<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = TypeEntry>,
    {
        // 初始化完成后禁止替换目录：忽略并发出警告
        if self.state == BootState::Initialized {
            tracing::warn!("set_types called after initialize(); ignoring");
            return;
        }
        self.catalog = Arc::new(TypeCatalog::from_entries(entries));
    }

    /// Attaches the registrar. The first attachment wires the container:
    /// every cataloged configuration provider is registered per-call, and
    /// already-cataloged run-when-complete types are registered ahead of
    /// phase 1 (which skips them via `has_component`).
    pub fn set_registrar(&mut self, registrar: Box<dyn ComponentRegistrar>) {
        self.registrar = Some(registrar);
        if self.state == BootState::Unconfigured {
            self.state = BootState::Configured;
        }
        // 接线只做一次：配置提供者按调用生命周期注册进容器
        if !self.container_wired {
            self.container_wired = true;
            self.wire_container();
        }
    }

    pub fn set_builder(&mut self, builder: Arc<dyn ComponentBuilder>) {
        self.builder = Some(builder);
    }

    pub fn registrar(&mut self) -> Result<&mut dyn ComponentRegistrar> {
        match self.registrar.as_deref_mut() {
            Some(r) => Ok(r),
            None => Err(BusbootError::RegistrarNotSet),
        }
    }

    pub fn builder(&self) -> Result<&Arc<dyn ComponentBuilder>> {
        self.builder.as_ref().ok_or(BusbootError::BuilderNotSet)
    }

    pub fn endpoint_name(&self) -> String {
        (self.endpoint_name)()
    }

    pub fn define_endpoint_name<F>(&mut self, f: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.endpoint_name = Box::new(f);
    }

    pub fn send_only(&self) -> bool {
        self.send_only
    }

    pub fn set_send_only(&mut self, send_only: bool) {
        self.send_only = send_only;
    }

    pub fn set_configuration_source(&mut self, source: Box<dyn ConfigurationSource>) {
        self.fallback_source = source;
    }

    /// Registers a listener fired once, right after the latch is set.
    pub fn on_complete<F>(&mut self, listener: F)
    where
        F: Fn(&BusConfig) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn notify_complete(&self) {
        for listener in &self.listeners {
            listener(self);
        }
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.state = BootState::Initialized;
    }

    /// Applies `action` to every concrete cataloged type carrying
    /// `capability`, in catalog order.
    pub fn for_each_matching<F>(&self, capability: Capability, mut action: F)
    where
        F: FnMut(&TypeEntry),
    {
        for entry in self.catalog.matching(capability) {
            action(entry);
        }
    }

    /// Resolves the configuration section of type `T`: a registered provider
    /// component wins when the container is attached and one answers;
    /// otherwise the fallback source is consulted under the section's short
    /// type name.
    pub fn config_section<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        // 优先问容器里注册的提供者；没有命中再退回可插拔的默认配置源
        if self.registrar.is_some() {
            if let Some(builder) = &self.builder {
                if let Some(value) = builder.build_section(TypeId::of::<T>()) {
                    let section = value.downcast::<T>().map_err(|_| {
                        BusbootError::Other("configuration provider produced a foreign section type")
                    })?;
                    return Ok(Some(*section));
                }
            }
        }
        let name = short_type_name::<T>();
        match self.fallback_source.section(name)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BusbootError::Dynamic(format!("config section {name}: {e}"))),
        }
    }

    /// Like [`config_section`](Self::config_section), but absence is an error.
    pub fn require_section<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.config_section::<T>()?
            .ok_or(BusbootError::MissingConfig(std::any::type_name::<T>()))
    }

    /// Runs the initialization pipeline. Idempotent: once the state reaches
    /// `Initialized`, further calls are no-ops.
    pub async fn initialize(&mut self) -> Result<()> {
        crate::init::run(self).await
    }

    fn wire_container(&mut self) {
        // The registrar is briefly taken so the catalog can be walked while
        // registering against it.
        let Some(mut registrar) = self.registrar.take() else {
            return;
        };
        let catalog = self.catalog.clone();
        for entry in catalog.entries().iter().filter(|e| e.is_concrete()) {
            if let Some(spec) = &entry.config_provider {
                tracing::debug!(
                    provider = entry.qualified_name.as_deref().unwrap_or("<unnamed>"),
                    section = (spec.section_name)(),
                    "registering configuration provider"
                );
                registrar.register(ComponentRegistration {
                    type_name: entry.qualified_name.clone().unwrap_or_default(),
                    lifetime: Lifetime::PerCall,
                    source: ComponentSource::ConfigSection {
                        section: (spec.section)(),
                        provide: spec.provide,
                    },
                });
            }
        }
        self.registrar = Some(registrar);
        // 注册刚放回，下面的调用不可能因缺少 registrar 失败。
        let _ = self.register_when_complete_entries(catalog.matching(Capability::RunWhenComplete));
    }

    /// Registers run-when-complete types per-call. Idempotency is keyed on
    /// the entry's constructor pointer, so unnamed entries dedup too; named
    /// entries additionally skip types the container already knows.
    pub(crate) fn register_when_complete_entries<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TypeEntry>,
    {
        let Some(mut registrar) = self.registrar.take() else {
            return Err(BusbootError::RegistrarNotSet);
        };
        for entry in entries {
            let Some(ctor) = entry.when_complete_ctor() else {
                continue;
            };
            if self
                .when_complete_seen
                .iter()
                .any(|seen| *seen as *const () == ctor as *const ())
            {
                continue;
            }
            let type_name = entry.qualified_name.clone().unwrap_or_default();
            if !type_name.is_empty() && registrar.has_component(&type_name) {
                self.when_complete_seen.push(ctor);
                continue;
            }
            registrar.register(ComponentRegistration {
                type_name,
                lifetime: Lifetime::PerCall,
                source: ComponentSource::WhenComplete(ctor),
            });
            self.when_complete_seen.push(ctor);
        }
        self.registrar = Some(registrar);
        Ok(())
    }
}

fn default_endpoint_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "endpoint".to_string())
}

/// Convenience default for [`BusConfig::bootstrap`]: the directory the
/// running executable sits in. Explicit options always take precedence.
pub fn default_probe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
