//! End-to-end bootstrap walkthrough: running-set registration, discovery,
//! container wiring, and the four-phase pipeline.
//!
//! ```text
//! cargo run --example bootstrap
//! ```

use mmg_busboot::config::{default_probe_dir, BusConfig, JsonFileSource};
use mmg_busboot::loader::NativeLoader;
use mmg_busboot::prelude::*;
use mmg_busboot::registry::{
    ComponentBuilder, ComponentRegistrar, ComponentRegistration, ComponentSource,
};
use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct TransportWarmup;

#[async_trait::async_trait]
impl NeedsInitialization for TransportWarmup {
    async fn init(&mut self, config: &mut BusConfig) -> anyhow::Result<()> {
        tracing::info!(endpoint = %config.endpoint_name(), "warming up transport");
        Ok(())
    }
}

#[derive(Default)]
struct StartupBanner;

#[async_trait::async_trait]
impl RunWhenComplete for StartupBanner {
    async fn run(&self, config: &BusConfig) -> anyhow::Result<()> {
        tracing::info!(
            endpoint = %config.endpoint_name(),
            send_only = config.send_only(),
            "endpoint initialized"
        );
        Ok(())
    }
}

mmg_busboot::register_component_types! {
    TransportWarmup: NeedsInitialization;
    StartupBanner: RunWhenComplete;
}

/// A toy container: the real collaborator would be the endpoint's DI
/// container, driven through these same two traits.
#[derive(Default)]
struct DemoContainer {
    registrations: Vec<ComponentRegistration>,
}

struct DemoRegistrar(Arc<Mutex<DemoContainer>>);
struct DemoBuilder(Arc<Mutex<DemoContainer>>);

impl ComponentRegistrar for DemoRegistrar {
    fn register(&mut self, registration: ComponentRegistration) {
        tracing::info!(component = %registration.type_name, "registering component");
        self.0.lock().unwrap().registrations.push(registration);
    }
    fn has_component(&self, type_name: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .registrations
            .iter()
            .any(|r| r.type_name == type_name)
    }
}

impl ComponentBuilder for DemoBuilder {
    fn build_section(&self, section: TypeId) -> Option<Box<dyn Any + Send + Sync>> {
        self.0
            .lock()
            .unwrap()
            .registrations
            .iter()
            .find_map(|r| match &r.source {
                ComponentSource::ConfigSection { section: s, provide } if *s == section => {
                    Some(provide())
                }
                _ => None,
            })
    }
    fn build_all_when_complete(&self) -> Vec<Box<dyn RunWhenComplete>> {
        self.0
            .lock()
            .unwrap()
            .registrations
            .iter()
            .filter_map(|r| match &r.source {
                ComponentSource::WhenComplete(ctor) => Some(ctor()),
                _ => None,
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    // 默认探测目录：可执行文件所在目录；显式 ScanOptions 始终优先
    let probe = default_probe_dir();
    tracing::info!(dir = %probe.display(), "scanning for component binaries");
    let mut config = BusConfig::scan_with(ScanOptions::new(probe), &mut NativeLoader::new())?;
    for diagnostic in config.catalog().diagnostics() {
        tracing::warn!(binary = %diagnostic.binary, reason = %diagnostic.reason, "binary skipped");
    }

    config.define_endpoint_name(|| "demo-endpoint".to_string());
    config.set_configuration_source(Box::new(JsonFileSource::new("endpoint.json")));

    let container = Arc::new(Mutex::new(DemoContainer::default()));
    config.set_registrar(Box::new(DemoRegistrar(container.clone())));
    config.set_builder(Arc::new(DemoBuilder(container)));

    config.on_complete(|cfg| {
        tracing::info!(state = ?cfg.state(), "completion listeners notified");
    });

    config.initialize().await?;
    Ok(())
}
