//! The four-phase initialization pipeline.
//!
//! Phase order is the contract: run-when-complete types are only *registered*
//! first, because they commonly need constructor-injected dependencies that
//! exist only once the container graph is fully wired; the three remaining
//! phases construct their types directly and run them before that point.

use crate::config::{BootState, BusConfig};
use crate::error::{BusbootError, Result};
use crate::registry::{Capability, SetupFn};

pub(crate) async fn run(config: &mut BusConfig) -> Result<()> {
    // 单向闩锁：流水线整个进程内至多完整执行一次
    if config.state() == BootState::Initialized {
        tracing::debug!("initialize() called again; pipeline already ran");
        return Ok(());
    }

    let catalog = config.catalog_arc();

    // Phase 1: hand every run-when-complete type to the registrar. Nothing is
    // instantiated here. A registrar is only required if there is work;
    // 已在挂载 registrar 时注册过的条目按构造指针去重，不会重复注册。
    let when_complete: Vec<_> = catalog.matching(Capability::RunWhenComplete).collect();
    if !when_complete.is_empty() {
        config.register_when_complete_entries(when_complete.iter().copied())?;
    }

    // Phases 2-4: construct directly and invoke, in catalog order. A failing
    // initializer aborts the rest of the pipeline unretried.
    for (phase, capability) in [
        ("run-before-configuration", Capability::RunBeforeConfiguration),
        ("needs-initialization", Capability::NeedsInitialization),
        ("run-before-finalized", Capability::RunBeforeFinalized),
    ] {
        let setups: Vec<(Option<String>, SetupFn)> = catalog
            .matching(capability)
            .filter_map(|e| e.setup_for(capability).map(|s| (e.qualified_name.clone(), s)))
            .collect();
        for (name, setup) in setups {
            tracing::debug!(
                phase,
                component = name.as_deref().unwrap_or("<unnamed>"),
                "running initializer"
            );
            setup(config).await.map_err(BusbootError::Component)?;
        }
    }

    // 先落锁再通知：监听器观察到的状态必须已是 Initialized
    config.mark_initialized();
    config.notify_complete();

    // Last: resolve the complete phase-1 set through the builder and run it.
    if !when_complete.is_empty() {
        let builder = config.builder()?.clone();
        for component in builder.build_all_when_complete() {
            component.run(config).await.map_err(BusbootError::Component)?;
        }
    }
    Ok(())
}
