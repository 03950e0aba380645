use mmg_busboot::config::{BootState, BusConfig, JsonFileSource};
use mmg_busboot::error::BusbootError;
use mmg_busboot::registry::{
    bind_needs_initialization, bind_run_before_configuration, bind_run_before_finalized,
    bind_run_when_complete, provides_section, Capability, ComponentBuilder, ComponentRegistrar,
    ComponentRegistration, ComponentSource, NeedsInitialization, ProvideConfiguration,
    RunBeforeConfiguration, RunBeforeFinalized, RunWhenComplete, TypeEntry, TypeShape,
};
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimal container standing in for the real collaborator: records
/// registrations, resolves them naively.
#[derive(Default)]
struct Container {
    registrations: Vec<ComponentRegistration>,
}

struct Registrar(Arc<Mutex<Container>>);
struct Builder(Arc<Mutex<Container>>);

impl ComponentRegistrar for Registrar {
    fn register(&mut self, registration: ComponentRegistration) {
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

impl ComponentBuilder for Builder {
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

fn container() -> (Box<Registrar>, Arc<Builder>, Arc<Mutex<Container>>) {
    let state = Arc::new(Mutex::new(Container::default()));
    (
        Box::new(Registrar(state.clone())),
        Arc::new(Builder(state.clone())),
        state,
    )
}

mod phase_order {
    use super::*;

    static SEQ: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
    static FINAL_RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct BeforeCfg;
    #[async_trait::async_trait]
    impl RunBeforeConfiguration for BeforeCfg {
        async fn run(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            SEQ.lock().unwrap().push("before-configuration");
            Ok(())
        }
    }

    #[derive(Default)]
    struct InitOne;
    #[async_trait::async_trait]
    impl NeedsInitialization for InitOne {
        async fn init(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            SEQ.lock().unwrap().push("needs-initialization");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FinalOne;
    #[async_trait::async_trait]
    impl RunBeforeFinalized for FinalOne {
        async fn run(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            SEQ.lock().unwrap().push("before-finalized");
            FINAL_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CompleteOne;
    #[async_trait::async_trait]
    impl RunWhenComplete for CompleteOne {
        async fn run(&self, config: &BusConfig) -> anyhow::Result<()> {
            assert_eq!(config.state(), BootState::Initialized);
            SEQ.lock().unwrap().push("when-complete");
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn phases_run_in_order_exactly_once() {
        // 目录顺序故意交错；相位顺序必须胜出
        let mut config = BusConfig::with_types(vec![
            TypeEntry::of::<CompleteOne>().with_binding(bind_run_when_complete::<CompleteOne>()),
            TypeEntry::of::<FinalOne>().with_binding(bind_run_before_finalized::<FinalOne>()),
            TypeEntry::of::<BeforeCfg>()
                .with_binding(bind_run_before_configuration::<BeforeCfg>()),
            TypeEntry::of::<InitOne>().with_binding(bind_needs_initialization::<InitOne>()),
        ]);
        let (registrar, builder, _state) = container();
        config.set_registrar(registrar);
        config.set_builder(builder);

        let completions = Arc::new(AtomicUsize::new(0));
        let seen = completions.clone();
        config.on_complete(move |cfg| {
            assert_eq!(cfg.state(), BootState::Initialized);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        config.initialize().await.expect("initialize");
        assert_eq!(
            *SEQ.lock().unwrap(),
            vec![
                "before-configuration",
                "needs-initialization",
                "before-finalized",
                "when-complete"
            ]
        );
        assert_eq!(config.state(), BootState::Initialized);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // Second call is a no-op: no phase re-runs, no second notification.
        config.initialize().await.expect("re-initialize");
        assert_eq!(FINAL_RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(SEQ.lock().unwrap().len(), 4);
    }
}

mod catalog_order {
    use super::*;

    static SEQ: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    #[derive(Default)]
    struct First;
    #[async_trait::async_trait]
    impl NeedsInitialization for First {
        async fn init(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            SEQ.lock().unwrap().push("first");
            Ok(())
        }
    }

    #[derive(Default)]
    struct Second;
    #[async_trait::async_trait]
    impl NeedsInitialization for Second {
        async fn init(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            SEQ.lock().unwrap().push("second");
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_phase_follows_catalog_order() {
        let mut config = BusConfig::with_types(vec![
            TypeEntry::of::<First>().with_binding(bind_needs_initialization::<First>()),
            TypeEntry::of::<Second>().with_binding(bind_needs_initialization::<Second>()),
        ]);
        config.initialize().await.expect("initialize");
        assert_eq!(*SEQ.lock().unwrap(), vec!["first", "second"]);
    }
}

mod phase_failure {
    use super::*;

    static LATE_RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Failing;
    #[async_trait::async_trait]
    impl NeedsInitialization for Failing {
        async fn init(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            anyhow::bail!("transport store unreachable")
        }
    }

    #[derive(Default)]
    struct Late;
    #[async_trait::async_trait]
    impl RunBeforeFinalized for Late {
        async fn run(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
            LATE_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn an_initializer_failure_aborts_the_remaining_pipeline() {
        let mut config = BusConfig::with_types(vec![
            TypeEntry::of::<Failing>().with_binding(bind_needs_initialization::<Failing>()),
            TypeEntry::of::<Late>().with_binding(bind_run_before_finalized::<Late>()),
        ]);
        let err = config.initialize().await.err().expect("must fail");
        assert!(err.to_string().contains("transport store unreachable"));
        assert_eq!(LATE_RUNS.load(Ordering::SeqCst), 0, "phase 4 must not run");
        assert_ne!(config.state(), BootState::Initialized);
    }
}

mod registrar_assignment {
    use super::*;

    static RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Completer;
    #[async_trait::async_trait]
    impl RunWhenComplete for Completer {
        async fn run(&self, _config: &BusConfig) -> anyhow::Result<()> {
            RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registrar_set_before_the_type_is_cataloged_still_registers_it() {
        let mut config = BusConfig::with_types(Vec::<TypeEntry>::new());
        let (registrar, builder, state) = container();
        config.set_registrar(registrar);
        config.set_builder(builder);

        config.set_types(vec![
            TypeEntry::of::<Completer>().with_binding(bind_run_when_complete::<Completer>()),
        ]);
        config.initialize().await.expect("initialize");

        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(state.lock().unwrap().registrations.len(), 1);
    }

    static ANON_RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Anon;
    #[async_trait::async_trait]
    impl RunWhenComplete for Anon {
        async fn run(&self, _config: &BusConfig) -> anyhow::Result<()> {
            ANON_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn an_unnamed_entry_is_registered_exactly_once() {
        // 无名条目没有 has_component 可查，去重必须落在条目身份上。
        let mut config = BusConfig::with_types(vec![TypeEntry::unnamed(TypeShape::Concrete)
            .with_binding(bind_run_when_complete::<Anon>())]);
        let (registrar, builder, state) = container();
        config.set_registrar(registrar);
        assert_eq!(
            state.lock().unwrap().registrations.len(),
            1,
            "wired at assignment time"
        );
        config.set_builder(builder);
        config.initialize().await.expect("initialize");
        assert_eq!(
            state.lock().unwrap().registrations.len(),
            1,
            "phase 1 must not register the unnamed entry again"
        );
        assert_eq!(ANON_RUNS.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct EarlyCompleter;
    #[async_trait::async_trait]
    impl RunWhenComplete for EarlyCompleter {
        async fn run(&self, _config: &BusConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn assignment_time_registration_is_not_repeated_by_phase_one() {
        let mut config = BusConfig::with_types(vec![TypeEntry::of::<EarlyCompleter>()
            .with_binding(bind_run_when_complete::<EarlyCompleter>())]);
        let (registrar, builder, state) = container();
        config.set_registrar(registrar);
        assert_eq!(
            state.lock().unwrap().registrations.len(),
            1,
            "wired at assignment time"
        );
        config.set_builder(builder);
        config.initialize().await.expect("initialize");
        assert_eq!(
            state.lock().unwrap().registrations.len(),
            1,
            "phase 1 must skip an already-registered type"
        );
    }
}

mod config_sections {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ThrottleSection {
        limit: u32,
    }

    #[derive(Default)]
    struct ThrottleDefaults;
    impl ProvideConfiguration<ThrottleSection> for ThrottleDefaults {
        fn provide(&self) -> ThrottleSection {
            ThrottleSection { limit: 42 }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_registered_provider_wins_over_the_fallback_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("endpoint.json");
        std::fs::write(&file, r#"{"ThrottleSection": {"limit": 7}}"#).expect("write");

        let mut config = BusConfig::with_types(vec![TypeEntry::of::<ThrottleDefaults>()
            .with_provider(provides_section::<ThrottleDefaults, ThrottleSection>())]);
        config.set_configuration_source(Box::new(JsonFileSource::new(&file)));
        let (registrar, builder, _state) = container();
        config.set_registrar(registrar);
        config.set_builder(builder);

        let section = config
            .config_section::<ThrottleSection>()
            .expect("resolve")
            .expect("present");
        assert_eq!(section, ThrottleSection { limit: 42 });
    }

    #[test]
    fn the_fallback_source_answers_when_no_provider_is_registered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("endpoint.json");
        std::fs::write(&file, r#"{"ThrottleSection": {"limit": 7}}"#).expect("write");

        let mut config = BusConfig::with_types(Vec::<TypeEntry>::new());
        config.set_configuration_source(Box::new(JsonFileSource::new(&file)));
        let section = config
            .config_section::<ThrottleSection>()
            .expect("resolve")
            .expect("present");
        assert_eq!(section, ThrottleSection { limit: 7 });
    }

    #[test]
    fn an_empty_source_resolves_to_none_and_require_section_reports_it() {
        let config = BusConfig::with_types(Vec::<TypeEntry>::new());
        assert!(config
            .config_section::<ThrottleSection>()
            .expect("resolve")
            .is_none());
        let err = config.require_section::<ThrottleSection>().err().unwrap();
        assert!(matches!(err, BusbootError::MissingConfig(_)));
    }
}

mod usage_sequence {
    use super::*;

    #[derive(Default)]
    struct Completer;
    #[async_trait::async_trait]
    impl RunWhenComplete for Completer {
        async fn run(&self, _config: &BusConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn accessing_collaborators_before_supplying_them_is_an_error() {
        let mut config = BusConfig::with_types(Vec::<TypeEntry>::new());
        assert!(matches!(
            config.builder().err(),
            Some(BusbootError::BuilderNotSet)
        ));
        assert!(matches!(
            config.registrar().err(),
            Some(BusbootError::RegistrarNotSet)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn phase_one_demands_a_registrar_only_when_it_has_work() {
        let mut config = BusConfig::with_types(vec![
            TypeEntry::of::<Completer>().with_binding(bind_run_when_complete::<Completer>()),
        ]);
        let err = config.initialize().await.err().expect("must fail");
        assert!(matches!(err, BusbootError::RegistrarNotSet));

        // Without any phase-1 work the pipeline does not touch the container.
        let mut empty = BusConfig::with_types(Vec::<TypeEntry>::new());
        empty.initialize().await.expect("initialize");
        assert_eq!(empty.state(), BootState::Initialized);
    }
}

mod late_mutation {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn replacing_the_type_set_after_initialization_is_ignored() {
        let mut config = BusConfig::with_types(Vec::<TypeEntry>::new());
        config.initialize().await.expect("initialize");
        config.set_types(vec![TypeEntry::named("app::Late", TypeShape::Concrete)]);
        assert!(config.catalog().is_empty(), "post-init set_types must be a no-op");
    }
}

mod endpoint_settings {
    use super::*;

    #[test]
    fn endpoint_name_and_send_only_are_plain_settings() {
        let mut config = BusConfig::with_types(Vec::<TypeEntry>::new());
        assert!(!config.send_only());
        config.set_send_only(true);
        assert!(config.send_only());

        config.define_endpoint_name(|| "billing".to_string());
        assert_eq!(config.endpoint_name(), "billing");
    }

    #[derive(Default)]
    struct Noop;
    #[async_trait::async_trait]
    impl RunWhenComplete for Noop {
        async fn run(&self, _config: &BusConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn for_each_matching_visits_concrete_entries_only() {
        let config = BusConfig::with_types(vec![
            TypeEntry::of::<Noop>().with_binding(bind_run_when_complete::<Noop>()),
            TypeEntry::named("app::Template", TypeShape::Abstract)
                .with_binding(bind_run_when_complete::<Noop>()),
        ]);
        let mut seen = 0;
        config.for_each_matching(Capability::RunWhenComplete, |_| seen += 1);
        assert_eq!(seen, 1, "abstract entries are never visited");
    }
}
