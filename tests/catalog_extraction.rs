use mmg_busboot::catalog::TypeCatalog;
use mmg_busboot::config::BusConfig;
use mmg_busboot::error::BusbootError;
use mmg_busboot::loader::{BinaryLoader, LoadedBinary};
use mmg_busboot::registry::{
    bind_needs_initialization, Capability, NeedsInitialization, TypeEntry, TypeShape,
};
use mmg_busboot::scan::CandidateBinary;
use std::collections::HashMap;

#[derive(Default)]
struct Marker;

#[async_trait::async_trait]
impl NeedsInitialization for Marker {
    async fn init(&mut self, _config: &mut BusConfig) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Loader backed by a map of prepared outcomes, keyed by binary name.
struct MapLoader {
    outcomes: HashMap<String, Result<Vec<TypeEntry>, BusbootError>>,
}

impl MapLoader {
    fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
        }
    }

    fn ok(mut self, name: &str, entries: Vec<TypeEntry>) -> Self {
        self.outcomes.insert(name.to_string(), Ok(entries));
        self
    }

    fn err(mut self, name: &str, error: BusbootError) -> Self {
        self.outcomes.insert(name.to_string(), Err(error));
        self
    }
}

impl BinaryLoader for MapLoader {
    fn load(&mut self, binary: &CandidateBinary) -> mmg_busboot::error::Result<LoadedBinary> {
        match self
            .outcomes
            .remove(binary.name())
            .unwrap_or_else(|| panic!("unexpected load of {}", binary.name()))
        {
            Ok(entries) => Ok(LoadedBinary {
                name: binary.name().to_string(),
                entries,
            }),
            Err(e) => Err(e),
        }
    }
}

fn file(name: &str) -> CandidateBinary {
    CandidateBinary::File {
        name: name.to_string(),
        path: format!("{name}.dll").into(),
    }
}

#[test]
fn a_failing_binary_contributes_nothing_but_does_not_abort() {
    let mut loader = MapLoader::new()
        .ok(
            "a",
            vec![TypeEntry::of::<Marker>().with_binding(bind_needs_initialization::<Marker>())],
        )
        .err("b", BusbootError::Dynamic("b.dll: undefined symbol".into()))
        .ok("c", vec![TypeEntry::named("app::Late", TypeShape::Concrete)]);

    let catalog =
        TypeCatalog::extract([file("a"), file("b"), file("c")], &mut loader).expect("extract");

    assert_eq!(catalog.len(), 2, "a and c both contribute");
    assert_eq!(catalog.diagnostics().len(), 1);
    let diagnostic = &catalog.diagnostics()[0];
    assert_eq!(diagnostic.binary, "b");
    assert!(diagnostic.reason.to_string().contains("undefined symbol"));
}

#[test]
fn a_bad_format_failure_aborts_extraction() {
    let mut loader = MapLoader::new()
        .ok("a", vec![])
        .err("b", BusbootError::BadBinaryFormat("b.dll".into()));

    let err = TypeCatalog::extract([file("a"), file("b")], &mut loader)
        .err()
        .expect("bad format must abort");
    assert!(err.is_fatal_load_failure());
    assert!(err.to_string().contains("exclude"));
}

#[test]
fn a_native_mismatch_aborts_with_a_corrective_message() {
    let mut loader = MapLoader::new().err("native", BusbootError::NativeMismatch("native.dll".into()));

    let err = TypeCatalog::extract([file("native")], &mut loader)
        .err()
        .expect("mismatch must abort");
    assert!(err.is_fatal_load_failure());
    assert!(err.to_string().contains("architecture"));
}

#[test]
fn excluded_namespaces_never_reach_capability_scanning() {
    // Carrying a capability does not rescue a type under an excluded prefix.
    let catalog = TypeCatalog::from_entries(vec![
        TypeEntry::named("diesel::connection::Pool", TypeShape::Concrete)
            .with_binding(bind_needs_initialization::<Marker>()),
        TypeEntry::of::<Marker>().with_binding(bind_needs_initialization::<Marker>()),
    ]);

    let matched: Vec<_> = catalog
        .matching(Capability::NeedsInitialization)
        .filter_map(|e| e.qualified_name.as_deref())
        .collect();
    assert_eq!(matched.len(), 1);
    assert!(matched[0].contains("Marker"));
}

#[test]
fn unnamed_entries_are_retained_and_still_match() {
    // 无名条目不可能命中任何排除前缀，默认保留。
    let catalog = TypeCatalog::from_entries(vec![
        TypeEntry::unnamed(TypeShape::Concrete)
            .with_binding(bind_needs_initialization::<Marker>()),
        TypeEntry::unnamed(TypeShape::Value),
    ]);
    assert_eq!(catalog.len(), 1, "value shapes are dropped even unnamed");
    assert!(catalog.entries()[0].qualified_name.is_none());
    assert_eq!(catalog.matching(Capability::NeedsInitialization).count(), 1);
}

#[test]
fn abstract_entries_stay_in_the_catalog_but_never_match() {
    let catalog = TypeCatalog::from_entries(vec![
        TypeEntry::named("app::Template", TypeShape::Abstract)
            .with_binding(bind_needs_initialization::<Marker>()),
    ]);
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.matching(Capability::NeedsInitialization).count(), 0);
}
