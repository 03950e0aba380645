//! The type catalog: every type the discovered binaries define, minus value
//! shapes and the namespaces nobody should be activating components out of.

use crate::error::Result;
use crate::loader::BinaryLoader;
use crate::registry::{Capability, TypeEntry, TypeShape};
use crate::scan::CandidateBinary;

/// Qualified-name prefixes filtered out of the catalog. Serialization,
/// logging, async-runtime, ORM, search, and test-harness namespaces, plus the
/// engine's own. Fixed; caller filters cannot subtract from it.
pub const DEFAULT_TYPE_EXCLUSIONS: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "serde",
    "serde_json",
    "bincode",
    "tracing",
    "log::",
    "tokio::",
    "futures",
    "diesel",
    "sqlx",
    "sea_orm",
    "tantivy",
    "criterion",
    "proptest",
    "quickcheck",
    "mmg_busboot::",
];

/// A binary that contributed nothing, and why. Surfacing these is the
/// caller's call; the catalog only records them (and emits a warning).
pub struct LoadDiagnostic {
    pub binary: String,
    pub reason: anyhow::Error,
}

/// The filtered set of types eligible for capability scanning. Entries keep
/// their discovery order so phase execution is deterministic.
#[derive(Default)]
pub struct TypeCatalog {
    entries: Vec<TypeEntry>,
    diagnostics: Vec<LoadDiagnostic>,
}

impl TypeCatalog {
    /// Loads every candidate binary and collects the retained types.
    ///
    /// A binary that fails to load contributes nothing: the failure is
    /// recorded as a diagnostic and extraction moves on, unless it is a fatal
    /// load failure (bad format, architecture mismatch), which indicates a
    /// misconfigured environment and aborts the whole call.
    pub fn extract<I>(binaries: I, loader: &mut dyn BinaryLoader) -> Result<Self>
    where
        I: IntoIterator<Item = CandidateBinary>,
    {
        let mut catalog = TypeCatalog::default();
        for binary in binaries {
            match loader.load(&binary) {
                Ok(loaded) => {
                    catalog
                        .entries
                        .extend(loaded.entries.into_iter().filter(retained));
                }
                Err(e) if e.is_fatal_load_failure() => return Err(e),
                Err(e) => {
                    // 失败只隔离到该二进制：记录诊断后继续提取其余候选
                    tracing::warn!(binary = %binary.name(), error = %e, "binary skipped: types could not be loaded");
                    catalog.diagnostics.push(LoadDiagnostic {
                        binary: binary.name().to_string(),
                        reason: anyhow::Error::new(e),
                    });
                }
            }
        }
        Ok(catalog)
    }

    /// Catalog over an explicit entry set. The retention filter still applies.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = TypeEntry>,
    {
        TypeCatalog {
            entries: entries.into_iter().filter(retained).collect(),
            diagnostics: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[TypeEntry] {
        &self.entries
    }

    pub fn diagnostics(&self) -> &[LoadDiagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concrete entries carrying `capability`, in catalog order.
    pub fn matching(&self, capability: Capability) -> impl Iterator<Item = &TypeEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.is_concrete() && e.has(capability))
    }
}

fn retained(entry: &TypeEntry) -> bool {
    if entry.shape == TypeShape::Value {
        return false;
    }
    match &entry.qualified_name {
        // No name cannot match an exclusion prefix.
        None => true,
        Some(name) => {
            let lowered = name.to_ascii_lowercase();
            !DEFAULT_TYPE_EXCLUSIONS
                .iter()
                .any(|prefix| lowered.starts_with(prefix))
        }
    }
}

// retention rules are exercised end to end by the integration suite
