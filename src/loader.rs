//! Binary loading: turning a discovered candidate into its type entries.
//!
//! Only the `#[repr(C)]` raw manifest crosses the library boundary (the pack
//! and the host are compiled separately, so no Rust-ABI type may). The native
//! loader resolves the `extern "C"` manifest symbol, checks the ABI stamp,
//! rebuilds [`TypeEntry`] values from the raw layout, and keeps the library
//! handle alive for the rest of the process; unloading a binary whose fn
//! pointers are in the catalog would be unsound.

use crate::error::{BusbootError, Result};
use crate::registry::{
    self, CapabilityBinding, ConfigProviderSpec, ProvideSectionFn, RawManifest, RawTypeEntry,
    SetupFn, TypeEntry, TypeShape, WhenCompleteCtor, MANIFEST_ABI, MANIFEST_SYMBOL,
};
use crate::scan::CandidateBinary;
use std::any::TypeId;
use std::path::Path;

/// A binary that loaded cleanly, with every type entry it defines.
pub struct LoadedBinary {
    pub name: String,
    pub entries: Vec<TypeEntry>,
}

/// Loads one candidate binary. Implementations decide what "load" means;
/// the engine only distinguishes fatal load failures
/// (`BusbootError::is_fatal_load_failure`) from isolated ones.
pub trait BinaryLoader {
    fn load(&mut self, binary: &CandidateBinary) -> Result<LoadedBinary>;
}

type ManifestFn = unsafe extern "C" fn() -> RawManifest;

/// Loads component pack binaries with `libloading` and reads the running set
/// for in-process binaries.
#[derive(Default)]
pub struct NativeLoader {
    // 句柄保持到进程结束：目录里的函数指针指向这些库的代码。
    libraries: Vec<libloading::Library>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BinaryLoader for NativeLoader {
    fn load(&mut self, binary: &CandidateBinary) -> Result<LoadedBinary> {
        match binary {
            CandidateBinary::Running { name } => Ok(LoadedBinary {
                name: name.clone(),
                entries: registry::running_entries(name),
            }),
            CandidateBinary::File { name, path } => {
                let library = unsafe { libloading::Library::new(path) }
                    .map_err(|e| classify_open_failure(path, &e))?;
                let manifest = {
                    // SAFETY: the symbol is produced by export_manifest! with
                    // the extern "C" signature of ManifestFn, and RawManifest
                    // is #[repr(C)]; the ABI stamp is checked before any
                    // entry is used.
                    let symbol = unsafe { library.get::<ManifestFn>(MANIFEST_SYMBOL) }
                        .map_err(|_| {
                            BusbootError::Dynamic(format!(
                                "{} exports no component manifest",
                                path.display()
                            ))
                        })?;
                    unsafe { symbol() }
                };
                if manifest.abi != MANIFEST_ABI {
                    return Err(BusbootError::Dynamic(format!(
                        "{}: manifest ABI {} does not match engine ABI {}",
                        path.display(),
                        manifest.abi,
                        MANIFEST_ABI
                    )));
                }
                let entries = lift_entries(&manifest, path)?;
                self.libraries.push(library);
                Ok(LoadedBinary {
                    name: name.clone(),
                    entries,
                })
            }
        }
    }
}

/// Rebuilds host-side entries from the raw manifest. Malformed manifests are
/// ordinary (isolated) failures: the pack is skipped, not the bootstrap.
fn lift_entries(manifest: &RawManifest, path: &Path) -> Result<Vec<TypeEntry>> {
    if manifest.entries.is_null() {
        return Ok(Vec::new());
    }
    // SAFETY: entries/entries_len describe the #[repr(C)] array leaked by
    // leak_manifest in the pack; it outlives the retained library handle.
    let raw = unsafe { std::slice::from_raw_parts(manifest.entries, manifest.entries_len) };
    raw.iter().map(|entry| lift_entry(entry, path)).collect()
}

fn lift_entry(raw: &RawTypeEntry, path: &Path) -> Result<TypeEntry> {
    let qualified_name = if raw.name.is_null() {
        None
    } else {
        // SAFETY: a non-null name is a UTF-8 pointer/length pair into the
        // pack's static memory, emitted by RawTypeEntry::of.
        let bytes = unsafe { std::slice::from_raw_parts(raw.name, raw.name_len) };
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                return Err(BusbootError::Dynamic(format!(
                    "{}: manifest entry name is not valid UTF-8",
                    path.display()
                )))
            }
        }
    };
    let Some(shape) = TypeShape::from_raw(raw.shape) else {
        return Err(BusbootError::Dynamic(format!(
            "{}: unknown type shape {} in manifest",
            path.display(),
            raw.shape
        )));
    };
    let mut entry = match qualified_name {
        Some(name) => TypeEntry::named(name, shape),
        None => TypeEntry::unnamed(shape),
    };
    // SAFETY: every non-null slot was written by RawTypeEntry::with_binding /
    // with_provider from exactly the fn-pointer type transmuted back here.
    unsafe {
        if !raw.run_when_complete.is_null() {
            entry = entry.with_binding(CapabilityBinding::RunWhenComplete(std::mem::transmute::<
                *const (),
                WhenCompleteCtor,
            >(
                raw.run_when_complete
            )));
        }
        if !raw.run_before_configuration.is_null() {
            entry = entry.with_binding(CapabilityBinding::RunBeforeConfiguration(
                std::mem::transmute::<*const (), SetupFn>(raw.run_before_configuration),
            ));
        }
        if !raw.needs_initialization.is_null() {
            entry = entry.with_binding(CapabilityBinding::NeedsInitialization(
                std::mem::transmute::<*const (), SetupFn>(raw.needs_initialization),
            ));
        }
        if !raw.run_before_finalized.is_null() {
            entry = entry.with_binding(CapabilityBinding::RunBeforeFinalized(
                std::mem::transmute::<*const (), SetupFn>(raw.run_before_finalized),
            ));
        }
        if !raw.section_id.is_null() && !raw.section_name.is_null() && !raw.provide_section.is_null()
        {
            entry = entry.with_provider(ConfigProviderSpec {
                section: std::mem::transmute::<*const (), fn() -> TypeId>(raw.section_id),
                section_name: std::mem::transmute::<*const (), fn() -> &'static str>(
                    raw.section_name,
                ),
                provide: std::mem::transmute::<*const (), ProvideSectionFn>(raw.provide_section),
            });
        }
    }
    Ok(entry)
}

/// Maps a dynamic-linker failure onto the engine's taxonomy. Architecture
/// mismatches and malformed binaries are fatal; unresolved dependencies are
/// isolated to the one binary.
fn classify_open_failure(path: &Path, error: &libloading::Error) -> BusbootError {
    let text = error.to_string();
    let lowered = text.to_ascii_lowercase();
    const ARCH_MARKERS: &[&str] = &[
        "wrong elf class",
        "incompatible architecture",
        "wrong architecture",
        "not a valid win32 application",
    ];
    const DEPENDENCY_MARKERS: &[&str] = &[
        "undefined symbol",
        "symbol not found",
        "cannot open shared object file",
        "image not found",
        "no such file",
        "module could not be found",
    ];
    if ARCH_MARKERS.iter().any(|m| lowered.contains(m)) {
        BusbootError::NativeMismatch(path.display().to_string())
    } else if DEPENDENCY_MARKERS.iter().any(|m| lowered.contains(m)) {
        BusbootError::Dynamic(format!("{}: {}", path.display(), text))
    } else {
        BusbootError::BadBinaryFormat(path.display().to_string())
    }
}
