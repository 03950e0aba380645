//! Candidate-binary discovery: the running set first, then the probe
//! directory and its immediate subdirectories, executable extensions before
//! library extensions.
//!
//! The returned iterator is lazy and single-pass; invoking `scan` again
//! restarts discovery from scratch. File-system work happens as the iterator
//! is consumed.

use crate::matcher::{self, NameFilter};
use crate::registry;
use std::path::{Path, PathBuf};

/// Binary name prefixes that bypass a failing include filter. Reserved for
/// the framework's own binaries.
pub const ALWAYS_ALLOW: &[&str] = &["mmg."];

/// Binary name prefixes never scanned, regardless of caller filters. Caller
/// exclusions add to this list; nothing removes from it.
pub const DEFAULT_BINARY_EXCLUSIONS: &[&str] = &[
    "system.",
    "libstd",
    "libtest",
    "libc.",
    "libgcc",
    "libssl",
    "libcrypto",
    "libsqlite3",
];

/// A discovered loadable unit. Running-set binaries are already resolved in
/// this process; file binaries still have to be loaded.
#[derive(Clone, Debug)]
pub enum CandidateBinary {
    Running { name: String },
    File { name: String, path: PathBuf },
}

impl CandidateBinary {
    pub fn name(&self) -> &str {
        match self {
            CandidateBinary::Running { name } => name,
            CandidateBinary::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            CandidateBinary::Running { .. } => None,
            CandidateBinary::File { path, .. } => Some(path),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Directory probed for binaries. Always explicit; the convenience
    /// default lives in the bootstrap entry point, not here.
    pub probe_dir: PathBuf,
    /// Yield binaries already resolved in this process before touching disk.
    pub include_running_set: bool,
    /// When given, a name must pass this filter unless it matches
    /// [`ALWAYS_ALLOW`].
    pub include: Option<NameFilter>,
    /// Additive caller exclusions.
    pub exclude: NameFilter,
    /// Scanned first. Defaults to the platform executable extension.
    pub executable_extensions: Vec<String>,
    /// Scanned second. Defaults to the platform dynamic-library extension.
    pub library_extensions: Vec<String>,
}

impl ScanOptions {
    pub fn new(probe_dir: impl Into<PathBuf>) -> Self {
        let exe = std::env::consts::EXE_EXTENSION;
        Self {
            probe_dir: probe_dir.into(),
            include_running_set: true,
            include: None,
            exclude: NameFilter::empty(),
            executable_extensions: if exe.is_empty() {
                Vec::new()
            } else {
                vec![exe.to_string()]
            },
            library_extensions: vec![std::env::consts::DLL_EXTENSION.to_string()],
        }
    }

    pub fn include(mut self, filter: NameFilter) -> Self {
        self.include = Some(filter);
        self
    }

    pub fn exclude(mut self, filter: NameFilter) -> Self {
        self.exclude = filter;
        self
    }

    pub fn skip_running_set(mut self) -> Self {
        self.include_running_set = false;
        self
    }
}

/// Evaluated per candidate name, in precedence order: a failing include
/// filter rejects unless the name is always-allowed; the default exclusions
/// reject next; the caller exclusions reject last.
pub fn is_included(name: &str, include: Option<&NameFilter>, exclude: &NameFilter) -> bool {
    if let Some(filter) = include {
        if !filter.matches(name) && !ALWAYS_ALLOW.iter().any(|p| matcher::matches(p, name)) {
            return false;
        }
    }
    if DEFAULT_BINARY_EXCLUSIONS
        .iter()
        .any(|p| matcher::matches(p, name))
    {
        return false;
    }
    if exclude.matches(name) {
        return false;
    }
    true
}

/// Discovers candidate binaries per `options`.
pub fn scan(options: ScanOptions) -> impl Iterator<Item = CandidateBinary> {
    let ScanOptions {
        probe_dir,
        include_running_set,
        include,
        exclude,
        executable_extensions,
        library_extensions,
    } = options;

    let mut running: Vec<CandidateBinary> = Vec::new();
    // 运行集里的名字折叠进磁盘排除规则：同一二进制绝不产出第二次
    let mut disk_exclude = exclude;
    if include_running_set {
        for name in registry::running_binaries() {
            if is_included(name, include.as_ref(), &disk_exclude) {
                running.push(CandidateBinary::Running {
                    name: name.to_string(),
                });
                disk_exclude.add(name);
            }
        }
    }

    // 先可执行扩展名、后库扩展名；目录列举随迭代消费逐趟进行
    let passes = vec![executable_extensions, library_extensions];
    let disk = passes.into_iter().flat_map(move |extensions| {
        let dirs = scan_dirs(&probe_dir);
        let include = include.clone();
        let exclude = disk_exclude.clone();
        dirs.into_iter().flat_map(move |dir| {
            let include = include.clone();
            let exclude = exclude.clone();
            let extensions = extensions.clone();
            files_with_extensions(&dir, &extensions)
                .into_iter()
                .filter_map(move |path| {
                    let name = path.file_stem()?.to_string_lossy().into_owned();
                    if is_included(&name, include.as_ref(), &exclude) {
                        Some(CandidateBinary::File { name, path })
                    } else {
                        tracing::debug!(binary = %name, "filtered out of discovery");
                        None
                    }
                })
        })
    });

    running.into_iter().chain(disk)
}

/// The probe directory and its immediate subdirectories, in name order.
fn scan_dirs(probe_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![probe_dir.to_path_buf()];
    let mut subdirs: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(probe_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(path);
            }
        }
    }
    subdirs.sort();
    dirs.extend(subdirs);
    dirs
}

/// Files in `dir` carrying one of `extensions`, sorted by file name so the
/// discovery order (and with it the catalog order) is deterministic.
fn files_with_extensions(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
            if matches_ext {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
