//! Module sources for the two-phase loading protocol.
//!
//! The driver never reads module text itself. When a step reports
//! unresolved imports it asks its `ModuleLoader` for each resolved path
//! and feeds the sources back through `provide_module`; a path the loader
//! cannot produce fails the drive. Loaders are lookup tables, so the
//! protocol stays free of I/O during execution.

use std::path::{Path, PathBuf};
use std::{fs, io};

use indexmap::IndexMap;
use tracing::debug;

use crate::protocol::ModulePath;

/// Produces module source text for resolved paths.
pub trait ModuleLoader: Send {
    /// Source text for a resolved path, or `None` when unknown.
    fn load(
        &self,
        path: &ModulePath,
    ) -> Option<String>;
}

/// Fixed in-memory module table.
#[derive(Debug, Clone, Default)]
pub struct StaticModules {
    modules: IndexMap<ModulePath, String>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register source text under a resolved path.
    pub fn insert(
        &mut self,
        path: impl Into<ModulePath>,
        source: impl Into<String>,
    ) {
        self.modules.insert(path.into(), source.into());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<P, S> FromIterator<(P, S)> for StaticModules
where
    P: Into<ModulePath>,
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (P, S)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (path, source) in iter {
            table.insert(path, source);
        }
        table
    }
}

impl ModuleLoader for StaticModules {
    fn load(
        &self,
        path: &ModulePath,
    ) -> Option<String> {
        self.modules.get(path.as_str()).cloned()
    }
}

/// Module table indexed from a directory tree.
///
/// The tree is walked once at construction; lookups afterwards touch no
/// filesystem. Keys are `/`-separated paths relative to the root, so the
/// resolved path `/lib/math.ts` matches `<root>/lib/math.ts`.
#[derive(Debug)]
pub struct DirModules {
    root: PathBuf,
    modules: IndexMap<ModulePath, String>,
}

impl DirModules {
    /// Read every file under `root` into the table.
    pub fn index(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut modules = IndexMap::new();
        for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(io::Error::other)?;
            let key: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            let source = fs::read_to_string(entry.path())?;
            modules.insert(ModulePath::new(key.join("/")), source);
        }
        debug!(root = %root.display(), modules = modules.len(), "module tree indexed");
        Ok(Self { root, modules })
    }

    /// The indexed root.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleLoader for DirModules {
    fn load(
        &self,
        path: &ModulePath,
    ) -> Option<String> {
        let key = path.as_str().trim_start_matches('/');
        self.modules.get(key).cloned()
    }
}
