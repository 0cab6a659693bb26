//! Module paths and import requests for two-phase loading.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resolved module path.
///
/// Paths are plain `/`-separated strings: `./` and `../` specifiers are
/// relative, a leading `/` is absolute, anything else is bare. Resolution
/// joins a relative specifier against the importer's directory and
/// normalizes out `.` and `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(String);

impl ModulePath {
    /// Wrap a path without resolving it.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `./` and `../` specifiers.
    pub fn is_relative(&self) -> bool {
        self.0.starts_with("./") || self.0.starts_with("../")
    }

    /// True for bare specifiers (neither relative nor absolute).
    pub fn is_bare(&self) -> bool {
        !self.is_relative() && !self.0.starts_with('/')
    }

    /// Resolve a specifier against the module that imports it. Relative
    /// specifiers join the importer's directory; bare and absolute
    /// specifiers stand alone. The result is always normalized.
    pub fn resolve(
        specifier: &str,
        importer: Option<&ModulePath>,
    ) -> Self {
        let raw = ModulePath::new(specifier);
        if raw.is_relative() {
            if let Some(base) = importer {
                let dir = base.directory();
                if !dir.is_empty() {
                    return Self(Self::normalize(&format!("{dir}/{specifier}")));
                }
            }
        }
        Self(Self::normalize(specifier))
    }

    /// Directory portion of this path: `"/"` for root-level absolute paths,
    /// `""` when there is no directory.
    fn directory(&self) -> &str {
        match self.0.rfind('/') {
            Some(0) => "/",
            Some(i) => &self.0[..i],
            None => "",
        }
    }

    /// Collapse `.` segments, apply `..` segments and drop empty segments,
    /// keeping a leading `/` and any leading `..` a relative path cannot
    /// consume.
    fn normalize(path: &str) -> String {
        let absolute = path.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.last().is_none_or(|s| *s == "..") {
                        if !absolute {
                            segments.push("..");
                        }
                    } else {
                        segments.pop();
                    }
                }
                other => segments.push(other),
            }
        }
        let joined = segments.join("/");
        if absolute {
            format!("/{joined}")
        } else {
            joined
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for ModulePath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModulePath {
    fn from(val: &str) -> Self {
        Self::new(val)
    }
}

impl From<String> for ModulePath {
    fn from(val: String) -> Self {
        Self(val)
    }
}

/// One unresolved import reported by a `NeedImports` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// The specifier exactly as written in guest code.
    pub specifier: String,
    /// Where the specifier resolves to; the key for `provide_module`.
    pub resolved_path: ModulePath,
    /// The module doing the importing, absent for the entry module.
    pub importer: Option<ModulePath>,
}
