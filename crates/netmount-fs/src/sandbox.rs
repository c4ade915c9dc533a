//! Path sandboxing.
//!
//! Every client-supplied path is a relative string that must resolve to
//! somewhere under the user's root, no matter what it contains. Resolution
//! is pure and total: no I/O, no failure mode, leading parent-escape
//! segments are simply stripped.

use std::path::{Component, Path, PathBuf};

use netmount_types::MAX_DEPTH;

/// Confines client paths to one root directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path under the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(clean(path))
    }
}

/// Normalize a client path: collapse `.`, apply `..` within the path, drop
/// any `..` that would climb above the start, ignore absolute prefixes.
pub fn clean(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                // Popping an empty path drops the leading escape.
                out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Segment count of a resolved absolute path.
pub fn depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// True iff the resolved path is too deep to create or relocate into.
pub fn exceeds_depth(path: &Path) -> bool {
    depth(path) > MAX_DEPTH
}
