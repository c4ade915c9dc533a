//! The authenticated-user boundary.
//!
//! The auth layer resolves credentials and hands the engine one of these.
//! The engine only needs two facts about a user: where their tree lives and
//! how large it may grow.

use std::path::{Path, PathBuf};

/// An already-authenticated user.
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    root: PathBuf,
    limit: Option<u64>,
}

impl User {
    /// User with an explicit private root directory.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            limit: None,
        }
    }

    /// User rooted at `base/{name}`, the default per-user layout.
    pub fn in_base_dir(name: impl Into<String>, base: impl AsRef<Path>) -> Self {
        let name = name.into();
        let root = base.as_ref().join(&name);
        Self::new(name, root)
    }

    /// Apply a byte quota. Without one, capacity falls back to OS free-space
    /// reporting for the root's volume.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_dir_layout() {
        let user = User::in_base_dir("amy", "/srv/netmount");
        assert_eq!(user.root(), Path::new("/srv/netmount/amy"));
        assert!(user.limit().is_none());
    }

    #[test]
    fn test_limit_builder() {
        let user = User::new("amy", "/data/amy").with_limit(1024);
        assert_eq!(user.limit(), Some(1024));
    }
}
