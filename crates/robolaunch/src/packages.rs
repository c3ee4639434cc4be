//! Package location seam
//!
//! The real package index is an external collaborator; the launcher only
//! needs to turn a package name into a directory. `EnvPackageResolver`
//! covers the common case of scanning `ROS_PACKAGE_PATH` and `ROS_ROOT`.

use std::path::{Path, PathBuf};

/// Resolves package names to their on-disk directories.
pub trait PackageResolver: Send + Sync {
    /// Locate the directory of `package`, or `None` when unknown.
    fn find_package(&self, package: &str) -> Option<PathBuf>;
}

/// Directory-scan resolver over `ROS_PACKAGE_PATH` and `ROS_ROOT`.
#[derive(Debug, Clone, Default)]
pub struct EnvPackageResolver {
    roots: Vec<PathBuf>,
}

impl EnvPackageResolver {
    /// Build a resolver from the process environment.
    pub fn from_env() -> Self {
        let mut roots = Vec::new();
        if let Ok(paths) = std::env::var("ROS_PACKAGE_PATH") {
            roots.extend(std::env::split_paths(&paths));
        }
        if let Ok(root) = std::env::var("ROS_ROOT") {
            roots.push(PathBuf::from(root));
        }
        Self { roots }
    }

    /// Build a resolver over an explicit set of search roots.
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn scan(dir: &Path, package: &str) -> Option<PathBuf> {
        let direct = dir.join(package);
        if direct.is_dir() {
            return Some(direct);
        }
        // one level of nesting, for stacks of packages under a single root
        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let nested = path.join(package);
                if nested.is_dir() {
                    return Some(nested);
                }
            }
        }
        None
    }
}

impl PackageResolver for EnvPackageResolver {
    fn find_package(&self, package: &str) -> Option<PathBuf> {
        self.roots.iter().find_map(|root| Self::scan(root, package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_direct_child() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vision")).unwrap();

        let resolver = EnvPackageResolver::with_roots(vec![dir.path().to_path_buf()]);
        assert_eq!(
            resolver.find_package("vision"),
            Some(dir.path().join("vision"))
        );
        assert_eq!(resolver.find_package("missing"), None);
    }

    #[test]
    fn test_find_nested_package() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("stack/drivers")).unwrap();

        let resolver = EnvPackageResolver::with_roots(vec![dir.path().to_path_buf()]);
        assert_eq!(
            resolver.find_package("drivers"),
            Some(dir.path().join("stack/drivers"))
        );
    }
}
