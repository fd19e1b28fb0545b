use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{LoreError, Result};
use crate::models::DocumentStat;

/// Read-only view of the document collection the index and mirror feed on.
/// Paths are always relative, forward-slash separated.
pub trait Vault {
    fn list_documents(&self) -> Result<Vec<String>>;

    /// `Ok(None)` means the document cannot be provided as text right now:
    /// missing, unreadable, or not valid UTF-8. Callers treat that as "skip",
    /// never as a batch failure.
    fn read_content(&self, path: &str) -> Result<Option<String>>;

    fn metadata(&self, path: &str) -> Result<Option<DocumentStat>>;
}

#[derive(Debug, Clone)]
pub struct LocalVault {
    root: PathBuf,
    include: GlobSet,
}

impl LocalVault {
    pub fn new(root: impl Into<PathBuf>, include_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_globs {
            let glob = Glob::new(pattern).map_err(|err| {
                LoreError::Validation(format!("invalid include glob {pattern:?}: {err}"))
            })?;
            builder.add(glob);
        }
        let include = builder
            .build()
            .map_err(|err| LoreError::Validation(err.to_string()))?;
        Ok(Self {
            root: root.into(),
            include,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let escapes = candidate.is_absolute()
            || candidate
                .components()
                .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(LoreError::PathTraversal(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    fn ensure_within_root(&self, path: &Path) -> Result<()> {
        let root = self.canonical_root()?;
        let mut probe = path.to_path_buf();
        while !probe.exists() {
            if !probe.pop() {
                return Err(LoreError::PathTraversal(path.display().to_string()));
            }
        }
        let canonical = fs::canonicalize(&probe)?;
        if !canonical.starts_with(&root) {
            return Err(LoreError::PathTraversal(path.display().to_string()));
        }
        Ok(())
    }

    fn canonical_root(&self) -> Result<PathBuf> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(fs::canonicalize(&self.root)?)
    }
}

impl Vault for LocalVault {
    fn list_documents(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for item in WalkDir::new(&self.root).follow_links(false) {
            let item = item.map_err(|err| LoreError::Validation(err.to_string()))?;
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(&self.root) else {
                continue;
            };
            if !self.include.is_match(relative) {
                continue;
            }
            if let Some(display) = relative_display(relative) {
                paths.push(display);
            }
        }
        paths.sort_unstable();
        Ok(paths)
    }

    fn read_content(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Ok(None);
        }
        self.ensure_within_root(&full)?;
        match fs::read(&full) {
            Ok(bytes) => Ok(String::from_utf8(bytes).ok()),
            Err(_) => Ok(None),
        }
    }

    fn metadata(&self, path: &str) -> Result<Option<DocumentStat>> {
        let full = self.resolve(path)?;
        let Ok(meta) = fs::metadata(&full) else {
            return Ok(None);
        };
        if !meta.is_file() {
            return Ok(None);
        }
        self.ensure_within_root(&full)?;
        let modified_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(DocumentStat {
            modified_at,
            size: meta.len(),
        }))
    }
}

fn relative_display(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[cfg(unix)]
    use std::os::unix::fs::symlink;

    fn vault_over(root: &Path) -> LocalVault {
        LocalVault::new(root, &["*.md".to_string(), "*.txt".to_string()]).expect("vault")
    }

    #[test]
    fn lists_matching_files_sorted_and_relative() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("b.md"), "beta").expect("write");
        fs::write(temp.path().join("a.txt"), "alpha").expect("write");
        fs::write(temp.path().join("skip.rs"), "code").expect("write");
        fs::create_dir_all(temp.path().join("sub")).expect("mkdir");
        fs::write(temp.path().join("sub/c.md"), "gamma").expect("write");

        let vault = vault_over(temp.path());
        let listed = vault.list_documents().expect("list");
        assert_eq!(listed, vec!["a.txt", "b.md", "sub/c.md"]);
    }

    #[test]
    fn read_content_skips_missing_and_non_utf8_files() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("bin.md"), [0xff_u8, 0xfe, 0x00]).expect("write");

        let vault = vault_over(temp.path());
        assert!(vault.read_content("absent.md").expect("read").is_none());
        assert!(vault.read_content("bin.md").expect("read").is_none());
    }

    #[test]
    fn metadata_reports_file_size() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.md"), "alpha").expect("write");

        let vault = vault_over(temp.path());
        let stat = vault.metadata("a.md").expect("metadata").expect("stat");
        assert_eq!(stat.size, 5);
        assert!(vault.metadata("absent.md").expect("metadata").is_none());
    }

    #[test]
    fn parent_components_are_rejected_before_touching_disk() {
        let temp = tempdir().expect("tempdir");
        let vault = vault_over(temp.path());
        let err = vault.read_content("../escape.md").expect_err("must fail");
        assert!(matches!(err, LoreError::PathTraversal(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_out_of_the_root_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let outside = tempdir().expect("outside");
        let secret = outside.path().join("secret.md");
        fs::write(&secret, "secret").expect("write outside");
        symlink(&secret, temp.path().join("link.md")).expect("symlink");

        let vault = vault_over(temp.path());
        let err = vault.read_content("link.md").expect_err("must fail");
        assert!(matches!(err, LoreError::PathTraversal(_)));
        // Symlinked entries never make the listing either.
        assert!(vault.list_documents().expect("list").is_empty());
    }

    #[test]
    fn malformed_include_globs_are_reported() {
        let temp = tempdir().expect("tempdir");
        let err = LocalVault::new(temp.path(), &["a[".to_string()]).expect_err("must fail");
        assert!(matches!(err, LoreError::Validation(_)));
    }
}
