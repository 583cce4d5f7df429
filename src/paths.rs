//! Resolves protocol-level (client-supplied, `/`-rooted) paths against
//! the shared-directory root, refusing anything that would escape it.

use std::path::{Component, Path, PathBuf};

/// Resolves `rel` (as sent by a client, e.g. `/sub/dir`) against
/// `root` (an already-canonicalized absolute path). Returns `None` if
/// the resolved path would escape `root` — `..` components, absolute
/// components other than the leading `/` the protocol always sends, and
/// symlink escapes are all rejected.
///
/// The returned path is not required to exist; existence is the
/// caller's concern (`ERR_FILE_NOT_EXIST` / `ERR_DIR_NOT_EXIST` /
/// upload-already-exists are all distinguished by the caller).
pub fn resolve_under_root(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return None,
            Component::Prefix(_) => return None,
        }
    }

    // If the path exists, canonicalize to defeat symlink escapes; if it
    // doesn't exist yet (upload target), canonicalize the existing parent
    // and re-append the leaf so the check still holds.
    let checked = if resolved.exists() {
        resolved.canonicalize().ok()?
    } else {
        let parent = resolved.parent()?;
        let leaf = resolved.file_name()?;
        let parent = if parent == Path::new("") {
            root.to_path_buf()
        } else {
            parent.canonicalize().ok()?
        };
        parent.join(leaf)
    };

    if checked.starts_with(root) {
        Some(resolved)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_listing_resolves_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_under_root(&root, "/").unwrap();
        assert_eq!(resolved, root);
    }

    #[test]
    fn nested_path_resolves_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_under_root(&root, "/sub/file.bin").unwrap();
        assert_eq!(resolved, root.join("sub").join("file.bin"));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(resolve_under_root(&root, "/../etc/passwd").is_none());
    }

    #[test]
    fn upload_target_in_missing_subdir_still_checked_against_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_under_root(&root, "/new.bin").unwrap();
        assert_eq!(resolved, root.join("new.bin"));
    }
}
