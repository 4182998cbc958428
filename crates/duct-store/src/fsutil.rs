//! Filesystem predicates used by the cache.

use std::fs;
use std::io;
use std::path::Path;

/// Returns `true` if `path` exists. With `follow_links` a dangling symlink
/// counts as absent; without it the link itself is checked.
pub fn exists(path: &Path, follow_links: bool) -> io::Result<bool> {
    let result = if follow_links {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    };
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Returns `true` if `path` is a symlink (the link itself, not its target).
pub fn is_link(path: &Path) -> io::Result<bool> {
    Ok(fs::symlink_metadata(path)?.file_type().is_symlink())
}

/// Returns `true` if `path` is a regular file, without following links.
pub fn is_regular_file(path: &Path) -> io::Result<bool> {
    Ok(fs::symlink_metadata(path)?.file_type().is_file())
}

/// Create a symlink at `link` pointing to the file `target`.
pub fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Make `path` read-only for everyone, or writable by its owner.
pub fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        perms.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    }
    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(readonly);
    }
    fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_distinguishes_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        symlink_file(&dir.path().join("nowhere"), &link).unwrap();

        assert!(exists(&link, false).unwrap());
        assert!(!exists(&link, true).unwrap());
        assert!(is_link(&link).unwrap());
    }

    #[test]
    fn regular_file_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(is_regular_file(&file).unwrap());
        assert!(!is_regular_file(dir.path()).unwrap());
    }

    #[test]
    fn readonly_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        set_readonly(&file, true).unwrap();
        assert!(fs::metadata(&file).unwrap().permissions().readonly());
        set_readonly(&file, false).unwrap();
        assert!(!fs::metadata(&file).unwrap().permissions().readonly());
    }
}
