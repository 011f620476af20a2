//! Filesystem helpers.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

/// Writes `bytes` to `path` through a sibling temp file and a rename, so a
/// crash mid-write never leaves a partial file behind.
///
/// # Errors
///
/// Returns an error if the temp file cannot be written or renamed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    fs::write(tmp, bytes)?;
    fs::rename(tmp, path)
}

/// Recursively copies a directory tree.
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Recreates a directory tree with its files hard-linked to the source,
/// sharing file storage instead of duplicating it. Directories are created
/// fresh, so files added next to the tree (metadata, volumes) stay local to
/// the destination. Falls back to a copy for files that cannot be linked,
/// such as across filesystems.
///
/// # Errors
///
/// Returns an error if any entry cannot be read, linked, or copied.
pub fn link_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            link_dir_all(&entry.path(), &target)?;
        } else if fs::hard_link(entry.path(), &target).is_err() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("env");

        atomic_write(&path, b"A=1\n").unwrap();
        atomic_write(&path, b"A=2\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A=2\n");
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![OsString::from("env")]);
    }

    #[test]
    fn copy_dir_all_copies_nested_trees() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();

        let dst = tmp.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
    }

    #[test]
    fn link_dir_all_shares_file_storage_but_not_directories() {
        use std::os::unix::fs::MetadataExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();

        let dst = tmp.path().join("dst");
        link_dir_all(&src, &dst).unwrap();

        // Files share an inode with the source.
        assert_eq!(
            fs::metadata(src.join("a.txt")).unwrap().ino(),
            fs::metadata(dst.join("a.txt")).unwrap().ino()
        );
        assert_eq!(
            fs::metadata(src.join("nested/b.txt")).unwrap().ino(),
            fs::metadata(dst.join("nested/b.txt")).unwrap().ino()
        );

        // New files land in the destination only.
        fs::write(dst.join("local.txt"), "x").unwrap();
        assert!(!src.join("local.txt").exists());
    }
}
