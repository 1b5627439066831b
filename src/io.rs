use std::fs;
use std::io;
use std::path::Path;

/// Removes a file or a directory tree. Missing paths are fine.
pub(crate) fn delete_path(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Empties `dir`, creating it if needed.
pub(crate) fn clean_dir(dir: impl AsRef<Path>) -> io::Result<()> {
    delete_path(&dir)?;
    fs::create_dir_all(dir)
}

/// Copies a file, or a directory with everything in it, replacing `dst`.
pub(crate) fn copy_path(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    delete_path(dst)?;
    if src.is_dir() {
        copy_rec(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}

fn copy_rec(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(&dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let filetype = entry.file_type()?;
        if filetype.is_dir() {
            copy_rec(entry.path(), dst.as_ref().join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.as_ref().join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_and_delete_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/file.txt"), "x").unwrap();

        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale.txt"), "old").unwrap();

        copy_path(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("a/b/file.txt")).unwrap(), "x");
        assert!(!dst.join("stale.txt").exists());

        delete_path(&dst).unwrap();
        assert!(!dst.exists());
        delete_path(&dst).unwrap();
    }
}
