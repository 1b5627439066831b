use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::CacheError;
use crate::io::clean_dir;

const GLOB_OPTS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Folder of the exploded library holding every jar the build consumes.
pub const FD_JARS: &str = "jars";

/// Where a jar entry of an Android library archive belongs.
struct JarLayout {
    jar: Pattern,
    verbatim: [Pattern; 2],
    libs: Pattern,
}

impl JarLayout {
    fn new() -> Result<Self, CacheError> {
        Ok(Self {
            jar: Pattern::new("**/*.jar")?,
            verbatim: [Pattern::new("assets/**")?, Pattern::new("res/raw/**")?],
            libs: Pattern::new("libs/**")?,
        })
    }

    /// Path of `entry` relative to the exploded folder, and whether it is a
    /// jar found somewhere it should not be.
    fn relocate(&self, entry: &str) -> (Utf8PathBuf, bool) {
        let path = Utf8PathBuf::from(entry);

        if !self.jar.matches_with(entry, GLOB_OPTS)
            || self.verbatim.iter().any(|p| p.matches_with(entry, GLOB_OPTS))
        {
            return (path, false);
        }

        if entry == "classes.jar"
            || entry == "lint.jar"
            || self.libs.matches_with(entry, GLOB_OPTS)
        {
            return (Utf8Path::new(FD_JARS).join(path), false);
        }

        (path, true)
    }
}

/// Explodes the library archive `archive` into `dest`.
///
/// Whatever `dest` contained before is deleted first, so calling this twice
/// leaves the same tree. `classes.jar`, `lint.jar` and every jar under
/// `libs/` are moved into `jars/`; jars under `assets/` and `res/raw/` stay
/// where they are. A jar anywhere else is kept in place with a warning and
/// is not used by the build.
///
/// This is not safe to call concurrently for the same `dest`: callers hold
/// the cache lock of the entry.
pub fn unzip_aar(archive: &Utf8Path, dest: &Utf8Path) -> Result<(), CacheError> {
    let zip_error = |source| CacheError::Zip {
        path: archive.to_owned(),
        source,
    };

    let layout = JarLayout::new()?;

    clean_dir(dest)?;

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_error)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_error)?;

        let Some(enclosed) = entry.enclosed_name() else {
            return Err(CacheError::UnsafeEntry(entry.name().to_string()));
        };
        let enclosed = Utf8PathBuf::try_from(enclosed)?;

        if entry.is_dir() {
            fs::create_dir_all(dest.join(&enclosed))?;
            continue;
        }

        let (relative, unexpected) = layout.relocate(enclosed.as_str());
        if unexpected {
            tracing::warn!(archive = %archive, "Jar found at unexpected path: {enclosed}");
        }

        let outpath = dest.join(relative);
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_aar(path: &Utf8Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn snapshot(dir: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
        fn walk(root: &Utf8Path, dir: &Utf8Path, out: &mut BTreeMap<String, Vec<u8>>) {
            for entry in dir.read_dir_utf8().unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    walk(root, path, out);
                } else {
                    let key = path.strip_prefix(root).unwrap().to_string();
                    out.insert(key, fs::read(path).unwrap());
                }
            }
        }

        let mut out = BTreeMap::new();
        walk(dir, dir, &mut out);
        out
    }

    fn sample(dir: &Utf8Path) -> Utf8PathBuf {
        let archive = dir.join("lib.aar");
        write_aar(
            &archive,
            &[
                ("AndroidManifest.xml", "<manifest/>"),
                ("classes.jar", "classes"),
                ("lint.jar", "lint"),
                ("libs/dep.jar", "dep"),
                ("assets/bundled.jar", "asset"),
                ("res/raw/raw.jar", "raw"),
                ("res/values/values.xml", "<resources/>"),
                ("other/stray.jar", "stray"),
            ],
        );
        archive
    }

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let dest = dir.join("exploded");

        unzip_aar(&sample(dir), &dest).unwrap();

        let files: Vec<_> = snapshot(&dest).into_keys().collect();
        assert_eq!(
            files,
            [
                "AndroidManifest.xml",
                "assets/bundled.jar",
                "jars/classes.jar",
                "jars/libs/dep.jar",
                "jars/lint.jar",
                "other/stray.jar",
                "res/raw/raw.jar",
                "res/values/values.xml",
            ]
        );
    }

    #[test]
    fn test_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let dest = dir.join("exploded");
        let archive = sample(dir);

        unzip_aar(&archive, &dest).unwrap();
        let first = snapshot(&dest);

        fs::write(dest.join("stale.txt"), "left over").unwrap();
        unzip_aar(&archive, &dest).unwrap();

        assert_eq!(snapshot(&dest), first);
    }

    #[test]
    fn test_rejects_escaping_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let archive = dir.join("evil.aar");
        write_aar(&archive, &[("../evil.txt", "x")]);

        let result = unzip_aar(&archive, &dir.join("exploded"));
        assert!(matches!(result, Err(CacheError::UnsafeEntry(_))));
    }
}
