use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::{Command, FileCache, Inputs, LockingScope, unzip_aar};
use crate::dependency::DependencyNode;
use crate::error::{CacheError, ConfigError};
use crate::options::ProjectOptions;

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Explodes library archives, through the shared build cache when it is
/// enabled.
///
/// With the cache, two modules depending on the same archive share one
/// exploded directory and the archive is unpacked once, no matter how many
/// threads or processes ask for it at the same time. Without it every
/// library is exploded into the folder picked during resolution.
#[derive(Debug, Default)]
pub struct LibraryCache {
    cache: Option<FileCache>,
}

impl LibraryCache {
    pub fn new(options: &ProjectOptions) -> Result<Self, ConfigError> {
        if !options.build_cache_enabled {
            return Ok(Self::disabled());
        }

        let dir = options.resolve_build_cache_dir()?;
        tracing::debug!(dir = %dir, "using build cache");

        Ok(Self::with_cache(FileCache::new(dir, LockingScope::MultiProcess)))
    }

    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub fn with_cache(cache: FileCache) -> Self {
        Self { cache: Some(cache) }
    }

    pub fn cache(&self) -> Option<&FileCache> {
        self.cache.as_ref()
    }

    /// Snapshots are republished under the same coordinate, so their
    /// archive is keyed by content.
    fn inputs(node: &DependencyNode) -> Result<Inputs, CacheError> {
        let inputs = Inputs::new(Command::PrepareLibrary)
            .put_string("coordinates", node.coordinates.to_string());

        match node.coordinates.version.ends_with(SNAPSHOT_SUFFIX) {
            true => inputs.put_file_hash("file", &node.artifact),
            false => inputs.put_file_path_length_timestamp("file", &node.artifact),
        }
    }

    /// Explodes the archive of `node` and returns the directory holding the
    /// result.
    pub fn explode(&self, node: &DependencyNode) -> Result<Utf8PathBuf, CacheError> {
        let Some(cache) = &self.cache else {
            let folder = Self::local_folder(node);
            unzip_aar(&node.artifact, &folder)?;
            return Ok(folder);
        };

        let inputs = Self::inputs(node)?;
        let artifact = node.artifact.as_path();

        let result = cache.create_file_in_cache_if_absent(&inputs, |out: &Utf8Path| {
            Ok(unzip_aar(artifact, out)?)
        })?;

        tracing::trace!(library = %node.name(), event = ?result.event, "queried build cache");

        Ok(result.cached)
    }

    /// Explodes `node` into its own folder, as its prepare task does. With the
    /// cache the archive is unpacked once per cache key and the folder is
    /// filled from the cache entry.
    pub fn prepare(&self, node: &DependencyNode) -> Result<Utf8PathBuf, CacheError> {
        let folder = Self::local_folder(node);

        let Some(cache) = &self.cache else {
            unzip_aar(&node.artifact, &folder)?;
            return Ok(folder);
        };

        let inputs = Self::inputs(node)?;
        let artifact = node.artifact.as_path();

        let result = cache.create_file(&folder, &inputs, |out: &Utf8Path| {
            Ok(unzip_aar(artifact, out)?)
        })?;

        tracing::trace!(library = %node.name(), event = ?result.event, "prepared library");

        Ok(folder)
    }

    /// Empties the shared cache. Nothing to do when it is disabled.
    pub fn clean(&self) -> Result<(), CacheError> {
        match &self.cache {
            Some(cache) => cache.delete(),
            None => Ok(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Explodes every node in parallel, returning the directories in the same
    /// order. Stops at the first failure.
    pub fn explode_all(
        &self,
        nodes: &[Arc<DependencyNode>],
    ) -> Result<Vec<Utf8PathBuf>, CacheError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let span = tracing::span!(Level::INFO, "exploding_libraries");
        span.pb_set_style(&style);
        span.pb_set_length(nodes.len() as u64);
        span.pb_set_message("Exploding libraries...");
        let _enter = span.enter();

        nodes
            .par_iter()
            .map(|node| {
                let folder = self.explode(node);
                span.pb_inc(1);
                folder
            })
            .collect()
    }

    pub(crate) fn local_folder(node: &DependencyNode) -> Utf8PathBuf {
        node.folder
            .clone()
            .unwrap_or_else(|| node.artifact.with_extension(""))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::dependency::{Artifact, Coordinates, ModuleVersion, NodeType};

    fn library(dir: &Utf8Path, name: &str) -> Arc<DependencyNode> {
        let archive = dir.join(format!("{name}.aar"));
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("classes.jar", SimpleFileOptions::default()).unwrap();
        zip.write_all(name.as_bytes()).unwrap();
        zip.start_file("res/values/values.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"<resources/>").unwrap();
        zip.finish().unwrap();

        let module = ModuleVersion::new("com.example", name, "1.0");
        let artifact = Artifact::new(archive.clone(), "aar");

        Arc::new(DependencyNode::new(
            Coordinates::new(&module, &artifact),
            NodeType::Android,
            archive,
            Some(dir.join("exploded").join(name)),
            None,
            vec![],
            false,
        ))
    }

    #[test]
    fn test_disabled_explodes_into_folder() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let node = library(dir, "core");

        let folder = LibraryCache::disabled().explode(&node).unwrap();

        assert_eq!(folder, dir.join("exploded/core"));
        assert_eq!(fs::read_to_string(folder.join("jars/classes.jar")).unwrap(), "core");
    }

    #[test]
    fn test_shared_entry_is_unpacked_once() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let node = library(dir, "core");
        let other = library(dir, "ui");

        let files = FileCache::new(dir.join("cache"), LockingScope::MultiProcess);
        let cache = LibraryCache::with_cache(files);
        let nodes = vec![node.clone(), other, node.clone(), node];

        let folders = cache.explode_all(&nodes).unwrap();

        assert_eq!(folders[0], folders[2]);
        assert_eq!(folders[0], folders[3]);
        assert_ne!(folders[0], folders[1]);
        assert!(folders[0].starts_with(dir.join("cache")));
        assert_eq!(fs::read_to_string(folders[1].join("jars/classes.jar")).unwrap(), "ui");

        let files = cache.cache().unwrap();
        assert_eq!(files.misses(), 2);
        assert_eq!(files.hits(), 2);
    }

    #[test]
    fn test_two_modules_share_one_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let library = library(dir, "core");
        let in_module = |module: &str| {
            DependencyNode::new(
                library.coordinates.clone(),
                NodeType::Android,
                library.artifact.clone(),
                Some(dir.join(module).join("exploded-aar/core")),
                None,
                vec![],
                false,
            )
        };

        let files = FileCache::new(dir.join("cache"), LockingScope::MultiProcess);
        let cache = LibraryCache::with_cache(files);
        let app = cache.prepare(&in_module("app")).unwrap();
        let lib = cache.prepare(&in_module("lib")).unwrap();

        assert_eq!(app, dir.join("app/exploded-aar/core"));
        assert_eq!(fs::read_to_string(app.join("jars/classes.jar")).unwrap(), "core");
        assert_eq!(fs::read_to_string(lib.join("jars/classes.jar")).unwrap(), "core");

        let files = cache.cache().unwrap();
        assert_eq!((files.misses(), files.hits()), (1, 1));
        let entries = fs::read_dir(dir.join("cache"))
            .unwrap()
            .filter(|entry| entry.as_ref().unwrap().path().is_dir())
            .count();
        assert_eq!(entries, 1);

        cache.clean().unwrap();
        assert!(!dir.join("cache").exists());
    }

    #[test]
    fn test_snapshot_keyed_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let archive = dir.join("core.aar");
        let write_archive = |content: &[u8]| {
            let stored =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("classes.jar", stored).unwrap();
            zip.write_all(content).unwrap();
            zip.finish().unwrap();
        };
        let node = |version: &str| {
            let module = ModuleVersion::new("com.example", "core", version);
            let artifact = Artifact::new(archive.clone(), "aar");
            DependencyNode::new(
                Coordinates::new(&module, &artifact),
                NodeType::Android,
                archive.clone(),
                None,
                None,
                vec![],
                false,
            )
        };
        let keys = || {
            let snapshot = LibraryCache::inputs(&node("1.0-SNAPSHOT")).unwrap().key();
            let release = LibraryCache::inputs(&node("1.0")).unwrap().key();
            (snapshot, release)
        };

        write_archive(b"first");
        let modified = fs::metadata(&archive).unwrap().modified().unwrap();
        let before = keys();

        // Same size and timestamp, different content.
        write_archive(b"other");
        File::options()
            .write(true)
            .open(&archive)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        let after = keys();

        assert_ne!(before.0, after.0);
        assert_eq!(before.1, after.1);
    }

    #[test]
    fn test_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let node = library(dir, "core");
        fs::remove_file(&node.artifact).unwrap();

        let files = FileCache::new(dir.join("cache"), LockingScope::SingleProcess);
        let cache = LibraryCache::with_cache(files);
        assert!(cache.explode(&node).is_err());
    }
}
