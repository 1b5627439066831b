use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;

use super::{DependencyNode, NodeType, ResolvedDependencies};
use crate::cache::LibraryCache;
use crate::core::{camel_case, capitalize};
use crate::error::TaskError;
use crate::task::{TaskAction, TaskFactory, TaskHandle, TaskSpec};

/// Variant a library module publishes when its consumer does not ask for a
/// specific one.
const PUBLISHED_VARIANT: &str = "release";

/// Explodes one library when its prepare task runs.
#[derive(Debug)]
pub struct PrepareLibraryStep {
    pub library: Arc<DependencyNode>,
    cache: Arc<LibraryCache>,
}

impl PrepareLibraryStep {
    /// Entry point for the executor running the task. Returns the folder
    /// holding the exploded library.
    pub fn execute(&self) -> anyhow::Result<Utf8PathBuf> {
        let span = tracing::info_span!("prepare_library", library = %self.library.name());
        let _enter = span.enter();

        Ok(self.cache.prepare(&self.library)?)
    }
}

/// The tasks exploding library archives, one per coordinate.
///
/// The map is shared by every variant of a project: two variants depending
/// on the same library reuse the same task. Libraries built by other modules
/// are not exploded; the variant waits for their bundle task instead.
#[derive(Debug, Default)]
pub struct PrepareLibraryTasks {
    tasks: HashMap<String, TaskHandle>,
    cache: Arc<LibraryCache>,
}

impl PrepareLibraryTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare tasks registered from now on explode through `cache`.
    pub fn set_cache(&mut self, cache: Arc<LibraryCache>) {
        self.cache = cache;
    }

    pub fn cache(&self) -> &Arc<LibraryCache> {
        &self.cache
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `prepareComExampleLib10Library` for `com.example:lib:1.0`.
    pub fn task_name(node: &DependencyNode) -> String {
        let suffix = match node.node_type {
            NodeType::Atom => "Atom",
            _ => "Library",
        };
        format!("prepare{}{suffix}", camel_case(&node.name().replace(':', " ")))
    }

    /// `:core:bundleRelease` for a library staged by the `:core` module.
    pub fn bundle_task_name(node: &DependencyNode) -> Option<String> {
        let project = node.project.as_deref()?;
        let variant = node.coordinates.classifier.as_deref().unwrap_or(PUBLISHED_VARIANT);
        Some(format!("{project}:bundle{}", capitalize(variant)))
    }

    pub fn get(&self, node: &DependencyNode) -> Option<TaskHandle> {
        self.tasks.get(&node.coordinates.to_string()).copied()
    }

    /// Returns the prepare task of `node`, registering it on first use.
    pub fn get_or_create(
        &mut self,
        tasks: &mut dyn TaskFactory,
        node: &Arc<DependencyNode>,
    ) -> Result<TaskHandle, TaskError> {
        let key = node.coordinates.to_string();
        if let Some(&task) = self.tasks.get(&key) {
            return Ok(task);
        }

        let step = PrepareLibraryStep {
            library: node.clone(),
            cache: self.cache.clone(),
        };

        let spec = TaskSpec::new(TaskAction::PrepareLibrary(Arc::new(step)))
            .description(format!("Prepare {}", node.name()))
            .input(node.artifact.clone())
            .output(LibraryCache::local_folder(node));

        let task = tasks.register(&Self::task_name(node), spec)?;
        self.tasks.insert(key, task);

        Ok(task)
    }

    /// Makes `prepare_dependencies` wait for every archive the variant needs
    /// exploded, and for the bundle task of every library module it uses.
    /// Each prepare task runs after `pre_build`.
    pub fn wire_variant(
        &mut self,
        tasks: &mut dyn TaskFactory,
        resolved: &ResolvedDependencies,
        prepare_dependencies: TaskHandle,
        pre_build: TaskHandle,
    ) -> Result<Vec<TaskHandle>, TaskError> {
        let mut wired = Vec::new();

        for node in resolved.to_explode() {
            let task = self.get_or_create(tasks, &node)?;
            tasks.depends_on(task, &[pre_build])?;
            tasks.depends_on(prepare_dependencies, &[task])?;
            wired.push(task);
        }

        for node in resolved.sub_projects() {
            let Some(name) = Self::bundle_task_name(&node) else {
                continue;
            };
            let description = format!("Stage {} for dependent modules", node.name());
            let mut spec = TaskSpec::anchor().description(description);
            if let Some(folder) = &node.folder {
                spec = spec.output(folder.clone());
            }
            let bundle = tasks.find_or_register(&name, spec)?;
            tasks.depends_on(prepare_dependencies, &[bundle])?;
        }

        Ok(wired)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::Write;

    use camino::Utf8Path;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::cache::{FileCache, LockingScope};
    use crate::dependency::{
        Artifact, Component, DependencyResolver, ModuleVersion, VariantDependencies,
    };
    use crate::issue::{EvaluationMode, IssueReporter};
    use crate::options::ProjectOptions;
    use crate::task::TaskGraph;

    fn resolve(variant: &str) -> ResolvedDependencies {
        let appcompat = Component::module("com.android.support:appcompat-v7:25.1.0", "aar");
        let guava = Component::module("com.google.guava:guava:18.0", "jar");

        let mut deps = VariantDependencies::new(variant, ":app", "app/build");
        deps.compile.root(appcompat.clone()).root(guava.clone());
        deps.package.root(appcompat).root(guava);

        DependencyResolver::new(&ProjectOptions::default())
            .resolve(&deps, &mut IssueReporter::new(EvaluationMode::Standard))
            .unwrap()
    }

    #[test]
    fn test_prepare_task_shared_between_variants() {
        let mut graph = TaskGraph::new();
        let pre_build = graph.register("preBuild", TaskSpec::anchor()).unwrap();
        let debug = graph.register("prepareDebugDependencies", TaskSpec::anchor()).unwrap();
        let release = graph.register("prepareReleaseDependencies", TaskSpec::anchor()).unwrap();

        let mut prepare = PrepareLibraryTasks::new();
        let a = prepare.wire_variant(&mut graph, &resolve("debug"), debug, pre_build).unwrap();
        let b = prepare.wire_variant(&mut graph, &resolve("release"), release, pre_build).unwrap();

        assert_eq!(a, b);
        assert_eq!(prepare.len(), 1);

        let name = "prepareComAndroidSupportAppcompatV72510Library";
        assert!(graph.contains(name));
        assert_eq!(graph.dependencies_of(name), ["preBuild"]);
        assert_eq!(graph.dependencies_of("prepareDebugDependencies"), [name]);
        assert_eq!(graph.dependencies_of("prepareReleaseDependencies"), [name]);
        assert_eq!(
            graph.spec(a[0]).description.as_deref(),
            Some("Prepare com.android.support:appcompat-v7:25.1.0")
        );
    }

    #[test]
    fn test_sub_project_waits_for_bundle() {
        let core = Component::project(":core", true);
        let mut deps = VariantDependencies::new("debug", ":app", "app/build");
        deps.compile.root(core.clone());
        deps.package.root(core);
        let resolved = DependencyResolver::new(&ProjectOptions::default())
            .resolve(&deps, &mut IssueReporter::new(EvaluationMode::Standard))
            .unwrap();

        let mut graph = TaskGraph::new();
        let pre_build = graph.register("preBuild", TaskSpec::anchor()).unwrap();
        let debug = graph.register("prepareDebugDependencies", TaskSpec::anchor()).unwrap();
        let merge = graph.register("mergeDebugResources", TaskSpec::tool("merge")).unwrap();
        graph.depends_on(merge, &[debug]).unwrap();

        let mut prepare = PrepareLibraryTasks::new();
        prepare.wire_variant(&mut graph, &resolved, debug, pre_build).unwrap();

        assert!(prepare.is_empty());
        assert_eq!(graph.dependencies_of("prepareDebugDependencies"), [":core:bundleRelease"]);
        let merge_inputs = graph.transitive_dependencies_of("mergeDebugResources");
        assert!(merge_inputs.contains(":core:bundleRelease"));
        let bundle = graph.find(":core:bundleRelease").unwrap();
        assert_eq!(graph.spec(bundle).outputs, ["core/build/intermediates/bundles/default"]);
    }

    fn write_aar(path: &Utf8Path) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        zip.start_file("classes.jar", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"classes").unwrap();
        zip.finish().unwrap();
    }

    /// Registers the prepare tasks of `project` and runs them.
    fn prepare_module(
        root: &Utf8Path,
        project: &str,
        archive: &Utf8Path,
        cache: &Arc<LibraryCache>,
    ) {
        let library = Component {
            module: ModuleVersion::new("com.example", "widgets", "1.0"),
            project: None,
            artifacts: vec![Artifact::new(archive, "aar")],
            dependencies: Vec::new(),
        };
        let mut deps = VariantDependencies::new("debug", project, root.join(project).join("build"));
        deps.compile.root(library.clone());
        deps.package.root(library);
        let resolved = DependencyResolver::new(&ProjectOptions::default())
            .resolve(&deps, &mut IssueReporter::new(EvaluationMode::Standard))
            .unwrap();

        let mut graph = TaskGraph::new();
        let pre_build = graph.register("preBuild", TaskSpec::anchor()).unwrap();
        let debug = graph.register("prepareDebugDependencies", TaskSpec::anchor()).unwrap();

        let mut prepare = PrepareLibraryTasks::new();
        prepare.set_cache(cache.clone());
        let wired = prepare.wire_variant(&mut graph, &resolved, debug, pre_build).unwrap();

        let TaskAction::PrepareLibrary(step) = &graph.spec(wired[0]).action else {
            panic!("not a prepare task");
        };
        let folder = step.execute().unwrap();
        assert!(folder.starts_with(root.join(project)));
        assert_eq!(fs::read_to_string(folder.join("jars/classes.jar")).unwrap(), "classes");
    }

    #[test]
    fn test_modules_share_cached_library() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let archive = root.join("widgets-1.0.aar");
        write_aar(&archive);

        let cache = Arc::new(LibraryCache::with_cache(FileCache::new(
            root.join("cache"),
            LockingScope::MultiProcess,
        )));
        prepare_module(root, "app", &archive, &cache);
        prepare_module(root, "lib", &archive, &cache);

        let files = cache.cache().unwrap();
        assert_eq!((files.misses(), files.hits()), (1, 1));
    }
}
