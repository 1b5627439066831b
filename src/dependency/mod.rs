//! Dependency resolution for one variant.
//!
//! The host build tool resolves configurations; this module turns its
//! resolution result into [`DependencyNode`] graphs for the compile and the
//! package scope, classifies provided dependencies, and registers the tasks
//! exploding library archives.

mod model;
mod prepare;
mod report;
mod resolver;

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use serde::Serialize;

pub use model::{
    Artifact, Component, DependencyResult, ModuleVersion, ProjectRef, ResolvedConfiguration,
};
pub use prepare::{PrepareLibraryStep, PrepareLibraryTasks};
pub use report::DependencyReport;
pub use resolver::{DependencyResolver, ScopeType, VariantDependencies, normalize_segment};

/// Group used for the coordinates of local jars.
pub const LOCAL_JARS_GROUP: &str = "__local_jars__";

/// Maven coordinates of a resolved artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Coordinates {
    pub group: String,
    pub name: String,
    pub version: String,
    pub extension: String,
    pub classifier: Option<String>,
}

impl Coordinates {
    pub fn new(module: &ModuleVersion, artifact: &Artifact) -> Self {
        Self {
            group: module.group.clone(),
            name: module.name.clone(),
            version: module.version.clone(),
            extension: artifact.extension.clone(),
            classifier: artifact.classifier.clone().filter(|c| !c.is_empty()),
        }
    }

    /// Coordinates given to a jar added by path.
    pub fn for_local_jar(file: &camino::Utf8Path) -> Self {
        Self {
            group: LOCAL_JARS_GROUP.to_string(),
            name: file.to_string(),
            version: "unspecified".to_string(),
            extension: "jar".to_string(),
            classifier: None,
        }
    }

    /// `group:name[:classifier]`, used to match the same artifact across
    /// scopes regardless of the version picked.
    pub fn versionless_key(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!("{}:{}:{}", self.group, self.name, classifier),
            None => format!("{}:{}", self.group, self.name),
        }
    }

    /// `group:name:version[:classifier]`.
    pub fn library_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => {
                format!("{}:{}:{}:{classifier}", self.group, self.name, self.version)
            }
            None => format!("{}:{}:{}", self.group, self.name, self.version),
        }
    }
}

impl Display for Coordinates {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}@{}", self.group, self.name, self.version, self.extension)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeType {
    /// An Android library archive (`aar`).
    Android,
    /// An atom bundle (`atombundle`).
    Atom,
    /// A plain java archive.
    Java,
}

/// A resolved artifact and its transitive dependencies.
///
/// Within one resolution pass every coordinate maps to exactly one node, so
/// a node reached through several paths is the same `Arc` everywhere.
#[derive(Debug)]
pub struct DependencyNode {
    pub coordinates: Coordinates,
    pub node_type: NodeType,
    /// The archive as resolved.
    pub artifact: Utf8PathBuf,
    /// Where the archive is exploded, or staged for library sub-projects.
    pub folder: Option<Utf8PathBuf>,
    /// Path of the project producing the artifact, if any.
    pub project: Option<String>,
    pub dependencies: Vec<Arc<DependencyNode>>,
    /// Compile-only: not packaged.
    pub provided: bool,
    skipped: AtomicBool,
}

impl DependencyNode {
    pub(crate) fn new(
        coordinates: Coordinates,
        node_type: NodeType,
        artifact: Utf8PathBuf,
        folder: Option<Utf8PathBuf>,
        project: Option<String>,
        dependencies: Vec<Arc<DependencyNode>>,
        provided: bool,
    ) -> Self {
        Self {
            coordinates,
            node_type,
            artifact,
            folder,
            project,
            dependencies,
            provided,
            skipped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> String {
        self.coordinates.library_name()
    }

    /// Excluded from the output, for code already shipped by a separately
    /// tested application.
    pub fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Library built by another module of the same build, staged rather than
    /// exploded.
    pub fn is_sub_project(&self) -> bool {
        self.project.is_some() && self.node_type == NodeType::Android
    }

    /// Marks this node and everything below it as skipped.
    pub(crate) fn skip_recursively(&self) {
        self.skipped.store(true, Ordering::Relaxed);
        for child in &self.dependencies {
            child.skip_recursively();
        }
    }
}

/// The direct dependencies of one scope, by kind.
#[derive(Debug, Default)]
pub struct DependencyContainer {
    pub libraries: Vec<Arc<DependencyNode>>,
    pub atoms: Vec<Arc<DependencyNode>>,
    pub jars: Vec<Arc<DependencyNode>>,
    pub local_jars: Vec<Arc<DependencyNode>>,
}

impl DependencyContainer {
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
            && self.atoms.is_empty()
            && self.jars.is_empty()
            && self.local_jars.is_empty()
    }

    /// Direct nodes of every kind.
    pub fn direct(&self) -> impl Iterator<Item = &Arc<DependencyNode>> {
        self.libraries
            .iter()
            .chain(&self.atoms)
            .chain(&self.jars)
            .chain(&self.local_jars)
    }

    /// Every reachable node once, in depth-first pre-order.
    pub fn all(&self) -> Vec<Arc<DependencyNode>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        fn walk(
            node: &Arc<DependencyNode>,
            seen: &mut HashSet<*const DependencyNode>,
            out: &mut Vec<Arc<DependencyNode>>,
        ) {
            if !seen.insert(Arc::as_ptr(node)) {
                return;
            }
            out.push(node.clone());
            for child in &node.dependencies {
                walk(child, seen, out);
            }
        }

        for node in self.direct() {
            walk(node, &mut seen, &mut out);
        }

        out
    }

    /// Nodes that are neither skipped nor provided: what ends up in the APK.
    pub fn packaged(&self) -> Vec<Arc<DependencyNode>> {
        self.all()
            .into_iter()
            .filter(|node| !node.is_skipped() && !node.provided)
            .collect()
    }
}

/// Result of [`DependencyResolver::resolve`].
#[derive(Debug, Default)]
pub struct ResolvedDependencies {
    pub compile: DependencyContainer,
    pub package: DependencyContainer,
    /// How the compile scope was resolved. [`ScopeType::CompileOnly`] means
    /// the package scope was skipped and no `provided` flag was inferred.
    pub compile_scope: ScopeType,
    /// Requested coordinates that could not be resolved, sorted.
    pub unresolved: Vec<String>,
    /// Whether the support annotations library is on the compile classpath.
    pub annotations_present: bool,
}

impl ResolvedDependencies {
    /// Android libraries and atoms that need exploding, once per coordinate.
    /// Libraries built by other modules are staged by those modules and are
    /// not included.
    pub fn to_explode(&self) -> Vec<Arc<DependencyNode>> {
        let mut seen = HashSet::new();

        self.package
            .all()
            .into_iter()
            .chain(self.compile.all())
            .filter(|node| matches!(node.node_type, NodeType::Android | NodeType::Atom))
            .filter(|node| !node.is_sub_project())
            .filter(|node| seen.insert(node.coordinates.clone()))
            .collect()
    }

    /// Android libraries built by other modules of the same build, once per
    /// coordinate.
    pub fn sub_projects(&self) -> Vec<Arc<DependencyNode>> {
        let mut seen = HashSet::new();

        self.package
            .all()
            .into_iter()
            .chain(self.compile.all())
            .filter(|node| node.is_sub_project())
            .filter(|node| seen.insert(node.coordinates.clone()))
            .collect()
    }
}
