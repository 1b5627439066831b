//! The stream pipeline.
//!
//! Build outputs flow between post-compilation steps as [`Stream`]s, each
//! tagged with the kinds of content it carries and the parts of the project
//! it comes from. A [`Transform`] declares which tags it wants; the
//! [`TransformManager`] hands it every live stream that matches and replaces
//! them with the transform's output.

mod manager;
mod tool;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::task::TaskHandle;

pub use manager::TransformManager;
pub use tool::ToolTransform;

/// What a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ContentType {
    Classes,
    Resources,
    NativeLibs,
    Dex,
    DataBinding,
}

impl Display for ContentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentType::Classes => "Classes",
            ContentType::Resources => "Resources",
            ContentType::NativeLibs => "NativeLibs",
            ContentType::Dex => "Dex",
            ContentType::DataBinding => "DataBinding",
        };
        f.write_str(name)
    }
}

/// Where the content of a stream comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Scope {
    /// The module's own code.
    Project,
    /// Local jars of the module.
    ProjectLocalDeps,
    /// Other modules of the same build.
    SubProjects,
    /// Local jars of other modules.
    SubProjectsLocalDeps,
    /// Libraries fetched from repositories.
    ExternalLibraries,
    /// The variant under test, when building a test variant.
    TestedCode,
    /// Compile-only dependencies. Never consumed.
    ProvidedOnly,
}

pub const CONTENT_CLASS: &[ContentType] = &[ContentType::Classes];
pub const CONTENT_JARS: &[ContentType] = &[ContentType::Classes, ContentType::Resources];
pub const CONTENT_RESOURCES: &[ContentType] = &[ContentType::Resources];
pub const CONTENT_NATIVE_LIBS: &[ContentType] = &[ContentType::NativeLibs];
pub const CONTENT_DEX: &[ContentType] = &[ContentType::Dex];

pub const SCOPE_PROJECT: &[Scope] = &[Scope::Project];
pub const SCOPE_FULL_PROJECT: &[Scope] = &[
    Scope::Project,
    Scope::ProjectLocalDeps,
    Scope::SubProjects,
    Scope::SubProjectsLocalDeps,
    Scope::ExternalLibraries,
];
pub const SCOPE_FULL_LIBRARY: &[Scope] = &[Scope::Project, Scope::ProjectLocalDeps];

/// Collects a constant slice into the set type used on streams.
pub fn set_of<T: Ord + Copy>(items: &[T]) -> BTreeSet<T> {
    items.iter().copied().collect()
}

/// Where the files of a stream live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocation {
    /// An explicit list of jars or folders.
    Files(Vec<Utf8PathBuf>),
    /// A folder owned by the transform that produced the stream.
    Folder(Utf8PathBuf),
}

impl StreamLocation {
    pub fn paths(&self) -> Vec<&Utf8Path> {
        match self {
            StreamLocation::Files(files) => files.iter().map(|f| f.as_path()).collect(),
            StreamLocation::Folder(folder) => vec![folder.as_path()],
        }
    }
}

/// A tagged bundle of build outputs together with the tasks producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub name: String,
    pub content_types: BTreeSet<ContentType>,
    pub scopes: BTreeSet<Scope>,
    pub location: StreamLocation,
    pub producers: Vec<TaskHandle>,
}

impl Stream {
    pub fn new(
        name: impl Into<String>,
        content_types: &[ContentType],
        scopes: &[Scope],
        location: StreamLocation,
    ) -> Self {
        Self {
            name: name.into(),
            content_types: set_of(content_types),
            scopes: set_of(scopes),
            location,
            producers: Vec::new(),
        }
    }

    pub fn produced_by(mut self, task: TaskHandle) -> Self {
        self.producers.push(task);
        self
    }

    pub fn produced_by_all(mut self, tasks: impl IntoIterator<Item = TaskHandle>) -> Self {
        self.producers.extend(tasks);
        self
    }

    /// Whether the stream shares at least one content type and one scope with
    /// the given sets.
    pub fn matches(&self, types: &BTreeSet<ContentType>, scopes: &BTreeSet<Scope>) -> bool {
        !self.content_types.is_disjoint(types) && !self.scopes.is_disjoint(scopes)
    }

    fn restricted_copy(
        &self,
        content_types: BTreeSet<ContentType>,
        scopes: BTreeSet<Scope>,
    ) -> Self {
        Self {
            name: self.name.clone(),
            content_types,
            scopes,
            location: self.location.clone(),
            producers: self.producers.clone(),
        }
    }
}

/// The files handed to a transform for one consumed or referenced stream.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub content_types: BTreeSet<ContentType>,
    pub scopes: BTreeSet<Scope>,
    pub paths: Vec<Utf8PathBuf>,
}

impl From<&Stream> for TransformInput {
    fn from(stream: &Stream) -> Self {
        Self {
            content_types: stream.content_types.clone(),
            scopes: stream.scopes.clone(),
            paths: stream.location.paths().into_iter().map(|p| p.to_owned()).collect(),
        }
    }
}

/// Arguments of one transform execution.
pub struct TransformInvocation<'a> {
    pub variant: &'a str,
    pub inputs: &'a [TransformInput],
    pub referenced: &'a [TransformInput],
    pub output: &'a Utf8Path,
    /// Set when the transform supports it and a previous output exists.
    pub incremental: bool,
}

/// A pluggable pipeline stage.
///
/// The scopes a transform declares are consumed: matching streams disappear
/// from the pipeline and are replaced by the transform's output. Referenced
/// scopes are only read.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn input_types(&self) -> BTreeSet<ContentType>;

    fn output_types(&self) -> BTreeSet<ContentType> {
        self.input_types()
    }

    /// Scopes consumed by the transform. Empty for a transform that only
    /// reads its referenced scopes.
    fn scopes(&self) -> BTreeSet<Scope>;

    fn output_scopes(&self) -> BTreeSet<Scope> {
        self.scopes()
    }

    fn referenced_scopes(&self) -> BTreeSet<Scope> {
        BTreeSet::new()
    }

    fn is_incremental(&self) -> bool {
        false
    }

    /// Extra files whose changes invalidate the transform output.
    fn secondary_files(&self) -> Vec<Utf8PathBuf> {
        Vec::new()
    }

    fn transform(&self, invocation: &TransformInvocation<'_>) -> anyhow::Result<()>;
}

/// A transform wired into the graph, with the streams it was given.
pub struct TransformStep {
    pub transform: Arc<dyn Transform>,
    pub variant: String,
    pub inputs: Vec<TransformInput>,
    pub referenced: Vec<TransformInput>,
    pub output: Utf8PathBuf,
}

impl TransformStep {
    /// Entry point for the executor running the task.
    pub fn execute(&self) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "transform",
            name = self.transform.name(),
            variant = %self.variant
        );
        let _enter = span.enter();

        let incremental = self.transform.is_incremental() && self.output.is_dir();
        std::fs::create_dir_all(&self.output)?;

        self.transform.transform(&TransformInvocation {
            variant: &self.variant,
            inputs: &self.inputs,
            referenced: &self.referenced,
            output: &self.output,
            incremental,
        })
    }
}

impl std::fmt::Debug for TransformStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStep")
            .field("transform", &self.transform.name())
            .field("variant", &self.variant)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct Listing;

    impl Transform for Listing {
        fn name(&self) -> &str {
            "listing"
        }

        fn input_types(&self) -> BTreeSet<ContentType> {
            set_of(CONTENT_CLASS)
        }

        fn scopes(&self) -> BTreeSet<Scope> {
            set_of(SCOPE_FULL_PROJECT)
        }

        fn transform(&self, invocation: &TransformInvocation<'_>) -> anyhow::Result<()> {
            let paths: Vec<&str> = invocation
                .inputs
                .iter()
                .flat_map(|input| input.paths.iter().map(|p| p.as_str()))
                .collect();
            fs::write(invocation.output.join("inputs.txt"), paths.join("\n"))?;
            Ok(())
        }
    }

    #[test]
    fn test_step_creates_output_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let stream = Stream::new(
            "javac-output",
            CONTENT_CLASS,
            &[Scope::Project],
            StreamLocation::Folder("build/intermediates/classes/debug".into()),
        );

        let step = TransformStep {
            transform: Arc::new(Listing),
            variant: "debug".into(),
            inputs: vec![TransformInput::from(&stream)],
            referenced: Vec::new(),
            output: root.join("transforms/listing/debug"),
        };
        step.execute().unwrap();

        let written = fs::read_to_string(root.join("transforms/listing/debug/inputs.txt")).unwrap();
        assert_eq!(written, "build/intermediates/classes/debug");
    }
}
