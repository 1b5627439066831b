//! Registration of named units of work and the edges between them.
//!
//! Task execution belongs to the host executor; this module only records what
//! runs and in which order. [`TaskFactory`] is the seam the rest of the crate
//! talks to, [`TaskGraph`] is the in-memory implementation backed by
//! `petgraph`.

mod graph;

use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::graph::NodeIndex;

use crate::cache::LibraryCache;
use crate::dependency::PrepareLibraryStep;
use crate::error::TaskError;
use crate::transform::TransformStep;

pub use graph::{Edge, TaskGraph};

/// A copyable reference to a registered task.
///
/// Handles are only meaningful for the factory that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) NodeIndex);

impl TaskHandle {
    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.0
    }
}

/// What an executor should do when the task runs.
#[derive(Clone)]
pub enum TaskAction {
    /// Empty marker task other tasks hang off.
    Anchor,
    /// Invocation of an opaque external tool (aapt, javac, zipalign...).
    Tool(&'static str),
    /// A transform fed with the streams it consumed at registration.
    Transform(Arc<TransformStep>),
    /// Explode a library archive into its staging directory.
    PrepareLibrary(Arc<PrepareLibraryStep>),
    /// Empty the shared build cache.
    CleanBuildCache(Arc<LibraryCache>),
    /// Print a report about the project.
    Report(&'static str),
}

impl std::fmt::Debug for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Anchor => f.write_str("Anchor"),
            TaskAction::Tool(tool) => write!(f, "Tool({tool})"),
            TaskAction::Transform(step) => write!(f, "Transform({})", step.transform.name()),
            TaskAction::PrepareLibrary(step) => {
                write!(f, "PrepareLibrary({})", step.library.artifact)
            }
            TaskAction::CleanBuildCache(_) => f.write_str("CleanBuildCache"),
            TaskAction::Report(report) => write!(f, "Report({report})"),
        }
    }
}

/// Everything the graph knows about a task besides its edges.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub action: TaskAction,
    pub group: Option<&'static str>,
    pub description: Option<String>,
    /// Name of the variant this task belongs to, `None` for global tasks.
    pub variant: Option<String>,
    pub inputs: Vec<Utf8PathBuf>,
    pub outputs: Vec<Utf8PathBuf>,
}

impl TaskSpec {
    pub fn new(action: TaskAction) -> Self {
        Self {
            action,
            group: None,
            description: None,
            variant: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn anchor() -> Self {
        Self::new(TaskAction::Anchor)
    }

    pub fn tool(tool: &'static str) -> Self {
        Self::new(TaskAction::Tool(tool))
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.group = Some(group);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn input(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self.action, TaskAction::Anchor)
    }
}

/// Interface of the host build graph.
///
/// Registering the same name twice is an error. Edges always point from the
/// dependency to the dependent, and an edge that would close a cycle is
/// rejected when it is added.
pub trait TaskFactory {
    fn register(&mut self, name: &str, spec: TaskSpec) -> Result<TaskHandle, TaskError>;

    fn find(&self, name: &str) -> Option<TaskHandle>;

    fn name(&self, task: TaskHandle) -> &str;

    /// `task` will only run after every task in `others` succeeded.
    fn depends_on(&mut self, task: TaskHandle, others: &[TaskHandle]) -> Result<(), TaskError>;

    /// `task` runs after `others` when both are scheduled, but does not pull
    /// them in and still runs if they fail.
    fn must_run_after(&mut self, task: TaskHandle, others: &[TaskHandle])
    -> Result<(), TaskError>;

    fn configure(&mut self, task: TaskHandle, action: &mut dyn FnMut(&mut TaskSpec));

    /// Like [`TaskFactory::depends_on`], but silently does nothing for `None`.
    fn optional_depends_on(
        &mut self,
        task: TaskHandle,
        other: Option<TaskHandle>,
    ) -> Result<(), TaskError> {
        match other {
            Some(other) => self.depends_on(task, &[other]),
            None => Ok(()),
        }
    }

    /// Returns the existing task of that name, or registers a new one.
    fn find_or_register(&mut self, name: &str, spec: TaskSpec) -> Result<TaskHandle, TaskError> {
        match self.find(name) {
            Some(task) => Ok(task),
            None => self.register(name, spec),
        }
    }

    fn get(&self, name: &str) -> Result<TaskHandle, TaskError> {
        self.find(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))
    }
}
