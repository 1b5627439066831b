use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use super::{TaskFactory, TaskHandle, TaskSpec};
use crate::error::TaskError;

/// Kind of ordering constraint between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    DependsOn,
    MustRunAfter,
}

pub(crate) struct TaskNode {
    pub name: String,
    pub spec: TaskSpec,
}

/// The task graph of a whole project.
///
/// `TaskGraph` records every registered task and the ordering edges between
/// them. Edges point from the task that runs first to the task that runs
/// later, so a topological order of the graph is an execution order.
///
/// # Example
///
/// ```rust
/// use droidgraph::{TaskFactory, TaskGraph, TaskSpec};
///
/// let mut graph = TaskGraph::new();
/// let pre = graph.register("preBuild", TaskSpec::anchor()).unwrap();
/// let compile = graph.register("compileDebugJavaWithJavac", TaskSpec::tool("javac")).unwrap();
/// graph.depends_on(compile, &[pre]).unwrap();
///
/// assert_eq!(graph.dependencies_of("compileDebugJavaWithJavac"), ["preBuild"]);
/// ```
#[derive(Default)]
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskNode, Edge>,
    names: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn spec(&self, task: TaskHandle) -> &TaskSpec {
        &self.graph[task.0].spec
    }

    /// Names of every registered task, in registration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|node| node.name.as_str())
    }

    /// Names of the tasks registered for `variant`, in registration order.
    pub fn tasks_of_variant<'a>(&'a self, variant: &'a str) -> impl Iterator<Item = &'a str> {
        self.graph
            .node_weights()
            .filter(move |node| node.spec.variant.as_deref() == Some(variant))
            .map(|node| node.name.as_str())
    }

    /// Direct `dependsOn` edges of `name`, sorted by name.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.incoming(name, Edge::DependsOn)
    }

    /// Direct `mustRunAfter` edges of `name`, sorted by name.
    pub fn must_run_after_of(&self, name: &str) -> Vec<&str> {
        self.incoming(name, Edge::MustRunAfter)
    }

    /// Every task `name` pulls in through `dependsOn`, transitively.
    pub fn transitive_dependencies_of(&self, name: &str) -> BTreeSet<&str> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.names.get(name) else {
            return found;
        };

        let mut stack = vec![start];
        let mut visited = vec![false; self.graph.node_count()];

        while let Some(index) = stack.pop() {
            for edge in self.graph.edges_directed(index, Direction::Incoming) {
                if *edge.weight() != Edge::DependsOn || visited[edge.source().index()] {
                    continue;
                }
                visited[edge.source().index()] = true;
                found.insert(self.graph[edge.source()].name.as_str());
                stack.push(edge.source());
            }
        }

        found
    }

    /// Checks the whole graph for cycles, including `mustRunAfter` edges.
    pub fn verify(&self) -> Result<(), TaskError> {
        self.execution_order().map(|_| ())
    }

    /// One valid execution order of all registered tasks.
    pub fn execution_order(&self) -> Result<Vec<&str>, TaskError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .map(|index| self.graph[index].name.as_str())
                    .collect()
            })
            .map_err(|cycle| TaskError::Cycle(self.graph[cycle.node_id()].name.clone()))
    }

    fn incoming(&self, name: &str, kind: Edge) -> Vec<&str> {
        let Some(&index) = self.names.get(name) else {
            return Vec::new();
        };

        let mut names: Vec<&str> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .filter(|edge| *edge.weight() == kind)
            .map(|edge| self.graph[edge.source()].name.as_str())
            .collect();

        names.sort_unstable();
        names
    }

    fn add_edge(
        &mut self,
        task: TaskHandle,
        other: TaskHandle,
        kind: Edge,
    ) -> Result<(), TaskError> {
        if task == other {
            return Err(TaskError::SelfDependency(self.graph[task.0].name.clone()));
        }

        if let Some(edge) = self.graph.find_edge(other.0, task.0) {
            if kind == Edge::DependsOn {
                self.graph[edge] = Edge::DependsOn;
            }
            return Ok(());
        }

        if has_path_connecting(&self.graph, task.0, other.0, None) {
            return Err(TaskError::Cycle(self.graph[task.0].name.clone()));
        }

        self.graph.add_edge(other.0, task.0, kind);
        Ok(())
    }
}

impl TaskFactory for TaskGraph {
    fn register(&mut self, name: &str, spec: TaskSpec) -> Result<TaskHandle, TaskError> {
        if self.names.contains_key(name) {
            return Err(TaskError::Duplicate(name.to_string()));
        }

        tracing::trace!(task = name, "registering task");

        let index = self.graph.add_node(TaskNode {
            name: name.to_string(),
            spec,
        });
        self.names.insert(name.to_string(), index);

        Ok(TaskHandle(index))
    }

    fn find(&self, name: &str) -> Option<TaskHandle> {
        self.names.get(name).copied().map(TaskHandle)
    }

    fn name(&self, task: TaskHandle) -> &str {
        &self.graph[task.0].name
    }

    fn depends_on(&mut self, task: TaskHandle, others: &[TaskHandle]) -> Result<(), TaskError> {
        for &other in others {
            self.add_edge(task, other, Edge::DependsOn)?;
        }
        Ok(())
    }

    fn must_run_after(
        &mut self,
        task: TaskHandle,
        others: &[TaskHandle],
    ) -> Result<(), TaskError> {
        for &other in others {
            self.add_edge(task, other, Edge::MustRunAfter)?;
        }
        Ok(())
    }

    fn configure(&mut self, task: TaskHandle, action: &mut dyn FnMut(&mut TaskSpec)) {
        action(&mut self.graph[task.0].spec);
    }
}

/// Renders the graph as a Mermaid flowchart. Solid arrows are `dependsOn`,
/// dotted arrows are `mustRunAfter`.
impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.name.replace('"', "\\\"");

            if node.spec.is_anchor() {
                writeln!(f, "    {}([\"{}\"])", index.index(), name)?;
            } else {
                writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
            }
        }

        for edge in self.graph.edge_references() {
            let arrow = match edge.weight() {
                Edge::DependsOn => "-->",
                Edge::MustRunAfter => "-.->",
            };
            writeln!(
                f,
                "    {} {} {}",
                edge.source().index(),
                arrow,
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_abc() -> (TaskGraph, TaskHandle, TaskHandle, TaskHandle) {
        let mut graph = TaskGraph::new();
        let a = graph.register("a", TaskSpec::anchor()).unwrap();
        let b = graph.register("b", TaskSpec::tool("javac")).unwrap();
        let c = graph.register("c", TaskSpec::tool("dx")).unwrap();
        (graph, a, b, c)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (mut graph, ..) = graph_abc();
        let result = graph.register("a", TaskSpec::anchor());
        assert!(matches!(result, Err(TaskError::Duplicate(name)) if name == "a"));
    }

    #[test]
    fn test_find_or_register_reuses() {
        let (mut graph, a, ..) = graph_abc();
        assert_eq!(graph.find_or_register("a", TaskSpec::anchor()).unwrap(), a);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_optional_depends_on_none_is_noop() {
        let (mut graph, a, ..) = graph_abc();
        graph.optional_depends_on(a, None).unwrap();
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn test_transitive_dependencies() {
        let (mut graph, a, b, c) = graph_abc();
        graph.depends_on(b, &[a]).unwrap();
        graph.depends_on(c, &[b]).unwrap();

        let deps: Vec<_> = graph.transitive_dependencies_of("c").into_iter().collect();
        assert_eq!(deps, ["a", "b"]);
        assert_eq!(graph.execution_order().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_rejected_on_insert() {
        let (mut graph, a, b, c) = graph_abc();
        graph.depends_on(b, &[a]).unwrap();
        graph.depends_on(c, &[b]).unwrap();

        assert!(matches!(graph.depends_on(a, &[c]), Err(TaskError::Cycle(_))));
        assert!(matches!(graph.must_run_after(a, &[c]), Err(TaskError::Cycle(_))));
        assert!(matches!(graph.depends_on(a, &[a]), Err(TaskError::SelfDependency(_))));
        graph.verify().unwrap();
    }

    #[test]
    fn test_must_run_after_does_not_pull_in() {
        let (mut graph, a, b, _) = graph_abc();
        graph.must_run_after(b, &[a]).unwrap();

        assert!(graph.dependencies_of("b").is_empty());
        assert_eq!(graph.must_run_after_of("b"), ["a"]);

        // Upgrading to a hard dependency replaces the soft edge.
        graph.depends_on(b, &[a]).unwrap();
        assert_eq!(graph.dependencies_of("b"), ["a"]);
        assert!(graph.must_run_after_of("b").is_empty());
    }

    #[test]
    fn test_configure_and_mermaid() {
        let (mut graph, a, b, _) = graph_abc();
        graph.depends_on(b, &[a]).unwrap();
        graph.configure(b, &mut |spec| spec.description = Some("compile".into()));

        assert_eq!(graph.spec(b).description.as_deref(), Some("compile"));

        let mermaid = graph.to_string();
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("0([\"a\"])"));
        assert!(mermaid.contains("0 --> 1"));
    }

    #[test]
    fn test_tasks_of_variant() {
        let (mut graph, ..) = graph_abc();
        graph.register("assembleDebug", TaskSpec::anchor().variant("debug")).unwrap();
        graph.register("assembleRelease", TaskSpec::anchor().variant("release")).unwrap();

        let debug: Vec<_> = graph.tasks_of_variant("debug").collect();
        assert_eq!(debug, ["assembleDebug"]);
        assert_eq!(graph.task_names().count(), 5);
    }
}
