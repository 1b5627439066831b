use std::collections::BTreeSet;
use std::sync::Arc;

use camino::Utf8PathBuf;

use super::{ContentType, Scope, Stream, StreamLocation, Transform, TransformInput, TransformStep};
use crate::core::capitalize;
use crate::error::DroidGraphError;
use crate::issue::{IssueReporter, IssueType, SyncIssue};
use crate::task::{TaskAction, TaskFactory, TaskHandle, TaskSpec};

/// Live set of streams of one variant.
///
/// Adding a transform consumes every matching stream: once a transform took
/// a stream, later transforms only see the transform's output. This is what
/// lets any number of transforms chain linearly without knowing about each
/// other.
#[derive(Debug)]
pub struct TransformManager {
    variant: String,
    variant_dir: String,
    transforms_dir: Utf8PathBuf,
    allowed_scopes: BTreeSet<Scope>,
    streams: Vec<Stream>,
}

impl TransformManager {
    /// `allowed_scopes` are the scopes a transform may consume for this kind
    /// of variant; `transforms_dir` is where transform outputs are placed.
    pub fn new(
        variant: impl Into<String>,
        variant_dir: impl Into<String>,
        transforms_dir: impl Into<Utf8PathBuf>,
        allowed_scopes: BTreeSet<Scope>,
    ) -> Self {
        Self {
            variant: variant.into(),
            variant_dir: variant_dir.into(),
            transforms_dir: transforms_dir.into(),
            allowed_scopes,
            streams: Vec::new(),
        }
    }

    pub fn add_stream(&mut self, stream: Stream) {
        tracing::debug!(variant = %self.variant, stream = %stream.name, "adding stream");
        self.streams.push(stream);
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn get_streams(&self, filter: impl Fn(&Stream) -> bool) -> Vec<&Stream> {
        self.streams.iter().filter(|s| filter(s)).collect()
    }

    /// Streams carrying `content_type`, used to hook packaging up to the end
    /// of the pipeline.
    pub fn pipeline_output(&self, content_type: ContentType) -> Vec<&Stream> {
        self.get_streams(|s| s.content_types.contains(&content_type))
    }

    /// Producers of every stream carrying `content_type`.
    pub fn pipeline_producers(&self, content_type: ContentType) -> Vec<TaskHandle> {
        let mut producers: Vec<TaskHandle> = self
            .pipeline_output(content_type)
            .into_iter()
            .flat_map(|s| s.producers.iter().copied())
            .collect();
        producers.sort_unstable();
        producers.dedup();
        producers
    }

    /// Name of the task running `transform` for this variant, for example
    /// `transformClassesAndResourcesWithProguardForRelease`.
    pub fn task_name(&self, transform: &dyn Transform) -> String {
        let types: Vec<String> = transform
            .input_types()
            .iter()
            .map(|t| t.to_string())
            .collect();

        format!(
            "transform{}With{}For{}",
            types.join("And"),
            capitalize(transform.name()),
            capitalize(&self.variant)
        )
    }

    /// Wires `transform` into the pipeline.
    ///
    /// Returns `Ok(None)` when no live stream matches, or when the transform
    /// is rejected with a sync issue in model-only evaluation.
    pub fn add_transform(
        &mut self,
        tasks: &mut dyn TaskFactory,
        issues: &mut IssueReporter,
        transform: Arc<dyn Transform>,
    ) -> Result<Option<TaskHandle>, DroidGraphError> {
        if !self.validate(issues, transform.as_ref())? {
            return Ok(None);
        }

        let input_types = transform.input_types();
        let scopes = transform.scopes();
        let referenced_scopes = transform.referenced_scopes();

        let consumed = self.take_streams(&input_types, &scopes);
        let referenced: Vec<Stream> = self
            .streams
            .iter()
            .filter(|s| s.matches(&input_types, &referenced_scopes))
            .cloned()
            .collect();

        let nothing_to_do = if scopes.is_empty() {
            referenced.is_empty()
        } else {
            consumed.is_empty()
        };

        if nothing_to_do {
            tracing::debug!(
                variant = %self.variant,
                transform = transform.name(),
                "no matching streams, skipping transform"
            );
            return Ok(None);
        }

        let name = self.task_name(transform.as_ref());
        let output = self
            .transforms_dir
            .join(transform.name())
            .join(&self.variant_dir);

        let step = TransformStep {
            transform: transform.clone(),
            variant: self.variant.clone(),
            inputs: consumed.iter().map(TransformInput::from).collect(),
            referenced: referenced.iter().map(TransformInput::from).collect(),
            output: output.clone(),
        };

        let mut spec = TaskSpec::new(TaskAction::Transform(Arc::new(step)))
            .variant(&self.variant)
            .output(output.clone());
        for path in transform.secondary_files() {
            spec = spec.input(path);
        }

        let task = tasks.register(&name, spec)?;

        let mut producers: Vec<TaskHandle> = consumed
            .iter()
            .chain(referenced.iter())
            .flat_map(|s| s.producers.iter().copied())
            .collect();
        producers.sort_unstable();
        producers.dedup();
        tasks.depends_on(task, &producers)?;

        let output_types = transform.output_types();
        if !scopes.is_empty() && !output_types.is_empty() {
            self.streams.push(Stream {
                name: name.clone(),
                content_types: output_types,
                scopes: transform.output_scopes(),
                location: StreamLocation::Folder(output),
                producers: vec![task],
            });
        }

        tracing::debug!(
            variant = %self.variant,
            task = %name,
            consumed = consumed.len(),
            "added transform"
        );

        Ok(Some(task))
    }

    /// Returns whether the transform may be added. Illegal scopes are a sync
    /// issue, which only aborts in standard evaluation.
    fn validate(
        &self,
        issues: &mut IssueReporter,
        transform: &dyn Transform,
    ) -> Result<bool, DroidGraphError> {
        let scopes = transform.scopes();

        if scopes.contains(&Scope::ProvidedOnly) {
            issues.report(SyncIssue::error(
                IssueType::IllegalTransformScope,
                Some(transform.name().to_string()),
                format!(
                    "PROVIDED_ONLY scope cannot be consumed by Transform '{}'",
                    transform.name()
                ),
            ))?;
            return Ok(false);
        }

        let illegal: Vec<&Scope> = scopes.difference(&self.allowed_scopes).collect();
        if !illegal.is_empty() {
            issues.report(SyncIssue::error(
                IssueType::IllegalTransformScope,
                Some(transform.name().to_string()),
                format!(
                    "Transform '{}' cannot consume scopes {:?} in variant '{}'",
                    transform.name(),
                    illegal,
                    self.variant
                ),
            ))?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Removes every stream matching the tags from the live set. Parts of a
    /// stream outside the requested types or scopes stay behind as restricted
    /// copies.
    fn take_streams(
        &mut self,
        types: &BTreeSet<ContentType>,
        scopes: &BTreeSet<Scope>,
    ) -> Vec<Stream> {
        if scopes.is_empty() {
            return Vec::new();
        }

        let (consumed, kept): (Vec<Stream>, Vec<Stream>) = std::mem::take(&mut self.streams)
            .into_iter()
            .partition(|s| s.matches(types, scopes));
        self.streams = kept;

        let mut taken = Vec::with_capacity(consumed.len());
        for stream in consumed {
            let common_types: BTreeSet<_> =
                stream.content_types.intersection(types).copied().collect();
            let common_scopes: BTreeSet<_> = stream.scopes.intersection(scopes).copied().collect();

            let leftover_types: BTreeSet<_> =
                stream.content_types.difference(types).copied().collect();
            if !leftover_types.is_empty() {
                self.streams
                    .push(stream.restricted_copy(leftover_types, stream.scopes.clone()));
            }

            let leftover_scopes: BTreeSet<_> = stream.scopes.difference(scopes).copied().collect();
            if !leftover_scopes.is_empty() {
                self.streams
                    .push(stream.restricted_copy(common_types.clone(), leftover_scopes));
            }

            taken.push(stream.restricted_copy(common_types, common_scopes));
        }

        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::EvaluationMode;
    use crate::task::TaskGraph;
    use crate::transform::{
        CONTENT_CLASS, CONTENT_DEX, CONTENT_JARS, SCOPE_FULL_LIBRARY, SCOPE_FULL_PROJECT,
        SCOPE_PROJECT, ToolTransform, set_of,
    };

    fn manager(allowed: &[Scope]) -> TransformManager {
        TransformManager::new("debug", "debug", "build/intermediates/transforms", set_of(allowed))
    }

    fn classes_stream(tasks: &mut TaskGraph, name: &str, scope: Scope) -> Stream {
        let producer = tasks.register(name, TaskSpec::tool("javac")).unwrap();
        Stream::new(
            name,
            CONTENT_CLASS,
            &[scope],
            StreamLocation::Files(vec![Utf8PathBuf::from(format!("build/{name}"))]),
        )
        .produced_by(producer)
    }

    #[test]
    fn test_consumed_streams_are_replaced() {
        let mut tasks = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut manager = manager(SCOPE_FULL_PROJECT);

        manager.add_stream(classes_stream(&mut tasks, "javac", Scope::Project));
        manager.add_stream(classes_stream(&mut tasks, "extLibs", Scope::ExternalLibraries));

        let transform = ToolTransform::new("jacoco", "jacoco")
            .with_input_types(CONTENT_CLASS)
            .with_scopes(SCOPE_PROJECT);
        let task = manager
            .add_transform(&mut tasks, &mut issues, Arc::new(transform))
            .unwrap()
            .unwrap();

        let project = set_of(SCOPE_PROJECT);
        let classes = set_of(CONTENT_CLASS);
        let matching = manager.get_streams(|s| s.matches(&classes, &project));

        pretty_assertions::assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].producers, vec![task]);
        assert_eq!(matching[0].name, "transformClassesWithJacocoForDebug");
        assert!(manager.streams().iter().all(|s| s.name != "javac"));
        assert!(manager.streams().iter().any(|s| s.name == "extLibs"));
        assert_eq!(tasks.dependencies_of("transformClassesWithJacocoForDebug"), ["javac"]);
    }

    #[test]
    fn test_no_matching_stream_gives_no_task() {
        let mut tasks = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut manager = manager(SCOPE_FULL_PROJECT);

        manager.add_stream(classes_stream(&mut tasks, "javac", Scope::Project));

        let transform = ToolTransform::new("dex", "d8")
            .with_input_types(CONTENT_DEX)
            .with_scopes(SCOPE_FULL_PROJECT);
        let task = manager
            .add_transform(&mut tasks, &mut issues, Arc::new(transform))
            .unwrap();

        assert!(task.is_none());
        assert_eq!(manager.streams().len(), 1);
        assert!(!tasks.contains("transformDexWithDexForDebug"));
    }

    #[test]
    fn test_leftover_types_stay_live() {
        let mut tasks = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut manager = manager(SCOPE_FULL_PROJECT);

        let producer = tasks.register("extract", TaskSpec::tool("unzip")).unwrap();
        manager.add_stream(
            Stream::new(
                "ext-libs",
                CONTENT_JARS,
                &[Scope::ExternalLibraries],
                StreamLocation::Files(vec!["libs/a.jar".into()]),
            )
            .produced_by(producer),
        );

        let transform = ToolTransform::new("desugar", "desugar")
            .with_input_types(CONTENT_CLASS)
            .with_scopes(SCOPE_FULL_PROJECT);
        manager
            .add_transform(&mut tasks, &mut issues, Arc::new(transform))
            .unwrap()
            .unwrap();

        let resources = manager.pipeline_output(ContentType::Resources);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "ext-libs");
        assert_eq!(resources[0].content_types, set_of(&[ContentType::Resources]));
    }

    #[test]
    fn test_chained_transforms_see_previous_output() {
        let mut tasks = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut manager = manager(SCOPE_FULL_PROJECT);

        manager.add_stream(classes_stream(&mut tasks, "javac", Scope::Project));
        manager.add_stream(classes_stream(&mut tasks, "extLibs", Scope::ExternalLibraries));

        let proguard = ToolTransform::new("proguard", "proguard")
            .with_input_types(CONTENT_CLASS)
            .with_scopes(SCOPE_FULL_PROJECT)
            .with_output_scopes(SCOPE_PROJECT);
        let dex = ToolTransform::new("dex", "d8")
            .with_input_types(CONTENT_CLASS)
            .with_output_types(CONTENT_DEX)
            .with_scopes(SCOPE_FULL_PROJECT);

        manager
            .add_transform(&mut tasks, &mut issues, Arc::new(proguard))
            .unwrap()
            .unwrap();
        manager
            .add_transform(&mut tasks, &mut issues, Arc::new(dex))
            .unwrap()
            .unwrap();

        assert_eq!(
            tasks.dependencies_of("transformClassesWithProguardForDebug"),
            ["extLibs", "javac"]
        );
        assert_eq!(
            tasks.dependencies_of("transformClassesWithDexForDebug"),
            ["transformClassesWithProguardForDebug"]
        );
        assert_eq!(manager.streams().len(), 1);
        assert_eq!(manager.pipeline_output(ContentType::Dex).len(), 1);
    }

    #[test]
    fn test_referenced_streams_are_not_consumed() {
        let mut tasks = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut manager = manager(SCOPE_FULL_PROJECT);

        manager.add_stream(classes_stream(&mut tasks, "javac", Scope::Project));

        let lister = ToolTransform::new("multidexlist", "mainDexClasses")
            .with_input_types(CONTENT_CLASS)
            .with_referenced_scopes(SCOPE_FULL_PROJECT);
        let task = manager
            .add_transform(&mut tasks, &mut issues, Arc::new(lister))
            .unwrap();

        assert!(task.is_some());
        assert_eq!(manager.streams().len(), 1);
        assert_eq!(manager.streams()[0].name, "javac");
    }

    #[test]
    fn test_illegal_scope_is_sync_issue() {
        let mut tasks = TaskGraph::new();
        let mut manager = manager(SCOPE_FULL_LIBRARY);
        manager.add_stream(classes_stream(&mut tasks, "javac", Scope::Project));

        let custom = || {
            Arc::new(
                ToolTransform::new("custom", "custom")
                    .with_input_types(CONTENT_CLASS)
                    .with_scopes(SCOPE_FULL_PROJECT),
            )
        };

        let mut model = IssueReporter::new(EvaluationMode::Model);
        let task = manager.add_transform(&mut tasks, &mut model, custom()).unwrap();
        assert!(task.is_none());
        assert_eq!(model.of_type(IssueType::IllegalTransformScope).count(), 1);

        let mut standard = IssueReporter::new(EvaluationMode::Standard);
        assert!(manager.add_transform(&mut tasks, &mut standard, custom()).is_err());

        let provided = ToolTransform::new("bad", "bad")
            .with_input_types(CONTENT_CLASS)
            .with_scopes(&[Scope::ProvidedOnly]);
        let mut model = IssueReporter::new(EvaluationMode::Model);
        assert!(
            manager
                .add_transform(&mut tasks, &mut model, Arc::new(provided))
                .unwrap()
                .is_none()
        );
    }
}
