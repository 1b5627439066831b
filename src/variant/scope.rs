use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use super::VariantConfiguration;
use crate::dependency::ResolvedDependencies;
use crate::error::TaskError;
use crate::task::TaskHandle;
use crate::transform::{TransformManager, set_of};

/// Stages of task creation for one variant, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Anchors,
    Dependencies,
    Sources,
    Compile,
    PostCompile,
    Packaging,
    Finish,
}

impl Stage {
    const ALL: [Stage; 7] = [
        Stage::Anchors,
        Stage::Dependencies,
        Stage::Sources,
        Stage::Compile,
        Stage::PostCompile,
        Stage::Packaging,
        Stage::Finish,
    ];

    fn next(self) -> Option<Stage> {
        Self::ALL.get(self as usize + 1).copied()
    }
}

/// A per-variant task the rest of the graph may need to hang edges off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Assemble,
    PreBuild,
    SourceGen,
    ResourceGen,
    AssetGen,
    Compile,
    CoverageReport,

    PrepareDependencies,
    CheckManifest,

    ProcessManifest,
    ResValues,
    Renderscript,
    MergeResources,
    /// The merge of the module's own resources only, for libraries.
    PackageResources,
    Shaders,
    MergeAssets,
    BuildConfig,
    ProcessResources,
    ProcessJavaRes,
    Aidl,
    ExternalNativeBuild,
    MergeJniLibs,

    Javac,
    Jack,

    Jacoco,
    MergeJavaRes,
    Obfuscation,
    ShrinkResources,
    MultidexMainList,
    Dex,

    ValidateSigning,
    Package,
    ZipAlign,
    Bundle,
    BuildInfo,

    Install,
    Uninstall,
    Lint,
    LintVital,
    Test,
}

impl Slot {
    /// The stage during which the slot is written.
    pub fn stage(self) -> Stage {
        use Slot::*;

        match self {
            Assemble | PreBuild | SourceGen | ResourceGen | AssetGen | Compile | CoverageReport => {
                Stage::Anchors
            }
            PrepareDependencies | CheckManifest => Stage::Dependencies,
            ProcessManifest
            | ResValues
            | Renderscript
            | MergeResources
            | PackageResources
            | Shaders
            | MergeAssets
            | BuildConfig
            | ProcessResources
            | ProcessJavaRes
            | Aidl
            | ExternalNativeBuild
            | MergeJniLibs => Stage::Sources,
            Javac | Jack => Stage::Compile,
            Jacoco | MergeJavaRes | Obfuscation | ShrinkResources | MultidexMainList | Dex => {
                Stage::PostCompile
            }
            ValidateSigning | Package | ZipAlign | Bundle | BuildInfo => Stage::Packaging,
            Install | Uninstall | Lint | LintVital | Test => Stage::Finish,
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Accumulates the tasks of one variant while its stages run.
///
/// A slot can only be written during its own stage, and only once. Reading
/// a slot of the current stage before it was written, or of a later stage,
/// is an error; once a stage is complete its unset slots read as `None`.
/// [`ScopeBuilder::finish`] hands out the read-only [`VariantScope`] after
/// the last stage.
#[derive(Debug)]
pub struct ScopeBuilder {
    config: VariantConfiguration,
    name: String,
    build_dir: Utf8PathBuf,
    stage: Stage,
    done: bool,
    tasks: HashMap<Slot, TaskHandle>,
    split_packages: Vec<TaskHandle>,
    dependencies: Option<Arc<ResolvedDependencies>>,
    transforms: TransformManager,
}

impl ScopeBuilder {
    pub fn new(config: VariantConfiguration, build_dir: impl Into<Utf8PathBuf>) -> Self {
        let build_dir = build_dir.into();
        let name = config.name();
        let allowed = set_of(config.variant_type.capabilities().allowed_transform_scopes);

        let transforms = TransformManager::new(
            &name,
            config.dir_name(),
            build_dir.join("intermediates").join("transforms"),
            allowed,
        );

        Self {
            config,
            name,
            build_dir,
            stage: Stage::Anchors,
            done: false,
            tasks: HashMap::new(),
            split_packages: Vec::new(),
            dependencies: None,
            transforms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &VariantConfiguration {
        &self.config
    }

    /// The stage currently being built.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn is_complete(&self, stage: Stage) -> bool {
        self.done || stage < self.stage
    }

    fn error(&self, slot: Slot, make: fn(String, String) -> TaskError) -> TaskError {
        make(self.name.clone(), slot.to_string())
    }

    fn out_of_order(&self, stage: Stage) -> TaskError {
        let current = match self.done {
            true => "done".to_string(),
            false => format!("{:?}", self.stage),
        };

        TaskError::StageOrder {
            variant: self.name.clone(),
            stage: format!("{stage:?}"),
            current,
        }
    }

    fn check_writable(&self, slot: Slot) -> Result<(), TaskError> {
        let stage = slot.stage();

        if self.is_complete(stage) {
            return Err(self.error(slot, |variant, slot| TaskError::StageCompleted {
                variant,
                slot,
            }));
        }
        if stage > self.stage {
            return Err(self.error(slot, |variant, slot| TaskError::StageNotReached {
                variant,
                slot,
            }));
        }
        Ok(())
    }

    pub fn set(&mut self, slot: Slot, task: TaskHandle) -> Result<(), TaskError> {
        self.check_writable(slot)?;

        if self.tasks.contains_key(&slot) {
            return Err(self.error(slot, |variant, slot| TaskError::SlotTaken { variant, slot }));
        }

        self.tasks.insert(slot, task);
        Ok(())
    }

    /// The task in `slot`, `None` when its stage completed without one.
    pub fn get(&self, slot: Slot) -> Result<Option<TaskHandle>, TaskError> {
        if self.is_complete(slot.stage()) {
            return Ok(self.tasks.get(&slot).copied());
        }

        match self.tasks.get(&slot) {
            Some(&task) if slot.stage() == self.stage => Ok(Some(task)),
            _ => Err(self.error(slot, |variant, slot| TaskError::ReadBeforeWrite {
                variant,
                slot,
            })),
        }
    }

    /// Like [`ScopeBuilder::get`], for slots every variant fills.
    pub fn require(&self, slot: Slot) -> Result<TaskHandle, TaskError> {
        self.get(slot)?
            .ok_or_else(|| TaskError::NotFound(format!("{}:{slot}", self.name)))
    }

    /// Marks `stage` as done and moves to the next one.
    pub fn complete(&mut self, stage: Stage) -> Result<(), TaskError> {
        if stage != self.stage || self.done {
            return Err(self.out_of_order(stage));
        }

        tracing::trace!(variant = %self.name, ?stage, "stage complete");

        match stage.next() {
            Some(next) => self.stage = next,
            None => self.done = true,
        }
        Ok(())
    }

    pub fn add_split_package(&mut self, task: TaskHandle) -> Result<(), TaskError> {
        self.check_writable(Slot::Package)?;
        self.split_packages.push(task);
        Ok(())
    }

    pub fn set_dependencies(
        &mut self,
        dependencies: Arc<ResolvedDependencies>,
    ) -> Result<(), TaskError> {
        self.check_writable(Slot::PrepareDependencies)?;
        self.dependencies = Some(dependencies);
        Ok(())
    }

    pub fn dependencies(&self) -> Option<&ResolvedDependencies> {
        self.dependencies.as_deref()
    }

    pub fn transforms(&self) -> &TransformManager {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut TransformManager {
        &mut self.transforms
    }

    /// `<build>/intermediates/<kind>/<variant dir>`
    pub fn intermediate(&self, kind: &str) -> Utf8PathBuf {
        self.build_dir
            .join("intermediates")
            .join(kind)
            .join(self.config.dir_name())
    }

    pub fn generated(&self, kind: &str) -> Utf8PathBuf {
        self.build_dir
            .join("generated")
            .join(kind)
            .join(self.config.dir_name())
    }

    /// `<build>/outputs/<kind>/<file>`
    pub fn output(&self, kind: &str, file: &str) -> Utf8PathBuf {
        self.build_dir.join("outputs").join(kind).join(file)
    }

    pub fn build_dir(&self) -> &Utf8Path {
        &self.build_dir
    }

    pub fn finish(self) -> Result<VariantScope, TaskError> {
        if !self.done {
            return Err(self.out_of_order(Stage::Finish));
        }

        Ok(VariantScope {
            config: self.config,
            name: self.name,
            build_dir: self.build_dir,
            tasks: self.tasks,
            split_packages: self.split_packages,
            dependencies: self.dependencies,
            transforms: self.transforms,
        })
    }
}

/// Every task created for one variant, read-only.
#[derive(Debug)]
pub struct VariantScope {
    config: VariantConfiguration,
    name: String,
    build_dir: Utf8PathBuf,
    tasks: HashMap<Slot, TaskHandle>,
    split_packages: Vec<TaskHandle>,
    dependencies: Option<Arc<ResolvedDependencies>>,
    transforms: TransformManager,
}

impl VariantScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &VariantConfiguration {
        &self.config
    }

    pub fn task(&self, slot: Slot) -> Option<TaskHandle> {
        self.tasks.get(&slot).copied()
    }

    pub fn split_packages(&self) -> &[TaskHandle] {
        &self.split_packages
    }

    pub fn dependencies(&self) -> Option<&ResolvedDependencies> {
        self.dependencies.as_deref()
    }

    pub fn transforms(&self) -> &TransformManager {
        &self.transforms
    }

    pub fn intermediate(&self, kind: &str) -> Utf8PathBuf {
        self.build_dir
            .join("intermediates")
            .join(kind)
            .join(self.config.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskFactory, TaskGraph, TaskSpec};
    use crate::variant::{ProjectModel, VariantType};

    fn builder() -> ScopeBuilder {
        let model = ProjectModel::new(":app", VariantType::App);
        let debug = model.build_type("debug").unwrap();
        let config = VariantConfiguration::new(VariantType::App, &model, debug, &[]);
        ScopeBuilder::new(config, "build")
    }

    fn complete_all(scope: &mut ScopeBuilder) {
        while !scope.done {
            let stage = scope.stage();
            scope.complete(stage).unwrap();
        }
    }

    #[test]
    fn test_read_before_write() {
        let mut graph = TaskGraph::new();
        let task = graph.register("assembleDebug", TaskSpec::anchor()).unwrap();
        let mut scope = builder();

        assert!(matches!(scope.get(Slot::Assemble), Err(TaskError::ReadBeforeWrite { .. })));
        assert!(matches!(scope.get(Slot::Javac), Err(TaskError::ReadBeforeWrite { .. })));

        scope.set(Slot::Assemble, task).unwrap();
        assert_eq!(scope.get(Slot::Assemble).unwrap(), Some(task));
        assert!(matches!(scope.set(Slot::Assemble, task), Err(TaskError::SlotTaken { .. })));
    }

    #[test]
    fn test_stage_gates_writes() {
        let mut graph = TaskGraph::new();
        let task = graph.register("compileDebugJavaWithJavac", TaskSpec::tool("javac")).unwrap();
        let mut scope = builder();

        assert!(matches!(scope.set(Slot::Javac, task), Err(TaskError::StageNotReached { .. })));

        scope.complete(Stage::Anchors).unwrap();
        assert!(matches!(scope.set(Slot::PreBuild, task), Err(TaskError::StageCompleted { .. })));
        // Unset slots of a completed stage read as absent.
        assert_eq!(scope.get(Slot::CoverageReport).unwrap(), None);
        assert!(scope.require(Slot::PreBuild).is_err());
        assert!(scope.complete(Stage::Compile).is_err());
    }

    #[test]
    fn test_finish_needs_every_stage() {
        let mut scope = builder();
        for stage in [Stage::Anchors, Stage::Dependencies, Stage::Sources, Stage::Compile] {
            scope.complete(stage).unwrap();
        }
        assert!(matches!(scope.finish(), Err(TaskError::StageOrder { .. })));

        let mut scope = builder();
        complete_all(&mut scope);
        assert!(scope.complete(Stage::Finish).is_err());

        let scope = scope.finish().unwrap();
        assert_eq!(scope.name(), "debug");
        assert_eq!(scope.intermediate("classes"), "build/intermediates/classes/debug");
    }

    #[test]
    fn test_finished_scope_keeps_tasks() {
        let mut graph = TaskGraph::new();
        let task = graph.register("packageDebug", TaskSpec::tool("apkbuilder")).unwrap();
        let mut scope = builder();

        while scope.stage() != Stage::Packaging {
            let stage = scope.stage();
            scope.complete(stage).unwrap();
        }
        scope.set(Slot::Package, task).unwrap();
        scope.add_split_package(task).unwrap();
        complete_all(&mut scope);

        let scope = scope.finish().unwrap();
        assert_eq!(scope.task(Slot::Package), Some(task));
        assert_eq!(scope.task(Slot::Install), None);
        assert_eq!(scope.split_packages(), [task]);
    }
}
