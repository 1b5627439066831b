//! Creates the task graph of a project, one variant at a time.
//!
//! Every variant goes through the same fixed sequence of stages; each stage
//! registers its tasks with `dependsOn` edges to what the previous stages
//! produced, so the graph is acyclic by construction. The handful of places
//! where variant kinds differ read the kind's [`Capabilities`].
//!
//! [`Capabilities`]: crate::variant::Capabilities

mod dexing;
mod stages;

use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::cache::LibraryCache;
use crate::core::capitalize;
use crate::dependency::{PrepareLibraryTasks, ResolvedDependencies};
use crate::error::{ConfigError, DroidGraphError, TaskError};
use crate::issue::{IssueReporter, IssueType, SyncIssue};
use crate::options::ProjectOptions;
use crate::task::{TaskAction, TaskFactory, TaskHandle, TaskSpec};
use crate::transform::Transform;
use crate::variant::{ProjectModel, ScopeBuilder, Stage, VariantConfiguration, VariantScope};

pub use dexing::{DexingMode, NATIVE_MULTIDEX_MIN_SDK, dexing_mode, pre_dex_libraries};

pub const ASSEMBLE: &str = "assemble";
pub const CHECK: &str = "check";
pub const BUILD: &str = "build";
pub const UNINSTALL_ALL: &str = "uninstallAll";
pub const DEVICE_CHECK: &str = "deviceCheck";
pub const CONNECTED_CHECK: &str = "connectedCheck";
pub const PRE_BUILD: &str = "preBuild";
pub const EXTRACT_PROGUARD_FILES: &str = "extractProguardFiles";
pub const ASSEMBLE_ANDROID_TEST: &str = "assembleAndroidTest";
pub const LINT: &str = "lint";
pub const MOCKABLE_ANDROID_JAR: &str = "mockableAndroidJar";
pub const CONNECTED_ANDROID_TEST: &str = "connectedAndroidTest";
pub const DEVICE_ANDROID_TEST: &str = "deviceAndroidTest";
pub const TEST: &str = "test";
pub const CLEAN_BUILD_CACHE: &str = "cleanBuildCache";

const GROUP_BUILD: &str = "build";
const GROUP_VERIFICATION: &str = "verification";
const GROUP_INSTALL: &str = "install";
const GROUP_REPORTING: &str = "reporting";
const GROUP_ANDROID: &str = "android";

/// Builds the tasks of one project.
///
/// The manager owns the prepare-library task map, shared by every variant
/// of the project, and the custom transforms added to every packaged
/// variant.
pub struct TaskManager {
    project_name: String,
    build_dir: Utf8PathBuf,
    pure_splits: bool,
    external_native_build: bool,
    pre_dex_default: bool,
    options: ProjectOptions,
    prepare_libraries: PrepareLibraryTasks,
    transforms: Vec<Arc<dyn Transform>>,
}

impl TaskManager {
    pub fn new(model: &ProjectModel, options: &ProjectOptions) -> Self {
        let project_name = model
            .project_path
            .rsplit(':')
            .find(|segment| !segment.is_empty())
            .unwrap_or("root")
            .to_string();

        Self {
            project_name,
            build_dir: model.build_dir.clone(),
            pure_splits: model.pure_splits,
            external_native_build: model.external_native_build,
            pre_dex_default: model.pre_dex_libraries,
            options: options.clone(),
            prepare_libraries: PrepareLibraryTasks::new(),
            transforms: Vec::new(),
        }
    }

    /// Adds a transform run by every variant after compilation.
    pub fn register_transform(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn prepare_libraries(&self) -> &PrepareLibraryTasks {
        &self.prepare_libraries
    }

    /// Cache the prepare tasks explode libraries through. Must be set before
    /// the global tasks are created for `cleanBuildCache` to exist.
    pub fn set_library_cache(&mut self, cache: Arc<LibraryCache>) {
        self.prepare_libraries.set_cache(cache);
    }

    /// Tasks every project has, whatever its variants.
    pub fn create_global_tasks(&self, tasks: &mut dyn TaskFactory) -> Result<(), TaskError> {
        let assemble = tasks.register(
            ASSEMBLE,
            TaskSpec::anchor()
                .group(GROUP_BUILD)
                .description("Assembles all variants of all applications and secondary packages."),
        )?;
        let check = tasks.register(
            CHECK,
            TaskSpec::anchor()
                .group(GROUP_VERIFICATION)
                .description("Runs all checks."),
        )?;
        let build = tasks.register(
            BUILD,
            TaskSpec::anchor()
                .group(GROUP_BUILD)
                .description("Assembles and tests this project."),
        )?;
        tasks.depends_on(build, &[assemble, check])?;

        tasks.register(
            UNINSTALL_ALL,
            TaskSpec::anchor()
                .group(GROUP_INSTALL)
                .description("Uninstall all applications."),
        )?;
        tasks.register(
            DEVICE_CHECK,
            TaskSpec::anchor()
                .group(GROUP_VERIFICATION)
                .description("Runs all device checks using Device Providers and Test Servers."),
        )?;
        tasks.register(
            CONNECTED_CHECK,
            TaskSpec::anchor()
                .group(GROUP_VERIFICATION)
                .description("Runs all device checks on currently connected devices."),
        )?;

        tasks.register(PRE_BUILD, TaskSpec::anchor())?;
        tasks.register(
            EXTRACT_PROGUARD_FILES,
            TaskSpec::tool("extract-proguard-files")
                .output(self.build_dir.join("intermediates/proguard-files")),
        )?;
        tasks.register(
            ASSEMBLE_ANDROID_TEST,
            TaskSpec::anchor()
                .group(GROUP_BUILD)
                .description("Assembles all the Test applications."),
        )?;

        let lint = tasks.register(
            LINT,
            TaskSpec::tool("lint")
                .group(GROUP_VERIFICATION)
                .description("Runs lint on all variants."),
        )?;
        tasks.depends_on(check, &[lint])?;

        tasks.register(
            MOCKABLE_ANDROID_JAR,
            TaskSpec::tool("mockable-jar-generator")
                .output(self.build_dir.join("generated/mockable-android.jar")),
        )?;

        let cache = self.prepare_libraries.cache();
        if cache.is_enabled() {
            tasks.register(
                CLEAN_BUILD_CACHE,
                TaskSpec::new(TaskAction::CleanBuildCache(cache.clone()))
                    .group(GROUP_BUILD)
                    .description("Deletes the build cache directory."),
            )?;
        }

        Ok(())
    }

    /// The aggregate test tasks. With flavors, the connected and device
    /// aggregates also merge the per-variant reports.
    pub fn create_top_level_test_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        has_flavors: bool,
    ) -> Result<(), TaskError> {
        let aggregate = |description: &str| {
            let spec = match has_flavors {
                true => TaskSpec::new(TaskAction::Report("android-test-results")),
                false => TaskSpec::anchor(),
            };
            spec.group(GROUP_VERIFICATION).description(description)
        };

        let connected = tasks.register(
            CONNECTED_ANDROID_TEST,
            aggregate(
                "Installs and runs instrumentation tests for all flavors on connected devices.",
            ),
        )?;
        let connected_check = tasks.get(CONNECTED_CHECK)?;
        tasks.depends_on(connected_check, &[connected])?;

        let device = tasks.register(
            DEVICE_ANDROID_TEST,
            aggregate("Installs and runs instrumentation tests using all Device Providers."),
        )?;
        let device_check = tasks.get(DEVICE_CHECK)?;
        tasks.depends_on(device_check, &[device])?;

        let test = tasks.register(
            TEST,
            TaskSpec::anchor()
                .group(GROUP_VERIFICATION)
                .description("Run unit tests for all variants."),
        )?;
        let check = tasks.get(CHECK)?;
        tasks.depends_on(check, &[test])?;

        Ok(())
    }

    pub fn create_report_tasks(&self, tasks: &mut dyn TaskFactory) -> Result<(), TaskError> {
        tasks.register(
            "androidDependencies",
            TaskSpec::new(TaskAction::Report("dependencies"))
                .group(GROUP_ANDROID)
                .description("Displays the Android dependencies of the project."),
        )?;
        tasks.register(
            "signingReport",
            TaskSpec::new(TaskAction::Report("signing"))
                .group(GROUP_ANDROID)
                .description("Displays the signing info for each variant."),
        )?;
        Ok(())
    }

    /// Configuration errors that must stop the build before any task of the
    /// variant exists. In model-only evaluation the variant is built in a
    /// degraded form instead: unsigned, without coverage.
    pub fn validate(
        &self,
        config: &mut VariantConfiguration,
        issues: &mut IssueReporter,
    ) -> Result<(), ConfigError> {
        let name = config.name();

        if let Some(missing) = config.missing_signing_config.clone() {
            issues.report(SyncIssue::error(
                IssueType::MissingSigningConfig,
                Some(missing.clone()),
                format!("Signing config '{missing}' used by variant '{name}' is not declared"),
            ))?;
        }

        let kind = config.variant_type;
        if self.options.require_release_signing
            && kind.is_apk()
            && !kind.is_for_testing()
            && !config.is_debuggable()
            && !config.is_signed()
        {
            issues.report(SyncIssue::error(
                IssueType::MissingSigningConfig,
                Some(name.clone()),
                format!("Variant '{name}' is not debuggable and has no signing config"),
            ))?;
        }

        if config.is_test_coverage_enabled() && config.jack_enabled {
            issues.report(SyncIssue::error(
                IssueType::UnsupportedCoverageCompiler,
                Some(name.clone()),
                format!(
                    "Test coverage of variant '{name}' is not supported when compiling with Jack"
                ),
            ))?;
            config.build_type.test_coverage_enabled = false;
        }

        Ok(())
    }

    /// Runs every stage for one variant and returns its finished scope.
    ///
    /// `tested` is the scope of the variant under test, for test variants.
    pub fn create_tasks_for_variant(
        &mut self,
        tasks: &mut dyn TaskFactory,
        issues: &mut IssueReporter,
        mut config: VariantConfiguration,
        dependencies: Arc<ResolvedDependencies>,
        tested: Option<&VariantScope>,
    ) -> Result<VariantScope, DroidGraphError> {
        self.validate(&mut config, issues)?;

        let span =
            tracing::info_span!("variant", name = %config.name(), kind = %config.variant_type);
        let _enter = span.enter();

        let mut scope = ScopeBuilder::new(config, self.build_dir.clone());

        self.create_anchor_tasks(tasks, &mut scope, tested)?;
        scope.complete(Stage::Anchors)?;

        self.create_dependency_tasks(tasks, &mut scope, dependencies, tested)?;
        scope.complete(Stage::Dependencies)?;

        self.create_source_tasks(tasks, &mut scope)?;
        scope.complete(Stage::Sources)?;

        self.create_compile_tasks(tasks, &mut scope, tested)?;
        scope.complete(Stage::Compile)?;

        self.create_post_compile_tasks(tasks, issues, &mut scope)?;
        scope.complete(Stage::PostCompile)?;

        self.create_packaging_tasks(tasks, &mut scope)?;
        scope.complete(Stage::Packaging)?;

        self.create_finish_tasks(tasks, &mut scope, tested)?;
        scope.complete(Stage::Finish)?;

        let scope = scope.finish()?;
        tracing::debug!(variant = scope.name(), "created variant tasks");

        Ok(scope)
    }
}

/// Registers `<verb><Variant><noun>` for the variant of `scope`.
fn variant_task(
    tasks: &mut dyn TaskFactory,
    scope: &ScopeBuilder,
    verb: &str,
    noun: &str,
    spec: TaskSpec,
) -> Result<TaskHandle, TaskError> {
    let name = format!("{verb}{}{noun}", capitalize(scope.name()));
    tasks.register(&name, spec.variant(scope.name()))
}
