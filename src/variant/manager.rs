use std::sync::Arc;

use super::{ProductFlavor, ProjectModel, VariantConfiguration, VariantScope, VariantType};
use crate::cache::LibraryCache;
use crate::dependency::{DependencyReport, DependencyResolver, VariantDependencies};
use crate::error::{ConfigError, DroidGraphError};
use crate::issue::{EvaluationMode, IssueReporter, IssueType, SyncIssue};
use crate::options::ProjectOptions;
use crate::session::BuildSession;
use crate::task::TaskFactory;
use crate::taskmanager::TaskManager;
use crate::transform::Transform;

/// Returns `true` for variants that should not exist.
pub type VariantFilter = Box<dyn Fn(&VariantConfiguration) -> bool>;

/// The host side of dependency resolution: the resolved compile and runtime
/// configurations of a variant.
pub trait DependencySource {
    fn dependencies(&self, config: &VariantConfiguration) -> VariantDependencies;
}

impl<F> DependencySource for F
where
    F: Fn(&VariantConfiguration) -> VariantDependencies,
{
    fn dependencies(&self, config: &VariantConfiguration) -> VariantDependencies {
        self(config)
    }
}

/// Enumerates the variants of one project and creates their tasks.
pub struct VariantManager {
    model: ProjectModel,
    options: ProjectOptions,
    filter: Option<VariantFilter>,
    variants: Vec<VariantConfiguration>,
    task_manager: TaskManager,
    cache: Option<Arc<LibraryCache>>,
}

impl VariantManager {
    pub fn new(model: ProjectModel, options: ProjectOptions) -> Self {
        let task_manager = TaskManager::new(&model, &options);

        Self {
            model,
            options,
            filter: None,
            variants: Vec::new(),
            task_manager,
            cache: None,
        }
    }

    pub fn model(&self) -> &ProjectModel {
        &self.model
    }

    pub fn set_variant_filter(&mut self, filter: impl Fn(&VariantConfiguration) -> bool + 'static) {
        self.filter = Some(Box::new(filter));
    }

    pub fn register_transform(&mut self, transform: Arc<dyn Transform>) {
        self.task_manager.register_transform(transform);
    }

    /// Cache libraries are exploded through: by the prepare tasks in a
    /// normal build, directly during model-only evaluation.
    pub fn set_library_cache(&mut self, cache: Arc<LibraryCache>) {
        self.task_manager.set_library_cache(cache.clone());
        self.cache = Some(cache);
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    pub fn variants(&self) -> &[VariantConfiguration] {
        &self.variants
    }

    /// Every combination of one flavor per dimension, first dimension
    /// outermost, each dimension in declaration order.
    ///
    /// Without declared dimensions all flavors share one implicit dimension.
    /// With a single declared dimension, flavors without one join it. With
    /// several, every flavor must name a declared dimension.
    pub fn flavor_combinations(
        &self,
        issues: &mut IssueReporter,
    ) -> Result<Vec<Vec<ProductFlavor>>, ConfigError> {
        let flavors = &self.model.product_flavors;
        if flavors.is_empty() {
            return Ok(vec![Vec::new()]);
        }

        let declared = &self.model.flavor_dimensions;
        if declared.is_empty() {
            issues.report(SyncIssue::error(
                IssueType::InvalidFlavorDimension,
                None,
                "All flavors must belong to a named flavor dimension",
            ))?;
            return Ok(vec![Vec::new()]);
        }

        let mut groups: Vec<Vec<ProductFlavor>> = vec![Vec::new(); declared.len()];

        for flavor in flavors {
            let index = match &flavor.dimension {
                Some(dimension) => declared.iter().position(|d| d == dimension),
                None if declared.len() == 1 => Some(0),
                None => None,
            };

            let Some(index) = index else {
                let message = match &flavor.dimension {
                    Some(dimension) => format!(
                        "Flavor '{}' is associated with flavor dimension '{dimension}' \
                         that is not declared",
                        flavor.name
                    ),
                    None => format!(
                        "Flavor '{}' has no flavor dimension, \
                         required when several dimensions are declared",
                        flavor.name
                    ),
                };
                issues.report(SyncIssue::error(
                    IssueType::InvalidFlavorDimension,
                    Some(flavor.name.clone()),
                    message,
                ))?;
                continue;
            };

            groups[index].push(flavor.clone());
        }

        let mut combinations: Vec<Vec<ProductFlavor>> = vec![Vec::new()];
        for group in groups.into_iter().filter(|g| !g.is_empty()) {
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    group.iter().map(move |flavor| {
                        let mut combination = prefix.clone();
                        combination.push(flavor.clone());
                        combination
                    })
                })
                .collect();
        }

        Ok(combinations)
    }

    /// Computes the variant list.
    ///
    /// For each flavor combination and build type comes the variant, then
    /// its unit test variant. The single android test variant tests the
    /// first variant of the test build type and is last. Variants the filter
    /// rejects are dropped here, together with their tests.
    pub fn populate_variant_data_list(
        &mut self,
        issues: &mut IssueReporter,
    ) -> Result<(), ConfigError> {
        let kind = self.model.variant_type;
        let has_tests = kind.has_test_scope();

        if has_tests && self.model.build_type(&self.model.test_build_type).is_none() {
            issues.report(SyncIssue::error(
                IssueType::MissingTestBuildType,
                Some(self.model.test_build_type.clone()),
                format!(
                    "Test build type '{}' of project '{}' is not declared",
                    self.model.test_build_type, self.model.project_path
                ),
            ))?;
        }

        let combinations = self.flavor_combinations(issues)?;
        let mut variants = Vec::new();
        let mut tested = None;

        for flavors in &combinations {
            for build_type in &self.model.build_types {
                let config = VariantConfiguration::new(kind, &self.model, build_type, flavors);

                if self.filter.as_ref().is_some_and(|ignore| ignore(&config)) {
                    tracing::debug!(variant = %config.name(), "variant ignored by filter");
                    continue;
                }

                if let Some(target) = config.target_sdk.filter(|&target| config.min_sdk > target) {
                    issues.report(SyncIssue::warning(
                        IssueType::MinSdkAboveTargetSdk,
                        Some(config.name()),
                        format!(
                            "minSdk {} of variant '{}' is above its targetSdk {target}",
                            config.min_sdk,
                            config.name()
                        ),
                    ))?;
                }

                if !has_tests {
                    variants.push(config);
                    continue;
                }

                if tested.is_none() && build_type.name == self.model.test_build_type {
                    tested = Some(config.clone());
                }

                let unit_test =
                    VariantConfiguration::for_test(VariantType::UnitTest, &self.model, &config);
                variants.push(config);
                variants.push(unit_test);
            }
        }

        if let Some(tested) = tested {
            let android_test =
                VariantConfiguration::for_test(VariantType::AndroidTest, &self.model, &tested);
            variants.push(android_test);
        }

        tracing::debug!(
            project = %self.model.project_path,
            count = variants.len(),
            "populated variants"
        );
        self.variants = variants;

        Ok(())
    }

    /// Creates the tasks of every retained variant, in list order.
    ///
    /// A variant is retained unless `restrict_variant` names another variant
    /// of this project. Test variants follow the variant they test.
    pub fn create_android_tasks(
        &mut self,
        tasks: &mut dyn TaskFactory,
        issues: &mut IssueReporter,
        session: &mut BuildSession,
        source: &dyn DependencySource,
    ) -> Result<Vec<VariantScope>, DroidGraphError> {
        if self.variants.is_empty() {
            self.populate_variant_data_list(issues)?;
        }

        let span = tracing::info_span!("project", path = %self.model.project_path);
        let _enter = span.enter();

        self.task_manager.create_global_tasks(tasks)?;
        self.task_manager
            .create_top_level_test_tasks(tasks, !self.model.product_flavors.is_empty())?;

        let resolver = DependencyResolver::new(&self.options);
        let mut scopes: Vec<VariantScope> = Vec::new();

        for config in self.variants.clone() {
            let name = config.name();

            let scope = {
                let tested = match &config.tested_variant {
                    Some(tested) => match scopes.iter().find(|s| s.name() == tested) {
                        Some(scope) => Some(scope),
                        None => {
                            tracing::debug!(
                                variant = %name,
                                "tested variant not retained, skipping"
                            );
                            continue;
                        }
                    },
                    None if !self.options.is_variant_retained(&self.model.project_path, &name) => {
                        tracing::debug!(variant = %name, "variant not retained, skipping");
                        continue;
                    }
                    None => None,
                };

                let declared = source.dependencies(&config);
                let resolved = resolver.resolve(&declared, issues)?;

                if let Some(cache) = &self.cache
                    && self.options.evaluation_mode == EvaluationMode::Model
                {
                    cache.explode_all(&resolved.to_explode())?;
                }

                self.task_manager
                    .create_tasks_for_variant(tasks, issues, config, Arc::new(resolved), tested)?
            };

            scopes.push(scope);
        }

        if let Some(cache) = &self.cache
            && session.execute_once("library-cache-stats", || ()).is_some()
        {
            let cache = cache.clone();
            session.add_build_finished_hook("library-cache-stats", move || {
                if let Some(files) = cache.cache() {
                    tracing::info!(
                        hits = files.hits(),
                        misses = files.misses(),
                        "build cache usage"
                    );
                }
                Ok(())
            });
        }

        self.task_manager.create_report_tasks(tasks)?;

        tracing::info!(variants = scopes.len(), "created tasks");
        Ok(scopes)
    }

    pub fn dependency_report(&self, scope: &VariantScope) -> Option<DependencyReport> {
        scope
            .dependencies()
            .map(|resolved| DependencyReport::new(scope.name(), resolved))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dependency::Component;
    use crate::options::RestrictVariant;
    use crate::task::TaskGraph;

    fn flavored(dimensions: &[&str], flavors: &[(&str, Option<&str>)]) -> ProjectModel {
        let mut model = ProjectModel::new(":app", VariantType::App);
        model.flavor_dimensions = dimensions.iter().map(|d| d.to_string()).collect();
        model.product_flavors = flavors
            .iter()
            .map(|(name, dimension)| match dimension {
                Some(dimension) => ProductFlavor::new(*name).dimension(*dimension),
                None => ProductFlavor::new(*name),
            })
            .collect();
        model
    }

    fn names(manager: &VariantManager) -> Vec<String> {
        manager.variants().iter().map(VariantConfiguration::name).collect()
    }

    fn no_dependencies(config: &VariantConfiguration) -> VariantDependencies {
        VariantDependencies::new(config.name(), ":app", "build")
    }

    #[test]
    fn test_two_flavors_two_build_types() {
        let model = flavored(&["tier"], &[("free", Some("tier")), ("paid", Some("tier"))]);
        let mut manager = VariantManager::new(model, ProjectOptions::default());
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        manager.populate_variant_data_list(&mut issues).unwrap();

        assert_eq!(
            names(&manager),
            [
                "freeDebug",
                "freeDebugUnitTest",
                "freeRelease",
                "freeReleaseUnitTest",
                "paidDebug",
                "paidDebugUnitTest",
                "paidRelease",
                "paidReleaseUnitTest",
                "freeDebugAndroidTest",
            ]
        );

        let android_test = manager.variants().last().unwrap();
        assert_eq!(android_test.variant_type, VariantType::AndroidTest);
        assert_eq!(android_test.tested_variant.as_deref(), Some("freeDebug"));
    }

    #[test]
    fn test_dimension_cross_product_order() {
        let model = flavored(
            &["tier", "abi"],
            &[
                ("x86", Some("abi")),
                ("free", Some("tier")),
                ("arm", Some("abi")),
                ("paid", Some("tier")),
            ],
        );
        let manager = VariantManager::new(model, ProjectOptions::default());
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        let combinations: Vec<Vec<String>> = manager
            .flavor_combinations(&mut issues)
            .unwrap()
            .into_iter()
            .map(|c| c.into_iter().map(|f| f.name).collect())
            .collect();

        assert_eq!(
            combinations,
            [["free", "x86"], ["free", "arm"], ["paid", "x86"], ["paid", "arm"]]
        );
    }

    #[test]
    fn test_dimension_errors() {
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        let missing = flavored(&["tier", "abi"], &[("free", Some("tier")), ("arm", None)]);
        let err = VariantManager::new(missing, ProjectOptions::default())
            .flavor_combinations(&mut issues)
            .unwrap_err();
        assert!(err.to_string().contains("'arm' has no flavor dimension"));

        let unknown = flavored(&["tier"], &[("free", Some("price"))]);
        assert!(
            VariantManager::new(unknown, ProjectOptions::default())
                .flavor_combinations(&mut issues)
                .is_err()
        );
        assert_eq!(issues.of_type(IssueType::InvalidFlavorDimension).count(), 2);

        // A single declared dimension takes undimensioned flavors.
        let single = flavored(&["tier"], &[("free", None), ("paid", Some("tier"))]);
        let combinations = VariantManager::new(single, ProjectOptions::default())
            .flavor_combinations(&mut issues)
            .unwrap();
        assert_eq!(combinations.len(), 2);
    }

    #[test]
    fn test_flavors_without_declared_dimensions() {
        let undimensioned = flavored(&[], &[("free", None), ("paid", None)]);

        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let err = VariantManager::new(undimensioned.clone(), ProjectOptions::default())
            .flavor_combinations(&mut issues)
            .unwrap_err();
        assert!(err.to_string().contains("named flavor dimension"));
        assert_eq!(issues.of_type(IssueType::InvalidFlavorDimension).count(), 1);

        // Sync keeps going with the build types alone.
        let mut issues = IssueReporter::new(EvaluationMode::Model);
        let combinations = VariantManager::new(undimensioned, ProjectOptions::default())
            .flavor_combinations(&mut issues)
            .unwrap();
        assert_eq!(combinations, [Vec::<ProductFlavor>::new()]);
        assert_eq!(issues.of_type(IssueType::InvalidFlavorDimension).count(), 1);
    }

    #[test]
    fn test_missing_test_build_type() {
        let mut model = ProjectModel::new(":app", VariantType::App);
        model.test_build_type = "staging".into();
        let mut manager = VariantManager::new(model, ProjectOptions::default());
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        assert!(manager.populate_variant_data_list(&mut issues).is_err());
        assert_eq!(issues.of_type(IssueType::MissingTestBuildType).count(), 1);
    }

    #[test]
    fn test_min_sdk_above_target_warns() {
        let mut model = ProjectModel::new(":lib", VariantType::Library);
        model.default_config.min_sdk = Some(24);
        model.default_config.target_sdk = Some(21);
        let mut manager = VariantManager::new(model, ProjectOptions::default());
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        manager.populate_variant_data_list(&mut issues).unwrap();
        assert_eq!(issues.of_type(IssueType::MinSdkAboveTargetSdk).count(), 2);
        assert!(!issues.has_errors());
    }

    #[test]
    fn test_filter_drops_variant_and_its_tests() {
        let model = flavored(&["tier"], &[("free", Some("tier")), ("paid", Some("tier"))]);
        let mut manager = VariantManager::new(model, ProjectOptions::default());
        manager.set_variant_filter(|config| config.flavor_name() == "free");
        let mut issues = IssueReporter::new(EvaluationMode::Standard);

        manager.populate_variant_data_list(&mut issues).unwrap();

        assert_eq!(
            names(&manager),
            [
                "paidDebug",
                "paidDebugUnitTest",
                "paidRelease",
                "paidReleaseUnitTest",
                "paidDebugAndroidTest",
            ]
        );
    }

    #[test]
    fn test_create_android_tasks() {
        let model = flavored(&["tier"], &[("free", Some("tier")), ("paid", Some("tier"))]);
        let mut manager = VariantManager::new(model, ProjectOptions::default());
        let mut graph = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut session = BuildSession::new();

        let scopes = manager
            .create_android_tasks(&mut graph, &mut issues, &mut session, &no_dependencies)
            .unwrap();

        assert_eq!(scopes.len(), 9);
        graph.verify().unwrap();

        for variant in ["freeDebug", "freeRelease", "paidDebug", "paidRelease"] {
            let assemble = format!("assemble{}", crate::core::capitalize(variant));
            assert!(graph.dependencies_of("assemble").contains(&assemble.as_str()));
        }
        assert!(graph.contains("connectedFreeDebugAndroidTest"));
        assert!(graph.contains("androidDependencies"));
        assert!(graph.dependencies_of("connectedCheck").contains(&"connectedAndroidTest"));
        assert!(graph.dependencies_of("deviceCheck").contains(&"deviceAndroidTest"));
        assert_eq!(session.pending_hooks(), 0);
    }

    #[test]
    fn test_restrict_variant() {
        let model = flavored(&["tier"], &[("free", Some("tier")), ("paid", Some("tier"))]);
        let options = ProjectOptions {
            restrict_variant: Some(RestrictVariant {
                project: ":app".into(),
                variant: "paidRelease".into(),
            }),
            ..Default::default()
        };
        let mut manager = VariantManager::new(model, options);
        let mut graph = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Standard);
        let mut session = BuildSession::new();

        let scopes = manager
            .create_android_tasks(&mut graph, &mut issues, &mut session, &no_dependencies)
            .unwrap();

        let names: Vec<&str> = scopes.iter().map(VariantScope::name).collect();
        assert_eq!(names, ["paidRelease", "paidReleaseUnitTest"]);
        assert_eq!(manager.variants().len(), 9);
        assert!(!graph.contains("assembleFreeDebug"));
        assert!(graph.contains("assemblePaidRelease"));
    }

    #[test]
    fn test_model_mode_explodes_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let archive = root.join("repo/lib-1.0.aar");
        std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        zip.start_file("AndroidManifest.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut zip, b"<manifest/>").unwrap();
        zip.finish().unwrap();

        let options = ProjectOptions {
            evaluation_mode: EvaluationMode::Model,
            model_level: Some(2),
            build_cache_dir: Some(root.join("cache")),
            ..Default::default()
        };
        let model = ProjectModel::new(":lib", VariantType::Library);
        let mut manager = VariantManager::new(model, options.clone());
        manager.set_library_cache(Arc::new(LibraryCache::new(&options).unwrap()));

        let archive_path = archive.clone();
        let source = move |config: &VariantConfiguration| {
            let mut deps = VariantDependencies::new(config.name(), ":lib", "build");
            let mut lib = Component::module("com.example:lib:1.0", "aar");
            lib.artifacts[0].file = archive_path.clone();
            deps.compile.root(lib.clone());
            deps.package.root(lib);
            deps
        };

        let mut graph = TaskGraph::new();
        let mut issues = IssueReporter::new(EvaluationMode::Model);
        let mut session = BuildSession::new();
        session.start();

        let scopes = manager
            .create_android_tasks(&mut graph, &mut issues, &mut session, &source)
            .unwrap();

        assert!(!scopes.is_empty());
        assert!(graph.contains("bundleDebug"));
        assert!(graph.contains("prepareComExampleLib10Library"));
        assert!(graph.contains("cleanBuildCache"));
        assert_eq!(session.pending_hooks(), 1);

        let report = manager.dependency_report(&scopes[0]).unwrap();
        assert!(report.to_string().contains("com.example:lib:1.0"));

        session.finish().unwrap();
    }
}
