use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Serialize;

use super::model::{DependencyResult, ModuleVersion, ResolvedConfiguration};
use super::{Coordinates, DependencyContainer, DependencyNode, NodeType, ResolvedDependencies};
use crate::error::ConfigError;
use crate::issue::{EvaluationMode, IssueReporter, IssueType, SyncIssue};
use crate::options::ProjectOptions;

const EXT_AAR: &str = "aar";
const EXT_ATOMBUNDLE: &str = "atombundle";
const EXT_JAR: &str = "jar";
const EXT_APK: &str = "apk";
const EXT_APKLIB: &str = "apklib";

const EXPLODED_AAR: &str = "exploded-aar";
const EXPLODED_ATOMBUNDLE: &str = "exploded-atombundle";

/// Which configuration a pass walks, and with it how `provided` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScopeType {
    /// Records every artifact it sees.
    Package,
    /// Marks artifacts the package pass did not see as provided.
    #[default]
    Compile,
    /// Compile scope without a package pass: nothing is inferred.
    CompileOnly,
}

/// The two configurations of one variant, as resolved by the host.
#[derive(Debug, Clone)]
pub struct VariantDependencies {
    pub variant: String,
    /// Path of the project owning the variant, for example `:app`.
    pub project_path: String,
    pub build_dir: Utf8PathBuf,
    pub compile: ResolvedConfiguration,
    pub package: ResolvedConfiguration,
    /// For a test module testing a separate application module, the path of
    /// that application.
    pub tested_project: Option<String>,
}

impl VariantDependencies {
    pub fn new(
        variant: impl Into<String>,
        project_path: impl Into<String>,
        build_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        let variant = variant.into();
        Self {
            compile: ResolvedConfiguration::new(format!("{variant}CompileClasspath")),
            package: ResolvedConfiguration::new(format!("{variant}RuntimeClasspath")),
            variant,
            project_path: project_path.into(),
            build_dir: build_dir.into(),
            tested_project: None,
        }
    }
}

/// Turns resolved configurations into [`DependencyNode`] graphs.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    need_package_scope: bool,
}

impl DependencyResolver {
    pub fn new(options: &ProjectOptions) -> Self {
        Self {
            need_package_scope: options.need_package_scope(),
        }
    }

    /// Resolves the package scope (when needed) and then the compile scope.
    ///
    /// Problems are reported to `issues`; the first one that must stop the
    /// evaluation is returned as an error.
    pub fn resolve(
        &self,
        deps: &VariantDependencies,
        issues: &mut IssueReporter,
    ) -> Result<ResolvedDependencies, ConfigError> {
        let _span = tracing::debug_span!("resolve", variant = %deps.variant).entered();

        let mut artifact_set = HashSet::new();
        let mut unresolved = BTreeSet::new();

        let package = if self.need_package_scope {
            let scope = ScopeType::Package;
            Pass::new(deps, &deps.package, scope, &mut artifact_set, &mut unresolved, issues)
                .run()?
                .0
        } else {
            DependencyContainer::default()
        };

        let compile_scope = match self.need_package_scope {
            true => ScopeType::Compile,
            false => ScopeType::CompileOnly,
        };

        let (compile, annotations_present) = Pass::new(
            deps,
            &deps.compile,
            compile_scope,
            &mut artifact_set,
            &mut unresolved,
            issues,
        )
        .run()?;

        for dependency in &unresolved {
            let message = format!("Unable to resolve dependency '{dependency}'");
            let kind = IssueType::UnresolvedDependency;
            let data = Some(dependency.clone());
            let issue = match issues.mode() {
                EvaluationMode::Model => SyncIssue::warning(kind, data, message),
                EvaluationMode::Standard => SyncIssue::error(kind, data, message),
            };
            issues.report(issue)?;
        }

        tracing::debug!(
            compile = compile.direct().count(),
            package = package.direct().count(),
            "resolved dependencies"
        );

        Ok(ResolvedDependencies {
            compile,
            package,
            compile_scope,
            unresolved: unresolved.into_iter().collect(),
            annotations_present,
        })
    }
}

/// One walk over one configuration. The memo lives for the pass only.
struct Pass<'a> {
    deps: &'a VariantDependencies,
    config: &'a ResolvedConfiguration,
    scope: ScopeType,
    artifact_set: &'a mut HashSet<String>,
    unresolved: &'a mut BTreeSet<String>,
    issues: &'a mut IssueReporter,
    found: HashMap<ModuleVersion, Vec<Arc<DependencyNode>>>,
    in_progress: HashSet<ModuleVersion>,
    annotations_present: bool,
}

impl<'a> Pass<'a> {
    fn new(
        deps: &'a VariantDependencies,
        config: &'a ResolvedConfiguration,
        scope: ScopeType,
        artifact_set: &'a mut HashSet<String>,
        unresolved: &'a mut BTreeSet<String>,
        issues: &'a mut IssueReporter,
    ) -> Self {
        Self {
            deps,
            config,
            scope,
            artifact_set,
            unresolved,
            issues,
            found: HashMap::new(),
            in_progress: HashSet::new(),
            annotations_present: false,
        }
    }

    fn run(mut self) -> Result<(DependencyContainer, bool), ConfigError> {
        let mut container = DependencyContainer::default();
        let config = self.config;
        let chain = vec![self.deps.project_path.clone()];

        for root in &config.roots {
            match root {
                DependencyResult::Resolved(module) => {
                    let chain = self.extend_chain(&chain, module)?;
                    self.add_dependency(module, &mut container, &chain, false)?;
                }
                DependencyResult::Unresolved(requested) => {
                    self.unresolved.insert(requested.clone());
                }
            }
        }

        container.local_jars = self.local_jars()?;

        Ok((container, self.annotations_present))
    }

    /// Appends the project of `module` to the chain, failing when it is
    /// already part of it.
    fn extend_chain<'c>(
        &mut self,
        chain: &'c [String],
        module: &ModuleVersion,
    ) -> Result<Cow<'c, [String]>, ConfigError> {
        let Some(project) = self
            .config
            .components
            .get(module)
            .and_then(|component| component.project.as_ref())
        else {
            return Ok(Cow::Borrowed(chain));
        };

        if let Some(index) = chain.iter().position(|path| *path == project.path) {
            let mut cycle = chain[index..].to_vec();
            cycle.push(project.path.clone());

            let issue = SyncIssue::error(
                IssueType::CircularReference,
                Some(project.path.clone()),
                format!("Circular reference between projects: {}", cycle.join(" -> ")),
            );
            self.issues.report(issue.clone())?;
            return Err(issue.into());
        }

        let mut extended = chain.to_vec();
        extended.push(project.path.clone());
        Ok(Cow::Owned(extended))
    }

    fn add_dependency(
        &mut self,
        module: &ModuleVersion,
        out: &mut DependencyContainer,
        chain: &[String],
        force_provided: bool,
    ) -> Result<(), ConfigError> {
        let config = self.config;
        let Some(component) = config.components.get(module) else {
            self.unresolved.insert(module.to_string());
            return Ok(());
        };

        if module.group == "com.android.support" && module.name == "support-annotations" {
            self.annotations_present = true;
        }

        if let Some(nodes) = self.found.get(module) {
            for node in nodes {
                push_node(out, node.clone());
            }
            return Ok(());
        }

        // Only projects can form real cycles, and those were rejected above.
        if !self.in_progress.insert(module.clone()) {
            tracing::debug!(%module, "skipping module already being resolved");
            return Ok(());
        }

        let project_path = component.project.as_ref().map(|project| project.path.clone());
        let is_tested = project_path.is_some() && project_path == self.deps.tested_project;

        // Everything the separately tested application brings is already in
        // that application.
        let child_force_provided =
            force_provided || (self.scope == ScopeType::Compile && is_tested);

        let mut nested = DependencyContainer::default();
        for dependency in &component.dependencies {
            match dependency {
                DependencyResult::Resolved(child) => {
                    let chain = self.extend_chain(chain, child)?;
                    self.add_dependency(child, &mut nested, &chain, child_force_provided)?;
                }
                DependencyResult::Unresolved(requested) => {
                    self.unresolved.insert(requested.clone());
                }
            }
        }

        let mut created = Vec::new();

        for artifact in &component.artifacts {
            let coordinates = Coordinates::new(module, artifact);
            let name = coordinates.library_name();
            let key = coordinates.versionless_key();

            let mut provided = force_provided;
            match self.scope {
                ScopeType::Package => {
                    self.artifact_set.insert(key);
                }
                ScopeType::Compile => provided |= !self.artifact_set.contains(&key),
                ScopeType::CompileOnly => {}
            }

            match artifact.extension.as_str() {
                EXT_AAR => {
                    let sub_project = component
                        .project
                        .as_ref()
                        .filter(|project| project.android_library);

                    let folder = match sub_project {
                        Some(project) => project
                            .build_dir
                            .join("intermediates")
                            .join("bundles")
                            .join(coordinates.classifier.as_deref().unwrap_or("default")),
                        None => self.exploded_dir(EXPLODED_AAR, &coordinates),
                    };

                    let children = nested
                        .libraries
                        .iter()
                        .chain(&nested.jars)
                        .cloned()
                        .collect();

                    if !nested.atoms.is_empty() {
                        self.issues.report(SyncIssue::error(
                            IssueType::AarDependsOnAtom,
                            Some(coordinates.to_string()),
                            format!(
                                "Module '{module}' depends on one or more Android Atoms \
                                 but is a library"
                            ),
                        ))?;
                    }

                    let node = Arc::new(DependencyNode::new(
                        coordinates,
                        NodeType::Android,
                        artifact.file.clone(),
                        Some(folder),
                        sub_project.map(|project| project.path.clone()),
                        children,
                        provided,
                    ));
                    created.push(node.clone());
                    out.libraries.push(node);
                }
                EXT_ATOMBUNDLE => {
                    if provided {
                        self.issues.report(SyncIssue::error(
                            IssueType::AtomDependencyProvided,
                            Some(coordinates.to_string()),
                            format!(
                                "Module '{module}' is an Atom, \
                                 which cannot be a provided dependency"
                            ),
                        ))?;
                    }

                    if self.scope == ScopeType::Package {
                        for child in nested.libraries.iter().chain(&nested.jars) {
                            child.skip_recursively();
                        }
                    }

                    let folder = self.exploded_dir(EXPLODED_ATOMBUNDLE, &coordinates);
                    let children = nested
                        .libraries
                        .iter()
                        .chain(&nested.atoms)
                        .chain(&nested.jars)
                        .cloned()
                        .collect();

                    let node = Arc::new(DependencyNode::new(
                        coordinates,
                        NodeType::Atom,
                        artifact.file.clone(),
                        Some(folder),
                        project_path.clone(),
                        children,
                        provided,
                    ));
                    created.push(node.clone());
                    out.atoms.push(node);
                }
                EXT_JAR => {
                    if !nested.libraries.is_empty() {
                        if is_tested {
                            // The tested application publishes its code as a
                            // jar but still brings its libraries along.
                            if self.scope == ScopeType::Package {
                                for library in &nested.libraries {
                                    library.skip_recursively();
                                }
                            } else {
                                provided = true;
                            }
                            out.libraries.extend(nested.libraries.iter().cloned());
                        } else {
                            self.issues.report(SyncIssue::error(
                                IssueType::JarDependsOnAar,
                                Some(coordinates.to_string()),
                                format!(
                                    "Module '{module}' depends on one or more Android Libraries \
                                     but is a jar"
                                ),
                            ))?;
                        }
                    }

                    if !nested.atoms.is_empty() {
                        self.issues.report(SyncIssue::error(
                            IssueType::JarDependsOnAtom,
                            Some(coordinates.to_string()),
                            format!(
                                "Module '{module}' depends on one or more Android Atoms \
                                 but is a jar"
                            ),
                        ))?;
                    }

                    let node = Arc::new(DependencyNode::new(
                        coordinates,
                        NodeType::Java,
                        artifact.file.clone(),
                        None,
                        project_path.clone(),
                        nested.jars.clone(),
                        provided,
                    ));

                    if self.scope == ScopeType::Package && is_tested {
                        node.skip_recursively();
                    }

                    created.push(node.clone());
                    out.jars.push(node);
                }
                EXT_APK => {
                    self.issues.report(SyncIssue::error(
                        IssueType::DependencyIsApk,
                        Some(name.clone()),
                        format!(
                            "Dependency {name} on project {} resolves to an APK archive \
                             which is not supported as a compilation dependency. File: {}",
                            self.deps.project_path, artifact.file
                        ),
                    ))?;
                }
                EXT_APKLIB => {
                    self.issues.report(SyncIssue::error(
                        IssueType::DependencyIsApklib,
                        Some(name.clone()),
                        format!(
                            "Packaging for dependency {name} is 'apklib' and is not supported. \
                             Only 'aar' libraries are supported."
                        ),
                    ))?;
                }
                extension => {
                    self.issues.report(SyncIssue::warning(
                        IssueType::UnrecognizedDependency,
                        Some(name.clone()),
                        format!("Unrecognized dependency: '{name}' (extension: '{extension}')"),
                    ))?;
                }
            }
        }

        self.in_progress.remove(module);
        self.found.insert(module.clone(), created);

        Ok(())
    }

    /// Jars added by path. They carry no metadata, so anything that is not a
    /// jar cannot be handled.
    fn local_jars(&mut self) -> Result<Vec<Arc<DependencyNode>>, ConfigError> {
        let mut jars = Vec::new();

        for file in &self.config.local_files {
            let is_jar = file
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case(EXT_JAR));

            if !is_jar {
                self.issues.report(SyncIssue::error(
                    IssueType::NonJarLocalDep,
                    Some(file.to_string()),
                    format!(
                        "Project {}: Only Jar-type local dependencies are supported. \
                         Cannot handle: {file}",
                        self.deps.project_path
                    ),
                ))?;
                continue;
            }

            let coordinates = Coordinates::for_local_jar(file);
            let key = coordinates.versionless_key();
            let provided = match self.scope {
                ScopeType::Package => {
                    self.artifact_set.insert(key);
                    false
                }
                ScopeType::Compile => !self.artifact_set.contains(&key),
                ScopeType::CompileOnly => false,
            };

            jars.push(Arc::new(DependencyNode::new(
                coordinates,
                NodeType::Java,
                file.clone(),
                None,
                None,
                Vec::new(),
                provided,
            )));
        }

        Ok(jars)
    }

    fn exploded_dir(&self, kind: &str, coordinates: &Coordinates) -> Utf8PathBuf {
        let mut dir = self
            .deps
            .build_dir
            .join("intermediates")
            .join(kind)
            .join(normalize_segment(&coordinates.group))
            .join(normalize_segment(&coordinates.name))
            .join(normalize_segment(&coordinates.version));

        if let Some(classifier) = &coordinates.classifier {
            dir.push(normalize_segment(classifier));
        }

        dir
    }
}

fn push_node(out: &mut DependencyContainer, node: Arc<DependencyNode>) {
    match node.node_type {
        NodeType::Android => out.libraries.push(node),
        NodeType::Atom => out.atoms.push(node),
        NodeType::Java => out.jars.push(node),
    }
}

/// Makes one coordinate segment usable as a directory name on every
/// platform: reserved characters become `@`, and so does every trailing dot
/// or space.
///
/// A segment made only of dots and spaces has no valid form; it is logged
/// and returned unchanged.
pub fn normalize_segment(segment: &str) -> String {
    if segment.is_empty() {
        tracing::debug!("empty coordinate segment in exploded path");
        return String::new();
    }

    let replaced: String = segment
        .chars()
        .map(|c| match c {
            '%' | '<' | '>' | ':' | '"' | '/' | '?' | '*' | '\\' => '@',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        tracing::error!("the path '{segment}' cannot be transformed into a valid directory name");
        return segment.to_string();
    }

    let suffix = replaced.len() - trimmed.len();
    format!("{trimmed}{}", "@".repeat(suffix))
}
