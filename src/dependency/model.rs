//! The resolution result handed over by the host build tool.
//!
//! Components are stored by module version, and dependency edges refer to
//! them by the same key, so project cycles can be expressed without shared
//! ownership.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// `group:name:version` of a resolved module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl ModuleVersion {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parses `group:name:version`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(':');
        let module = Self::new(parts.next()?, parts.next()?, parts.next()?);
        match parts.next() {
            None => Some(module),
            Some(_) => None,
        }
    }
}

impl Display for ModuleVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// A file published by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub file: Utf8PathBuf,
    pub extension: String,
    #[serde(default)]
    pub classifier: Option<String>,
}

impl Artifact {
    pub fn new(file: impl Into<Utf8PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            extension: extension.into(),
            classifier: None,
        }
    }

    pub fn classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }
}

/// Set when a component is another module of the same build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Path of the project, for example `:lib`.
    pub path: String,
    pub build_dir: Utf8PathBuf,
    /// Whether the project applies the Android library plugin, as opposed to
    /// wrapping a prebuilt archive.
    #[serde(default)]
    pub android_library: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyResult {
    Resolved(ModuleVersion),
    /// The string is what was requested, for example `com.foo:bar:1.+`.
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub module: ModuleVersion,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub dependencies: Vec<DependencyResult>,
}

/// One resolved configuration: the direct dependencies, every reachable
/// component, and the local files added by path.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfiguration {
    pub name: String,
    pub roots: Vec<DependencyResult>,
    pub components: HashMap<ModuleVersion, Component>,
    pub local_files: Vec<Utf8PathBuf>,
}

impl ResolvedConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a component reachable from the roots.
    pub fn component(&mut self, component: Component) -> &mut Self {
        self.components.insert(component.module.clone(), component);
        self
    }

    /// Adds a component and makes it a direct dependency.
    pub fn root(&mut self, component: Component) -> &mut Self {
        self.roots
            .push(DependencyResult::Resolved(component.module.clone()));
        self.component(component)
    }

    pub fn unresolved_root(&mut self, requested: impl Into<String>) -> &mut Self {
        self.roots.push(DependencyResult::Unresolved(requested.into()));
        self
    }

    pub fn local_file(&mut self, file: impl Into<Utf8PathBuf>) -> &mut Self {
        self.local_files.push(file.into());
        self
    }
}

impl Component {
    /// An external module published as a single artifact with the given
    /// extension.
    pub fn module(coordinate: &str, extension: &str) -> Self {
        let module = ModuleVersion::parse(coordinate).unwrap_or_else(|| {
            ModuleVersion::new("", coordinate, "unspecified")
        });
        let file = format!("repo/{}-{}.{}", module.name, module.version, extension);

        Self {
            module,
            project: None,
            artifacts: vec![Artifact::new(file, extension)],
            dependencies: Vec::new(),
        }
    }

    /// Another project of the build. Android library projects publish an
    /// `aar`, anything else a `jar`.
    pub fn project(path: &str, android_library: bool) -> Self {
        let name = path.trim_start_matches(':').replace(':', "-");
        let extension = if android_library { "aar" } else { "jar" };
        let build_dir = Utf8PathBuf::from(name.as_str()).join("build");
        let file = build_dir.join(format!("{name}.{extension}"));

        Self {
            module: ModuleVersion::new("project", name.as_str(), "unspecified"),
            artifacts: vec![Artifact::new(file, extension)],
            project: Some(ProjectRef {
                path: path.to_string(),
                build_dir,
                android_library,
            }),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, other: &Component) -> Self {
        self.dependencies
            .push(DependencyResult::Resolved(other.module.clone()));
        self
    }

    pub fn depends_on_unresolved(mut self, requested: impl Into<String>) -> Self {
        self.dependencies
            .push(DependencyResult::Unresolved(requested.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_version() {
        let module = ModuleVersion::parse("com.google.guava:guava:18.0").unwrap();
        assert_eq!(module.group, "com.google.guava");
        assert_eq!(module.to_string(), "com.google.guava:guava:18.0");
        assert!(ModuleVersion::parse("a:b").is_none());
        assert!(ModuleVersion::parse("a:b:c:d").is_none());
    }

    #[test]
    fn test_project_component() {
        let lib = Component::project(":libs:core", true);
        assert_eq!(lib.module.name, "libs-core");
        assert_eq!(lib.artifacts[0].extension, "aar");
        assert_eq!(lib.project.as_ref().unwrap().path, ":libs:core");
    }
}
