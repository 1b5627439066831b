use std::fmt::{Display, Formatter};

use camino::Utf8PathBuf;
use serde::Serialize;

use super::{DependencyContainer, DependencyNode, LOCAL_JARS_GROUP, NodeType, ResolvedDependencies};
use crate::error::ConfigError;

/// Printable snapshot of a variant's resolved dependencies, as shown by the
/// `androidDependencies` task.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub variant: String,
    pub compile: Vec<ReportNode>,
    pub package: Vec<ReportNode>,
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportNode {
    pub name: String,
    pub kind: NodeType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub provided: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ReportNode>,
}

impl ReportNode {
    fn new(node: &DependencyNode) -> Self {
        let name = match node.coordinates.group.as_str() {
            LOCAL_JARS_GROUP => format!("LOCAL: {}", node.coordinates.name),
            _ => node.name(),
        };

        Self {
            name,
            kind: node.node_type,
            provided: node.provided,
            skipped: node.is_skipped(),
            folder: node.folder.clone(),
            dependencies: node.dependencies.iter().map(|child| Self::new(child)).collect(),
        }
    }
}

fn nodes(container: &DependencyContainer) -> Vec<ReportNode> {
    container.direct().map(|node| ReportNode::new(node)).collect()
}

impl DependencyReport {
    pub fn new(variant: impl Into<String>, resolved: &ResolvedDependencies) -> Self {
        Self {
            variant: variant.into(),
            compile: nodes(&resolved.compile),
            package: nodes(&resolved.package),
            unresolved: resolved.unresolved.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn write_tree(f: &mut Formatter<'_>, nodes: &[ReportNode], prefix: &str) -> std::fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let branch = if last { "\\---" } else { "+---" };

        write!(f, "{prefix}{branch} {}", node.name)?;
        if node.provided {
            f.write_str(" (provided)")?;
        }
        if node.skipped {
            f.write_str(" (skipped)")?;
        }
        writeln!(f)?;

        let prefix = format!("{prefix}{}", if last { "     " } else { "|    " });
        write_tree(f, &node.dependencies, &prefix)?;
    }

    Ok(())
}

impl Display for DependencyReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.variant)?;

        for (title, nodes) in [("Compile", &self.compile), ("Package", &self.package)] {
            writeln!(f, "{title} dependencies:")?;
            if nodes.is_empty() {
                writeln!(f, "No dependencies")?;
            }
            write_tree(f, nodes, "")?;
            writeln!(f)?;
        }

        for dependency in &self.unresolved {
            writeln!(f, "Unresolved: {dependency}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dependency::{Component, DependencyResolver, VariantDependencies};
    use crate::issue::{EvaluationMode, IssueReporter};
    use crate::options::ProjectOptions;

    fn report() -> DependencyReport {
        let v4 = Component::module("com.android.support:support-v4:25.1.0", "aar");
        let appcompat =
            Component::module("com.android.support:appcompat-v7:25.1.0", "aar").depends_on(&v4);
        let annotations = Component::module("com.example:annotations:1.0", "jar");

        let mut deps = VariantDependencies::new("debug", ":app", "app/build");
        deps.package.root(appcompat.clone()).component(v4.clone());
        deps.compile
            .root(appcompat)
            .component(v4)
            .root(annotations)
            .local_file("libs/tools.jar");

        let resolved = DependencyResolver::new(&ProjectOptions::default())
            .resolve(&deps, &mut IssueReporter::new(EvaluationMode::Standard))
            .unwrap();

        DependencyReport::new("debug", &resolved)
    }

    #[test]
    fn test_text_tree() {
        let text = report().to_string();
        let compile = text.split("Package dependencies:").next().unwrap();

        assert_eq!(
            compile,
            "debug\n\
             Compile dependencies:\n\
             +--- com.android.support:appcompat-v7:25.1.0\n\
             |    \\--- com.android.support:support-v4:25.1.0\n\
             +--- com.example:annotations:1.0 (provided)\n\
             \\--- LOCAL: libs/tools.jar (provided)\n\n"
        );
    }

    #[test]
    fn test_json() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();

        assert_eq!(json["variant"], "debug");
        assert_eq!(json["compile"][0]["kind"], "Android");
        assert_eq!(
            json["compile"][0]["dependencies"][0]["name"],
            "com.android.support:support-v4:25.1.0"
        );
        assert_eq!(json["compile"][1]["provided"], true);
        assert!(json["package"][0].get("provided").is_none());
    }
}
