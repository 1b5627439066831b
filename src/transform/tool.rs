use std::collections::BTreeSet;
use std::process::Command;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;

use super::{ContentType, Scope, Transform, TransformInvocation, set_of};

/// A transform that shells out to an external tool.
///
/// The tool is called as `<program> [args] --output <dir> <inputs...>`, with
/// referenced inputs passed through `--classpath`.
#[derive(Debug, Clone)]
pub struct ToolTransform {
    name: String,
    program: String,
    args: Vec<String>,
    input_types: BTreeSet<ContentType>,
    output_types: Option<BTreeSet<ContentType>>,
    scopes: BTreeSet<Scope>,
    output_scopes: Option<BTreeSet<Scope>>,
    referenced_scopes: BTreeSet<Scope>,
    secondary_files: Vec<Utf8PathBuf>,
    incremental: bool,
}

impl ToolTransform {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            input_types: BTreeSet::new(),
            output_types: None,
            scopes: BTreeSet::new(),
            output_scopes: None,
            referenced_scopes: BTreeSet::new(),
            secondary_files: Vec::new(),
            incremental: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_input_types(mut self, types: &[ContentType]) -> Self {
        self.input_types = set_of(types);
        self
    }

    pub fn with_output_types(mut self, types: &[ContentType]) -> Self {
        self.output_types = Some(set_of(types));
        self
    }

    pub fn with_scopes(mut self, scopes: &[Scope]) -> Self {
        self.scopes = set_of(scopes);
        self
    }

    pub fn with_output_scopes(mut self, scopes: &[Scope]) -> Self {
        self.output_scopes = Some(set_of(scopes));
        self
    }

    pub fn with_referenced_scopes(mut self, scopes: &[Scope]) -> Self {
        self.referenced_scopes = set_of(scopes);
        self
    }

    pub fn secondary_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.secondary_files.push(path.into());
        self
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }
}

impl Transform for ToolTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_types(&self) -> BTreeSet<ContentType> {
        self.input_types.clone()
    }

    fn output_types(&self) -> BTreeSet<ContentType> {
        self.output_types
            .clone()
            .unwrap_or_else(|| self.input_types.clone())
    }

    fn scopes(&self) -> BTreeSet<Scope> {
        self.scopes.clone()
    }

    fn output_scopes(&self) -> BTreeSet<Scope> {
        self.output_scopes.clone().unwrap_or_else(|| self.scopes.clone())
    }

    fn referenced_scopes(&self) -> BTreeSet<Scope> {
        self.referenced_scopes.clone()
    }

    fn is_incremental(&self) -> bool {
        self.incremental
    }

    fn secondary_files(&self) -> Vec<Utf8PathBuf> {
        self.secondary_files.clone()
    }

    fn transform(&self, invocation: &TransformInvocation<'_>) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.arg("--output").arg(invocation.output);
        if invocation.incremental {
            command.arg("--incremental");
        }

        for input in invocation.referenced {
            for path in &input.paths {
                command.arg("--classpath").arg(path);
            }
        }

        for input in invocation.inputs {
            command.args(&input.paths);
        }

        tracing::debug!(tool = %self.program, variant = invocation.variant, "running {command:?}");

        let output = command
            .output()
            .with_context(|| format!("Couldn't start '{}'", self.program))?;

        if !output.status.success() {
            bail!(
                "'{}' failed with {}:\n{}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{CONTENT_CLASS, CONTENT_DEX, SCOPE_FULL_PROJECT, TransformInput};

    #[test]
    fn test_defaults_mirror_inputs() {
        let dex = ToolTransform::new("dex", "d8")
            .with_input_types(CONTENT_CLASS)
            .with_scopes(SCOPE_FULL_PROJECT);

        assert_eq!(dex.output_types(), set_of(CONTENT_CLASS));
        assert_eq!(dex.output_scopes(), set_of(SCOPE_FULL_PROJECT));

        let dex = dex.with_output_types(CONTENT_DEX);
        assert_eq!(dex.output_types(), set_of(CONTENT_DEX));
    }

    #[test]
    fn test_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let tool = ToolTransform::new("none", "droidgraph-tool-that-does-not-exist");
        let inputs = [TransformInput {
            content_types: set_of(CONTENT_CLASS),
            scopes: set_of(SCOPE_FULL_PROJECT),
            paths: vec!["classes".into()],
        }];

        let result = tool.transform(&TransformInvocation {
            variant: "debug",
            inputs: &inputs,
            referenced: &[],
            output: &output,
            incremental: false,
        });

        assert!(result.is_err());
    }
}
