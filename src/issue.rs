//! Structured configuration problems ("sync issues").
//!
//! An IDE importing the project evaluates it in [`EvaluationMode::Model`] and
//! wants every problem listed, so resolution keeps going in degraded mode.
//! A command line build evaluates in [`EvaluationMode::Standard`] and stops at
//! the first error.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use console::style;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Kind of a [`SyncIssue`]. The numeric code is stable and meant for tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    Generic,
    UnresolvedDependency,
    DependencyIsApk,
    DependencyIsApklib,
    NonJarLocalDep,
    JarDependsOnAar,
    JarDependsOnAtom,
    AarDependsOnAtom,
    AtomDependencyProvided,
    CircularReference,
    MissingSigningConfig,
    IllegalTransformScope,
    UnsupportedCoverageCompiler,
    MissingTestBuildType,
    InvalidFlavorDimension,
    MinSdkAboveTargetSdk,
    UnrecognizedDependency,
}

impl IssueType {
    pub fn code(self) -> u32 {
        match self {
            IssueType::Generic => 0,
            IssueType::UnresolvedDependency => 2,
            IssueType::DependencyIsApk => 3,
            IssueType::DependencyIsApklib => 4,
            IssueType::NonJarLocalDep => 5,
            IssueType::JarDependsOnAar => 8,
            IssueType::JarDependsOnAtom => 30,
            IssueType::AarDependsOnAtom => 31,
            IssueType::AtomDependencyProvided => 32,
            IssueType::CircularReference => 40,
            IssueType::MissingSigningConfig => 41,
            IssueType::IllegalTransformScope => 42,
            IssueType::UnsupportedCoverageCompiler => 43,
            IssueType::MissingTestBuildType => 44,
            IssueType::InvalidFlavorDimension => 45,
            IssueType::MinSdkAboveTargetSdk => 46,
            IssueType::UnrecognizedDependency => 47,
        }
    }

    /// Issues that abort evaluation even in [`EvaluationMode::Model`].
    pub fn always_fatal(self) -> bool {
        matches!(
            self,
            IssueType::DependencyIsApklib | IssueType::CircularReference
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// A single configuration problem, with the offending coordinate or project
/// path in `data`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncIssue {
    pub kind: IssueType,
    pub severity: Severity,
    pub data: Option<String>,
    pub message: String,
}

impl SyncIssue {
    pub fn error(kind: IssueType, data: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            data,
            message: message.into(),
        }
    }

    pub fn warning(kind: IssueType, data: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            data,
            message: message.into(),
        }
    }
}

impl Display for SyncIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        write!(f, "{severity}: {}", self.message)
    }
}

/// How the project is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// A regular build: errors throw.
    #[default]
    Standard,
    /// Model-only evaluation for IDE import: errors are collected.
    Model,
}

/// Collects [`SyncIssue`]s and decides whether each one aborts evaluation.
#[derive(Debug, Default)]
pub struct IssueReporter {
    mode: EvaluationMode,
    issues: Vec<SyncIssue>,
    seen: HashSet<SyncIssue>,
}

impl IssueReporter {
    pub fn new(mode: EvaluationMode) -> Self {
        Self {
            mode,
            issues: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Records the issue and returns an error when evaluation must stop.
    pub fn report(&mut self, issue: SyncIssue) -> Result<(), ConfigError> {
        match issue.severity {
            Severity::Warning => tracing::warn!("{}", issue.message),
            Severity::Error => tracing::error!("{}", issue.message),
        }

        let fatal = issue.severity == Severity::Error
            && (self.mode == EvaluationMode::Standard || issue.kind.always_fatal());

        if self.seen.insert(issue.clone()) {
            self.issues.push(issue.clone());
        }

        if fatal { Err(issue.into()) } else { Ok(()) }
    }

    pub fn issues(&self) -> &[SyncIssue] {
        &self.issues
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn of_type(&self, kind: IssueType) -> impl Iterator<Item = &SyncIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Human readable listing of every recorded issue.
    pub fn summary(&self) -> String {
        let mut out = String::new();

        for issue in &self.issues {
            let tag = match issue.severity {
                Severity::Warning => style("warning").yellow().bold(),
                Severity::Error => style("error").red().bold(),
            };
            out.push_str(&format!("{tag}[{}] {}\n", issue.kind.code(), issue.message));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_mode_throws_on_error() {
        let mut reporter = IssueReporter::new(EvaluationMode::Standard);
        let issue = SyncIssue::error(
            IssueType::UnresolvedDependency,
            None,
            "Unable to resolve dependency 'a:b:1'",
        );

        assert!(reporter.report(issue).is_err());
        assert_eq!(reporter.issues().len(), 1);
    }

    #[test]
    fn test_model_mode_collects() {
        let mut reporter = IssueReporter::new(EvaluationMode::Model);
        let issue = SyncIssue::error(
            IssueType::UnresolvedDependency,
            None,
            "Unable to resolve dependency 'a:b:1'",
        );

        assert!(reporter.report(issue.clone()).is_ok());
        assert!(reporter.report(issue).is_ok());
        assert_eq!(reporter.issues().len(), 1);
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_always_fatal_in_model_mode() {
        let mut reporter = IssueReporter::new(EvaluationMode::Model);
        let issue = SyncIssue::error(IssueType::DependencyIsApklib, None, "apklib");

        assert!(reporter.report(issue).is_err());
        assert_eq!(reporter.of_type(IssueType::DependencyIsApklib).count(), 1);
    }

    #[test]
    fn test_warning_never_throws() {
        let mut reporter = IssueReporter::new(EvaluationMode::Standard);
        let issue = SyncIssue::warning(IssueType::MinSdkAboveTargetSdk, None, "minSdk");

        assert!(reporter.report(issue).is_ok());
        assert!(!reporter.has_errors());
        assert!(reporter.summary().contains("minSdk"));
    }
}
