//! Variants: what gets built.
//!
//! A variant is one build type combined with one product flavor per
//! dimension. Its kind decides the few places where task creation differs;
//! everything else about the task graph is shared.

mod config;
mod manager;
mod scope;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::transform::{SCOPE_FULL_LIBRARY, SCOPE_FULL_PROJECT, SCOPE_PROJECT, Scope};

pub use config::{
    BuildType, DefaultConfig, ProductFlavor, ProjectModel, SigningConfig, VariantConfiguration,
};
pub use manager::{DependencySource, VariantFilter, VariantManager};
pub use scope::{ScopeBuilder, Slot, Stage, VariantScope};

/// Kind of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    #[default]
    App,
    Library,
    Feature,
    InstantApp,
    AndroidTest,
    UnitTest,
    Atom,
}

/// How the final output of a variant is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingStrategy {
    /// An installable APK, signed when a signing config is available.
    SignedApk,
    /// An `aar` for other modules to consume.
    LibraryBundle,
    AtomBundle,
    /// A split APK of an instant app.
    FeatureSplit,
    /// A zip of the feature splits.
    InstantAppBundle,
    /// The instrumentation APK of an android test.
    TestApk,
    /// Nothing is packaged; unit tests run on the JVM.
    None,
}

/// What the variant's `preBuild` task waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreBuildPolicy {
    Default,
    /// Test variants also wait for the tested variant's dependencies.
    WithTestedVariant,
}

/// The few things that differ between variant kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whose resources are merged into the packaged resources.
    pub res_merging_scopes: &'static [Scope],
    pub packaging: PackagingStrategy,
    pub pre_build: PreBuildPolicy,
    /// Whether compiled classes go through the post-compilation pipeline
    /// (coverage, shrinking, dexing).
    pub is_packaged: bool,
    /// Scopes a custom transform may consume.
    pub allowed_transform_scopes: &'static [Scope],
}

const SCOPE_TEST: &[Scope] = &[
    Scope::Project,
    Scope::ProjectLocalDeps,
    Scope::SubProjects,
    Scope::SubProjectsLocalDeps,
    Scope::ExternalLibraries,
    Scope::TestedCode,
];

impl VariantType {
    pub fn capabilities(self) -> Capabilities {
        use PackagingStrategy as P;

        const FULL: &[Scope] = SCOPE_FULL_PROJECT;

        let (res_merging_scopes, packaging, is_packaged, allowed_transform_scopes) = match self {
            VariantType::App => (FULL, P::SignedApk, true, FULL),
            VariantType::Library => (SCOPE_PROJECT, P::LibraryBundle, false, SCOPE_FULL_LIBRARY),
            VariantType::Feature => (FULL, P::FeatureSplit, true, FULL),
            VariantType::InstantApp => (FULL, P::InstantAppBundle, true, FULL),
            VariantType::Atom => (FULL, P::AtomBundle, true, FULL),
            VariantType::AndroidTest => (FULL, P::TestApk, true, SCOPE_TEST),
            VariantType::UnitTest => (FULL, P::None, false, SCOPE_TEST),
        };

        let pre_build = match self.is_for_testing() {
            true => PreBuildPolicy::WithTestedVariant,
            false => PreBuildPolicy::Default,
        };

        Capabilities {
            res_merging_scopes,
            packaging,
            pre_build,
            is_packaged,
            allowed_transform_scopes,
        }
    }

    pub fn is_for_testing(self) -> bool {
        matches!(self, VariantType::AndroidTest | VariantType::UnitTest)
    }

    /// Whether variants of a project of this kind get test variants.
    pub fn has_test_scope(self) -> bool {
        matches!(self, VariantType::App | VariantType::Library | VariantType::Feature)
    }

    /// Whether the output is an APK that can be installed on a device.
    pub fn is_apk(self) -> bool {
        matches!(
            self.capabilities().packaging,
            PackagingStrategy::SignedApk
                | PackagingStrategy::FeatureSplit
                | PackagingStrategy::TestApk
        )
    }

    /// Prepended to variant names, `feature` for feature modules.
    pub fn prefix(self) -> &'static str {
        match self {
            VariantType::Feature => "feature",
            _ => "",
        }
    }

    /// Appended to variant names.
    pub fn suffix(self) -> &'static str {
        match self {
            VariantType::AndroidTest => "AndroidTest",
            VariantType::UnitTest => "UnitTest",
            _ => "",
        }
    }

    /// Leading directory of the variant's intermediates, for test variants.
    pub fn dir_prefix(self) -> Option<&'static str> {
        match self {
            VariantType::AndroidTest => Some("androidTest"),
            VariantType::UnitTest => Some("test"),
            _ => None,
        }
    }
}

impl Display for VariantType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VariantType::App => "APK",
            VariantType::Library => "LIBRARY",
            VariantType::Feature => "FEATURE",
            VariantType::InstantApp => "INSTANTAPP",
            VariantType::AndroidTest => "ANDROID_TEST",
            VariantType::UnitTest => "UNIT_TEST",
            VariantType::Atom => "ATOM",
        };
        f.write_str(name)
    }
}
