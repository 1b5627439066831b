use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::VariantType;
use crate::core::capitalize;
use crate::error::ConfigError;

/// Settings shared by every variant unless a flavor or build type overrides
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultConfig {
    pub application_id: Option<String>,
    pub test_application_id: Option<String>,
    pub version_code: Option<u32>,
    pub version_name: Option<String>,
    pub min_sdk: Option<u32>,
    pub target_sdk: Option<u32>,
    pub multidex_enabled: Option<bool>,
    pub jack_enabled: Option<bool>,
    pub signing_config: Option<String>,
    pub proguard_files: Vec<Utf8PathBuf>,
    pub abi_filters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFlavor {
    pub name: String,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(flatten)]
    pub config: DefaultConfig,
}

impl ProductFlavor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = Some(dimension.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildType {
    pub name: String,
    pub debuggable: bool,
    pub minify_enabled: bool,
    pub shrink_resources: bool,
    /// Use ProGuard when minifying, the built-in shrinker otherwise.
    pub use_proguard: bool,
    pub test_coverage_enabled: bool,
    pub zip_align_enabled: bool,
    pub application_id_suffix: Option<String>,
    pub version_name_suffix: Option<String>,
    pub signing_config: Option<String>,
    pub multidex_enabled: Option<bool>,
    pub jack_enabled: Option<bool>,
    pub proguard_files: Vec<Utf8PathBuf>,
}

impl Default for BuildType {
    fn default() -> Self {
        Self {
            name: String::new(),
            debuggable: false,
            minify_enabled: false,
            shrink_resources: false,
            use_proguard: true,
            test_coverage_enabled: false,
            zip_align_enabled: true,
            application_id_suffix: None,
            version_name_suffix: None,
            signing_config: None,
            multidex_enabled: None,
            jack_enabled: None,
            proguard_files: Vec::new(),
        }
    }
}

impl BuildType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn debug() -> Self {
        Self {
            debuggable: true,
            signing_config: Some(SigningConfig::DEBUG.into()),
            ..Self::new("debug")
        }
    }

    pub fn release() -> Self {
        Self::new("release")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    pub name: String,
    #[serde(default)]
    pub store_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub store_password: Option<String>,
    #[serde(default)]
    pub key_alias: Option<String>,
    #[serde(default)]
    pub key_password: Option<String>,
}

impl SigningConfig {
    pub const DEBUG: &'static str = "debug";

    /// The debug keystore every installation of the SDK creates.
    pub fn debug() -> Self {
        let store_file = dirs::home_dir()
            .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
            .map(|home| home.join(".android").join("debug.keystore"))
            .unwrap_or_else(|| Utf8Path::new(".android").join("debug.keystore"));

        Self {
            name: Self::DEBUG.into(),
            store_file: Some(store_file),
            store_password: Some("android".into()),
            key_alias: Some("androiddebugkey".into()),
            key_password: Some("android".into()),
        }
    }

    /// Whether everything needed to sign is set.
    pub fn is_signing_ready(&self) -> bool {
        self.store_file.is_some()
            && self.store_password.is_some()
            && self.key_alias.is_some()
            && self.key_password.is_some()
    }
}

/// The `android { }` block of one project.
///
/// ```toml
/// project_path = ":app"
/// flavor_dimensions = ["tier"]
///
/// [default_config]
/// application_id = "com.example.app"
/// min_sdk = 21
///
/// [[product_flavors]]
/// name = "free"
/// dimension = "tier"
///
/// [[product_flavors]]
/// name = "paid"
/// dimension = "tier"
/// application_id = "com.example.app.paid"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectModel {
    pub project_path: String,
    pub build_dir: Utf8PathBuf,
    pub variant_type: VariantType,
    pub default_config: DefaultConfig,
    pub build_types: Vec<BuildType>,
    pub product_flavors: Vec<ProductFlavor>,
    pub flavor_dimensions: Vec<String>,
    pub signing_configs: Vec<SigningConfig>,
    /// Build type the android test variant is created for.
    pub test_build_type: String,
    /// One APK per ABI in `abi_filters`.
    pub pure_splits: bool,
    pub external_native_build: bool,
    pub pre_dex_libraries: bool,
}

impl Default for ProjectModel {
    fn default() -> Self {
        Self {
            project_path: ":app".into(),
            build_dir: "build".into(),
            variant_type: VariantType::App,
            default_config: DefaultConfig::default(),
            build_types: Vec::new(),
            product_flavors: Vec::new(),
            flavor_dimensions: Vec::new(),
            signing_configs: Vec::new(),
            test_build_type: "debug".into(),
            pure_splits: false,
            external_native_build: false,
            pre_dex_libraries: true,
        }
    }
}

impl ProjectModel {
    /// A model with the implicit `debug` and `release` build types.
    pub fn new(project_path: impl Into<String>, variant_type: VariantType) -> Self {
        Self {
            project_path: project_path.into(),
            variant_type,
            ..Default::default()
        }
        .with_implicit_objects()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let model: Self = toml::from_str(text)?;
        Ok(model.with_implicit_objects())
    }

    /// Adds the `debug` and `release` build types and the `debug` signing
    /// config unless the project declares its own.
    fn with_implicit_objects(mut self) -> Self {
        if !self.build_types.iter().any(|b| b.name == "debug") {
            self.build_types.insert(0, BuildType::debug());
        }
        if !self.build_types.iter().any(|b| b.name == "release") {
            self.build_types.push(BuildType::release());
        }
        if !self.signing_configs.iter().any(|s| s.name == SigningConfig::DEBUG) {
            self.signing_configs.push(SigningConfig::debug());
        }
        self
    }

    pub fn build_type(&self, name: &str) -> Option<&BuildType> {
        self.build_types.iter().find(|b| b.name == name)
    }

    pub fn signing_config(&self, name: &str) -> Option<&SigningConfig> {
        self.signing_configs.iter().find(|s| s.name == name)
    }
}

/// First flavor setting that is set, then the default config.
fn pick<T>(
    flavors: &[ProductFlavor],
    default: &DefaultConfig,
    get: impl Fn(&DefaultConfig) -> Option<T>,
) -> Option<T> {
    flavors.iter().find_map(|f| get(&f.config)).or_else(|| get(default))
}

/// The merged configuration of a single variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantConfiguration {
    pub variant_type: VariantType,
    pub build_type: BuildType,
    /// One flavor per dimension, in dimension order.
    pub flavors: Vec<ProductFlavor>,
    pub application_id: Option<String>,
    pub version_code: Option<u32>,
    pub version_name: Option<String>,
    pub min_sdk: u32,
    pub target_sdk: Option<u32>,
    pub multidex_enabled: bool,
    pub jack_enabled: bool,
    pub signing_config: Option<SigningConfig>,
    /// Name of a signing config that was asked for but is not declared.
    pub missing_signing_config: Option<String>,
    pub proguard_files: Vec<Utf8PathBuf>,
    pub abi_filters: BTreeSet<String>,
    /// Name of the variant under test, for test variants.
    pub tested_variant: Option<String>,
}

impl VariantConfiguration {
    pub fn new(
        variant_type: VariantType,
        model: &ProjectModel,
        build_type: &BuildType,
        flavors: &[ProductFlavor],
    ) -> Self {
        let default = &model.default_config;

        let application_id = pick(flavors, default, |c| c.application_id.clone()).map(|id| {
            format!("{id}{}", build_type.application_id_suffix.as_deref().unwrap_or(""))
        });

        let version_name = pick(flavors, default, |c| c.version_name.clone()).map(|name| {
            format!("{name}{}", build_type.version_name_suffix.as_deref().unwrap_or(""))
        });

        let multidex_enabled = build_type
            .multidex_enabled
            .or_else(|| flavors.iter().find_map(|f| f.config.multidex_enabled))
            .or(default.multidex_enabled)
            .unwrap_or(false);

        let jack_enabled = build_type
            .jack_enabled
            .or_else(|| flavors.iter().find_map(|f| f.config.jack_enabled))
            .or(default.jack_enabled)
            .unwrap_or(false);

        let signing_name = build_type
            .signing_config
            .clone()
            .or_else(|| flavors.iter().find_map(|f| f.config.signing_config.clone()))
            .or_else(|| default.signing_config.clone());

        let (signing_config, missing_signing_config) = match signing_name {
            Some(name) => match model.signing_config(&name) {
                Some(config) => (Some(config.clone()), None),
                None => (None, Some(name)),
            },
            None => (None, None),
        };

        let mut proguard_files = default.proguard_files.clone();
        for flavor in flavors {
            proguard_files.extend(flavor.config.proguard_files.iter().cloned());
        }
        proguard_files.extend(build_type.proguard_files.iter().cloned());

        let abi_filters = default
            .abi_filters
            .iter()
            .chain(flavors.iter().flat_map(|f| f.config.abi_filters.iter()))
            .cloned()
            .collect();

        Self {
            variant_type,
            build_type: build_type.clone(),
            flavors: flavors.to_vec(),
            application_id,
            version_code: pick(flavors, default, |c| c.version_code),
            version_name,
            min_sdk: pick(flavors, default, |c| c.min_sdk).unwrap_or(1),
            target_sdk: pick(flavors, default, |c| c.target_sdk),
            multidex_enabled,
            jack_enabled,
            signing_config,
            missing_signing_config,
            proguard_files,
            abi_filters,
            tested_variant: None,
        }
    }

    /// Configuration of a test variant for `tested`.
    ///
    /// The test APK gets `test_application_id` or the tested id with `.test`
    /// appended, and is signed like the tested variant.
    pub fn for_test(
        variant_type: VariantType,
        model: &ProjectModel,
        tested: &VariantConfiguration,
    ) -> Self {
        let test_id = tested
            .flavors
            .iter()
            .find_map(|f| f.config.test_application_id.clone())
            .or_else(|| model.default_config.test_application_id.clone())
            .or_else(|| tested.application_id.as_ref().map(|id| format!("{id}.test")));

        Self {
            variant_type,
            application_id: test_id,
            abi_filters: BTreeSet::new(),
            proguard_files: Vec::new(),
            tested_variant: Some(tested.name()),
            ..tested.clone()
        }
    }

    /// Flavor names in dimension order, the first one lowercase and the rest
    /// capitalized: `freeArm`.
    pub fn flavor_name(&self) -> String {
        let mut name = String::new();
        for (i, flavor) in self.flavors.iter().enumerate() {
            match i {
                0 => name.push_str(&flavor.name),
                _ => name.push_str(&capitalize(&flavor.name)),
            }
        }
        name
    }

    /// Full name of the variant: `freeDebug`, `freeDebugUnitTest`,
    /// `featureFreeDebug`.
    pub fn name(&self) -> String {
        let mut name = match self.flavors.is_empty() {
            true => self.build_type.name.clone(),
            false => format!("{}{}", self.flavor_name(), capitalize(&self.build_type.name)),
        };
        name.push_str(self.variant_type.suffix());

        match self.variant_type.prefix() {
            "" => name,
            prefix => format!("{prefix}{}", capitalize(&name)),
        }
    }

    /// Hyphenated name used for output files: `free-arm-debug`.
    pub fn base_name(&self) -> String {
        let mut parts: Vec<&str> = self.flavors.iter().map(|f| f.name.as_str()).collect();
        parts.push(&self.build_type.name);
        match self.variant_type {
            VariantType::AndroidTest => parts.push("androidTest"),
            VariantType::UnitTest => parts.push("unitTest"),
            _ => {}
        }
        parts.join("-")
    }

    /// Relative directory of the variant's intermediates: `free/debug`,
    /// `androidTest/free/debug`.
    pub fn dir_name(&self) -> String {
        let mut dir = String::new();
        if let Some(prefix) = self.variant_type.dir_prefix() {
            dir.push_str(prefix);
            dir.push('/');
        }
        if !self.flavors.is_empty() {
            dir.push_str(&self.flavor_name());
            dir.push('/');
        }
        dir.push_str(&self.build_type.name);
        dir
    }

    pub fn is_debuggable(&self) -> bool {
        self.build_type.debuggable
    }

    /// Test variants are never minified themselves.
    pub fn is_minify_enabled(&self) -> bool {
        self.build_type.minify_enabled && !self.variant_type.is_for_testing()
    }

    pub fn is_shrink_resources(&self) -> bool {
        self.is_minify_enabled() && self.build_type.shrink_resources
    }

    pub fn is_test_coverage_enabled(&self) -> bool {
        self.build_type.test_coverage_enabled && !self.variant_type.is_for_testing()
    }

    pub fn is_signed(&self) -> bool {
        self.signing_config
            .as_ref()
            .is_some_and(SigningConfig::is_signing_ready)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn model() -> ProjectModel {
        ProjectModel::from_toml_str(
            r#"
project_path = ":app"
flavor_dimensions = ["tier", "abi"]

[default_config]
application_id = "com.example.app"
version_name = "1.0"
min_sdk = 15
target_sdk = 25
proguard_files = ["default.pro"]

[[build_types]]
name = "release"
minify_enabled = true
shrink_resources = true
application_id_suffix = ".release"
version_name_suffix = "-rc"
proguard_files = ["release.pro"]
multidex_enabled = false

[[product_flavors]]
name = "paid"
dimension = "tier"
application_id = "com.example.paid"
multidex_enabled = true
min_sdk = 21
proguard_files = ["paid.pro"]

[[product_flavors]]
name = "arm"
dimension = "abi"
abi_filters = ["armeabi-v7a", "arm64-v8a"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_implicit_build_types() {
        let model = model();
        let names: Vec<_> = model.build_types.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["debug", "release"]);
        assert!(model.build_type("debug").unwrap().debuggable);
        assert!(model.signing_config("debug").unwrap().is_signing_ready());
        assert_eq!(model.test_build_type, "debug");
    }

    #[test]
    fn test_names() {
        let model = model();
        let debug = model.build_type("debug").unwrap();
        let flavors = &model.product_flavors;
        let config = VariantConfiguration::new(VariantType::App, &model, debug, flavors);

        assert_eq!(config.flavor_name(), "paidArm");
        assert_eq!(config.name(), "paidArmDebug");
        assert_eq!(config.base_name(), "paid-arm-debug");
        assert_eq!(config.dir_name(), "paidArm/debug");

        let test = VariantConfiguration::for_test(VariantType::AndroidTest, &model, &config);
        assert_eq!(test.name(), "paidArmDebugAndroidTest");
        assert_eq!(test.dir_name(), "androidTest/paidArm/debug");
        assert_eq!(test.tested_variant.as_deref(), Some("paidArmDebug"));
        assert_eq!(test.application_id.as_deref(), Some("com.example.paid.test"));

        let feature = VariantConfiguration::new(VariantType::Feature, &model, debug, &[]);
        assert_eq!(feature.name(), "featureDebug");
        assert_eq!(feature.dir_name(), "debug");
    }

    #[test]
    fn test_merge_precedence() {
        let model = model();
        let release = model.build_type("release").unwrap();
        let flavors = &model.product_flavors;
        let config = VariantConfiguration::new(VariantType::App, &model, release, flavors);

        assert_eq!(config.application_id.as_deref(), Some("com.example.paid.release"));
        assert_eq!(config.version_name.as_deref(), Some("1.0-rc"));
        assert_eq!(config.min_sdk, 21);
        assert_eq!(config.target_sdk, Some(25));
        // The build type wins over the flavor.
        assert!(!config.multidex_enabled);
        assert_eq!(config.proguard_files, ["default.pro", "paid.pro", "release.pro"]);
        assert_eq!(config.abi_filters.len(), 2);
        assert!(config.is_minify_enabled());
        assert!(config.is_shrink_resources());
        assert!(!config.is_signed());
    }

    #[test]
    fn test_missing_signing_config_is_recorded() {
        let mut model = model();
        model.build_types[1].signing_config = Some("upload".into());
        let release = model.build_type("release").unwrap();

        let config = VariantConfiguration::new(VariantType::App, &model, release, &[]);
        assert_eq!(config.missing_signing_config.as_deref(), Some("upload"));
        assert!(config.signing_config.is_none());
    }

    #[test]
    fn test_tests_are_never_minified() {
        let model = model();
        let release = model.build_type("release").unwrap();
        let app = VariantConfiguration::new(VariantType::App, &model, release, &[]);
        let test = VariantConfiguration::for_test(VariantType::UnitTest, &model, &app);

        assert!(!test.is_minify_enabled());
        assert_eq!(test.name(), "releaseUnitTest");
    }
}
