use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::issue::EvaluationMode;

/// Model level at which an IDE asks for full dependency graphs. Below it the
/// package scope is not resolved and provided inference is switched off.
pub const MODEL_LEVEL_DEPENDENCY_GRAPH: u32 = 2;

/// Build-wide switches that feed the task graph decision tables.
///
/// Options can be loaded from a TOML file; every field has a default, so an
/// empty file is a valid configuration.
///
/// ```toml
/// build_cache_enabled = true
/// evaluation_mode = "model"
///
/// [restrict_variant]
/// project = ":app"
/// variant = "freeDebug"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectOptions {
    pub build_cache_enabled: bool,
    /// Root of the shared library cache. `None` means `~/.android/build-cache`.
    pub build_cache_dir: Option<Utf8PathBuf>,
    /// Only create tasks for a single variant, used to speed up IDE syncs.
    pub restrict_variant: Option<RestrictVariant>,
    pub evaluation_mode: EvaluationMode,
    /// Requested model level, `None` for a regular build.
    pub model_level: Option<u32>,
    /// Overrides the per-variant `pre_dex_libraries` setting.
    pub pre_dex_libraries: Option<bool>,
    /// Fail when a release APK has no signing config instead of producing an
    /// unsigned one.
    pub require_release_signing: bool,
    /// Whether the build tools can produce native multidex output.
    pub native_multidex_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictVariant {
    pub project: String,
    pub variant: String,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            build_cache_enabled: true,
            build_cache_dir: None,
            restrict_variant: None,
            evaluation_mode: EvaluationMode::Standard,
            model_level: None,
            pre_dex_libraries: None,
            require_release_signing: false,
            native_multidex_supported: true,
        }
    }
}

impl ProjectOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_toml_str(&text)
    }

    /// Whether dependency resolution needs the package scope. Model-only
    /// evaluation below [`MODEL_LEVEL_DEPENDENCY_GRAPH`] skips it; a missing
    /// level counts as zero.
    pub fn need_package_scope(&self) -> bool {
        match self.evaluation_mode {
            EvaluationMode::Model => {
                self.model_level.unwrap_or(0) >= MODEL_LEVEL_DEPENDENCY_GRAPH
            }
            EvaluationMode::Standard => true,
        }
    }

    pub fn resolve_build_cache_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(dir) = &self.build_cache_dir {
            return Ok(dir.clone());
        }

        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|_| ConfigError::NoHomeDir)?;

        Ok(home.join(".android").join("build-cache"))
    }

    /// Whether variant `name` of project `project` should get tasks.
    pub fn is_variant_retained(&self, project: &str, name: &str) -> bool {
        match &self.restrict_variant {
            Some(restrict) if restrict.project == project => restrict.variant == name,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let options = ProjectOptions::from_toml_str("").unwrap();
        assert!(options.build_cache_enabled);
        assert!(options.native_multidex_supported);
        assert_eq!(options.evaluation_mode, EvaluationMode::Standard);
        assert!(options.need_package_scope());
    }

    #[test]
    fn test_parse_restrict_variant() {
        let options = ProjectOptions::from_toml_str(
            r#"
evaluation_mode = "model"
model_level = 1
build_cache_dir = "/tmp/cache"

[restrict_variant]
project = ":app"
variant = "freeDebug"
"#,
        )
        .unwrap();

        assert!(!options.need_package_scope());
        assert!(options.is_variant_retained(":app", "freeDebug"));
        assert!(
            !ProjectOptions::from_toml_str("evaluation_mode = \"model\"")
                .unwrap()
                .need_package_scope()
        );
        assert!(
            ProjectOptions::from_toml_str("evaluation_mode = \"model\"\nmodel_level = 2")
                .unwrap()
                .need_package_scope()
        );
        assert!(!options.is_variant_retained(":app", "paidDebug"));
        assert!(options.is_variant_retained(":lib", "paidDebug"));
        assert_eq!(options.resolve_build_cache_dir().unwrap(), "/tmp/cache");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ProjectOptions::from_toml_str("build_cache_enabled = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("options.toml")).unwrap();
        fs::write(&path, "require_release_signing = true").unwrap();

        let options = ProjectOptions::load(&path).unwrap();
        assert!(options.require_release_signing);
    }
}
