/// First platform version that loads secondary dex files on its own.
pub const NATIVE_MULTIDEX_MIN_SDK: u32 = 21;

/// How the classes of a variant are turned into dex files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexingMode {
    /// Everything fits in a single dex file.
    MonoDex,
    /// Several dex files, with a precomputed list of the classes that must
    /// go into the first one.
    LegacyMultidex,
    /// Several dex files loaded by the platform.
    NativeMultidex,
}

impl DexingMode {
    pub fn is_multidex(self) -> bool {
        !matches!(self, DexingMode::MonoDex)
    }

    pub fn needs_main_dex_list(self) -> bool {
        matches!(self, DexingMode::LegacyMultidex)
    }
}

/// Picks the dexing mode of a variant.
///
/// Native multidex needs both a platform that supports it and build tools
/// that can produce it; anything else falls back to legacy multidex.
pub fn dexing_mode(multidex_enabled: bool, min_sdk: u32, native_supported: bool) -> DexingMode {
    match multidex_enabled {
        false => DexingMode::MonoDex,
        true if min_sdk >= NATIVE_MULTIDEX_MIN_SDK && native_supported => {
            DexingMode::NativeMultidex
        }
        true => DexingMode::LegacyMultidex,
    }
}

/// Whether libraries are dexed one by one ahead of the final merge. The
/// build option wins over the project setting; minified code is always
/// dexed as a whole.
pub fn pre_dex_libraries(option: Option<bool>, project: bool, minify_enabled: bool) -> bool {
    option.unwrap_or(project) && !minify_enabled
}
