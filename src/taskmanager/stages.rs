use std::sync::Arc;

use camino::Utf8PathBuf;

use super::{
    ASSEMBLE, ASSEMBLE_ANDROID_TEST, CONNECTED_ANDROID_TEST, DEVICE_ANDROID_TEST,
    EXTRACT_PROGUARD_FILES, GROUP_BUILD, GROUP_INSTALL, GROUP_REPORTING, GROUP_VERIFICATION,
    MOCKABLE_ANDROID_JAR, PRE_BUILD, TEST, TaskManager, UNINSTALL_ALL, dexing_mode,
    pre_dex_libraries, variant_task,
};
use crate::cache::FD_JARS;
use crate::core::{camel_case, capitalize};
use crate::dependency::{NodeType, ResolvedDependencies};
use crate::error::{DroidGraphError, TaskError};
use crate::issue::IssueReporter;
use crate::task::{TaskFactory, TaskHandle, TaskSpec};
use crate::transform::{
    CONTENT_CLASS, CONTENT_DEX, CONTENT_JARS, CONTENT_NATIVE_LIBS, CONTENT_RESOURCES, ContentType,
    SCOPE_FULL_PROJECT, SCOPE_PROJECT, Scope, Stream, StreamLocation, ToolTransform,
};
use crate::variant::{
    PackagingStrategy, PreBuildPolicy, ScopeBuilder, Slot, VariantScope, VariantType,
};

impl TaskManager {
    pub(super) fn create_anchor_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
        tested: Option<&VariantScope>,
    ) -> Result<(), TaskError> {
        let kind = scope.config().variant_type;

        let assemble = variant_task(
            tasks,
            scope,
            "assemble",
            "",
            TaskSpec::anchor()
                .group(GROUP_BUILD)
                .description(format!("Assembles all {} builds.", scope.name())),
        )?;
        match kind {
            VariantType::AndroidTest => {
                let all = tasks.get(ASSEMBLE_ANDROID_TEST)?;
                tasks.depends_on(all, &[assemble])?;
            }
            VariantType::UnitTest => {}
            _ => {
                let all = tasks.get(ASSEMBLE)?;
                tasks.depends_on(all, &[assemble])?;
            }
        }
        scope.set(Slot::Assemble, assemble)?;

        let pre_build = variant_task(tasks, scope, "pre", "Build", TaskSpec::anchor())?;
        let global = tasks.get(PRE_BUILD)?;
        tasks.depends_on(pre_build, &[global])?;

        if scope.config().is_minify_enabled() {
            let extract = tasks.get(EXTRACT_PROGUARD_FILES)?;
            tasks.depends_on(pre_build, &[extract])?;
        }

        if kind.capabilities().pre_build == PreBuildPolicy::WithTestedVariant {
            let tested_prepare = tested.and_then(|t| t.task(Slot::PrepareDependencies));
            tasks.optional_depends_on(pre_build, tested_prepare)?;
        }
        scope.set(Slot::PreBuild, pre_build)?;

        for (slot, noun) in [
            (Slot::SourceGen, "Sources"),
            (Slot::ResourceGen, "Resources"),
            (Slot::AssetGen, "Assets"),
        ] {
            let task = variant_task(tasks, scope, "generate", noun, TaskSpec::anchor())?;
            tasks.depends_on(task, &[pre_build])?;
            scope.set(slot, task)?;
        }

        let spec = TaskSpec::anchor().group(GROUP_BUILD);
        let compile = variant_task(tasks, scope, "compile", "Sources", spec)?;
        scope.set(Slot::Compile, compile)?;

        if scope.config().is_test_coverage_enabled() {
            let report = variant_task(
                tasks,
                scope,
                "create",
                "CoverageReport",
                TaskSpec::tool("jacoco-report")
                    .group(GROUP_REPORTING)
                    .description(format!(
                        "Creates test coverage reports for the {} variant.",
                        scope.name()
                    ))
                    .output(
                        scope
                            .build_dir()
                            .join("reports/coverage")
                            .join(scope.config().dir_name()),
                    ),
            )?;
            scope.set(Slot::CoverageReport, report)?;
        }

        Ok(())
    }

    pub(super) fn create_dependency_tasks(
        &mut self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
        dependencies: Arc<ResolvedDependencies>,
        tested: Option<&VariantScope>,
    ) -> Result<(), TaskError> {
        let pre_build = scope.require(Slot::PreBuild)?;

        let check_manifest = variant_task(
            tasks,
            scope,
            "check",
            "Manifest",
            TaskSpec::tool("check-manifest").input("src/main/AndroidManifest.xml"),
        )?;
        tasks.depends_on(check_manifest, &[pre_build])?;
        scope.set(Slot::CheckManifest, check_manifest)?;

        let spec = TaskSpec::tool("check-dependencies");
        let prepare = variant_task(tasks, scope, "prepare", "Dependencies", spec)?;
        tasks.depends_on(prepare, &[pre_build])?;

        let prepared = self
            .prepare_libraries
            .wire_variant(tasks, &dependencies, prepare, pre_build)?;
        tracing::debug!(variant = scope.name(), libraries = prepared.len(), "wired prepare tasks");

        scope.set(Slot::PrepareDependencies, prepare)?;

        add_dependency_streams(scope, &dependencies, prepare, tested);
        scope.set_dependencies(dependencies)?;

        Ok(())
    }

    pub(super) fn create_source_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
    ) -> Result<(), TaskError> {
        let kind = scope.config().variant_type;
        let caps = kind.capabilities();

        let prepare = scope.require(Slot::PrepareDependencies)?;
        let pre_build = scope.require(Slot::PreBuild)?;
        let source_gen = scope.require(Slot::SourceGen)?;
        let res_gen = scope.require(Slot::ResourceGen)?;
        let asset_gen = scope.require(Slot::AssetGen)?;

        let java_res_dir = scope.intermediate("javaResources");
        let java_res = variant_task(
            tasks,
            scope,
            "process",
            "JavaRes",
            TaskSpec::tool("java-res-processor")
                .input("src/main/resources")
                .output(java_res_dir.clone()),
        )?;
        tasks.depends_on(java_res, &[prepare])?;
        scope.set(Slot::ProcessJavaRes, java_res)?;
        scope.transforms_mut().add_stream(
            Stream::new(
                "java-res",
                CONTENT_RESOURCES,
                SCOPE_PROJECT,
                StreamLocation::Folder(java_res_dir),
            )
            .produced_by(java_res),
        );

        // Unit tests run against the resources of the tested variant.
        if kind == VariantType::UnitTest {
            return Ok(());
        }

        let check_manifest = scope.require(Slot::CheckManifest)?;
        let manifest = variant_task(
            tasks,
            scope,
            "process",
            "Manifest",
            TaskSpec::tool("manifest-merger")
                .input("src/main/AndroidManifest.xml")
                .output(scope.intermediate("manifests/full").join("AndroidManifest.xml")),
        )?;
        tasks.depends_on(manifest, &[prepare, check_manifest])?;
        scope.set(Slot::ProcessManifest, manifest)?;

        let res_values = variant_task(
            tasks,
            scope,
            "generate",
            "ResValues",
            TaskSpec::tool("res-values-generator").output(scope.generated("res/resValues")),
        )?;
        tasks.depends_on(res_values, &[prepare])?;
        tasks.depends_on(res_gen, &[res_values])?;
        scope.set(Slot::ResValues, res_values)?;

        let renderscript = variant_task(
            tasks,
            scope,
            "compile",
            "Renderscript",
            TaskSpec::tool("llvm-rs-cc")
                .input("src/main/rs")
                .output(scope.generated("source/rs")),
        )?;
        tasks.depends_on(renderscript, &[prepare])?;
        tasks.depends_on(source_gen, &[renderscript])?;
        tasks.depends_on(res_gen, &[renderscript])?;
        scope.set(Slot::Renderscript, renderscript)?;

        // The big merge links against every dependency; a library also merges
        // its own resources alone for its bundle.
        let mut spec = TaskSpec::tool("resource-merger").output(scope.intermediate("res/merged"));
        spec.inputs = res_inputs(scope, SCOPE_FULL_PROJECT);
        let merge_resources = variant_task(tasks, scope, "merge", "Resources", spec)?;
        tasks.depends_on(merge_resources, &[res_gen, prepare])?;
        scope.set(Slot::MergeResources, merge_resources)?;

        if caps.packaging == PackagingStrategy::LibraryBundle {
            let mut spec =
                TaskSpec::tool("resource-merger").output(scope.intermediate("packagedRes"));
            spec.inputs = res_inputs(scope, caps.res_merging_scopes);
            let package_resources = variant_task(tasks, scope, "package", "Resources", spec)?;
            tasks.depends_on(package_resources, &[res_gen, prepare])?;
            scope.set(Slot::PackageResources, package_resources)?;
        }

        let shaders = variant_task(
            tasks,
            scope,
            "compile",
            "Shaders",
            TaskSpec::tool("glslc")
                .input("src/main/shaders")
                .output(scope.intermediate("shaders")),
        )?;
        tasks.depends_on(shaders, &[prepare])?;
        tasks.depends_on(asset_gen, &[shaders])?;
        scope.set(Slot::Shaders, shaders)?;

        let merge_assets = variant_task(
            tasks,
            scope,
            "merge",
            "Assets",
            TaskSpec::tool("asset-merger")
                .input("src/main/assets")
                .output(scope.intermediate("assets")),
        )?;
        tasks.depends_on(merge_assets, &[asset_gen, prepare])?;
        scope.set(Slot::MergeAssets, merge_assets)?;

        let build_config = variant_task(
            tasks,
            scope,
            "generate",
            "BuildConfig",
            TaskSpec::tool("buildconfig-generator").output(scope.generated("source/buildConfig")),
        )?;
        tasks.depends_on(build_config, &[check_manifest])?;
        tasks.depends_on(source_gen, &[build_config])?;
        scope.set(Slot::BuildConfig, build_config)?;

        let process_resources = variant_task(
            tasks,
            scope,
            "process",
            "Resources",
            TaskSpec::tool("aapt").output(
                scope
                    .intermediate("res")
                    .join(format!("resources-{}.ap_", scope.config().base_name())),
            ),
        )?;
        tasks.depends_on(process_resources, &[manifest, merge_resources, merge_assets])?;
        tasks.depends_on(source_gen, &[process_resources])?;
        scope.set(Slot::ProcessResources, process_resources)?;

        let aidl = variant_task(
            tasks,
            scope,
            "compile",
            "Aidl",
            TaskSpec::tool("aidl")
                .input("src/main/aidl")
                .output(scope.generated("source/aidl")),
        )?;
        tasks.depends_on(aidl, &[prepare])?;
        tasks.depends_on(source_gen, &[aidl])?;
        scope.set(Slot::Aidl, aidl)?;

        let mut native_build = None;
        if self.external_native_build {
            let spec = TaskSpec::tool("cmake-json-generator");
            let json = variant_task(tasks, scope, "generateJsonModel", "", spec)?;
            tasks.depends_on(json, &[pre_build])?;

            let native_dir = scope.intermediate("cmake");
            let build = variant_task(
                tasks,
                scope,
                "externalNativeBuild",
                "",
                TaskSpec::tool("cmake").output(native_dir.clone()),
            )?;
            tasks.depends_on(build, &[json])?;
            scope.set(Slot::ExternalNativeBuild, build)?;
            scope.transforms_mut().add_stream(
                Stream::new(
                    "external-native-build",
                    CONTENT_NATIVE_LIBS,
                    SCOPE_PROJECT,
                    StreamLocation::Folder(native_dir),
                )
                .produced_by(build),
            );
            native_build = Some(build);
        }

        let jni_dir = scope.intermediate("jniLibs");
        let merge_jni = variant_task(
            tasks,
            scope,
            "merge",
            "JniLibFolders",
            TaskSpec::tool("jni-merger")
                .input("src/main/jniLibs")
                .output(jni_dir.clone()),
        )?;
        tasks.depends_on(merge_jni, &[prepare])?;
        tasks.optional_depends_on(merge_jni, native_build)?;
        scope.set(Slot::MergeJniLibs, merge_jni)?;
        scope.transforms_mut().add_stream(
            Stream::new(
                "merged-jni-libs",
                CONTENT_NATIVE_LIBS,
                SCOPE_PROJECT,
                StreamLocation::Folder(jni_dir),
            )
            .produced_by(merge_jni),
        );

        Ok(())
    }

    pub(super) fn create_compile_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
        tested: Option<&VariantScope>,
    ) -> Result<(), TaskError> {
        let prepare = scope.require(Slot::PrepareDependencies)?;
        let source_gen = scope.require(Slot::SourceGen)?;
        let compile_anchor = scope.require(Slot::Compile)?;

        let (slot, noun, tool) = match scope.config().jack_enabled {
            true => (Slot::Jack, "JavaWithJack", "jack"),
            false => (Slot::Javac, "JavaWithJavac", "javac"),
        };

        let output = match slot {
            Slot::Jack => scope.intermediate("dex"),
            _ => scope.intermediate("classes"),
        };

        let compile = variant_task(
            tasks,
            scope,
            "compile",
            noun,
            TaskSpec::tool(tool)
                .input("src/main/java")
                .output(output.clone()),
        )?;
        tasks.depends_on(compile, &[prepare, source_gen])?;
        let tested_compile = tested.and_then(|t| t.task(Slot::Javac).or(t.task(Slot::Jack)));
        tasks.optional_depends_on(compile, tested_compile)?;
        tasks.depends_on(compile_anchor, &[compile])?;
        scope.set(slot, compile)?;

        let (name, content) = match slot {
            Slot::Jack => ("jack-output", CONTENT_DEX),
            _ => ("javac-output", CONTENT_CLASS),
        };
        let stream = Stream::new(name, content, SCOPE_PROJECT, StreamLocation::Folder(output));
        scope.transforms_mut().add_stream(stream.produced_by(compile));

        Ok(())
    }

    pub(super) fn create_post_compile_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        issues: &mut IssueReporter,
        scope: &mut ScopeBuilder,
    ) -> Result<(), DroidGraphError> {
        let config = scope.config().clone();
        let caps = config.variant_type.capabilities();

        if config.variant_type == VariantType::UnitTest {
            return Ok(());
        }

        // Libraries ship classes, not dex: only custom transforms run.
        if !caps.is_packaged {
            return self.add_custom_transforms(tasks, issues, scope);
        }

        let allowed = caps.allowed_transform_scopes;

        if config.is_test_coverage_enabled() {
            let jacoco = ToolTransform::new("jacoco", "jacoco")
                .with_input_types(CONTENT_CLASS)
                .with_scopes(SCOPE_PROJECT);
            let added = scope.transforms_mut().add_transform(tasks, issues, Arc::new(jacoco))?;
            if let Some(task) = added {
                scope.set(Slot::Jacoco, task)?;
            }
        }

        let merge_java_res = ToolTransform::new("mergeJavaRes", "java-res-merger")
            .with_input_types(CONTENT_RESOURCES)
            .with_scopes(allowed);
        let added = scope.transforms_mut().add_transform(tasks, issues, Arc::new(merge_java_res))?;
        if let Some(task) = added {
            scope.set(Slot::MergeJavaRes, task)?;
        }

        self.add_custom_transforms(tasks, issues, scope)?;

        if config.is_minify_enabled() {
            let shrinker = match config.build_type.use_proguard {
                true => ToolTransform::new("proguard", "proguard"),
                false => ToolTransform::new("newClassShrinker", "class-shrinker"),
            };
            let shrinker = config
                .proguard_files
                .iter()
                .fold(shrinker, |t, file| t.secondary_file(file.clone()))
                .with_input_types(CONTENT_JARS)
                .with_scopes(allowed)
                .with_output_scopes(SCOPE_PROJECT)
                .with_referenced_scopes(&[Scope::ProvidedOnly]);

            let added = scope.transforms_mut().add_transform(tasks, issues, Arc::new(shrinker))?;
            if let Some(task) = added {
                scope.set(Slot::Obfuscation, task)?;
            }

            if config.is_shrink_resources() {
                let process_resources = scope.require(Slot::ProcessResources)?;
                let shrink = ToolTransform::new("shrinkRes", "resource-shrinker")
                    .with_input_types(CONTENT_CLASS)
                    .with_referenced_scopes(SCOPE_PROJECT);

                let added = scope.transforms_mut().add_transform(tasks, issues, Arc::new(shrink))?;
                if let Some(task) = added {
                    tasks.depends_on(task, &[process_resources])?;
                    scope.set(Slot::ShrinkResources, task)?;
                }
            }
        }

        // Jack already produced dex files.
        if config.jack_enabled {
            return Ok(());
        }

        let mode = dexing_mode(
            config.multidex_enabled,
            config.min_sdk,
            self.options.native_multidex_supported,
        );
        let pre_dex = pre_dex_libraries(
            self.options.pre_dex_libraries,
            self.pre_dex_default,
            config.is_minify_enabled(),
        );
        tracing::debug!(variant = scope.name(), ?mode, pre_dex, "dexing");

        let main_dex_list = scope.intermediate("multi-dex").join("maindexlist.txt");
        let mut main_dex_task = None;

        if mode.needs_main_dex_list() {
            // The list is computed over a single jar.
            if !config.is_minify_enabled() {
                let merge = ToolTransform::new("jarMerging", "jar-merger")
                    .with_input_types(CONTENT_CLASS)
                    .with_scopes(allowed)
                    .with_output_scopes(SCOPE_PROJECT);
                scope.transforms_mut().add_transform(tasks, issues, Arc::new(merge))?;
            }

            let manifest = scope.require(Slot::ProcessManifest)?;
            let list = ToolTransform::new("multidexlist", "mainDexClasses")
                .with_input_types(CONTENT_CLASS)
                .with_referenced_scopes(allowed)
                .arg("--output-list")
                .arg(main_dex_list.as_str());

            let added = scope.transforms_mut().add_transform(tasks, issues, Arc::new(list))?;
            if let Some(task) = added {
                tasks.depends_on(task, &[manifest])?;
                scope.set(Slot::MultidexMainList, task)?;
                main_dex_task = Some(task);
            }
        }

        let mut dex = ToolTransform::new("dex", "dx")
            .with_input_types(CONTENT_CLASS)
            .with_output_types(CONTENT_DEX)
            .with_scopes(allowed);
        if mode.is_multidex() {
            dex = dex.arg("--multi-dex");
        }
        if mode.needs_main_dex_list() {
            dex = dex
                .arg("--main-dex-list")
                .arg(main_dex_list.as_str())
                .secondary_file(main_dex_list.clone());
        }
        if pre_dex {
            dex = dex.arg("--pre-dex").incremental(true);
        }

        if let Some(task) = scope.transforms_mut().add_transform(tasks, issues, Arc::new(dex))? {
            tasks.optional_depends_on(task, main_dex_task)?;
            scope.set(Slot::Dex, task)?;
        }

        Ok(())
    }

    fn add_custom_transforms(
        &self,
        tasks: &mut dyn TaskFactory,
        issues: &mut IssueReporter,
        scope: &mut ScopeBuilder,
    ) -> Result<(), DroidGraphError> {
        let assemble = scope.require(Slot::Assemble)?;

        for transform in &self.transforms {
            // Nothing consumes the output of a transform that only reads its
            // inputs, so assemble pulls it in.
            let read_only = transform.scopes().is_empty();

            let task = scope
                .transforms_mut()
                .add_transform(tasks, issues, transform.clone())?;

            if let (Some(task), true) = (task, read_only) {
                tasks.depends_on(assemble, &[task])?;
            }
        }

        Ok(())
    }

    pub(super) fn create_packaging_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
    ) -> Result<(), TaskError> {
        let config = scope.config().clone();
        let assemble = scope.require(Slot::Assemble)?;
        let compile = scope.get(Slot::Javac)?.or(scope.get(Slot::Jack)?);
        let base = format!("{}-{}", self.project_name, config.base_name());

        let output = match config.variant_type.capabilities().packaging {
            PackagingStrategy::SignedApk
            | PackagingStrategy::FeatureSplit
            | PackagingStrategy::TestApk => {
                let package = self.create_apk_tasks(tasks, scope, &base, compile)?;

                let build_info = variant_task(
                    tasks,
                    scope,
                    "write",
                    "BuildInfo",
                    TaskSpec::tool("build-info-writer")
                        .output(scope.intermediate("build-info").join("build-info.xml")),
                )?;
                // Records what was built even when packaging fails.
                tasks.must_run_after(build_info, &[package])?;
                tasks.depends_on(assemble, &[build_info])?;
                scope.set(Slot::BuildInfo, build_info)?;

                Some(package)
            }
            PackagingStrategy::LibraryBundle => {
                let mut inputs = vec![
                    scope.get(Slot::PackageResources)?,
                    scope.get(Slot::ProcessResources)?,
                    scope.get(Slot::ProcessManifest)?,
                    scope.get(Slot::MergeAssets)?,
                    compile,
                ];

                if scope.dependencies().is_some_and(|d| d.annotations_present) {
                    let extract = variant_task(
                        tasks,
                        scope,
                        "extract",
                        "Annotations",
                        TaskSpec::tool("annotation-extractor")
                            .output(scope.intermediate("annotations").join("annotations.zip")),
                    )?;
                    tasks.optional_depends_on(extract, compile)?;
                    inputs.push(Some(extract));
                }

                let bundle = variant_task(
                    tasks,
                    scope,
                    "bundle",
                    "",
                    TaskSpec::tool("zip").output(scope.output("aar", &format!("{base}.aar"))),
                )?;
                let types = [ContentType::Classes, ContentType::Resources, ContentType::NativeLibs];
                self.depend_on_pipeline(tasks, scope, bundle, inputs, &types)?;
                scope.set(Slot::Bundle, bundle)?;

                Some(bundle)
            }
            PackagingStrategy::AtomBundle => {
                let inputs = vec![
                    scope.get(Slot::ProcessResources)?,
                    scope.get(Slot::MergeAssets)?,
                    compile,
                ];

                let bundle = variant_task(
                    tasks,
                    scope,
                    "bundle",
                    "Atom",
                    TaskSpec::tool("zip")
                        .output(scope.output("atombundle", &format!("{base}.atombundle"))),
                )?;
                let types = [ContentType::Dex, ContentType::Resources, ContentType::NativeLibs];
                self.depend_on_pipeline(tasks, scope, bundle, inputs, &types)?;
                scope.set(Slot::Bundle, bundle)?;

                Some(bundle)
            }
            PackagingStrategy::InstantAppBundle => {
                let inputs = vec![
                    scope.get(Slot::PrepareDependencies)?,
                    scope.get(Slot::ProcessManifest)?,
                ];

                let bundle = variant_task(
                    tasks,
                    scope,
                    "package",
                    "InstantAppBundle",
                    TaskSpec::tool("zip").output(scope.output("apk", &format!("{base}.zip"))),
                )?;
                self.depend_on_pipeline(tasks, scope, bundle, inputs, &[])?;
                scope.set(Slot::Bundle, bundle)?;

                Some(bundle)
            }
            PackagingStrategy::None => None,
        };

        if let Some(output) = output {
            tasks.depends_on(assemble, &[output])?;
        }

        Ok(())
    }

    /// `package<V>`, one split per ABI with pure splits, and the signing
    /// check when the variant is signed.
    fn create_apk_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
        base: &str,
        compile: Option<TaskHandle>,
    ) -> Result<TaskHandle, TaskError> {
        let config = scope.config().clone();
        let signed = config.is_signed();

        let validate = match (&config.signing_config, signed) {
            (Some(signing), true) => {
                let mut spec = TaskSpec::tool("validate-signing");
                if let Some(store) = &signing.store_file {
                    spec = spec.input(store.clone());
                }
                let task = variant_task(tasks, scope, "validateSigning", "", spec)?;
                scope.set(Slot::ValidateSigning, task)?;
                Some(task)
            }
            _ => None,
        };

        let resources = match scope.get(Slot::ShrinkResources)? {
            Some(task) => Some(task),
            None => scope.get(Slot::ProcessResources)?,
        };

        let file = match signed {
            true => format!("{base}.apk"),
            false => format!("{base}-unsigned.apk"),
        };

        let package = variant_task(
            tasks,
            scope,
            "package",
            "",
            TaskSpec::tool("apkbuilder")
                .description(format!("Packages the {} APK.", scope.name()))
                .output(scope.output("apk", &file)),
        )?;
        let inputs = vec![resources, scope.get(Slot::MergeAssets)?, compile, validate];
        self.depend_on_pipeline(
            tasks,
            scope,
            package,
            inputs,
            &[ContentType::Dex, ContentType::Resources, ContentType::NativeLibs],
        )?;
        scope.set(Slot::Package, package)?;

        if self.pure_splits && !config.abi_filters.is_empty() {
            let assemble = scope.require(Slot::Assemble)?;
            let mut splits = Vec::new();

            for abi in &config.abi_filters {
                let name = format!("package{}Split{}", capitalize(scope.name()), camel_case(abi));
                let split = tasks.register(
                    &name,
                    TaskSpec::tool("apkbuilder")
                        .variant(scope.name())
                        .output(scope.output("apk", &format!("{base}_{abi}.apk"))),
                )?;
                let inputs = vec![resources, validate];
                self.depend_on_pipeline(tasks, scope, split, inputs, &[ContentType::NativeLibs])?;
                scope.add_split_package(split)?;
                splits.push(split);
            }

            let spec = TaskSpec::tool("zipalign");
            let zip_align = variant_task(tasks, scope, "zipAlign", "SplitPackages", spec)?;
            tasks.depends_on(zip_align, &splits)?;
            tasks.depends_on(assemble, &[zip_align])?;
            scope.set(Slot::ZipAlign, zip_align)?;
        }

        Ok(package)
    }

    /// Makes `task` depend on `inputs` and on the producers of every stream
    /// left in the pipeline carrying one of `content_types`.
    fn depend_on_pipeline(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &ScopeBuilder,
        task: TaskHandle,
        inputs: Vec<Option<TaskHandle>>,
        content_types: &[ContentType],
    ) -> Result<(), TaskError> {
        let mut all: Vec<TaskHandle> = inputs.into_iter().flatten().collect();
        for &content_type in content_types {
            all.extend(scope.transforms().pipeline_producers(content_type));
        }
        all.sort_unstable();
        all.dedup();

        tasks.depends_on(task, &all)
    }

    pub(super) fn create_finish_tasks(
        &self,
        tasks: &mut dyn TaskFactory,
        scope: &mut ScopeBuilder,
        tested: Option<&VariantScope>,
    ) -> Result<(), TaskError> {
        let config = scope.config().clone();
        let kind = config.variant_type;
        let package = scope.get(Slot::Package)?;
        let compile = scope.get(Slot::Javac)?.or(scope.get(Slot::Jack)?);

        if kind.is_apk() {
            if let (Some(package), true) = (package, config.is_signed()) {
                let install = variant_task(
                    tasks,
                    scope,
                    "install",
                    "",
                    TaskSpec::tool("adb-install")
                        .group(GROUP_INSTALL)
                        .description(format!("Installs the {} build.", scope.name())),
                )?;
                tasks.depends_on(install, &[package])?;
                scope.set(Slot::Install, install)?;
            }

            let uninstall = variant_task(
                tasks,
                scope,
                "uninstall",
                "",
                TaskSpec::tool("adb-uninstall")
                    .group(GROUP_INSTALL)
                    .description(format!("Uninstalls the {} build.", scope.name())),
            )?;
            let all = tasks.get(UNINSTALL_ALL)?;
            tasks.depends_on(all, &[uninstall])?;
            scope.set(Slot::Uninstall, uninstall)?;
        }

        if !kind.is_for_testing() {
            let lint = variant_task(
                tasks,
                scope,
                "lint",
                "",
                TaskSpec::tool("lint")
                    .group(GROUP_VERIFICATION)
                    .description(format!("Runs lint on the {} build.", scope.name())),
            )?;
            tasks.optional_depends_on(lint, compile)?;
            scope.set(Slot::Lint, lint)?;

            let signed_apk = kind.capabilities().packaging == PackagingStrategy::SignedApk;
            if !config.is_debuggable() && signed_apk {
                let vital = variant_task(tasks, scope, "lintVital", "", TaskSpec::tool("lint"))?;
                tasks.optional_depends_on(vital, compile)?;
                let assemble = scope.require(Slot::Assemble)?;
                tasks.depends_on(assemble, &[vital])?;
                scope.set(Slot::LintVital, vital)?;
            }
        }

        match kind {
            VariantType::AndroidTest => {
                let tested_package = tested.and_then(|t| t.task(Slot::Package));

                let connected = variant_task(
                    tasks,
                    scope,
                    "connected",
                    "",
                    TaskSpec::tool("instrumentation-runner")
                        .group(GROUP_VERIFICATION)
                        .description("Installs and runs the tests on connected devices.")
                        .output(scope.build_dir().join("outputs/androidTest-results/connected")),
                )?;
                tasks.optional_depends_on(connected, package)?;
                tasks.optional_depends_on(connected, tested_package)?;
                let all = tasks.get(CONNECTED_ANDROID_TEST)?;
                tasks.depends_on(all, &[connected])?;

                let device = variant_task(
                    tasks,
                    scope,
                    "device",
                    "",
                    TaskSpec::tool("device-provider")
                        .group(GROUP_VERIFICATION)
                        .description("Installs and runs the tests using Device Providers."),
                )?;
                tasks.optional_depends_on(device, package)?;
                tasks.optional_depends_on(device, tested_package)?;
                let all = tasks.get(DEVICE_ANDROID_TEST)?;
                tasks.depends_on(all, &[device])?;

                if let Some(report) = tested.and_then(|t| t.task(Slot::CoverageReport)) {
                    tasks.depends_on(report, &[connected])?;
                }

                scope.set(Slot::Test, connected)?;
            }
            VariantType::UnitTest => {
                let test = variant_task(
                    tasks,
                    scope,
                    "test",
                    "",
                    TaskSpec::tool("junit")
                        .group(GROUP_VERIFICATION)
                        .description(format!("Run unit tests for the {} build.", scope.name()))
                        .output(scope.build_dir().join("test-results").join(scope.name())),
                )?;
                let mockable = tasks.get(MOCKABLE_ANDROID_JAR)?;
                tasks.depends_on(test, &[mockable])?;
                tasks.optional_depends_on(test, compile)?;
                tasks.optional_depends_on(test, tested.and_then(|t| t.task(Slot::Javac)))?;
                let all = tasks.get(TEST)?;
                tasks.depends_on(all, &[test])?;

                scope.set(Slot::Test, test)?;
            }
            _ => {}
        }

        Ok(())
    }
}

/// Resource folders merged for the given scopes, lowest priority first.
fn res_inputs(scope: &ScopeBuilder, scopes: &[Scope]) -> Vec<Utf8PathBuf> {
    let mut inputs = Vec::new();

    if let Some(resolved) = scope.dependencies() {
        for node in resolved.package.packaged().iter().rev() {
            if node.node_type != NodeType::Android {
                continue;
            }

            let origin = match node.project {
                Some(_) => Scope::SubProjects,
                None => Scope::ExternalLibraries,
            };

            if let (Some(folder), true) = (&node.folder, scopes.contains(&origin)) {
                inputs.push(folder.join("res"));
            }
        }
    }

    if scopes.contains(&Scope::Project) {
        inputs.push(Utf8PathBuf::from("src/main/res"));
    }

    inputs
}

/// Registers the streams coming from dependencies: the jars and native
/// libraries of external and sub-project libraries, local jars, compile-only
/// classes and, for a test variant, the classes of the tested variant.
fn add_dependency_streams(
    scope: &mut ScopeBuilder,
    resolved: &ResolvedDependencies,
    prepare: TaskHandle,
    tested: Option<&VariantScope>,
) {
    let mut external = (Vec::new(), Vec::new());
    let mut sub_projects = (Vec::new(), Vec::new());

    for node in resolved.package.packaged() {
        if resolved.package.local_jars.iter().any(|jar| Arc::ptr_eq(jar, &node)) {
            continue;
        }

        let (jars, native) = match node.project {
            Some(_) => (&mut sub_projects.0, &mut sub_projects.1),
            None => (&mut external.0, &mut external.1),
        };

        match node.node_type {
            NodeType::Java => jars.push(node.artifact.clone()),
            NodeType::Android | NodeType::Atom => {
                let folder = node
                    .folder
                    .clone()
                    .unwrap_or_else(|| node.artifact.with_extension(""));
                jars.push(folder.join(FD_JARS).join("classes.jar"));
                native.push(folder.join("jni"));
            }
        }
    }

    let local: Vec<Utf8PathBuf> = resolved
        .package
        .local_jars
        .iter()
        .filter(|jar| !jar.provided && !jar.is_skipped())
        .map(|jar| jar.artifact.clone())
        .collect();

    let provided: Vec<Utf8PathBuf> = resolved
        .compile
        .all()
        .into_iter()
        .filter(|node| node.provided)
        .map(|node| match node.node_type {
            NodeType::Java => node.artifact.clone(),
            _ => node
                .folder
                .clone()
                .unwrap_or_else(|| node.artifact.with_extension(""))
                .join(FD_JARS)
                .join("classes.jar"),
        })
        .collect();

    let streams = [
        ("ext-libs", CONTENT_JARS, Scope::ExternalLibraries, external.0),
        ("ext-libs-native", CONTENT_NATIVE_LIBS, Scope::ExternalLibraries, external.1),
        ("sub-projects", CONTENT_JARS, Scope::SubProjects, sub_projects.0),
        ("sub-projects-native", CONTENT_NATIVE_LIBS, Scope::SubProjects, sub_projects.1),
        ("project-local-deps", CONTENT_JARS, Scope::ProjectLocalDeps, local),
        ("provided-classes", CONTENT_CLASS, Scope::ProvidedOnly, provided),
    ];

    for (name, types, origin, files) in streams {
        if files.is_empty() {
            continue;
        }
        scope.transforms_mut().add_stream(
            Stream::new(name, types, &[origin], StreamLocation::Files(files)).produced_by(prepare),
        );
    }

    if let (Some(tested), true) = (tested, scope.config().variant_type.is_for_testing()) {
        let stream = Stream::new(
            "tested-code-classes",
            CONTENT_CLASS,
            &[Scope::TestedCode],
            StreamLocation::Folder(tested.intermediate("classes")),
        )
        .produced_by_all(tested.task(Slot::Javac));
        scope.transforms_mut().add_stream(stream);
    }
}
