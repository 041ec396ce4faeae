// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::{
        config::{find_config_file, PythonPackaging},
        glob::evaluate_glob,
        packaging_rule::{
            resolve_python_packaging, PythonResourceAction, ResourceAction, ResourceLocation,
        },
        state::{BuildContext, PackagingState, PACKAGING_STATE_FILENAME},
    },
    crate::py_packaging::{
        bytecode::{has_dunder_file, BytecodeCompiler, CompileMode, PythonBytecodeCompiler},
        distribution::{
            resolve_python_distribution_archive, ExtensionModule, ParsedPythonDistribution,
            PythonDistributionLocation,
        },
        embedded_resource::{EmbeddedExtensionModule, EmbeddedPythonResources},
        pyembed::{derive_python_config, write_data_rs},
        resource::{
            packages_from_module_name, packages_from_module_names, AppRelativeResources,
            BuiltExtensionModule, BytecodeOptimizationLevel, PackagedModuleBytecode,
            PackagedModuleSource, PythonResource,
        },
    },
    anyhow::{anyhow, Context, Result},
    log::{info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        env,
        fs::{self, create_dir_all},
        io::{BufRead, BufReader},
        path::{Path, PathBuf},
    },
};

pub const EMBEDDED_RESOURCES_FILENAME: &str = "embedded_resources.json";

/// Extension modules that are known not to work when embedded for a target.
pub fn os_ignore_extensions(target_triple: &str) -> &'static [&'static str] {
    if target_triple.contains("-linux-") {
        // Linking issues.
        &["_crypt", "nis"]
    } else if target_triple.contains("-apple-") {
        // curses and readline have linking issues.
        &["_curses", "_curses_panel", "readline"]
    } else {
        &[]
    }
}

/// Represents resources to package with an application.
#[derive(Debug)]
pub struct PythonResources {
    /// Resources to be embedded in the binary.
    pub embedded: EmbeddedPythonResources,

    /// Resources to install in paths relative to the produced binary.
    pub app_relative: BTreeMap<String, AppRelativeResources>,

    /// Files that are read to resolve this data structure.
    pub read_files: Vec<PathBuf>,

    /// Path where to write license files.
    pub license_files_path: Option<String>,

    /// Embedded modules whose source references `__file__`.
    pub dunder_file_modules: BTreeSet<String>,
}

/// Read a file containing resource names, one per line.
///
/// Lines beginning with `#` and empty lines are ignored.
pub fn read_resource_names_file(path: &Path) -> Result<BTreeSet<String>> {
    let fh = fs::File::open(path)
        .with_context(|| format!("opening resource names file {}", path.display()))?;

    let mut res: BTreeSet<String> = BTreeSet::new();

    for line in BufReader::new(fh).lines() {
        let line = line?;

        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        res.insert(line);
    }

    Ok(res)
}

fn filter_btreemap<V>(m: &mut BTreeMap<String, V>, f: &BTreeSet<String>) {
    m.retain(|key, _| {
        if f.contains(key) {
            true
        } else {
            warn!("removing {}", key);
            false
        }
    });
}

struct BytecodeRequest {
    source: Vec<u8>,
    optimize_level: i32,
    is_package: bool,
}

fn compile_request(
    compiler: &mut dyn PythonBytecodeCompiler,
    name: &str,
    request: &BytecodeRequest,
    mode: CompileMode,
) -> Result<Vec<u8>> {
    let optimize = BytecodeOptimizationLevel::try_from(request.optimize_level as i64)?;

    compiler
        .compile(&request.source, name, optimize, mode)
        .with_context(|| format!("error compiling bytecode for {}", name))
}

/// Resolve the names listed by a `FilterInclude` rule.
fn resolve_filter_names(
    cwd: &Path,
    files: &[String],
    glob_files: &[String],
    read_files: &mut Vec<PathBuf>,
) -> Result<BTreeSet<String>> {
    let mut include_names = BTreeSet::new();

    for path in files {
        let path = cwd.join(path);

        include_names.extend(read_resource_names_file(&path)?);
        read_files.push(path);
    }

    for glob in glob_files {
        let mut new_names = BTreeSet::new();

        for path in evaluate_glob(cwd, glob)? {
            new_names.extend(read_resource_names_file(&path)?);
            read_files.push(path);
        }

        if new_names.is_empty() {
            return Err(anyhow!(
                "glob filter resolves to empty set; are you sure the paths are correct?"
            ));
        }

        include_names.extend(new_names);
    }

    Ok(include_names)
}

/// Resources selected by packaging rules, before post-processing.
///
/// Bytecode is only generated for the final set of modules, so requests
/// are accumulated until all rules have been applied.
#[derive(Default)]
struct ResourceAccumulator {
    embedded_extension_modules: BTreeMap<String, ExtensionModule>,
    embedded_sources: BTreeMap<String, PackagedModuleSource>,
    embedded_bytecode_requests: BTreeMap<String, BytecodeRequest>,
    embedded_resources: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    embedded_built_extension_modules: BTreeMap<String, BuiltExtensionModule>,
    app_relative: BTreeMap<String, AppRelativeResources>,
    app_relative_bytecode_requests: BTreeMap<String, BTreeMap<String, BytecodeRequest>>,
}

impl ResourceAccumulator {
    /// Apply a single resolved rule action.
    fn apply(&mut self, entry: PythonResourceAction, verbose_rule: bool) -> Result<()> {
        let log_add = |msg: String| {
            if verbose_rule {
                info!("{}", msg);
            } else {
                warn!("{}", msg);
            }
        };

        match (entry.action, entry.location, entry.resource) {
            (
                ResourceAction::Add,
                ResourceLocation::Embedded,
                PythonResource::ExtensionModule { name, module },
            ) => {
                warn!("adding embedded extension module: {}", name);
                self.embedded_extension_modules.insert(name, module);
            }
            (
                ResourceAction::Remove,
                ResourceLocation::Embedded,
                PythonResource::ExtensionModule { name, .. },
            ) => {
                warn!("removing embedded extension module: {}", name);
                self.embedded_extension_modules.remove(&name);
            }
            (
                ResourceAction::Add,
                ResourceLocation::AppRelative { .. },
                PythonResource::ExtensionModule { name, .. },
            ) => {
                return Err(anyhow!(
                    "extension module {} cannot be installed app-relative",
                    name
                ));
            }
            (
                ResourceAction::Add,
                ResourceLocation::Embedded,
                PythonResource::ModuleSource {
                    name,
                    source,
                    is_package,
                },
            ) => {
                log_add(format!("adding embedded module source: {}", name));
                self.embedded_sources.insert(name, PackagedModuleSource { source, is_package });
            }
            (
                ResourceAction::Add,
                ResourceLocation::AppRelative { path },
                PythonResource::ModuleSource {
                    name,
                    source,
                    is_package,
                },
            ) => {
                log_add(format!(
                    "adding app-relative module source to {}: {}",
                    path, name
                ));
                self.app_relative
                    .entry(path)
                    .or_default()
                    .module_sources
                    .insert(name, PackagedModuleSource { source, is_package });
            }
            (
                ResourceAction::Remove,
                ResourceLocation::Embedded,
                PythonResource::ModuleSource { name, .. },
            ) => {
                warn!("removing embedded module source: {}", name);
                self.embedded_sources.remove(&name);
            }
            (
                ResourceAction::Add,
                ResourceLocation::Embedded,
                PythonResource::ModuleBytecodeRequest {
                    name,
                    source,
                    optimize_level,
                    is_package,
                },
            ) => {
                log_add(format!("adding embedded module bytecode: {}", name));
                self.embedded_bytecode_requests.insert(
                    name,
                    BytecodeRequest {
                        source,
                        optimize_level,
                        is_package,
                    },
                );
            }
            (
                ResourceAction::Add,
                ResourceLocation::AppRelative { path },
                PythonResource::ModuleBytecodeRequest {
                    name,
                    source,
                    optimize_level,
                    is_package,
                },
            ) => {
                log_add(format!(
                    "adding app-relative module bytecode to {}: {}",
                    path, name
                ));
                self.app_relative_bytecode_requests
                    .entry(path)
                    .or_default()
                    .insert(
                        name,
                        BytecodeRequest {
                            source,
                            optimize_level,
                            is_package,
                        },
                    );
            }
            (
                ResourceAction::Remove,
                ResourceLocation::Embedded,
                PythonResource::ModuleBytecodeRequest { name, .. },
            ) => {
                warn!("removing embedded module bytecode: {}", name);
                self.embedded_bytecode_requests.remove(&name);
            }
            (
                ResourceAction::Add,
                ResourceLocation::Embedded,
                PythonResource::Resource {
                    package,
                    name,
                    data,
                },
            ) => {
                log_add(format!("adding embedded resource: {} / {}", package, name));
                self.embedded_resources
                    .entry(package)
                    .or_default()
                    .insert(name, data);
            }
            (
                ResourceAction::Add,
                ResourceLocation::AppRelative { path },
                PythonResource::Resource {
                    package,
                    name,
                    data,
                },
            ) => {
                log_add(format!(
                    "adding app-relative resource to {}: {} / {}",
                    path, package, name
                ));
                self.app_relative
                    .entry(path)
                    .or_default()
                    .resources
                    .entry(package)
                    .or_default()
                    .insert(name, data);
            }
            (
                ResourceAction::Remove,
                ResourceLocation::Embedded,
                PythonResource::Resource { package, name, .. },
            ) => {
                warn!("removing embedded resource: {} / {}", package, name);
                if let Some(entries) = self.embedded_resources.get_mut(&package) {
                    entries.remove(&name);
                }
            }
            (
                ResourceAction::Add,
                ResourceLocation::Embedded,
                PythonResource::BuiltExtensionModule(em),
            ) => {
                warn!("adding embedded built extension module: {}", em.name);
                self.embedded_built_extension_modules.insert(em.name.clone(), em);
            }
            (
                ResourceAction::Add,
                ResourceLocation::AppRelative { path },
                PythonResource::BuiltExtensionModule(em),
            ) => {
                warn!(
                    "adding app-relative built extension module {} to {}",
                    em.name, path
                );
                self.app_relative
                    .entry(path)
                    .or_default()
                    .extension_modules
                    .insert(em.name.clone(), em);
            }
            (
                ResourceAction::Remove,
                ResourceLocation::Embedded,
                PythonResource::BuiltExtensionModule(em),
            ) => {
                warn!("removing embedded built extension module {}", em.name);
                self.embedded_built_extension_modules.remove(&em.name);
            }
            (ResourceAction::Remove, ResourceLocation::AppRelative { path }, resource) => {
                return Err(anyhow!(
                    "cannot remove app-relative resource {} from {}",
                    resource.name(),
                    path
                ));
            }
        }

        Ok(())
    }

    /// Keep only resources whose names are in `include_names`.
    fn filter(&mut self, include_names: &BTreeSet<String>) {
        warn!("filtering embedded extension modules");
        filter_btreemap(&mut self.embedded_extension_modules, include_names);
        warn!("filtering embedded module sources");
        filter_btreemap(&mut self.embedded_sources, include_names);
        warn!("filtering embedded module bytecode");
        filter_btreemap(&mut self.embedded_bytecode_requests, include_names);
        warn!("filtering embedded resources");
        filter_btreemap(&mut self.embedded_resources, include_names);
        warn!("filtering embedded built extension modules");
        filter_btreemap(&mut self.embedded_built_extension_modules, include_names);

        warn!("filtering app-relative resources");
        for value in self.app_relative.values_mut() {
            filter_btreemap(&mut value.module_sources, include_names);
            filter_btreemap(&mut value.resources, include_names);
            filter_btreemap(&mut value.extension_modules, include_names);
        }
        for value in self.app_relative_bytecode_requests.values_mut() {
            filter_btreemap(value, include_names);
        }
    }
}

/// Resolves a series of packaging rules to a final set of resources to package.
pub fn resolve_python_resources(
    context: &BuildContext,
    dist: &ParsedPythonDistribution,
    compiler: &mut dyn PythonBytecodeCompiler,
) -> Result<PythonResources> {
    let cwd = &context.config_parent_path;

    let mut resources = ResourceAccumulator::default();

    let mut read_files: Vec<PathBuf> = Vec::new();
    let mut license_files_path = None;

    for packaging in &context.config.python_packaging {
        warn!("processing packaging rule: {}", packaging.rule_type());

        // The standard library is large. Only log its contents when asked.
        let verbose_rule = matches!(packaging, PythonPackaging::Stdlib(_));

        for entry in resolve_python_packaging(cwd, packaging, dist, context.verbose)? {
            resources.apply(entry, verbose_rule)?;
        }

        if let PythonPackaging::WriteLicenseFiles(rule) = packaging {
            license_files_path = Some(rule.path.clone());
        }

        if let PythonPackaging::FilterInclude(rule) = packaging {
            let include_names =
                resolve_filter_names(cwd, &rule.files, &rule.glob_files, &mut read_files)?;

            resources.filter(&include_names);
        }
    }

    let ResourceAccumulator {
        mut embedded_extension_modules,
        embedded_sources,
        mut embedded_bytecode_requests,
        mut embedded_resources,
        embedded_built_extension_modules,
        mut app_relative,
        app_relative_bytecode_requests,
    } = resources;

    // Namespace packages have no __init__ of their own.
    let mut missing_packages = BTreeSet::new();
    for name in embedded_bytecode_requests.keys() {
        for package in packages_from_module_name(name) {
            if !embedded_bytecode_requests.contains_key(&package) {
                missing_packages.insert(package);
            }
        }
    }

    for package in missing_packages {
        warn!("adding empty module for missing package {}", package);
        embedded_bytecode_requests.insert(
            package,
            BytecodeRequest {
                source: Vec::new(),
                optimize_level: 0,
                is_package: true,
            },
        );
    }

    // Required extension modules may have been filtered or never added.
    for (name, variants) in &dist.extension_modules {
        if let Some(em) = variants.first() {
            if (em.builtin_default || em.required) && !embedded_extension_modules.contains_key(name)
            {
                warn!("adding required embedded extension module {}", name);
                embedded_extension_modules.insert(name.clone(), em.clone());
            }
        }
    }

    for name in os_ignore_extensions(&context.target_triple) {
        if embedded_extension_modules.remove(*name).is_some() {
            warn!("removing extension module due to incompatibility: {}", name);
        }
    }

    let mut dunder_file_modules = BTreeSet::new();

    for (name, request) in &embedded_bytecode_requests {
        if has_dunder_file(&request.source) {
            warn!("warning: {} contains __file__", name);
            dunder_file_modules.insert(name.clone());
        }
    }

    if !dunder_file_modules.is_empty() {
        warn!(
            "__file__ was encountered in {} modules; __file__ is not set for modules \
             loaded from memory and this may create problems at run-time; consider \
             installing these modules with an app-relative install_location",
            dunder_file_modules.len()
        );
    }

    let mut embedded_bytecodes: BTreeMap<String, PackagedModuleBytecode> = BTreeMap::new();

    for (name, request) in &embedded_bytecode_requests {
        let bytecode = compile_request(compiler, name, request, CompileMode::Bytecode)?;

        embedded_bytecodes.insert(
            name.clone(),
            PackagedModuleBytecode {
                bytecode,
                is_package: request.is_package,
            },
        );
    }

    for (path, requests) in &app_relative_bytecode_requests {
        let app_relative = app_relative.entry(path.clone()).or_default();

        for (name, request) in requests {
            // App-relative bytecode is never mutated, so its hash is not verified.
            let bytecode = compile_request(compiler, name, request, CompileMode::PycUncheckedHash)?;

            app_relative.module_bytecodes.insert(
                name.clone(),
                PackagedModuleBytecode {
                    bytecode,
                    is_package: request.is_package,
                },
            );
        }
    }

    let mut all_embedded_modules = BTreeSet::new();
    let mut annotated_package_names = BTreeSet::new();

    for (name, source) in &embedded_sources {
        all_embedded_modules.insert(name.clone());

        if source.is_package {
            annotated_package_names.insert(name.clone());
        }
    }
    for (name, bytecode) in &embedded_bytecodes {
        all_embedded_modules.insert(name.clone());

        if bytecode.is_package {
            annotated_package_names.insert(name.clone());
        }
    }
    for (name, extension) in &embedded_built_extension_modules {
        all_embedded_modules.insert(name.clone());

        if extension.is_package {
            annotated_package_names.insert(name.clone());
        }
    }

    let derived_package_names = packages_from_module_names(all_embedded_modules.iter().cloned());

    let mut all_embedded_package_names = annotated_package_names;
    for package in derived_package_names {
        if !all_embedded_package_names.contains(&package) {
            warn!(
                "package {} not initially detected as such; is package detection buggy?",
                package
            );
            all_embedded_package_names.insert(package);
        }
    }

    // Resources of packages that aren't embedded can't be loaded.
    embedded_resources.retain(|package, values| {
        if all_embedded_package_names.contains(package) {
            true
        } else {
            warn!(
                "package {} does not exist; excluding resources: {:?}",
                package,
                values.keys()
            );
            false
        }
    });

    Ok(PythonResources {
        embedded: EmbeddedPythonResources {
            module_sources: embedded_sources,
            module_bytecodes: embedded_bytecodes,
            all_modules: all_embedded_modules,
            all_packages: all_embedded_package_names,
            resources: embedded_resources,
            extension_modules: embedded_extension_modules
                .iter()
                .map(|(name, em)| (name.clone(), EmbeddedExtensionModule::from(em)))
                .collect(),
            built_extension_modules: embedded_built_extension_modules,
        },
        app_relative,
        read_files,
        license_files_path,
        dunder_file_modules,
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

/// Install app-relative resources into `path` next to the application.
pub fn install_app_relative(
    context: &BuildContext,
    path: &str,
    app_relative: &AppRelativeResources,
    cache_tag: &str,
) -> Result<()> {
    let dest_path = context.app_path.join(path);

    create_dir_all(&dest_path)
        .with_context(|| format!("could not create app-relative path {}", dest_path.display()))?;

    warn!(
        "installing {} app-relative Python source modules to {}",
        app_relative.module_sources.len(),
        dest_path.display(),
    );

    for (module_name, module_source) in &app_relative.module_sources {
        // foo.bar -> foo/bar
        let mut module_path = dest_path.clone();
        module_path.extend(module_name.split('.'));

        // Packages need to get normalized to /__init__.py.
        if module_source.is_package {
            module_path.push("__init__");
        }

        module_path.set_extension("py");

        info!(
            "installing Python module {} to {}",
            module_name,
            module_path.display()
        );

        write_file(&module_path, &module_source.source)?;
    }

    warn!(
        "installing {} app-relative Python bytecode modules to {}",
        app_relative.module_bytecodes.len(),
        dest_path.display(),
    );

    for (module_name, module_bytecode) in &app_relative.module_bytecodes {
        let parts = module_name.split('.').collect::<Vec<_>>();

        // .pyc files go into a __pycache__ directory next to the module.
        let (parent_parts, file_stem) = if module_bytecode.is_package {
            (&parts[..], "__init__")
        } else {
            (&parts[0..parts.len() - 1], parts[parts.len() - 1])
        };

        let mut module_path = dest_path.clone();
        module_path.extend(parent_parts);
        module_path.push("__pycache__");
        module_path.push(format!("{}.{}.pyc", file_stem, cache_tag));

        info!(
            "installing Python module bytecode {} to {}",
            module_name,
            module_path.display()
        );

        write_file(&module_path, &module_bytecode.bytecode)?;
    }

    for (package, entries) in &app_relative.resources {
        warn!(
            "installing {} app-relative resource files to {}:{}",
            entries.len(),
            path,
            package,
        );

        for (name, data) in entries {
            // acme.sub -> acme/sub
            let mut resource_path = dest_path.clone();
            resource_path.extend(package.split('.'));
            resource_path.push(name);

            info!(
                "installing app-relative resource {}:{} to {}",
                package,
                name,
                resource_path.display()
            );

            write_file(&resource_path, data)?;
        }
    }

    for (name, em) in &app_relative.extension_modules {
        let mut module_path = dest_path.clone();
        module_path.extend(name.split('.'));

        if em.is_package {
            module_path.push("__init__");
        }

        let file_name = format!(
            "{}{}",
            module_path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            em.extension_file_suffix
        );
        module_path.set_file_name(file_name);

        info!(
            "installing extension module {} to {}",
            name,
            module_path.display()
        );

        write_file(&module_path, &em.data)?;
    }

    Ok(())
}

/// Package a built Rust project into its packaging directory.
///
/// This will delete all content in the application's package directory.
pub fn package_project(context: &BuildContext) -> Result<()> {
    warn!(
        "packaging application into {}",
        context.app_path.display()
    );

    if context.app_path.exists() {
        warn!("purging {}", context.app_path.display());
        remove_dir_all::remove_dir_all(&context.app_path)
            .with_context(|| format!("removing {}", context.app_path.display()))?;
    }

    create_dir_all(&context.app_path)
        .with_context(|| format!("creating {}", context.app_path.display()))?;

    warn!(
        "copying {} to {}",
        context.app_exe_target_path.display(),
        context.app_exe_path.display()
    );
    fs::copy(&context.app_exe_target_path, &context.app_exe_path)
        .context("failed to copy built application")?;

    warn!("resolving packaging state...");
    let state = context.get_packaging_state()?;

    if let Some(licenses_path) = &state.license_files_path {
        let licenses_path = if licenses_path.is_empty() {
            context.app_path.clone()
        } else {
            context.app_path.join(licenses_path)
        };

        for (name, lis) in &state.license_infos {
            for li in lis {
                let path = licenses_path.join(&li.license_filename);
                warn!("writing license for {} to {}", name, path.display());
                write_file(&path, li.license_text.as_bytes())?;
            }
        }
    }

    if !state.app_relative_resources.is_empty() {
        warn!(
            "installing resources into {} app-relative directories",
            state.app_relative_resources.len(),
        );
    }

    for (path, resources) in &state.app_relative_resources {
        install_app_relative(context, path, resources, &state.cache_tag)?;
    }

    warn!(
        "{} packaged into {}",
        context.app_name,
        context.app_path.display()
    );

    Ok(())
}

/// Files derived from processing a configuration.
#[derive(Clone, Debug)]
pub struct ProcessedConfig {
    /// Lines that can be emitted from Cargo build scripts.
    pub cargo_metadata: Vec<String>,

    /// Rust source code to construct a `PythonConfig`.
    pub python_config_rs: String,

    pub embedded_resources_path: PathBuf,

    pub data_rs_path: PathBuf,

    pub packaging_state_path: PathBuf,

    pub packaging_state: PackagingState,
}

/// Derive build artifacts from a configuration.
///
/// The Python distribution is fetched and parsed and its interpreter is
/// used to compile bytecode.
pub fn process_config(context: &BuildContext) -> Result<ProcessedConfig> {
    let config = &context.config;

    warn!("resolving Python distribution...");
    let python_distribution_path =
        resolve_python_distribution_archive(&config.python_distribution, &context.distributions_path)?;
    warn!(
        "Python distribution available at {}",
        python_distribution_path.display()
    );

    let dist = ParsedPythonDistribution::from_path(
        &python_distribution_path,
        &context.python_distribution_path,
    )?;

    warn!("distribution info: {:#?}", dist.as_minimal_info());

    let mut compiler = BytecodeCompiler::new(&dist.python_exe)?;

    process_config_with_distribution(context, &dist, &mut compiler)
}

/// Derive build artifacts from a configuration and a parsed distribution.
pub fn process_config_with_distribution(
    context: &BuildContext,
    dist: &ParsedPythonDistribution,
    compiler: &mut dyn PythonBytecodeCompiler,
) -> Result<ProcessedConfig> {
    let config = &context.config;
    let dest_dir = &context.artifacts_path;

    warn!("processing config file {}", config.config_path.display());

    let mut cargo_metadata: Vec<String> = vec![format!(
        "cargo:rerun-if-changed={}",
        config.config_path.display()
    )];

    create_dir_all(dest_dir).with_context(|| format!("creating {}", dest_dir.display()))?;

    if let PythonDistributionLocation::Local { local_path, .. } = &config.python_distribution {
        cargo_metadata.push(format!("cargo:rerun-if-changed={}", local_path));
    }

    warn!("resolving Python resources (modules, extensions, resource data, etc)...");
    let resources = resolve_python_resources(context, dist, compiler)?;

    warn!(
        "resolved {} embedded Python source modules",
        resources.embedded.module_sources.len(),
    );
    info!("{:#?}", resources.embedded.module_sources.keys());
    warn!(
        "resolved {} embedded Python bytecode modules",
        resources.embedded.module_bytecodes.len(),
    );
    info!("{:#?}", resources.embedded.module_bytecodes.keys());
    warn!(
        "resolved {} unique embedded Python modules",
        resources.embedded.all_modules.len(),
    );
    warn!(
        "resolved {} embedded resource files across {} packages",
        resources
            .embedded
            .resources
            .values()
            .map(|entries| entries.len())
            .sum::<usize>(),
        resources.embedded.resources.len(),
    );
    warn!(
        "resolved {} embedded extension modules",
        resources.embedded.extension_modules.len()
    );
    info!("{:#?}", resources.embedded.extension_modules.keys());

    let embedded_resources_path = dest_dir.join(EMBEDDED_RESOURCES_FILENAME);
    warn!(
        "writing embedded resources to {}",
        embedded_resources_path.display()
    );
    resources.embedded.write_json(&embedded_resources_path)?;

    for p in &resources.read_files {
        cargo_metadata.push(format!("cargo:rerun-if-changed={}", p.display()));
    }

    warn!("processing python run mode: {:?}", config.run);
    warn!(
        "processing embedded python config: {:?}",
        config.embedded_python_config
    );

    let python_config_rs = derive_python_config(
        &config.embedded_python_config,
        &config.run,
        &embedded_resources_path,
    );

    let data_rs_path = dest_dir.join("data.rs");
    write_data_rs(&data_rs_path, &python_config_rs)?;
    cargo_metadata.push(format!(
        "cargo:rustc-env=OXIPACK_DATA_RS_PATH={}",
        data_rs_path.display()
    ));

    // Lets the lines be re-emitted without processing the config again.
    let cargo_metadata_path = dest_dir.join("cargo_metadata.txt");
    fs::write(&cargo_metadata_path, cargo_metadata.join("\n").as_bytes())
        .with_context(|| format!("writing {}", cargo_metadata_path.display()))?;

    let packaging_state = PackagingState {
        license_files_path: resources.license_files_path,
        license_infos: dist.license_infos.clone(),
        app_relative_resources: resources.app_relative,
        dunder_file_modules: resources.dunder_file_modules,
        cache_tag: dist.cache_tag(),
    };

    let packaging_state_path = dest_dir.join(PACKAGING_STATE_FILENAME);
    warn!(
        "writing packaging state to {}",
        packaging_state_path.display()
    );
    packaging_state.write_json(&packaging_state_path)?;

    Ok(ProcessedConfig {
        cargo_metadata,
        python_config_rs,
        embedded_resources_path,
        data_rs_path,
        packaging_state_path,
        packaging_state,
    })
}

/// Resolve the build context of a Cargo build script.
///
/// `get_env` looks up the variables Cargo sets for build scripts.
/// `OXIPACK_ARTIFACT_DIR` takes precedence over `OUT_DIR` as the artifacts
/// destination.
pub fn build_script_context<F>(get_env: F) -> Result<BuildContext>
where
    F: Fn(&str) -> Option<String>,
{
    let required_env = |name: &str| get_env(name).ok_or_else(|| anyhow!("{} not defined", name));

    let host = required_env("HOST")?;
    let target = required_env("TARGET")?;
    let profile = required_env("PROFILE")?;
    let manifest_dir = required_env("CARGO_MANIFEST_DIR")?;

    let project_path = PathBuf::from(&manifest_dir);

    let config_path = find_config_file(&project_path, get_env("OXIPACK_CONFIG").as_deref())
        .ok_or_else(|| anyhow!("could not find oxipack config file"))?;

    let dest_dir = match get_env("OXIPACK_ARTIFACT_DIR") {
        Some(v) => PathBuf::from(v),
        None => PathBuf::from(required_env("OUT_DIR")?),
    };

    BuildContext::new(
        &project_path,
        &config_path,
        Some(&host),
        &target,
        profile == "release",
        Some(&dest_dir),
        true,
    )
}

/// Lines a build script prints so Cargo consumes processed artifacts.
pub fn build_script_lines(build_script: &str, processed: &ProcessedConfig) -> Vec<String> {
    // Our rerun-if-changed lines replace the default, so the build script
    // must be named explicitly.
    let mut lines = vec![
        format!("cargo:rerun-if-changed={}", build_script),
        "cargo:rerun-if-env-changed=OXIPACK_CONFIG".to_string(),
    ];

    lines.extend(processed.cargo_metadata.iter().cloned());

    lines
}

/// Runs packaging from the context of a Cargo build script.
///
/// The configuration file of the crate being built is found and processed
/// and the resulting cargo metadata lines are printed.
pub fn run_from_build(build_script: &str) -> Result<()> {
    let context = build_script_context(|name| env::var(name).ok())?;
    let processed = process_config(&context)?;

    for line in build_script_lines(build_script, &processed) {
        println!("{}", line);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            app_packaging::config::{
                BuildConfig, Config, InstallLocation, PackagingFilterInclude,
                PackagingPackageRoot, PackagingStdlib, PackagingStdlibExtensionsPolicy,
                PackagingWriteLicenseFiles,
            },
            py_packaging::{
                config::{EmbeddedPythonConfig, RunMode},
                distribution::ExtensionModuleFilter,
            },
            testutil::{FakeCompiler, FakeDistribution},
        },
        std::fs::write,
    };

    const TARGET: &str = "x86_64-unknown-linux-gnu";

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        root: PathBuf,
        dist: ParsedPythonDistribution,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
            let root = temp_dir.path().to_path_buf();

            let dist = FakeDistribution::new(&root.join("dist"))?.parse()?;

            write(root.join("Cargo.toml"), "")?;

            let src = root.join("src").join("acme");
            create_dir_all(src.join("ns"))?;
            write(src.join("__init__.py"), "")?;
            write(src.join("app.py"), "print(__file__)\n")?;
            write(src.join("logo.png"), "PNG")?;
            write(src.join("ns").join("mod.py"), "X = 1\n")?;

            Ok(Self {
                _temp_dir: temp_dir,
                root,
                dist,
            })
        }

        fn context(&self, rules: Vec<PythonPackaging>) -> Result<BuildContext> {
            let config = Config {
                config_path: self.root.join("oxipack.bzl"),
                build_config: BuildConfig {
                    application_name: "myapp".to_string(),
                    build_path: self.root.join("build"),
                },
                embedded_python_config: EmbeddedPythonConfig::default_for_target(TARGET),
                python_distribution: PythonDistributionLocation::Local {
                    local_path: self.dist.base_dir.display().to_string(),
                    sha256: "0".repeat(64),
                },
                python_packaging: rules,
                run: RunMode::Repl,
                distributions: vec![],
            };

            BuildContext::from_config(&self.root, config, None, TARGET, false, None, false)
        }
    }

    fn base_rules() -> Vec<PythonPackaging> {
        vec![
            PythonPackaging::StdlibExtensionsPolicy(PackagingStdlibExtensionsPolicy {
                filter: ExtensionModuleFilter::Minimal,
            }),
            PythonPackaging::Stdlib(PackagingStdlib {
                optimize_level: 0,
                exclude_test_modules: true,
                excludes: vec![],
                include_source: false,
                include_resources: true,
                install_location: InstallLocation::Embedded,
            }),
        ]
    }

    fn package_root(install_location: InstallLocation) -> PythonPackaging {
        PythonPackaging::PackageRoot(PackagingPackageRoot {
            path: "src".to_string(),
            packages: vec!["acme".to_string()],
            optimize_level: 0,
            excludes: vec![],
            include_source: true,
            install_location,
        })
    }

    fn keys<V>(m: &BTreeMap<String, V>) -> Vec<&str> {
        m.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_read_resource_names_file() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let path = td.path().join("names.txt");
        write(&path, "# modules\nfoo\n\nfoo.bar\n#baz\n")?;

        assert_eq!(
            read_resource_names_file(&path)?,
            BTreeSet::from(["foo".to_string(), "foo.bar".to_string()])
        );

        Ok(())
    }

    #[test]
    fn test_os_ignore_extensions() {
        assert_eq!(os_ignore_extensions(TARGET), &["_crypt", "nis"]);
        assert_eq!(
            os_ignore_extensions("x86_64-apple-darwin"),
            &["_curses", "_curses_panel", "readline"]
        );
        assert!(os_ignore_extensions("x86_64-pc-windows-msvc").is_empty());
    }

    #[test]
    fn test_resolve_embedded() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut rules = base_rules();
        rules.push(package_root(InstallLocation::Embedded));
        let context = fixture.context(rules)?;

        let mut compiler = FakeCompiler::default();
        let resources = resolve_python_resources(&context, &fixture.dist, &mut compiler)?;
        let embedded = &resources.embedded;

        assert_eq!(
            keys(&embedded.module_bytecodes),
            vec![
                "acme",
                "acme.app",
                "acme.ns",
                "acme.ns.mod",
                "json",
                "json.decoder",
                "os"
            ]
        );
        assert_eq!(
            keys(&embedded.module_sources),
            vec!["acme", "acme.app", "acme.ns.mod"]
        );
        assert_eq!(
            embedded.module_bytecodes["acme.app"].bytecode,
            b"bc:print(__file__)\n".to_vec()
        );

        // Namespace package gets an empty module.
        assert_eq!(embedded.module_bytecodes["acme.ns"].bytecode, b"bc:".to_vec());
        assert!(embedded.module_bytecodes["acme.ns"].is_package);

        assert_eq!(
            embedded.all_packages,
            BTreeSet::from([
                "acme".to_string(),
                "acme.ns".to_string(),
                "json".to_string()
            ])
        );
        assert_eq!(keys(&embedded.resources), vec!["acme", "json"]);
        assert_eq!(keys(&embedded.extension_modules), vec!["_io", "_sre"]);

        assert_eq!(
            resources.dunder_file_modules,
            BTreeSet::from(["acme.app".to_string()])
        );
        assert!(resources.app_relative.is_empty());
        assert!(compiler
            .compiled
            .iter()
            .all(|(_, mode)| *mode == CompileMode::Bytecode));

        Ok(())
    }

    #[test]
    fn test_resolve_app_relative() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut rules = base_rules();
        rules.push(package_root(InstallLocation::AppRelative {
            path: "lib".to_string(),
        }));
        let context = fixture.context(rules)?;

        let mut compiler = FakeCompiler::default();
        let resources = resolve_python_resources(&context, &fixture.dist, &mut compiler)?;

        // Modules installed next to the binary have a __file__.
        assert!(resources.dunder_file_modules.is_empty());
        assert!(!resources.embedded.module_bytecodes.contains_key("acme"));

        let lib = &resources.app_relative["lib"];
        assert_eq!(
            keys(&lib.module_sources),
            vec!["acme", "acme.app", "acme.ns.mod"]
        );
        assert_eq!(
            keys(&lib.module_bytecodes),
            vec!["acme", "acme.app", "acme.ns.mod"]
        );
        assert_eq!(keys(&lib.resources), vec!["acme"]);

        assert!(compiler
            .compiled
            .contains(&("acme.app".to_string(), CompileMode::PycUncheckedHash)));

        Ok(())
    }

    #[test]
    fn test_filter_include() -> Result<()> {
        let fixture = Fixture::new()?;

        create_dir_all(fixture.root.join("filters"))?;
        write(
            fixture.root.join("filters").join("modules.txt"),
            "# allowed modules\nacme\nacme.app\n\nos\n",
        )?;
        write(fixture.root.join("filters").join("extra.txt"), "_io\n")?;

        let mut rules = base_rules();
        rules.push(package_root(InstallLocation::Embedded));
        rules.push(PythonPackaging::FilterInclude(PackagingFilterInclude {
            files: vec!["filters/modules.txt".to_string()],
            glob_files: vec!["filters/extra*.txt".to_string()],
        }));
        let context = fixture.context(rules)?;

        let mut compiler = FakeCompiler::default();
        let resources = resolve_python_resources(&context, &fixture.dist, &mut compiler)?;
        let embedded = &resources.embedded;

        assert_eq!(keys(&embedded.module_bytecodes), vec!["acme", "acme.app", "os"]);
        assert_eq!(keys(&embedded.module_sources), vec!["acme", "acme.app"]);
        assert_eq!(keys(&embedded.resources), vec!["acme"]);
        // Required extensions come back after filtering.
        assert_eq!(keys(&embedded.extension_modules), vec!["_io", "_sre"]);
        assert_eq!(
            resources.read_files,
            vec![
                fixture.root.join("filters").join("modules.txt"),
                fixture.root.join("filters").join("extra.txt"),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_filter_include_empty_glob() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut rules = base_rules();
        rules.push(PythonPackaging::FilterInclude(PackagingFilterInclude {
            files: vec![],
            glob_files: vec!["missing/*.txt".to_string()],
        }));
        let context = fixture.context(rules)?;

        let err = resolve_python_resources(&context, &fixture.dist, &mut FakeCompiler::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "glob filter resolves to empty set; are you sure the paths are correct?"
        );

        Ok(())
    }

    #[test]
    fn test_filter_include_nothing() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut rules = base_rules();
        rules.push(package_root(InstallLocation::Embedded));
        rules.push(PythonPackaging::FilterInclude(PackagingFilterInclude {
            files: vec![],
            glob_files: vec![],
        }));
        let context = fixture.context(rules)?;

        let mut compiler = FakeCompiler::default();
        let resources = resolve_python_resources(&context, &fixture.dist, &mut compiler)?;
        let embedded = &resources.embedded;

        assert!(embedded.module_bytecodes.is_empty());
        assert!(embedded.module_sources.is_empty());
        assert!(embedded.resources.is_empty());
        assert!(embedded.all_modules.is_empty());
        assert!(resources.read_files.is_empty());
        // Only the extensions the interpreter can't start without survive.
        assert_eq!(keys(&embedded.extension_modules), vec!["_io", "_sre"]);
        assert!(compiler.compiled.is_empty());

        Ok(())
    }

    #[test]
    fn test_app_relative_extension_module_rejected() -> Result<()> {
        let fixture = Fixture::new()?;

        let module = fixture.dist.extension_modules["_sre"][0].clone();

        let mut resources = ResourceAccumulator::default();
        let err = resources
            .apply(
                PythonResourceAction {
                    action: ResourceAction::Add,
                    location: ResourceLocation::AppRelative {
                        path: "lib".to_string(),
                    },
                    resource: PythonResource::ExtensionModule {
                        name: "_sre".to_string(),
                        module,
                    },
                },
                false,
            )
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "extension module _sre cannot be installed app-relative"
        );
        assert!(resources.app_relative.is_empty());
        assert!(resources.embedded_extension_modules.is_empty());

        Ok(())
    }

    #[test]
    fn test_remove_app_relative_rejected() -> Result<()> {
        let mut resources = ResourceAccumulator::default();

        let source = PythonResource::ModuleSource {
            name: "acme.app".to_string(),
            source: b"print('hi')\n".to_vec(),
            is_package: false,
        };

        resources.apply(
            PythonResourceAction {
                action: ResourceAction::Add,
                location: ResourceLocation::AppRelative {
                    path: "lib".to_string(),
                },
                resource: source.clone(),
            },
            false,
        )?;
        assert_eq!(
            keys(&resources.app_relative["lib"].module_sources),
            vec!["acme.app"]
        );

        let err = resources
            .apply(
                PythonResourceAction {
                    action: ResourceAction::Remove,
                    location: ResourceLocation::AppRelative {
                        path: "lib".to_string(),
                    },
                    resource: source,
                },
                false,
            )
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "cannot remove app-relative resource acme.app from lib"
        );
        assert_eq!(
            keys(&resources.app_relative["lib"].module_sources),
            vec!["acme.app"]
        );

        Ok(())
    }

    const BUILD_SCRIPT_CONFIG: &str = r#"
Config(
    application_name='myapp',
    embedded_python_config=EmbeddedPythonConfig(),
    python_distribution=default_python_distribution(build_target='x86_64-unknown-linux-gnu'),
    packaging_rules=[StdlibExtensionsPolicy('minimal'), Stdlib()],
    python_run_mode=python_run_mode_repl(),
)
"#;

    fn build_script_env(root: &Path) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("HOST", "x86_64-unknown-linux-gnu".to_string()),
            ("TARGET", TARGET.to_string()),
            ("PROFILE", "release".to_string()),
            ("CARGO_MANIFEST_DIR", root.display().to_string()),
            ("OUT_DIR", root.join("out").display().to_string()),
        ])
    }

    #[test]
    fn test_build_script_context_missing_env() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let mut vars = build_script_env(td.path());

        vars.remove("TARGET");
        let err = build_script_context(|name| vars.get(name).cloned()).unwrap_err();
        assert_eq!(err.to_string(), "TARGET not defined");

        vars.remove("HOST");
        let err = build_script_context(|name| vars.get(name).cloned()).unwrap_err();
        assert_eq!(err.to_string(), "HOST not defined");

        Ok(())
    }

    #[test]
    fn test_build_script_context_artifact_dir() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let root = td.path();
        write(root.join("Cargo.toml"), "")?;

        let mut vars = build_script_env(root);

        let err = build_script_context(|name| vars.get(name).cloned()).unwrap_err();
        assert_eq!(err.to_string(), "could not find oxipack config file");

        write(root.join("oxipack.bzl"), BUILD_SCRIPT_CONFIG)?;

        let context = build_script_context(|name| vars.get(name).cloned())?;
        assert_eq!(context.artifacts_path, root.join("out"));
        assert_eq!(context.target_triple, TARGET);
        assert!(context.release);
        assert_eq!(context.config.build_config.application_name, "myapp");

        vars.insert("OXIPACK_ARTIFACT_DIR", root.join("artifacts").display().to_string());
        let context = build_script_context(|name| vars.get(name).cloned())?;
        assert_eq!(context.artifacts_path, root.join("artifacts"));

        vars.remove("OXIPACK_ARTIFACT_DIR");
        vars.remove("OUT_DIR");
        let err = build_script_context(|name| vars.get(name).cloned()).unwrap_err();
        assert_eq!(err.to_string(), "OUT_DIR not defined");

        Ok(())
    }

    #[test]
    fn test_build_script_context_config_override() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let root = td.path();
        write(root.join("Cargo.toml"), "")?;
        write(root.join("oxipack.bzl"), "this is not a valid config")?;
        write(root.join("other.bzl"), BUILD_SCRIPT_CONFIG)?;

        let mut vars = build_script_env(root);
        vars.insert("PROFILE", "debug".to_string());
        vars.insert("OXIPACK_CONFIG", root.join("other.bzl").display().to_string());

        let context = build_script_context(|name| vars.get(name).cloned())?;
        assert_eq!(context.config_path, root.join("other.bzl"));
        assert!(!context.release);

        Ok(())
    }

    #[test]
    fn test_build_script_lines() -> Result<()> {
        let fixture = Fixture::new()?;
        let context = fixture.context(base_rules())?;

        let processed =
            process_config_with_distribution(&context, &fixture.dist, &mut FakeCompiler::default())?;

        let lines = build_script_lines("build.rs", &processed);
        assert_eq!(lines[0], "cargo:rerun-if-changed=build.rs");
        assert_eq!(lines[1], "cargo:rerun-if-env-changed=OXIPACK_CONFIG");
        assert_eq!(&lines[2..], processed.cargo_metadata.as_slice());
        assert_eq!(
            lines.last(),
            Some(&format!(
                "cargo:rustc-env=OXIPACK_DATA_RS_PATH={}",
                processed.data_rs_path.display()
            ))
        );

        Ok(())
    }

    #[test]
    fn test_install_app_relative_dotted_package() -> Result<()> {
        let fixture = Fixture::new()?;
        let context = fixture.context(base_rules())?;

        let mut resources = AppRelativeResources::default();
        resources.resources.insert(
            "acme.sub".to_string(),
            BTreeMap::from([("data/x.txt".to_string(), b"x".to_vec())]),
        );
        resources.module_sources.insert(
            "acme.sub".to_string(),
            PackagedModuleSource {
                source: b"".to_vec(),
                is_package: true,
            },
        );

        install_app_relative(&context, "lib", &resources, "cpython-37")?;

        let package_dir = context.app_path.join("lib").join("acme").join("sub");
        assert_eq!(fs::read(package_dir.join("data").join("x.txt"))?, b"x".to_vec());
        assert!(package_dir.join("__init__.py").exists());
        assert!(!context.app_path.join("lib").join("acme.sub").exists());

        Ok(())
    }

    #[test]
    fn test_process_and_package() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut rules = base_rules();
        rules.push(package_root(InstallLocation::AppRelative {
            path: "lib".to_string(),
        }));
        rules.push(PythonPackaging::WriteLicenseFiles(PackagingWriteLicenseFiles {
            path: "".to_string(),
        }));
        let context = fixture.context(rules)?;

        let processed =
            process_config_with_distribution(&context, &fixture.dist, &mut FakeCompiler::default())?;

        assert!(processed.embedded_resources_path.exists());
        assert!(processed.packaging_state_path.exists());
        assert_eq!(processed.packaging_state.cache_tag, "cpython-37");
        assert_eq!(
            processed.cargo_metadata.first(),
            Some(&format!(
                "cargo:rerun-if-changed={}",
                fixture.root.join("oxipack.bzl").display()
            ))
        );
        assert_eq!(
            processed.cargo_metadata.last(),
            Some(&format!(
                "cargo:rustc-env=OXIPACK_DATA_RS_PATH={}",
                processed.data_rs_path.display()
            ))
        );

        let data_rs = fs::read_to_string(&processed.data_rs_path)?;
        assert!(data_rs.contains("pub fn default_python_config() -> pyembed::PythonConfig"));

        let embedded = EmbeddedPythonResources::from_json_path(&processed.embedded_resources_path)?;
        assert!(embedded.module_bytecodes.contains_key("os"));

        create_dir_all(&context.target_triple_base_path)?;
        write(&context.app_exe_target_path, "exe")?;

        package_project(&context)?;

        let lib = context.app_path.join("lib");
        assert_eq!(fs::read_to_string(&context.app_exe_path)?, "exe");
        assert!(context.app_path.join("LICENSE.python.txt").exists());
        assert_eq!(
            fs::read_to_string(lib.join("acme").join("app.py"))?,
            "print(__file__)\n"
        );
        assert!(lib.join("acme").join("__init__.py").exists());
        assert_eq!(
            fs::read(
                lib.join("acme")
                    .join("__pycache__")
                    .join("app.cpython-37.pyc")
            )?,
            b"bc:print(__file__)\n".to_vec()
        );
        assert!(lib
            .join("acme")
            .join("__pycache__")
            .join("__init__.cpython-37.pyc")
            .exists());
        assert!(lib
            .join("acme")
            .join("ns")
            .join("__pycache__")
            .join("mod.cpython-37.pyc")
            .exists());
        assert_eq!(fs::read_to_string(lib.join("acme").join("logo.png"))?, "PNG");

        // Packaging again purges previous content.
        write(context.app_path.join("stale"), "")?;
        package_project(&context)?;
        assert!(!context.app_path.join("stale").exists());

        Ok(())
    }
}
