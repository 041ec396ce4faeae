// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Resolving packaging rules to resource actions.
*/

use {
    super::config::{
        InstallLocation, PackagingPackageRoot, PackagingPipInstallSimple,
        PackagingPipRequirementsFile, PackagingStdlib, PackagingStdlibExtensionVariant,
        PackagingStdlibExtensionsExplicitExcludes, PackagingStdlibExtensionsExplicitIncludes,
        PackagingStdlibExtensionsPolicy, PackagingVirtualenv, PythonPackaging,
    },
    crate::py_packaging::{
        distribution::{is_stdlib_test_package, resolve_python_paths, ParsedPythonDistribution},
        pip::{pip_install, resources_from_directory},
        resource::PythonResource,
    },
    anyhow::{anyhow, Context, Result},
    log::info,
    std::path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceAction {
    Add,
    Remove,
}

/// Represents the packaging location for a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceLocation {
    /// Embed the resource in the binary.
    Embedded,

    /// Install the resource in a path relative to the produced binary.
    AppRelative { path: String },
}

impl ResourceLocation {
    pub fn new(v: &InstallLocation) -> Self {
        match v {
            InstallLocation::Embedded => ResourceLocation::Embedded,
            InstallLocation::AppRelative { path } => {
                ResourceLocation::AppRelative { path: path.clone() }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PythonResourceAction {
    pub action: ResourceAction,
    pub location: ResourceLocation,
    pub resource: PythonResource,
}

/// Whether `name` equals or is a dotted child of `prefix`.
fn name_matches(name: &str, prefix: &str) -> bool {
    name == prefix
        || (name.starts_with(prefix) && name.as_bytes().get(prefix.len()) == Some(&b'.'))
}

fn is_excluded(name: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|exclude| name_matches(name, exclude))
}

/// The dotted name resources are filtered by.
fn python_resource_full_name(resource: &PythonResource) -> String {
    match resource {
        PythonResource::Resource { package, name, .. } => format!("{}.{}", package, name),
        _ => resource.name().to_string(),
    }
}

fn resolve_path(cwd: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);

    if p.is_absolute() {
        p
    } else {
        cwd.join(p)
    }
}

/// Convert discovered resources to actions.
///
/// Sources become a bytecode request plus, if requested, a source action.
fn resources_to_actions(
    resources: Vec<PythonResource>,
    location: &ResourceLocation,
    include_source: bool,
    optimize_level: i64,
) -> Vec<PythonResourceAction> {
    let mut res = Vec::new();

    for resource in resources {
        match resource {
            PythonResource::ModuleSource {
                name,
                source,
                is_package,
            } => {
                if include_source {
                    res.push(PythonResourceAction {
                        action: ResourceAction::Add,
                        location: location.clone(),
                        resource: PythonResource::ModuleSource {
                            name: name.clone(),
                            source: source.clone(),
                            is_package,
                        },
                    });
                }

                res.push(PythonResourceAction {
                    action: ResourceAction::Add,
                    location: location.clone(),
                    resource: PythonResource::ModuleBytecodeRequest {
                        name,
                        source,
                        optimize_level: optimize_level as i32,
                        is_package,
                    },
                });
            }

            resource @ PythonResource::Resource { .. }
            | resource @ PythonResource::BuiltExtensionModule(_) => {
                res.push(PythonResourceAction {
                    action: ResourceAction::Add,
                    location: location.clone(),
                    resource,
                });
            }

            _ => {}
        }
    }

    res
}

fn resolve_stdlib_extensions_policy(
    dist: &ParsedPythonDistribution,
    rule: &PackagingStdlibExtensionsPolicy,
) -> Vec<PythonResourceAction> {
    dist.filter_extension_modules(&rule.filter)
        .into_iter()
        .map(|ext| PythonResourceAction {
            action: ResourceAction::Add,
            location: ResourceLocation::Embedded,
            resource: PythonResource::ExtensionModule {
                name: ext.module.clone(),
                module: ext,
            },
        })
        .collect()
}

fn resolve_stdlib_extensions_explicit_includes(
    dist: &ParsedPythonDistribution,
    rule: &PackagingStdlibExtensionsExplicitIncludes,
) -> Vec<PythonResourceAction> {
    let mut res = Vec::new();

    for name in &rule.includes {
        if let Some(module) = dist.extension_modules.get(name).and_then(|v| v.first()) {
            res.push(PythonResourceAction {
                action: ResourceAction::Add,
                location: ResourceLocation::Embedded,
                resource: PythonResource::ExtensionModule {
                    name: name.clone(),
                    module: module.clone(),
                },
            });
        }
    }

    res
}

fn resolve_stdlib_extensions_explicit_excludes(
    dist: &ParsedPythonDistribution,
    rule: &PackagingStdlibExtensionsExplicitExcludes,
) -> Vec<PythonResourceAction> {
    let mut res = Vec::new();

    for (name, modules) in &dist.extension_modules {
        let module = match modules.first() {
            Some(module) => module,
            None => continue,
        };

        res.push(PythonResourceAction {
            action: if rule.excludes.contains(name) {
                ResourceAction::Remove
            } else {
                ResourceAction::Add
            },
            location: ResourceLocation::Embedded,
            resource: PythonResource::ExtensionModule {
                name: name.clone(),
                module: module.clone(),
            },
        });
    }

    res
}

fn resolve_stdlib_extension_variant(
    dist: &ParsedPythonDistribution,
    rule: &PackagingStdlibExtensionVariant,
) -> Result<Vec<PythonResourceAction>> {
    let variants = dist
        .extension_modules
        .get(&rule.extension)
        .ok_or_else(|| anyhow!("extension {} does not exist", rule.extension))?;

    let em = variants
        .iter()
        .find(|em| em.variant == rule.variant)
        .ok_or_else(|| {
            anyhow!(
                "extension {} has no variant {}",
                rule.extension,
                rule.variant
            )
        })?;

    Ok(vec![PythonResourceAction {
        action: ResourceAction::Add,
        location: ResourceLocation::Embedded,
        resource: PythonResource::ExtensionModule {
            name: rule.extension.clone(),
            module: em.clone(),
        },
    }])
}

fn resolve_stdlib(
    dist: &ParsedPythonDistribution,
    rule: &PackagingStdlib,
) -> Result<Vec<PythonResourceAction>> {
    let mut res = Vec::new();

    let location = ResourceLocation::new(&rule.install_location);

    for m in dist.source_modules()? {
        if is_stdlib_test_package(&m.name) && rule.exclude_test_modules {
            info!("skipping test stdlib module: {}", m.name);
            continue;
        }

        if is_excluded(&m.name, &rule.excludes) {
            continue;
        }

        if rule.include_source {
            res.push(PythonResourceAction {
                action: ResourceAction::Add,
                location: location.clone(),
                resource: PythonResource::ModuleSource {
                    name: m.name.clone(),
                    source: m.source.clone(),
                    is_package: m.is_package,
                },
            });
        }

        res.push(PythonResourceAction {
            action: ResourceAction::Add,
            location: location.clone(),
            resource: PythonResource::ModuleBytecodeRequest {
                name: m.name,
                source: m.source,
                optimize_level: rule.optimize_level as i32,
                is_package: m.is_package,
            },
        });
    }

    if rule.include_resources {
        for (package, resources) in &dist.resources {
            if is_stdlib_test_package(package) && rule.exclude_test_modules {
                info!("skipping resources associated with test package: {}", package);
                continue;
            }

            if is_excluded(package, &rule.excludes) {
                continue;
            }

            for (name, fs_path) in resources {
                let data = std::fs::read(fs_path)
                    .with_context(|| format!("reading resource file {}", fs_path.display()))?;

                res.push(PythonResourceAction {
                    action: ResourceAction::Add,
                    location: location.clone(),
                    resource: PythonResource::Resource {
                        package: package.clone(),
                        name: name.clone(),
                        data,
                    },
                });
            }
        }
    }

    Ok(res)
}

fn resolve_virtualenv(
    cwd: &Path,
    dist: &ParsedPythonDistribution,
    rule: &PackagingVirtualenv,
) -> Result<Vec<PythonResourceAction>> {
    let location = ResourceLocation::new(&rule.install_location);

    let python_paths = resolve_python_paths(&resolve_path(cwd, &rule.path), &dist.version);

    let resources = resources_from_directory(&python_paths.site_packages)?
        .into_iter()
        .filter(|r| !is_excluded(&python_resource_full_name(r), &rule.excludes))
        .collect();

    Ok(resources_to_actions(
        resources,
        &location,
        rule.include_source,
        rule.optimize_level,
    ))
}

fn resolve_package_root(
    cwd: &Path,
    rule: &PackagingPackageRoot,
) -> Result<Vec<PythonResourceAction>> {
    let location = ResourceLocation::new(&rule.install_location);

    let resources = resources_from_directory(&resolve_path(cwd, &rule.path))?
        .into_iter()
        .filter(|r| {
            let full_name = python_resource_full_name(r);

            rule.packages
                .iter()
                .any(|package| name_matches(&full_name, package))
                && !is_excluded(&full_name, &rule.excludes)
        })
        .collect();

    Ok(resources_to_actions(
        resources,
        &location,
        rule.include_source,
        rule.optimize_level,
    ))
}

fn resolve_pip_install_simple(
    dist: &ParsedPythonDistribution,
    rule: &PackagingPipInstallSimple,
    verbose: bool,
) -> Result<Vec<PythonResourceAction>> {
    let mut install_args = vec![
        "--no-binary".to_string(),
        ":all:".to_string(),
        rule.package.clone(),
    ];

    if let Some(args) = &rule.extra_args {
        install_args.extend(args.clone());
    }

    let location = ResourceLocation::new(&rule.install_location);

    let resources = pip_install(dist, verbose, &install_args, &rule.extra_env)?
        .into_iter()
        .filter(|r| !is_excluded(&python_resource_full_name(r), &rule.excludes))
        .collect();

    Ok(resources_to_actions(
        resources,
        &location,
        rule.include_source,
        rule.optimize_level,
    ))
}

fn resolve_pip_requirements_file(
    cwd: &Path,
    dist: &ParsedPythonDistribution,
    rule: &PackagingPipRequirementsFile,
    verbose: bool,
) -> Result<Vec<PythonResourceAction>> {
    let mut install_args = vec![
        "--no-binary".to_string(),
        ":all:".to_string(),
        "--requirement".to_string(),
        resolve_path(cwd, &rule.requirements_path)
            .display()
            .to_string(),
    ];

    if let Some(args) = &rule.extra_args {
        install_args.extend(args.clone());
    }

    let location = ResourceLocation::new(&rule.install_location);

    let resources = pip_install(dist, verbose, &install_args, &rule.extra_env)?;

    Ok(resources_to_actions(
        resources,
        &location,
        rule.include_source,
        rule.optimize_level,
    ))
}

/// Resolves a Python packaging rule to resources to package.
///
/// Relative paths in rules are resolved against `cwd`.
pub fn resolve_python_packaging(
    cwd: &Path,
    package: &PythonPackaging,
    dist: &ParsedPythonDistribution,
    verbose: bool,
) -> Result<Vec<PythonResourceAction>> {
    match package {
        PythonPackaging::StdlibExtensionsPolicy(rule) => {
            Ok(resolve_stdlib_extensions_policy(dist, rule))
        }

        PythonPackaging::StdlibExtensionsExplicitIncludes(rule) => {
            Ok(resolve_stdlib_extensions_explicit_includes(dist, rule))
        }

        PythonPackaging::StdlibExtensionsExplicitExcludes(rule) => {
            Ok(resolve_stdlib_extensions_explicit_excludes(dist, rule))
        }

        PythonPackaging::StdlibExtensionVariant(rule) => {
            resolve_stdlib_extension_variant(dist, rule)
        }

        PythonPackaging::Stdlib(rule) => resolve_stdlib(dist, rule),

        PythonPackaging::Virtualenv(rule) => resolve_virtualenv(cwd, dist, rule),

        PythonPackaging::PackageRoot(rule) => resolve_package_root(cwd, rule),

        PythonPackaging::PipInstallSimple(rule) => resolve_pip_install_simple(dist, rule, verbose),

        PythonPackaging::PipRequirementsFile(rule) => {
            resolve_pip_requirements_file(cwd, dist, rule, verbose)
        }

        // Handled during resource resolution.
        PythonPackaging::WriteLicenseFiles(_) => Ok(Vec::new()),
        PythonPackaging::FilterInclude(_) => Ok(Vec::new()),
    }
}
