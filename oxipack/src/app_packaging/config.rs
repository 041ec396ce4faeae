// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Resolved application configuration.

These types are what a configuration file evaluates to. They carry no
Starlark state and can be consumed by the packaging code directly.
*/

use {
    crate::{
        py_packaging::{
            config::{EmbeddedPythonConfig, RunMode},
            distribution::{ExtensionModuleFilter, PythonDistributionLocation},
        },
        starlark::eval::EvaluationContext,
    },
    anyhow::{anyhow, Result},
    std::{
        collections::HashMap,
        env,
        path::{Path, PathBuf},
    },
};

/// Name of the configuration file looked for in project directories.
pub const CONFIG_FILENAME: &str = "oxipack.bzl";

/// Where a packaged resource is installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallLocation {
    /// Embed the resource in the binary.
    Embedded,

    /// Install the resource in a path relative to the produced binary.
    AppRelative { path: String },
}

/// Parse an `install_location` string.
///
/// Values are `embedded` or `app-relative:<path>`.
pub fn resolve_install_location(value: &str) -> Result<InstallLocation> {
    if value == "embedded" {
        Ok(InstallLocation::Embedded)
    } else if let Some(path) = value.strip_prefix("app-relative:") {
        Ok(InstallLocation::AppRelative {
            path: path.to_string(),
        })
    } else {
        Err(anyhow!("invalid install_location: {}", value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    pub application_name: String,
    pub build_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PackagingStdlibExtensionsPolicy {
    pub filter: ExtensionModuleFilter,
}

#[derive(Clone, Debug)]
pub struct PackagingStdlibExtensionsExplicitIncludes {
    pub includes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PackagingStdlibExtensionsExplicitExcludes {
    pub excludes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PackagingStdlibExtensionVariant {
    pub extension: String,
    pub variant: String,
}

#[derive(Clone, Debug)]
pub struct PackagingStdlib {
    pub optimize_level: i64,
    pub exclude_test_modules: bool,
    pub excludes: Vec<String>,
    pub include_source: bool,
    pub include_resources: bool,
    pub install_location: InstallLocation,
}

#[derive(Clone, Debug)]
pub struct PackagingVirtualenv {
    pub path: String,
    pub optimize_level: i64,
    pub excludes: Vec<String>,
    pub include_source: bool,
    pub install_location: InstallLocation,
}

#[derive(Clone, Debug)]
pub struct PackagingPackageRoot {
    pub path: String,
    pub packages: Vec<String>,
    pub optimize_level: i64,
    pub excludes: Vec<String>,
    pub include_source: bool,
    pub install_location: InstallLocation,
}

#[derive(Clone, Debug)]
pub struct PackagingPipInstallSimple {
    pub package: String,
    pub optimize_level: i64,
    pub excludes: Vec<String>,
    pub include_source: bool,
    pub install_location: InstallLocation,
    pub extra_env: HashMap<String, String>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct PackagingPipRequirementsFile {
    pub requirements_path: String,
    pub optimize_level: i64,
    pub include_source: bool,
    pub install_location: InstallLocation,
    pub extra_env: HashMap<String, String>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct PackagingFilterInclude {
    pub files: Vec<String>,
    pub glob_files: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PackagingWriteLicenseFiles {
    pub path: String,
}

/// A packaging rule.
#[derive(Clone, Debug)]
pub enum PythonPackaging {
    StdlibExtensionsPolicy(PackagingStdlibExtensionsPolicy),
    StdlibExtensionsExplicitIncludes(PackagingStdlibExtensionsExplicitIncludes),
    StdlibExtensionsExplicitExcludes(PackagingStdlibExtensionsExplicitExcludes),
    StdlibExtensionVariant(PackagingStdlibExtensionVariant),
    Stdlib(PackagingStdlib),
    Virtualenv(PackagingVirtualenv),
    PackageRoot(PackagingPackageRoot),
    PipInstallSimple(PackagingPipInstallSimple),
    PipRequirementsFile(PackagingPipRequirementsFile),
    FilterInclude(PackagingFilterInclude),
    WriteLicenseFiles(PackagingWriteLicenseFiles),
}

impl PythonPackaging {
    /// The configuration function name that produces this rule.
    pub fn rule_type(&self) -> &'static str {
        match self {
            Self::StdlibExtensionsPolicy(_) => "StdlibExtensionsPolicy",
            Self::StdlibExtensionsExplicitIncludes(_) => "StdlibExtensionsExplicitIncludes",
            Self::StdlibExtensionsExplicitExcludes(_) => "StdlibExtensionsExplicitExcludes",
            Self::StdlibExtensionVariant(_) => "StdlibExtensionVariant",
            Self::Stdlib(_) => "Stdlib",
            Self::Virtualenv(_) => "Virtualenv",
            Self::PackageRoot(_) => "PackageRoot",
            Self::PipInstallSimple(_) => "PipInstallSimple",
            Self::PipRequirementsFile(_) => "PipRequirementsFile",
            Self::FilterInclude(_) => "FilterInclude",
            Self::WriteLicenseFiles(_) => "WriteLicenseFiles",
        }
    }
}

/// Verify a set of packaging rules is usable.
///
/// A `StdlibExtensionsPolicy` and a `Stdlib` rule are both required.
pub fn validate_packaging_rules(rules: &[PythonPackaging]) -> Result<()> {
    let mut have_stdlib = false;
    let mut have_stdlib_extensions_policy = false;

    for rule in rules {
        match rule {
            PythonPackaging::Stdlib(_) => have_stdlib = true,
            PythonPackaging::StdlibExtensionsPolicy(_) => have_stdlib_extensions_policy = true,
            _ => {}
        }
    }

    if !have_stdlib_extensions_policy {
        return Err(anyhow!("no StdLibExtensionsPolicy packaging rule"));
    }

    if !have_stdlib {
        return Err(anyhow!("no StdLib packaging rule"));
    }

    Ok(())
}

/// A tar archive of the application directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionTarball {
    /// Directory prefix of every path in the archive.
    pub path_prefix: Option<String>,
}

/// A distributable artifact produced from the packaged application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Distribution {
    Tarball(DistributionTarball),
}

/// An evaluated configuration file.
#[derive(Clone, Debug)]
pub struct Config {
    pub config_path: PathBuf,
    pub build_config: BuildConfig,
    pub embedded_python_config: EmbeddedPythonConfig,
    pub python_distribution: PythonDistributionLocation,
    pub python_packaging: Vec<PythonPackaging>,
    pub run: RunMode,
    pub distributions: Vec<Distribution>,
}

/// Find the configuration file for a project directory.
///
/// An explicit `config_override` path takes precedence over
/// `<path>/oxipack.bzl`.
pub fn find_config_file(path: &Path, config_override: Option<&str>) -> Option<PathBuf> {
    let candidate = match config_override {
        Some(config_path) => PathBuf::from(config_path),
        None => path.join(CONFIG_FILENAME),
    };

    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

/// Find the configuration file for a project directory.
///
/// `OXIPACK_CONFIG` takes precedence over `<path>/oxipack.bzl`.
pub fn find_config_file_env(path: &Path) -> Option<PathBuf> {
    find_config_file(path, env::var("OXIPACK_CONFIG").ok().as_deref())
}

/// Evaluate a configuration file for a target triple.
pub fn eval_starlark_config_file(path: &Path, build_target_triple: &str) -> Result<Config> {
    let mut context = EvaluationContext::new(path, build_target_triple)?;

    context.evaluate_file(path)?;

    context.config()
}
