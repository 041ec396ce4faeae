// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::config::{eval_starlark_config_file, Config},
    crate::{
        environment::HOST,
        py_packaging::{distribution::LicenseInfo, resource::AppRelativeResources},
    },
    anyhow::{anyhow, Context, Result},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

pub const PACKAGING_STATE_FILENAME: &str = "packaging_state.json";

/// Packaging state carried from the build script to the packaging step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingState {
    pub license_files_path: Option<String>,
    pub license_infos: BTreeMap<String, Vec<LicenseInfo>>,
    pub app_relative_resources: BTreeMap<String, AppRelativeResources>,
    pub dunder_file_modules: BTreeSet<String>,
    /// Bytecode cache tag of the distribution, e.g. `cpython-37`.
    pub cache_tag: String,
}

impl PackagingState {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Holds state necessary to build and package an application.
#[derive(Clone, Debug)]
pub struct BuildContext {
    /// Path to main Rust project.
    pub project_path: PathBuf,

    /// Path to config file being used.
    pub config_path: PathBuf,

    /// Parent directory of config file.
    pub config_parent_path: PathBuf,

    /// Parsed configuration.
    pub config: Config,

    /// Whether we should use verbose output.
    pub verbose: bool,

    /// Base directory for build artifacts.
    pub build_path: PathBuf,

    /// Name of application/binary being built.
    pub app_name: String,

    /// Directory where application is installed.
    pub app_path: PathBuf,

    /// Path to application executable in its installed path.
    pub app_exe_path: PathBuf,

    /// Directory where Python distributions are downloaded to.
    pub distributions_path: PathBuf,

    /// Rust target triple for build host.
    pub host_triple: String,

    /// Rust target triple for build target.
    pub target_triple: String,

    /// Whether compiling a release build.
    pub release: bool,

    /// Base directory for Rust build artifacts.
    pub target_base_path: PathBuf,

    /// Base directory for Rust build artifacts for a target.
    pub target_triple_base_path: PathBuf,

    /// Main application executable in the target directory.
    pub app_exe_target_path: PathBuf,

    /// Directory where artifacts for the generated project are written.
    pub artifacts_path: PathBuf,

    /// Directory where the extracted Python distribution lives.
    pub python_distribution_path: PathBuf,
}

impl BuildContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_path: &Path,
        config_path: &Path,
        host: Option<&str>,
        target: &str,
        release: bool,
        force_artifacts_path: Option<&Path>,
        verbose: bool,
    ) -> Result<Self> {
        let config = eval_starlark_config_file(config_path, target)?;

        Self::from_config(
            project_path,
            config,
            host,
            target,
            release,
            force_artifacts_path,
            verbose,
        )
    }

    /// Construct an instance from an already evaluated configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn from_config(
        project_path: &Path,
        config: Config,
        host: Option<&str>,
        target: &str,
        release: bool,
        force_artifacts_path: Option<&Path>,
        verbose: bool,
    ) -> Result<Self> {
        let config_path = config.config_path.clone();
        let config_parent_path = config_path
            .parent()
            .ok_or_else(|| anyhow!("could not resolve parent path of config"))?
            .to_path_buf();

        let host_triple = host.unwrap_or(HOST).to_string();

        let build_path = config.build_config.build_path.clone();
        let profile = if release { "release" } else { "debug" };

        // Rust artifacts go into the build path, not wherever cargo chooses.
        let target_base_path = build_path.join("target");

        // This assumes we invoke as `cargo build --target`.
        let target_triple_base_path = target_base_path.join(target).join(profile);

        let app_name = config.build_config.application_name.clone();

        let exe_name = if target.contains("pc-windows") {
            format!("{}.exe", &app_name)
        } else {
            app_name.clone()
        };

        let app_path = build_path
            .join("apps")
            .join(&app_name)
            .join(target)
            .join(profile);
        let app_exe_target_path = target_triple_base_path.join(&exe_name);
        let app_exe_path = app_path.join(&exe_name);

        let artifacts_path = match force_artifacts_path {
            Some(path) => path.to_path_buf(),
            None => target_triple_base_path.join("oxipack"),
        };

        let distributions_path = build_path.join("distribution");

        let distribution_hash = config.python_distribution.sha256();
        let distribution_hash = distribution_hash.get(0..12).unwrap_or(distribution_hash);

        let python_distribution_path = artifacts_path.join(format!("python.{}", distribution_hash));

        let cargo_toml_path = project_path.join("Cargo.toml");
        if !cargo_toml_path.exists() {
            return Err(anyhow!("{} does not exist", cargo_toml_path.display()));
        }

        Ok(BuildContext {
            project_path: project_path.to_path_buf(),
            config_path,
            config_parent_path,
            config,
            verbose,
            build_path,
            app_name,
            app_path,
            app_exe_path,
            distributions_path,
            host_triple,
            target_triple: target.to_string(),
            release,
            target_base_path,
            target_triple_base_path,
            app_exe_target_path,
            artifacts_path,
            python_distribution_path,
        })
    }

    /// Read the packaging state written by a previous configuration processing.
    pub fn get_packaging_state(&self) -> Result<PackagingState> {
        PackagingState::from_json_path(&self.artifacts_path.join(PACKAGING_STATE_FILENAME))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            app_packaging::config::BuildConfig,
            py_packaging::{
                config::{EmbeddedPythonConfig, RunMode},
                distribution::PythonDistributionLocation,
            },
        },
    };

    fn test_config(root: &Path) -> Config {
        Config {
            config_path: root.join("oxipack.bzl"),
            build_config: BuildConfig {
                application_name: "myapp".to_string(),
                build_path: root.join("build"),
            },
            embedded_python_config: EmbeddedPythonConfig::default_for_target(
                "x86_64-pc-windows-msvc",
            ),
            python_distribution: PythonDistributionLocation::Url {
                url: "https://example.com/python.tar.zst".to_string(),
                sha256: "0123456789abcdef0123456789abcdef".to_string(),
            },
            python_packaging: vec![],
            run: RunMode::Repl,
            distributions: vec![],
        }
    }

    #[test]
    fn test_paths() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let root = td.path();
        std::fs::write(root.join("Cargo.toml"), "")?;

        let context = BuildContext::from_config(
            root,
            test_config(root),
            None,
            "x86_64-pc-windows-msvc",
            true,
            None,
            false,
        )?;

        let target_base = root
            .join("build")
            .join("target")
            .join("x86_64-pc-windows-msvc")
            .join("release");

        assert_eq!(context.target_triple_base_path, target_base);
        assert_eq!(context.app_exe_target_path, target_base.join("myapp.exe"));
        assert_eq!(
            context.app_exe_path,
            root.join("build")
                .join("apps")
                .join("myapp")
                .join("x86_64-pc-windows-msvc")
                .join("release")
                .join("myapp.exe")
        );
        assert_eq!(context.artifacts_path, target_base.join("oxipack"));
        assert_eq!(
            context.python_distribution_path,
            target_base.join("oxipack").join("python.0123456789ab")
        );
        assert_eq!(context.distributions_path, root.join("build").join("distribution"));
        assert_eq!(context.host_triple, HOST);

        Ok(())
    }

    #[test]
    fn test_missing_cargo_toml() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let root = td.path();

        let err = BuildContext::from_config(
            root,
            test_config(root),
            None,
            "x86_64-unknown-linux-gnu",
            false,
            Some(&root.join("artifacts")),
            false,
        )
        .unwrap_err();

        assert!(err.to_string().ends_with("Cargo.toml does not exist"));

        Ok(())
    }

    #[test]
    fn test_packaging_state_json() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let path = td.path().join(PACKAGING_STATE_FILENAME);

        let mut state = PackagingState {
            license_files_path: Some("".to_string()),
            ..Default::default()
        };
        state.dunder_file_modules.insert("acme".to_string());
        state.write_json(&path)?;

        assert_eq!(PackagingState::from_json_path(&path)?, state);

        Ok(())
    }
}
