// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manage oxipack projects.

use {
    crate::{
        app_packaging::{
            config::find_config_file_env,
            repackage::{package_project, process_config, run_from_build},
            state::BuildContext,
            tarball::produce_distributions,
        },
        environment::{canonicalize_path, default_target_triple},
        project_layout::{initialize_project, write_new_oxipack_config_file},
        py_packaging::{
            config::RawAllocator,
            distribution::{ExtensionModule, ParsedPythonDistribution},
        },
    },
    anyhow::{anyhow, Context, Result},
    log::warn,
    std::{
        fs::File,
        io::Write,
        path::{Path, PathBuf},
    },
};

fn resolve_config_path(project_path: &Path) -> Result<PathBuf> {
    find_config_file_env(project_path).ok_or_else(|| anyhow!("unable to find oxipack config file"))
}

/// Build an oxipack enabled Rust project.
///
/// Artifacts are derived from the config file in this process, then
/// `cargo build` is pointed at them so the build script reuses them.
fn build_project(
    project_path: &Path,
    config_path: &Path,
    target: &str,
    release: bool,
    verbose: bool,
) -> Result<BuildContext> {
    let context = BuildContext::new(
        project_path,
        config_path,
        None,
        target,
        release,
        None,
        verbose,
    )?;

    process_config(&context)?;

    let mut args = vec!["build".to_string()];

    args.push("--target".to_string());
    args.push(target.to_string());

    // Artifacts live under this directory, so cargo must use it too.
    args.push("--target-dir".to_string());
    args.push(context.target_base_path.display().to_string());

    args.push("--bin".to_string());
    args.push(context.app_name.clone());

    if release {
        args.push("--release".to_string());
    }

    if context.config.embedded_python_config.raw_allocator == RawAllocator::Jemalloc {
        args.push("--features".to_string());
        args.push("jemalloc".to_string());
    }

    let cargo = which::which("cargo").context("unable to find cargo")?;

    warn!("running {} {}", cargo.display(), args.join(" "));

    duct::cmd(&cargo, &args)
        .dir(project_path)
        .env(
            "OXIPACK_ARTIFACT_DIR",
            context.artifacts_path.display().to_string(),
        )
        .env("OXIPACK_REUSE_ARTIFACTS", "1")
        .run()
        .context("cargo build failed")?;

    Ok(context)
}

fn resolve_project(project_path: &str) -> Result<(PathBuf, PathBuf)> {
    let path = canonicalize_path(Path::new(project_path))
        .with_context(|| format!("resolving {}", project_path))?;
    let config_path = resolve_config_path(&path)?;

    Ok((path, config_path))
}

/// Build and package a project.
pub fn build(
    project_path: &str,
    target: Option<&str>,
    release: bool,
    verbose: bool,
) -> Result<()> {
    let (path, config_path) = resolve_project(project_path)?;
    let target = target.unwrap_or_else(|| default_target_triple());

    let context = build_project(&path, &config_path, target, release, verbose)?;
    package_project(&context)?;

    for path in produce_distributions(&context)? {
        warn!("wrote distribution {}", path.display());
    }

    Ok(())
}

/// Build, package, then execute a project.
pub fn run(
    project_path: &str,
    target: Option<&str>,
    release: bool,
    extra_args: &[&str],
    verbose: bool,
) -> Result<()> {
    let (path, config_path) = resolve_project(project_path)?;
    let target = target.unwrap_or_else(|| default_target_triple());

    let context = build_project(&path, &config_path, target, release, verbose)?;
    package_project(&context)?;

    warn!("running {}", context.app_exe_path.display());

    duct::cmd(&context.app_exe_path, extra_args)
        .dir(&path)
        .run()
        .with_context(|| format!("running {}", context.app_exe_path.display()))?;

    Ok(())
}

/// Derive build artifacts for a project into a directory.
pub fn build_artifacts(
    project_path: &Path,
    dest_path: &Path,
    target: Option<&str>,
    release: bool,
    verbose: bool,
) -> Result<()> {
    let path = canonicalize_path(project_path)
        .with_context(|| format!("resolving {}", project_path.display()))?;
    let config_path = resolve_config_path(&path)?;
    let target = target.unwrap_or_else(|| default_target_triple());

    let context = BuildContext::new(
        &path,
        &config_path,
        None,
        target,
        release,
        Some(dest_path),
        verbose,
    )?;

    let processed = process_config(&context)?;

    warn!(
        "wrote build artifacts to {}",
        context.artifacts_path.display()
    );
    warn!(
        "embedded resources: {}",
        processed.embedded_resources_path.display()
    );

    Ok(())
}

/// Run packaging from a Cargo build script.
pub fn run_build_script(build_script: &str) -> Result<()> {
    run_from_build(build_script)
}

/// Write a new config file into a directory, creating it as needed.
pub fn init_config_file(
    project_dir: &Path,
    code: Option<&str>,
    pip_install: &[&str],
) -> Result<()> {
    if project_dir.exists() && !project_dir.is_dir() {
        return Err(anyhow!(
            "existing path must be a directory: {}",
            project_dir.display()
        ));
    }

    std::fs::create_dir_all(project_dir)
        .with_context(|| format!("creating {}", project_dir.display()))?;

    let name = canonicalize_path(project_dir)?
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| anyhow!("unable to resolve name of {}", project_dir.display()))?;

    write_new_oxipack_config_file(project_dir, &name, code, pip_install)?;

    println!();
    println!("A new oxipack configuration file has been created.");
    println!("This configuration file can be used by various `oxipack`");
    println!("commands");
    println!();
    println!("For example, to build and run the default Python application:");
    println!();
    println!("  $ cd {}", project_dir.display());
    println!("  $ oxipack run");
    println!();
    println!("The default configuration is to invoke a Python REPL. You can");
    println!("edit the configuration file to change behavior.");

    Ok(())
}

/// Create a new Rust project embedding Python.
pub fn init_rust_project(project_path: &Path) -> Result<()> {
    initialize_project(project_path, None, &[])?;

    println!();
    println!(
        "A new Rust binary application has been created in {}",
        project_path.display()
    );
    println!();
    println!("This application can be built by doing the following:");
    println!();
    println!("  $ cd {}", project_path.display());
    println!("  $ oxipack build");
    println!("  $ oxipack run");
    println!();
    println!("The default configuration is to invoke a Python REPL. You can");
    println!("edit the oxipack.bzl config file or the main.rs file to change");
    println!("behavior. The application will need to be rebuilt for");
    println!("configuration changes to take effect.");

    Ok(())
}

/// Extract a zstandard compressed distribution archive.
pub fn python_distribution_extract(dist_path: &str, dest_path: &str) -> Result<()> {
    let fh = File::open(dist_path).with_context(|| format!("opening {}", dist_path))?;
    let dctx = zstd::stream::Decoder::new(fh)?;
    let mut tf = tar::Archive::new(dctx);

    println!("extracting archive to {}", dest_path);
    tf.unpack(dest_path)
        .with_context(|| format!("extracting {}", dist_path))?;

    Ok(())
}

fn parse_distribution(
    dist_path: &str,
) -> Result<(ParsedPythonDistribution, tempfile::TempDir)> {
    let temp_dir = tempfile::Builder::new()
        .prefix("python-distribution")
        .tempdir()?;

    let dist = ParsedPythonDistribution::from_path(
        Path::new(dist_path),
        &temp_dir.path().join("distribution"),
    )?;

    Ok((dist, temp_dir))
}

fn variant_display_name(name: &str, variant: &ExtensionModule) -> String {
    if variant.variant == "default" {
        name.to_string()
    } else {
        format!("{} ({})", name, variant.variant)
    }
}

/// Write a summary of a distribution.
pub fn write_distribution_info(
    dist: &ParsedPythonDistribution,
    writer: &mut impl Write,
) -> Result<()> {
    let info = dist.as_minimal_info();

    writeln!(writer, "Flavor: {}", info.flavor)?;
    writeln!(writer, "Version: {}", info.version)?;
    writeln!(writer, "OS: {}", info.os)?;
    writeln!(writer, "Architecture: {}", info.arch)?;
    writeln!(writer, "Python Modules: {}", info.py_module_count)?;
    writeln!(
        writer,
        "Licenses: {}",
        match &dist.licenses {
            Some(licenses) => itertools::join(licenses, ", "),
            None => "NO LICENSE FOUND".to_string(),
        }
    )?;
    writeln!(writer)?;
    writeln!(writer, "Extension Modules")?;
    writeln!(writer, "=================")?;
    writeln!(writer)?;

    for (name, variants) in &dist.extension_modules {
        for variant in variants {
            let mut flags = vec![];
            if variant.builtin_default {
                flags.push("builtin");
            }
            if variant.required {
                flags.push("required");
            }

            if flags.is_empty() {
                writeln!(writer, "{}", variant_display_name(name, variant))?;
            } else {
                writeln!(
                    writer,
                    "{} [{}]",
                    variant_display_name(name, variant),
                    flags.join(", ")
                )?;
            }
        }
    }

    Ok(())
}

/// Write the license requirements of a distribution's extension modules.
pub fn write_distribution_licenses(
    dist: &ParsedPythonDistribution,
    writer: &mut impl Write,
) -> Result<()> {
    writeln!(
        writer,
        "Python Distribution Licenses: {}",
        match &dist.licenses {
            Some(licenses) => itertools::join(licenses, ", "),
            None => "NO LICENSE FOUND".to_string(),
        }
    )?;
    writeln!(writer)?;
    writeln!(writer, "Extension Libraries and License Requirements")?;
    writeln!(writer, "============================================")?;
    writeln!(writer)?;

    for (name, variants) in &dist.extension_modules {
        for variant in variants {
            if variant.links.is_empty() {
                continue;
            }

            let name = variant_display_name(name, variant);

            writeln!(writer, "{}", name)?;
            writeln!(writer, "{}", "-".repeat(name.len()))?;
            writeln!(writer)?;

            for link in &variant.links {
                writeln!(writer, "Dependency: {}", &link.name)?;
                writeln!(
                    writer,
                    "Link Type: {}",
                    if link.system {
                        "system"
                    } else if link.framework {
                        "framework"
                    } else {
                        "library"
                    }
                )?;
                writeln!(writer)?;
            }

            if variant.license_public_domain == Some(true) {
                writeln!(writer, "Licenses: Public Domain")?;
            } else if let Some(licenses) = &variant.licenses {
                writeln!(writer, "Licenses: {}", itertools::join(licenses, ", "))?;
                for license in licenses {
                    writeln!(
                        writer,
                        "License Info: https://spdx.org/licenses/{}.html",
                        license
                    )?;
                }
            } else {
                writeln!(writer, "Licenses: UNKNOWN")?;
            }

            writeln!(writer)?;
        }
    }

    Ok(())
}

pub fn python_distribution_info(dist_path: &str) -> Result<()> {
    let (dist, _temp_dir) = parse_distribution(dist_path)?;

    write_distribution_info(&dist, &mut std::io::stdout())
}

pub fn python_distribution_licenses(dist_path: &str) -> Result<()> {
    let (dist, _temp_dir) = parse_distribution(dist_path)?;

    write_distribution_licenses(&dist, &mut std::io::stdout())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil::FakeDistribution};

    #[test]
    fn test_distribution_licenses() -> Result<()> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let dist = FakeDistribution::new(temp_dir.path())?.parse()?;

        let mut out = Vec::new();
        write_distribution_licenses(&dist, &mut out)?;
        let out = String::from_utf8(out)?;

        assert!(out.starts_with("Python Distribution Licenses: Python-2.0\n"));
        assert!(out.contains("_ssl\n----\n\nDependency: ssl\nLink Type: library\n"));
        assert!(out.contains("License Info: https://spdx.org/licenses/OpenSSL.html"));
        assert!(out.contains("nis\n---\n\nDependency: nsl\nLink Type: system\n\nLicenses: UNKNOWN"));
        assert!(out.contains("readline (libedit)\n"));
        assert!(out.contains("Licenses: GPL-3.0"));
        // Extensions without link dependencies aren't reported.
        assert!(!out.contains("_sre"));

        Ok(())
    }

    #[test]
    fn test_distribution_info() -> Result<()> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let dist = FakeDistribution::new(temp_dir.path())?.parse()?;

        let mut out = Vec::new();
        write_distribution_info(&dist, &mut out)?;
        let out = String::from_utf8(out)?;

        assert!(out.contains("Flavor: cpython\n"));
        assert!(out.contains("Version: 3.7.7\n"));
        assert!(out.contains("_io [builtin]\n"));
        assert!(out.contains("_sre [required]\n"));
        assert!(out.contains("readline (libedit)\n"));

        Ok(())
    }

    #[test]
    fn test_python_distribution_extract() -> Result<()> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let fake = FakeDistribution::new(&temp_dir.path().join("source"))?;
        let archive = fake.write_archive(&temp_dir.path().join("dist.tar.zst"))?;

        let dest = temp_dir.path().join("dest");
        python_distribution_extract(
            &archive.display().to_string(),
            &dest.display().to_string(),
        )?;

        assert!(dest.join("python").join("PYTHON.json").exists());

        Ok(())
    }

    #[test]
    fn test_init_config_file() -> Result<()> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let project = temp_dir.path().join("myapp");

        init_config_file(&project, Some("print('hi')"), &["six"])?;

        let content = std::fs::read_to_string(project.join("oxipack.bzl"))?;
        assert!(content.contains("python_run_mode_eval(\"print('hi')\")"));
        assert!(content.contains("PipInstallSimple(\"six\")"));
        assert!(content.contains("application_name=\"myapp\""));

        assert!(init_config_file(&project, None, &[]).is_err());

        Ok(())
    }

    #[test]
    fn test_missing_config() -> Result<()> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;

        if std::env::var("OXIPACK_CONFIG").is_err() {
            let err = resolve_config_path(temp_dir.path()).unwrap_err();
            assert_eq!(err.to_string(), "unable to find oxipack config file");
        }

        Ok(())
    }
}
