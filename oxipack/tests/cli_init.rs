// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::Result,
    assert_cmd::Command,
    assert_fs::{prelude::*, TempDir},
    predicates::prelude::*,
};

fn get_command() -> Result<Command> {
    Ok(Command::cargo_bin("oxipack")?)
}

#[test]
fn no_args_prints_help() -> Result<()> {
    get_command()?
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));

    Ok(())
}

#[test]
fn unknown_subcommand_fails() -> Result<()> {
    get_command()?.arg("frobnicate").assert().failure();

    Ok(())
}

#[test]
fn init_config_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let project = temp_dir.child("myapp");

    get_command()?
        .arg("init-config-file")
        .arg("--python-code")
        .arg("import myapp; myapp.main()")
        .arg("--pip-install")
        .arg("six")
        .arg(project.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("oxipack run"));

    project
        .child("oxipack.bzl")
        .assert(predicate::str::contains(
            "python_run_mode_eval(\"import myapp; myapp.main()\")",
        ))
        .assert(predicate::str::contains("PipInstallSimple(\"six\")"))
        .assert(predicate::str::contains("application_name=\"myapp\""));

    get_command()?
        .arg("init-config-file")
        .arg(project.path())
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("error: config file"));

    Ok(())
}

#[test]
fn init_rust_project() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let project = temp_dir.child("myapp");

    get_command()?
        .arg("init-rust-project")
        .arg(project.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("oxipack build"));

    project
        .child("Cargo.toml")
        .assert(predicate::str::contains("name = \"myapp\""));
    project
        .child("build.rs")
        .assert(predicate::str::contains("run-build-script"));
    project.child("src/main.rs").assert(predicate::path::is_file());
    project
        .child("oxipack.bzl")
        .assert(predicate::str::contains("python_run_mode_repl()"));

    get_command()?
        .arg("init-rust-project")
        .arg(project.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    Ok(())
}

#[test]
fn build_without_config_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;

    get_command()?
        .env_remove("OXIPACK_CONFIG")
        .arg("build")
        .arg("--path")
        .arg(temp_dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "error: unable to find oxipack config file",
        ));

    Ok(())
}

#[test]
fn distribution_licenses_missing_file() -> Result<()> {
    let temp_dir = TempDir::new()?;

    get_command()?
        .arg("python-distribution-licenses")
        .arg(temp_dir.child("missing.tar.zst").path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));

    Ok(())
}
