// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{environment::OXIPACK_VERSION, logging, projectmgmt},
    anyhow::{anyhow, Result},
    clap::{Arg, ArgAction, ArgMatches, Command},
    std::path::Path,
};

const BUILD_ABOUT: &str = "\
Build an oxipack project.

The --path argument is a filesystem path to a directory containing an
existing oxipack enabled project.

The configuration file is processed into build artifacts, then Rust's
build system tool (Cargo) is invoked to build the project. The built
executable and any files installed next to it are assembled into an
application directory.
";

const INIT_CONFIG_FILE_ABOUT: &str = "\
Create a new oxipack configuration file.

The PATH argument is a directory where an oxipack.bzl file will be
written. The directory is created if it does not exist. An existing
configuration file is never overwritten.

The generated file starts a Python REPL unless --python-code is given.
Every --pip-install value becomes a rule installing that package.
";

const INIT_RUST_PROJECT_ABOUT: &str = "\
Create a new Rust project embedding Python.

The PATH argument is a filesystem path that should be created to hold the
new Rust project.

This command writes a Cargo.toml, a build script, a main.rs and an
oxipack.bzl configuration file. The new project's binary will be configured
to launch a Python REPL by default.

Created projects invoke the oxipack executable they were created with from
their build script.

On success, instructions on potential next steps are printed.
";

const RUN_BUILD_SCRIPT_ABOUT: &str = "\
Runs a crate build script to generate Python artifacts.

When the Rust crate embedding Python is built, it needs to consume various
artifacts derived from processing the active oxipack config file.
These files are typically generated when the crate's build script runs.

This command executes the functionality to derive various artifacts and
emits special lines that tell the Rust build system how to consume them.

This command is essentially identical to `build-artifacts` except the
output is tailored for the Rust build system.
";

fn target_triple_arg() -> Arg {
    Arg::new("target_triple")
        .long("target-triple")
        .action(ArgAction::Set)
        .help("Rust target triple to build for")
}

fn release_arg(help: &'static str) -> Arg {
    Arg::new("release")
        .long("release")
        .action(ArgAction::SetTrue)
        .help(help)
}

fn required_path<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("{} argument is required", name))
}

fn command() -> Command {
    Command::new("oxipack")
        .version(OXIPACK_VERSION)
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Build and distribute Python applications")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .subcommand(
            Command::new("init-config-file")
                .arg_required_else_help(true)
                .about("Create a new oxipack configuration file")
                .long_about(INIT_CONFIG_FILE_ABOUT)
                .arg(
                    Arg::new("python-code")
                        .long("python-code")
                        .action(ArgAction::Set)
                        .help("Default Python code to execute in built executable"),
                )
                .arg(
                    Arg::new("pip-install")
                        .long("pip-install")
                        .action(ArgAction::Append)
                        .help("Python package to install via `pip install`"),
                )
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("PATH")
                        .help("Directory where configuration file should be created"),
                ),
        )
        .subcommand(
            Command::new("init-rust-project")
                .arg_required_else_help(true)
                .about("Create a new Rust project embedding a Python interpreter")
                .long_about(INIT_RUST_PROJECT_ABOUT)
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("PATH")
                        .help("Path of project directory to create"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build an oxipack enabled project")
                .long_about(BUILD_ABOUT)
                .arg(target_triple_arg())
                .arg(release_arg("Build a release binary"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .default_value(".")
                        .value_name("PATH")
                        .help("Directory containing project to build"),
                ),
        )
        .subcommand(
            Command::new("build-artifacts")
                .arg_required_else_help(true)
                .about("Process an oxipack config file and build derived artifacts")
                .arg(target_triple_arg())
                .arg(release_arg("Build a release binary"))
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("PROJECT_PATH")
                        .help("Path to oxipack project to process"),
                )
                .arg(
                    Arg::new("dest_path")
                        .required(true)
                        .value_name("DIR")
                        .help("Directory to write artifacts to"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Build and run an oxipack application")
                .arg(target_triple_arg())
                .arg(release_arg("Run a release binary"))
                .arg(
                    Arg::new("path")
                        .long("path")
                        .default_value(".")
                        .value_name("PATH")
                        .help("Directory containing project to build"),
                )
                .arg(
                    Arg::new("extra")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .value_name("ARGS")
                        .help("Arguments passed to the built executable"),
                ),
        )
        .subcommand(
            Command::new("run-build-script")
                .arg_required_else_help(true)
                .about("Run functionality that a build script would perform")
                .long_about(RUN_BUILD_SCRIPT_ABOUT)
                .arg(
                    Arg::new("build-script-name")
                        .required(true)
                        .help("Value to use for Rust build script"),
                ),
        )
        .subcommand(
            Command::new("python-distribution-extract")
                .arg_required_else_help(true)
                .about("Extract a Python distribution archive to a directory")
                .arg(
                    Arg::new("dist_path")
                        .required(true)
                        .value_name("DISTRIBUTION_PATH")
                        .help("Path to a Python distribution archive"),
                )
                .arg(
                    Arg::new("dest_path")
                        .required(true)
                        .value_name("DESTINATION_PATH")
                        .help("Path to directory where distribution should be extracted"),
                ),
        )
        .subcommand(
            Command::new("python-distribution-info")
                .arg_required_else_help(true)
                .about("Show information about a Python distribution archive")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("PATH")
                        .help("Path to Python distribution archive to analyze"),
                ),
        )
        .subcommand(
            Command::new("python-distribution-licenses")
                .arg_required_else_help(true)
                .about("Show licenses for a given Python distribution")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("PATH")
                        .help("Path to Python distribution to analyze"),
                ),
        )
}

pub fn run_cli() -> Result<()> {
    let matches = command().get_matches();

    let verbose = matches.get_flag("verbose");
    logging::init_logger(logging::log_level(verbose));

    match matches.subcommand() {
        Some(("build-artifacts", args)) => {
            let path = required_path(args, "path")?;
            let dest_path = required_path(args, "dest_path")?;
            let target = args.get_one::<String>("target_triple").map(|s| s.as_str());
            let release = args.get_flag("release");

            projectmgmt::build_artifacts(
                Path::new(path),
                Path::new(dest_path),
                target,
                release,
                verbose,
            )
        }

        Some(("build", args)) => {
            let path = required_path(args, "path")?;
            let target = args.get_one::<String>("target_triple").map(|s| s.as_str());
            let release = args.get_flag("release");

            projectmgmt::build(path, target, release, verbose)
        }

        Some(("init-config-file", args)) => {
            let path = required_path(args, "path")?;
            let code = args.get_one::<String>("python-code").map(|s| s.as_str());
            let pip_install = args
                .get_many::<String>("pip-install")
                .map(|values| values.map(|s| s.as_str()).collect::<Vec<_>>())
                .unwrap_or_default();

            projectmgmt::init_config_file(Path::new(path), code, &pip_install)
        }

        Some(("init-rust-project", args)) => {
            let path = required_path(args, "path")?;

            projectmgmt::init_rust_project(Path::new(path))
        }

        Some(("python-distribution-extract", args)) => {
            let dist_path = required_path(args, "dist_path")?;
            let dest_path = required_path(args, "dest_path")?;

            projectmgmt::python_distribution_extract(dist_path, dest_path)
        }

        Some(("python-distribution-info", args)) => {
            let dist_path = required_path(args, "path")?;

            projectmgmt::python_distribution_info(dist_path)
        }

        Some(("python-distribution-licenses", args)) => {
            let path = required_path(args, "path")?;

            projectmgmt::python_distribution_licenses(path)
        }

        Some(("run-build-script", args)) => {
            let build_script = required_path(args, "build-script-name")?;

            projectmgmt::run_build_script(build_script)
        }

        Some(("run", args)) => {
            let path = required_path(args, "path")?;
            let target = args.get_one::<String>("target_triple").map(|s| s.as_str());
            let release = args.get_flag("release");
            let extra = args
                .get_many::<String>("extra")
                .map(|values| values.map(|s| s.as_str()).collect::<Vec<_>>())
                .unwrap_or_default();

            projectmgmt::run(path, target, release, &extra, verbose)
        }

        _ => Err(anyhow!("invalid sub-command")),
    }
}
