// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Functionality related to the pyembed crate.
*/

use {
    super::config::{EmbeddedPythonConfig, RawAllocator, RunMode, TerminfoResolution},
    anyhow::Result,
    itertools::Itertools,
    std::{fs::File, io::Write, path::Path},
};

fn optional_str_to_string(value: &Option<String>) -> String {
    match value {
        Some(value) => format!("Some(\"{}\")", value.escape_default()),
        None => "None".to_string(),
    }
}

fn optional_string_to_string(value: &Option<String>) -> String {
    match value {
        Some(value) => format!("Some(\"{}\".to_string())", value.escape_default()),
        None => "None".to_string(),
    }
}

fn run_mode_to_string(run_mode: &RunMode) -> String {
    match run_mode {
        RunMode::Noop => "pyembed::PythonRunMode::None".to_string(),
        RunMode::Repl => "pyembed::PythonRunMode::Repl".to_string(),
        RunMode::Module { module } => format!(
            "pyembed::PythonRunMode::Module {{ module: \"{}\".to_string() }}",
            module.escape_default()
        ),
        RunMode::Eval { code } => format!(
            "pyembed::PythonRunMode::Eval {{ code: \"{}\".to_string() }}",
            code.escape_default()
        ),
    }
}

/// Obtain the Rust source code to construct a PythonConfig instance.
pub fn derive_python_config(
    embedded: &EmbeddedPythonConfig,
    run_mode: &RunMode,
    embedded_resources_path: &Path,
) -> String {
    format!(
        "pyembed::PythonConfig {{\n    \
         standard_io_encoding: {},\n    \
         standard_io_errors: {},\n    \
         opt_level: {},\n    \
         filesystem_importer: {},\n    \
         sys_paths: [{}].to_vec(),\n    \
         bytes_warning: {},\n    \
         import_site: {},\n    \
         import_user_site: {},\n    \
         ignore_python_env: {},\n    \
         inspect: {},\n    \
         interactive: {},\n    \
         isolated: {},\n    \
         legacy_windows_fs_encoding: {},\n    \
         legacy_windows_stdio: {},\n    \
         dont_write_bytecode: {},\n    \
         unbuffered_stdio: {},\n    \
         parser_debug: {},\n    \
         quiet: {},\n    \
         use_hash_seed: {},\n    \
         verbose: {},\n    \
         embedded_resources: include_bytes!(r#\"{}\"#),\n    \
         sys_frozen: {},\n    \
         sys_meipass: {},\n    \
         raw_allocator: {},\n    \
         terminfo_resolution: {},\n    \
         write_modules_directory_env: {},\n    \
         run: {},\n\
         }}",
        optional_str_to_string(&embedded.stdio_encoding_name),
        optional_str_to_string(&embedded.stdio_encoding_errors),
        embedded.optimize_level,
        embedded.filesystem_importer,
        embedded
            .sys_paths
            .iter()
            .map(|p| format!("\"{}\".to_string()", p.escape_default()))
            .join(", "),
        embedded.bytes_warning,
        !embedded.no_site,
        !embedded.no_user_site_directory,
        embedded.ignore_environment,
        embedded.inspect,
        embedded.interactive,
        embedded.isolated,
        embedded.legacy_windows_fs_encoding,
        embedded.legacy_windows_stdio,
        embedded.dont_write_bytecode,
        embedded.unbuffered_stdio,
        embedded.parser_debug,
        embedded.quiet,
        embedded.use_hash_seed,
        embedded.verbose,
        embedded_resources_path.display(),
        embedded.sys_frozen,
        embedded.sys_meipass,
        match embedded.raw_allocator {
            RawAllocator::Jemalloc => "pyembed::PythonRawAllocator::Jemalloc",
            RawAllocator::Rust => "pyembed::PythonRawAllocator::Rust",
            RawAllocator::System => "pyembed::PythonRawAllocator::System",
        },
        match &embedded.terminfo_resolution {
            TerminfoResolution::Dynamic => "pyembed::TerminfoResolution::Dynamic".to_string(),
            TerminfoResolution::None => "pyembed::TerminfoResolution::None".to_string(),
            TerminfoResolution::Static(v) => {
                format!(
                    "pyembed::TerminfoResolution::Static(\"{}\".to_string())",
                    v.escape_default()
                )
            }
        },
        optional_string_to_string(&embedded.write_modules_directory_env),
        run_mode_to_string(run_mode),
    )
}

/// Write a standalone .rs file containing a function for obtaining the default PythonConfig.
pub fn write_data_rs(path: &Path, python_config_rs: &str) -> Result<()> {
    let mut f = File::create(path)?;

    let indented = python_config_rs
        .split('\n')
        .map(|line| "    ".to_owned() + line)
        .join("\n");

    f.write_fmt(format_args!(
        "/// Obtain the default Python configuration\n\
         ///\n\
         /// The crate is compiled with a default Python configuration embedded\n\
         /// in the crate. This function will return an instance of that\n\
         /// configuration.\n\
         pub fn default_python_config() -> pyembed::PythonConfig {{\n{}\n}}\n",
        indented
    ))?;

    Ok(())
}
