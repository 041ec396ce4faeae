// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Configuring an embedded Python interpreter.
*/

use {
    anyhow::{anyhow, Result},
    serde::{Deserialize, Serialize},
};

/// Memory allocator used by the interpreter's raw domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawAllocator {
    Jemalloc,
    Rust,
    System,
}

impl TryFrom<&str> for RawAllocator {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "jemalloc" => Ok(Self::Jemalloc),
            "rust" => Ok(Self::Rust),
            "system" => Ok(Self::System),
            _ => Err(anyhow!(
                "invalid value for raw_allocator: {}; must be jemalloc, rust, or system",
                value
            )),
        }
    }
}

impl RawAllocator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jemalloc => "jemalloc",
            Self::Rust => "rust",
            Self::System => "system",
        }
    }
}

/// Determine the default raw allocator for a target triple.
pub fn default_raw_allocator(target_triple: &str) -> RawAllocator {
    // Jemalloc doesn't work on Windows.
    if target_triple.contains("-linux-") || target_triple.contains("-apple-") {
        RawAllocator::Jemalloc
    } else {
        RawAllocator::System
    }
}

/// How the terminfo database is located at run-time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminfoResolution {
    Dynamic,
    None,
    Static(String),
}

impl TerminfoResolution {
    /// Resolve from the configuration string and optional static directories.
    pub fn from_config(value: &str, terminfo_dirs: Option<String>) -> Result<Self> {
        match value {
            "dynamic" => Ok(Self::Dynamic),
            "none" => Ok(Self::None),
            "static" => terminfo_dirs.map(Self::Static).ok_or_else(|| {
                anyhow!("terminfo_dirs must be defined when using terminfo_resolution=static")
            }),
            _ => Err(anyhow!(
                "terminfo_resolution must be dynamic, none, or static; got {}",
                value
            )),
        }
    }
}

/// What the embedded interpreter does once it is initialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Noop,
    Repl,
    Module { module: String },
    Eval { code: String },
}

/// Settings for the embedded Python interpreter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedPythonConfig {
    pub bytes_warning: i32,
    pub dont_write_bytecode: bool,
    pub ignore_environment: bool,
    pub inspect: bool,
    pub interactive: bool,
    pub isolated: bool,
    pub legacy_windows_fs_encoding: bool,
    pub legacy_windows_stdio: bool,
    pub no_site: bool,
    pub no_user_site_directory: bool,
    pub optimize_level: i32,
    pub parser_debug: bool,
    pub stdio_encoding_name: Option<String>,
    pub stdio_encoding_errors: Option<String>,
    pub unbuffered_stdio: bool,
    pub filesystem_importer: bool,
    pub quiet: bool,
    pub sys_frozen: bool,
    pub sys_meipass: bool,
    pub sys_paths: Vec<String>,
    pub raw_allocator: RawAllocator,
    pub terminfo_resolution: TerminfoResolution,
    pub use_hash_seed: bool,
    pub verbose: i32,
    pub write_modules_directory_env: Option<String>,
}

impl EmbeddedPythonConfig {
    /// Defaults for a given target triple.
    pub fn default_for_target(target_triple: &str) -> Self {
        EmbeddedPythonConfig {
            bytes_warning: 0,
            dont_write_bytecode: true,
            ignore_environment: true,
            inspect: false,
            interactive: false,
            isolated: false,
            legacy_windows_fs_encoding: false,
            legacy_windows_stdio: false,
            no_site: true,
            no_user_site_directory: true,
            optimize_level: 0,
            parser_debug: false,
            stdio_encoding_name: None,
            stdio_encoding_errors: None,
            unbuffered_stdio: false,
            filesystem_importer: false,
            quiet: false,
            sys_frozen: false,
            sys_meipass: false,
            sys_paths: Vec::new(),
            raw_allocator: default_raw_allocator(target_triple),
            terminfo_resolution: TerminfoResolution::Dynamic,
            use_hash_seed: false,
            verbose: 0,
            write_modules_directory_env: None,
        }
    }

    /// Set `stdio_encoding` from a `name:errors` string.
    pub fn set_stdio_encoding(&mut self, value: &str) -> Result<()> {
        let (name, errors) = value
            .split_once(':')
            .ok_or_else(|| anyhow!("stdio_encoding must be in the form name:errors; got {}", value))?;

        self.stdio_encoding_name = Some(name.to_string());
        self.stdio_encoding_errors = Some(errors.to_string());

        Ok(())
    }

    /// Set `sys.path` entries. A non-empty list enables the filesystem importer.
    pub fn set_sys_paths(&mut self, paths: Vec<String>) {
        if !paths.is_empty() {
            self.filesystem_importer = true;
        }

        self.sys_paths = paths;
    }

    /// Verify integer settings are in range.
    pub fn validate(&self) -> Result<()> {
        if !(0..=2).contains(&self.optimize_level) {
            return Err(anyhow!(
                "optimize_level must be 0, 1, or 2; got {}",
                self.optimize_level
            ));
        }

        if !(0..=2).contains(&self.bytes_warning) {
            return Err(anyhow!(
                "bytes_warning must be 0, 1, or 2; got {}",
                self.bytes_warning
            ));
        }

        if !self.sys_paths.is_empty() && !self.filesystem_importer {
            return Err(anyhow!(
                "filesystem_importer must be enabled when sys_paths is set"
            ));
        }

        Ok(())
    }
}
