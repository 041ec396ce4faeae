// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        py_packaging::config::{EmbeddedPythonConfig, RawAllocator, TerminfoResolution},
        starlark::{
            env::{get_context_value, OxipackContext},
            util::{
                error_context, optional_str_arg, optional_string_list_arg, required_bool_arg,
                required_i32_arg, ToValue,
            },
        },
    },
    starlark::{
        environment::TypeValues,
        values::{
            error::{UnsupportedOperation, ValueError},
            none::NoneType,
            Mutable, TypedValue, Value, ValueResult,
        },
        {
            starlark_fun, starlark_module, starlark_parse_param_type, starlark_signature,
            starlark_signature_extraction, starlark_signatures,
        },
    },
};

const BOOL_ATTRS: &[&str] = &[
    "dont_write_bytecode",
    "ignore_environment",
    "inspect",
    "interactive",
    "isolated",
    "legacy_windows_fs_encoding",
    "legacy_windows_stdio",
    "no_site",
    "no_user_site_directory",
    "parser_debug",
    "unbuffered_stdio",
    "filesystem_importer",
    "quiet",
    "sys_frozen",
    "sys_meipass",
    "use_hash_seed",
];

const OTHER_ATTRS: &[&str] = &[
    "bytes_warning",
    "optimize_level",
    "verbose",
    "stdio_encoding",
    "sys_paths",
    "raw_allocator",
    "terminfo_resolution",
    "terminfo_dirs",
    "write_modules_directory_env",
];

#[derive(Debug, Clone)]
pub struct EmbeddedPythonConfigValue {
    pub config: EmbeddedPythonConfig,
}

impl EmbeddedPythonConfigValue {
    fn bool_field(&mut self, attribute: &str) -> Option<&mut bool> {
        let c = &mut self.config;

        Some(match attribute {
            "dont_write_bytecode" => &mut c.dont_write_bytecode,
            "ignore_environment" => &mut c.ignore_environment,
            "inspect" => &mut c.inspect,
            "interactive" => &mut c.interactive,
            "isolated" => &mut c.isolated,
            "legacy_windows_fs_encoding" => &mut c.legacy_windows_fs_encoding,
            "legacy_windows_stdio" => &mut c.legacy_windows_stdio,
            "no_site" => &mut c.no_site,
            "no_user_site_directory" => &mut c.no_user_site_directory,
            "parser_debug" => &mut c.parser_debug,
            "unbuffered_stdio" => &mut c.unbuffered_stdio,
            "filesystem_importer" => &mut c.filesystem_importer,
            "quiet" => &mut c.quiet,
            "sys_frozen" => &mut c.sys_frozen,
            "sys_meipass" => &mut c.sys_meipass,
            "use_hash_seed" => &mut c.use_hash_seed,
            _ => return None,
        })
    }

    fn stdio_encoding(&self) -> Option<String> {
        match (
            &self.config.stdio_encoding_name,
            &self.config.stdio_encoding_errors,
        ) {
            (Some(name), Some(errors)) => Some(format!("{}:{}", name, errors)),
            _ => None,
        }
    }

    fn terminfo_resolution(&self) -> (&'static str, Option<String>) {
        match &self.config.terminfo_resolution {
            TerminfoResolution::Dynamic => ("dynamic", None),
            TerminfoResolution::None => ("none", None),
            TerminfoResolution::Static(dirs) => ("static", Some(dirs.clone())),
        }
    }
}

impl TypedValue for EmbeddedPythonConfigValue {
    type Holder = Mutable<EmbeddedPythonConfigValue>;
    const TYPE: &'static str = "EmbeddedPythonConfig";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("EmbeddedPythonConfig<{:#?}>", self.config)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }

    fn get_attr(&self, attribute: &str) -> ValueResult {
        let c = &self.config;

        Ok(match attribute {
            "bytes_warning" => c.bytes_warning.to_value(),
            "dont_write_bytecode" => c.dont_write_bytecode.to_value(),
            "ignore_environment" => c.ignore_environment.to_value(),
            "inspect" => c.inspect.to_value(),
            "interactive" => c.interactive.to_value(),
            "isolated" => c.isolated.to_value(),
            "legacy_windows_fs_encoding" => c.legacy_windows_fs_encoding.to_value(),
            "legacy_windows_stdio" => c.legacy_windows_stdio.to_value(),
            "no_site" => c.no_site.to_value(),
            "no_user_site_directory" => c.no_user_site_directory.to_value(),
            "optimize_level" => c.optimize_level.to_value(),
            "parser_debug" => c.parser_debug.to_value(),
            "stdio_encoding" => self.stdio_encoding().to_value(),
            "unbuffered_stdio" => c.unbuffered_stdio.to_value(),
            "filesystem_importer" => c.filesystem_importer.to_value(),
            "quiet" => c.quiet.to_value(),
            "sys_frozen" => c.sys_frozen.to_value(),
            "sys_meipass" => c.sys_meipass.to_value(),
            "sys_paths" => c.sys_paths.to_value(),
            "raw_allocator" => Value::from(c.raw_allocator.as_str()),
            "terminfo_resolution" => Value::from(self.terminfo_resolution().0),
            "terminfo_dirs" => self.terminfo_resolution().1.to_value(),
            "use_hash_seed" => c.use_hash_seed.to_value(),
            "verbose" => c.verbose.to_value(),
            "write_modules_directory_env" => c.write_modules_directory_env.to_value(),
            _ => {
                return Err(ValueError::OperationNotSupported {
                    op: UnsupportedOperation::GetAttr(attribute.to_string()),
                    left: Self::TYPE.to_string(),
                    right: None,
                })
            }
        })
    }

    fn has_attr(&self, attribute: &str) -> Result<bool, ValueError> {
        Ok(BOOL_ATTRS.contains(&attribute) || OTHER_ATTRS.contains(&attribute))
    }

    fn set_attr(&mut self, attribute: &str, value: Value) -> Result<(), ValueError> {
        // Changes only land once the whole config validates.
        let mut updated = self.clone();
        updated.apply_attr(attribute, value)?;

        let label = format!("{}.{} = ", Self::TYPE, attribute);
        error_context(&label, || updated.config.validate())?;

        *self = updated;

        Ok(())
    }
}

impl EmbeddedPythonConfigValue {
    fn apply_attr(&mut self, attribute: &str, value: Value) -> Result<(), ValueError> {
        if let Some(field) = self.bool_field(attribute) {
            *field = required_bool_arg(attribute, &value)?;
            return Ok(());
        }

        let label = format!("{}.{} = ", Self::TYPE, attribute);

        match attribute {
            "bytes_warning" => {
                self.config.bytes_warning = required_i32_arg(attribute, &value)?;
            }
            "optimize_level" => {
                self.config.optimize_level = required_i32_arg(attribute, &value)?;
            }
            "verbose" => {
                self.config.verbose = required_i32_arg(attribute, &value)?;
            }
            "stdio_encoding" => match optional_str_arg(attribute, &value)? {
                Some(v) => error_context(&label, || self.config.set_stdio_encoding(&v))?,
                None => {
                    self.config.stdio_encoding_name = None;
                    self.config.stdio_encoding_errors = None;
                }
            },
            "sys_paths" => {
                let paths = optional_string_list_arg(attribute, &value)?;
                self.config.set_sys_paths(paths);
            }
            "raw_allocator" => {
                let v = optional_str_arg(attribute, &value)?;
                if let Some(v) = v {
                    self.config.raw_allocator =
                        error_context(&label, || RawAllocator::try_from(v.as_str()))?;
                }
            }
            "terminfo_resolution" => {
                let v = optional_str_arg(attribute, &value)?.unwrap_or_else(|| "none".to_string());
                let dirs = self.terminfo_resolution().1;
                self.config.terminfo_resolution =
                    error_context(&label, || TerminfoResolution::from_config(&v, dirs))?;
            }
            "terminfo_dirs" => {
                let dirs = optional_str_arg(attribute, &value)?;
                let (resolution, _) = self.terminfo_resolution();
                self.config.terminfo_resolution =
                    error_context(&label, || TerminfoResolution::from_config(resolution, dirs))?;
            }
            "write_modules_directory_env" => {
                self.config.write_modules_directory_env = optional_str_arg(attribute, &value)?;
            }
            attr => {
                return Err(ValueError::OperationNotSupported {
                    op: UnsupportedOperation::SetAttr(attr.to_string()),
                    left: Self::TYPE.to_string(),
                    right: None,
                })
            }
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn starlark_embedded_python_config(
    type_values: &TypeValues,
    bytes_warning: &Value,
    dont_write_bytecode: &Value,
    ignore_environment: &Value,
    inspect: &Value,
    interactive: &Value,
    isolated: &Value,
    legacy_windows_fs_encoding: &Value,
    legacy_windows_stdio: &Value,
    no_site: &Value,
    no_user_site_directory: &Value,
    optimize_level: &Value,
    parser_debug: &Value,
    stdio_encoding: &Value,
    unbuffered_stdio: &Value,
    filesystem_importer: &Value,
    quiet: &Value,
    sys_frozen: &Value,
    sys_meipass: &Value,
    sys_paths: &Value,
    raw_allocator: &Value,
    terminfo_resolution: &Value,
    terminfo_dirs: &Value,
    use_hash_seed: &Value,
    verbose: &Value,
    write_modules_directory_env: &Value,
) -> ValueResult {
    const LABEL: &str = "EmbeddedPythonConfig()";

    let context_value = get_context_value(type_values)?;
    let target_triple = context_value
        .downcast_ref::<OxipackContext>()
        .ok_or(ValueError::IncorrectParameterType)?
        .build_target_triple
        .clone();

    let mut config = EmbeddedPythonConfig::default_for_target(&target_triple);

    config.bytes_warning = required_i32_arg("bytes_warning", bytes_warning)?;
    config.dont_write_bytecode = required_bool_arg("dont_write_bytecode", dont_write_bytecode)?;
    config.ignore_environment = required_bool_arg("ignore_environment", ignore_environment)?;
    config.inspect = required_bool_arg("inspect", inspect)?;
    config.interactive = required_bool_arg("interactive", interactive)?;
    config.isolated = required_bool_arg("isolated", isolated)?;
    config.legacy_windows_fs_encoding =
        required_bool_arg("legacy_windows_fs_encoding", legacy_windows_fs_encoding)?;
    config.legacy_windows_stdio = required_bool_arg("legacy_windows_stdio", legacy_windows_stdio)?;
    config.no_site = required_bool_arg("no_site", no_site)?;
    config.no_user_site_directory =
        required_bool_arg("no_user_site_directory", no_user_site_directory)?;
    config.optimize_level = required_i32_arg("optimize_level", optimize_level)?;
    config.parser_debug = required_bool_arg("parser_debug", parser_debug)?;
    config.unbuffered_stdio = required_bool_arg("unbuffered_stdio", unbuffered_stdio)?;
    config.filesystem_importer = required_bool_arg("filesystem_importer", filesystem_importer)?;
    config.quiet = required_bool_arg("quiet", quiet)?;
    config.sys_frozen = required_bool_arg("sys_frozen", sys_frozen)?;
    config.sys_meipass = required_bool_arg("sys_meipass", sys_meipass)?;
    config.use_hash_seed = required_bool_arg("use_hash_seed", use_hash_seed)?;
    config.verbose = required_i32_arg("verbose", verbose)?;
    config.write_modules_directory_env =
        optional_str_arg("write_modules_directory_env", write_modules_directory_env)?;

    let stdio_encoding = optional_str_arg("stdio_encoding", stdio_encoding)?;
    let sys_paths = optional_string_list_arg("sys_paths", sys_paths)?;
    let raw_allocator = optional_str_arg("raw_allocator", raw_allocator)?;
    let terminfo_resolution = optional_str_arg("terminfo_resolution", terminfo_resolution)?
        .unwrap_or_else(|| "none".to_string());
    let terminfo_dirs = optional_str_arg("terminfo_dirs", terminfo_dirs)?;

    error_context(LABEL, || {
        if let Some(v) = stdio_encoding {
            config.set_stdio_encoding(&v)?;
        }

        config.set_sys_paths(sys_paths);

        if let Some(v) = raw_allocator {
            config.raw_allocator = RawAllocator::try_from(v.as_str())?;
        }

        config.terminfo_resolution =
            TerminfoResolution::from_config(&terminfo_resolution, terminfo_dirs)?;

        config.validate()
    })?;

    Ok(Value::new(EmbeddedPythonConfigValue { config }))
}

starlark_module! { embedded_python_config_module =>
    #[allow(non_snake_case)]
    EmbeddedPythonConfig(
        env env,
        bytes_warning = 0,
        dont_write_bytecode = true,
        ignore_environment = true,
        inspect = false,
        interactive = false,
        isolated = false,
        legacy_windows_fs_encoding = false,
        legacy_windows_stdio = false,
        no_site = true,
        no_user_site_directory = true,
        optimize_level = 0,
        parser_debug = false,
        stdio_encoding = NoneType::None,
        unbuffered_stdio = false,
        filesystem_importer = false,
        quiet = false,
        sys_frozen = false,
        sys_meipass = false,
        sys_paths = NoneType::None,
        raw_allocator = NoneType::None,
        terminfo_resolution = "dynamic",
        terminfo_dirs = NoneType::None,
        use_hash_seed = false,
        verbose = 0,
        write_modules_directory_env = NoneType::None
    ) {
        starlark_embedded_python_config(
            env,
            &bytes_warning,
            &dont_write_bytecode,
            &ignore_environment,
            &inspect,
            &interactive,
            &isolated,
            &legacy_windows_fs_encoding,
            &legacy_windows_stdio,
            &no_site,
            &no_user_site_directory,
            &optimize_level,
            &parser_debug,
            &stdio_encoding,
            &unbuffered_stdio,
            &filesystem_importer,
            &quiet,
            &sys_frozen,
            &sys_meipass,
            &sys_paths,
            &raw_allocator,
            &terminfo_resolution,
            &terminfo_dirs,
            &use_hash_seed,
            &verbose,
            &write_modules_directory_env,
        )
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{py_packaging::config::default_raw_allocator, starlark::testutil::*},
        anyhow::Result,
    };

    fn config(snippet: &str) -> EmbeddedPythonConfig {
        let v = starlark_ok(snippet);
        assert_eq!(v.get_type(), EmbeddedPythonConfigValue::TYPE);

        let x = v.downcast_ref::<EmbeddedPythonConfigValue>().unwrap();
        x.config.clone()
    }

    #[test]
    fn test_default() {
        let c = config("EmbeddedPythonConfig()");

        assert_eq!(
            c,
            EmbeddedPythonConfig::default_for_target(crate::environment::HOST)
        );
        assert_eq!(
            c.raw_allocator,
            default_raw_allocator(crate::environment::HOST)
        );
        assert!(c.dont_write_bytecode);
        assert!(c.no_site);
        assert!(!c.sys_frozen);
        assert_eq!(c.terminfo_resolution, TerminfoResolution::Dynamic);
    }

    #[test]
    fn test_raw_allocator_follows_target() -> Result<()> {
        let mut env = StarlarkEnvironment::new_with_target("x86_64-pc-windows-msvc")?;
        let v = env.eval("EmbeddedPythonConfig()")?;
        let x = v.downcast_ref::<EmbeddedPythonConfigValue>().unwrap();
        assert_eq!(x.config.raw_allocator, RawAllocator::System);

        let mut env = StarlarkEnvironment::new_with_target("x86_64-unknown-linux-gnu")?;
        let v = env.eval("EmbeddedPythonConfig()")?;
        let x = v.downcast_ref::<EmbeddedPythonConfigValue>().unwrap();
        assert_eq!(x.config.raw_allocator, RawAllocator::Jemalloc);

        Ok(())
    }

    #[test]
    fn test_arguments() {
        assert_eq!(config("EmbeddedPythonConfig(bytes_warning=2)").bytes_warning, 2);
        assert_eq!(config("EmbeddedPythonConfig(optimize_level=1)").optimize_level, 1);
        assert_eq!(
            config("EmbeddedPythonConfig(raw_allocator='rust')").raw_allocator,
            RawAllocator::Rust
        );

        let c = config("EmbeddedPythonConfig(stdio_encoding='utf-8:strict')");
        assert_eq!(c.stdio_encoding_name, Some("utf-8".to_string()));
        assert_eq!(c.stdio_encoding_errors, Some("strict".to_string()));
    }

    #[test]
    fn test_sys_paths_enable_filesystem_importer() {
        let c = config("EmbeddedPythonConfig(sys_paths=['$ORIGIN/lib'])");
        assert_eq!(c.sys_paths, vec!["$ORIGIN/lib".to_string()]);
        assert!(c.filesystem_importer);

        assert!(!config("EmbeddedPythonConfig(sys_paths=[])").filesystem_importer);
    }

    #[test]
    fn test_terminfo_resolution() {
        assert_eq!(
            config("EmbeddedPythonConfig(terminfo_resolution=None)").terminfo_resolution,
            TerminfoResolution::None
        );
        assert_eq!(
            config("EmbeddedPythonConfig(terminfo_resolution='static', terminfo_dirs='/usr/share/terminfo')")
                .terminfo_resolution,
            TerminfoResolution::Static("/usr/share/terminfo".to_string())
        );

        let err = starlark_nok("EmbeddedPythonConfig(terminfo_resolution='static')");
        assert!(err.as_str().contains("terminfo_dirs must be defined"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(starlark_nok("EmbeddedPythonConfig(optimize_level=3)")
            .as_str().contains("optimize_level must be 0, 1, or 2"));
        assert!(starlark_nok("EmbeddedPythonConfig(bytes_warning=-1)")
            .as_str().contains("bytes_warning must be 0, 1, or 2"));
        assert!(starlark_nok("EmbeddedPythonConfig(raw_allocator='tcmalloc')")
            .as_str().contains("invalid value for raw_allocator"));
        assert!(starlark_nok("EmbeddedPythonConfig(sys_frozen=1)").as_str().contains("sys_frozen"));
    }

    #[test]
    fn test_int_arguments_out_of_i32_range() {
        // 2**32 would wrap to 0 if narrowed.
        assert!(starlark_nok("EmbeddedPythonConfig(optimize_level=4294967296)")
            .as_str().contains("optimize_level is out of range; got 4294967296"));
        assert!(starlark_nok("EmbeddedPythonConfig(bytes_warning=4294967297)")
            .as_str().contains("bytes_warning is out of range"));
        assert!(starlark_nok("EmbeddedPythonConfig(verbose=4294967296)")
            .as_str().contains("verbose is out of range"));
    }

    #[test]
    fn test_set_attr_out_of_i32_range() -> Result<()> {
        let mut env = StarlarkEnvironment::new()?;

        env.eval("c = EmbeddedPythonConfig(optimize_level=1)")?;
        assert!(env.eval("c.optimize_level = 4294967296").is_err());
        assert!(env.eval("c.bytes_warning = 4294967296").is_err());
        assert!(env.eval("c.verbose = -4294967296").is_err());

        assert_eq!(env.eval("c.optimize_level")?.to_string(), "1");
        assert_eq!(env.eval("c.bytes_warning")?.to_string(), "0");
        assert_eq!(env.eval("c.verbose")?.to_string(), "0");

        Ok(())
    }

    #[test]
    fn test_set_attr_rejected_leaves_config_unchanged() -> Result<()> {
        let mut env = StarlarkEnvironment::new()?;

        env.eval("c = EmbeddedPythonConfig(sys_paths=['$ORIGIN/lib'])")?;
        assert!(env.eval("c.filesystem_importer")?.to_bool());

        assert!(env.eval("c.filesystem_importer = False").is_err());
        assert!(env.eval("c.filesystem_importer")?.to_bool());

        assert!(env.eval("c.optimize_level = 5").is_err());
        assert_eq!(env.eval("c.optimize_level")?.to_string(), "0");

        let v = env.eval("c")?;
        let x = v.downcast_ref::<EmbeddedPythonConfigValue>().unwrap();
        assert!(x.config.filesystem_importer);
        assert_eq!(x.config.optimize_level, 0);
        assert!(x.config.validate().is_ok());
        drop(x);

        env.eval("c.sys_paths = []")?;
        env.eval("c.filesystem_importer = False")?;
        assert!(!env.eval("c.filesystem_importer")?.to_bool());

        Ok(())
    }

    #[test]
    fn test_attributes() -> Result<()> {
        let mut env = StarlarkEnvironment::new()?;

        env.eval("c = EmbeddedPythonConfig()")?;
        assert!(!env.eval("c.sys_frozen")?.to_bool());
        assert_eq!(env.eval("c.terminfo_resolution")?.to_string(), "dynamic");

        env.eval("c.sys_frozen = True")?;
        env.eval("c.sys_meipass = True")?;
        env.eval("c.stdio_encoding = 'utf-8:replace'")?;
        assert!(env.eval("c.sys_frozen")?.to_bool());
        assert_eq!(env.eval("c.stdio_encoding")?.to_string(), "utf-8:replace");

        let v = env.eval("c")?;
        let x = v.downcast_ref::<EmbeddedPythonConfigValue>().unwrap();
        assert!(x.config.sys_frozen);
        assert!(x.config.sys_meipass);
        assert_eq!(x.config.stdio_encoding_errors, Some("replace".to_string()));

        assert!(env.eval("c.optimize_level = 5").is_err());
        assert!(env.eval("c.unknown = 1").is_err());

        Ok(())
    }
}
