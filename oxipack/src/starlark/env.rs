// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::app_packaging::config::Config,
    anyhow::{anyhow, Result},
    starlark::{
        environment::{Environment, EnvironmentError, TypeValues},
        values::{
            error::{RuntimeError, ValueError},
            none::NoneType,
            Mutable, TypedValue, Value, ValueResult,
        },
        {
            starlark_fun, starlark_module, starlark_parse_param_type, starlark_signature,
            starlark_signature_extraction, starlark_signatures,
        },
    },
    std::path::{Path, PathBuf},
};

/// Holds state for evaluating a configuration file.
#[derive(Debug)]
pub struct OxipackContext {
    /// Directory the configuration file lives in.
    pub cwd: PathBuf,

    /// Path to the configuration file.
    pub config_path: PathBuf,

    /// Rust target triple the configuration is evaluated for.
    pub build_target_triple: String,

    /// Base directory for build artifacts.
    pub build_path: PathBuf,

    /// The configuration registered by `Config()`.
    pub config: Option<Config>,
}

impl OxipackContext {
    pub fn new(config_path: &Path, build_target_triple: &str) -> Result<Self> {
        let parent = config_path
            .parent()
            .ok_or_else(|| anyhow!("unable to resolve parent directory of config"))?;

        let cwd = if parent.as_os_str().is_empty() {
            std::env::current_dir()?
        } else {
            parent.to_path_buf()
        };

        let build_path = cwd.join("build");

        Ok(Self {
            cwd,
            config_path: config_path.to_path_buf(),
            build_target_triple: build_target_triple.to_string(),
            build_path,
            config: None,
        })
    }

    pub fn set_build_path(&mut self, path: &Path) {
        self.build_path = self.resolve_path(path);
    }

    /// Resolve a path relative to the configuration file's directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

impl TypedValue for OxipackContext {
    type Holder = Mutable<OxipackContext>;
    const TYPE: &'static str = "OxipackContext";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }
}

#[derive(Default)]
pub struct OxipackContextHolder {}

impl TypedValue for OxipackContextHolder {
    type Holder = Mutable<OxipackContextHolder>;
    const TYPE: &'static str = "Oxipack";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }
}

const ENVIRONMENT_CONTEXT_SYMBOL: &str = "CONTEXT";

/// Obtain the `Value` holding the `OxipackContext`.
pub fn get_context_value(type_values: &TypeValues) -> ValueResult {
    type_values
        .get_type_value(
            &Value::new(OxipackContextHolder::default()),
            ENVIRONMENT_CONTEXT_SYMBOL,
        )
        .ok_or_else(|| {
            ValueError::from(RuntimeError {
                code: "OXIPACK",
                message: "unable to resolve context (this should never happen)".to_string(),
                label: "".to_string(),
            })
        })
}

/// Resolve a path against the context's directory.
pub fn resolve_context_path(type_values: &TypeValues, path: &str) -> Result<PathBuf, ValueError> {
    let context_value = get_context_value(type_values)?;
    let context = context_value
        .downcast_ref::<OxipackContext>()
        .ok_or(ValueError::IncorrectParameterType)?;

    Ok(context.resolve_path(path))
}

/// set_build_path(path)
fn starlark_set_build_path(type_values: &TypeValues, path: String) -> ValueResult {
    let raw_context = get_context_value(type_values)?;
    let mut context = raw_context
        .downcast_mut::<OxipackContext>()?
        .ok_or(ValueError::IncorrectParameterType)?;

    context.set_build_path(Path::new(&path));

    Ok(Value::new(NoneType::None))
}

starlark_module! { global_module =>
    set_build_path(env env, path: String) {
        starlark_set_build_path(env, path)
    }
}

/// Populate a Starlark environment with the evaluation context.
pub fn populate_environment(
    env: &mut Environment,
    type_values: &mut TypeValues,
    context: OxipackContext,
) -> Result<(), EnvironmentError> {
    env.set("CWD", Value::from(context.cwd.display().to_string()))?;
    env.set(
        "CONFIG_PATH",
        Value::from(context.config_path.display().to_string()),
    )?;
    env.set(
        "BUILD_TARGET_TRIPLE",
        Value::from(context.build_target_triple.clone()),
    )?;

    env.set(ENVIRONMENT_CONTEXT_SYMBOL, Value::new(context))?;

    let symbol = &ENVIRONMENT_CONTEXT_SYMBOL;
    type_values.add_type_value(OxipackContextHolder::TYPE, symbol, env.get(symbol)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::starlark::testutil::*};

    #[test]
    fn test_globals() -> Result<()> {
        let mut env = StarlarkEnvironment::new()?;

        assert_eq!(
            env.eval("BUILD_TARGET_TRIPLE")?.to_string(),
            crate::environment::HOST
        );
        assert_eq!(
            env.eval("CWD")?.to_string(),
            env.temp_dir.path().display().to_string()
        );
        assert_eq!(
            env.eval("CONFIG_PATH")?.to_string(),
            env.temp_dir.path().join("oxipack.bzl").display().to_string()
        );

        Ok(())
    }

    #[test]
    fn test_set_build_path() -> Result<()> {
        let mut env = StarlarkEnvironment::new()?;

        let context_value = get_context_value(&env.type_values).map_err(|e| anyhow!("{:?}", e))?;
        assert_eq!(
            context_value
                .downcast_ref::<OxipackContext>()
                .map(|c| c.build_path.clone()),
            Some(env.temp_dir.path().join("build"))
        );

        env.eval("set_build_path('out')")?;
        assert_eq!(
            context_value
                .downcast_ref::<OxipackContext>()
                .map(|c| c.build_path.clone()),
            Some(env.temp_dir.path().join("out"))
        );

        Ok(())
    }

    #[test]
    fn test_resolve_path() -> Result<()> {
        let context = OxipackContext::new(Path::new("/project/oxipack.bzl"), "x")?;

        assert_eq!(context.resolve_path("src"), PathBuf::from("/project/src"));
        assert_eq!(context.resolve_path("/abs"), PathBuf::from("/abs"));

        Ok(())
    }
}
