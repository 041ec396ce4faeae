// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        app_packaging::config::{validate_packaging_rules, BuildConfig, Config},
        starlark::{
            distribution::distributions_arg,
            embedded_python_config::EmbeddedPythonConfigValue,
            env::{get_context_value, OxipackContext},
            python_distribution::PythonDistributionValue,
            python_packaging::PythonPackagingValue,
            python_run_mode::PythonRunModeValue,
            util::{error_context, required_str_arg, required_type_arg},
        },
    },
    starlark::{
        environment::TypeValues,
        values::{
            error::{RuntimeError, ValueError, INCORRECT_PARAMETER_TYPE_ERROR_CODE},
            none::NoneType,
            Mutable, TypedValue, Value, ValueResult,
        },
        {
            starlark_fun, starlark_module, starlark_parse_param_type, starlark_signature,
            starlark_signature_extraction, starlark_signatures,
        },
    },
};

#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub config: Config,
}

impl TypedValue for ConfigValue {
    type Holder = Mutable<ConfigValue>;
    const TYPE: &'static str = "Config";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("Config<{:#?}>", self.config)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }
}

/// Config(application_name, embedded_python_config, python_distribution,
/// packaging_rules, python_run_mode, distributions=None)
fn starlark_config(
    type_values: &TypeValues,
    application_name: &Value,
    embedded_python_config: &Value,
    python_distribution: &Value,
    packaging_rules: &Value,
    python_run_mode: &Value,
    distributions: &Value,
) -> ValueResult {
    let application_name = required_str_arg("application_name", application_name)?;
    required_type_arg(
        "embedded_python_config",
        EmbeddedPythonConfigValue::TYPE,
        embedded_python_config,
    )?;
    required_type_arg(
        "python_distribution",
        PythonDistributionValue::TYPE,
        python_distribution,
    )?;
    required_type_arg("python_run_mode", PythonRunModeValue::TYPE, python_run_mode)?;

    if packaging_rules.get_type() != "list" {
        return Err(ValueError::from(RuntimeError {
            code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
            message: format!(
                "function expects a list for packaging_rules; got type {}",
                packaging_rules.get_type()
            ),
            label: "packaging_rules".to_string(),
        }));
    }

    let mut python_packaging = Vec::new();

    for rule in &packaging_rules.iter()? {
        match rule.downcast_ref::<PythonPackagingValue>() {
            Some(v) => python_packaging.push(v.rule.clone()),
            None => {
                return Err(ValueError::from(RuntimeError {
                    code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
                    message: format!("invalid packaging rule type: {}", rule.get_type()),
                    label: "packaging_rules".to_string(),
                }));
            }
        }
    }

    error_context("Config()", || validate_packaging_rules(&python_packaging))?;

    let distributions = distributions_arg(distributions)?;

    let embedded_python_config = embedded_python_config
        .downcast_ref::<EmbeddedPythonConfigValue>()
        .ok_or(ValueError::IncorrectParameterType)?
        .config
        .clone();
    let python_distribution = python_distribution
        .downcast_ref::<PythonDistributionValue>()
        .ok_or(ValueError::IncorrectParameterType)?
        .source
        .clone();
    let run = python_run_mode
        .downcast_ref::<PythonRunModeValue>()
        .ok_or(ValueError::IncorrectParameterType)?
        .run_mode
        .clone();

    let raw_context = get_context_value(type_values)?;
    let mut context = raw_context
        .downcast_mut::<OxipackContext>()?
        .ok_or(ValueError::IncorrectParameterType)?;

    let config = Config {
        config_path: context.config_path.clone(),
        build_config: BuildConfig {
            application_name,
            build_path: context.build_path.clone(),
        },
        embedded_python_config,
        python_distribution,
        python_packaging,
        run,
        distributions,
    };

    context.config = Some(config.clone());

    Ok(Value::new(ConfigValue { config }))
}

starlark_module! { config_module =>
    #[allow(non_snake_case)]
    Config(
        env env,
        application_name,
        embedded_python_config,
        python_distribution,
        packaging_rules,
        python_run_mode,
        distributions = NoneType::None
    ) {
        starlark_config(
            env,
            &application_name,
            &embedded_python_config,
            &python_distribution,
            &packaging_rules,
            &python_run_mode,
            &distributions,
        )
    }
}
