// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        py_packaging::distribution::PythonDistributionLocation,
        python_distributions::default_distribution_location,
        starlark::{
            env::{get_context_value, resolve_context_path, OxipackContext},
            util::{optional_str_arg, required_str_arg},
        },
    },
    starlark::{
        environment::TypeValues,
        values::{
            error::{RuntimeError, UnsupportedOperation, ValueError, INCORRECT_PARAMETER_TYPE_ERROR_CODE},
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
pub struct PythonDistributionValue {
    pub source: PythonDistributionLocation,
}

impl TypedValue for PythonDistributionValue {
    type Holder = Mutable<PythonDistributionValue>;
    const TYPE: &'static str = "PythonDistribution";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("PythonDistribution<{:#?}>", self.source)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }

    fn get_attr(&self, attribute: &str) -> ValueResult {
        Ok(match (attribute, &self.source) {
            ("sha256", source) => Value::from(source.sha256()),
            ("local_path", PythonDistributionLocation::Local { local_path, .. }) => {
                Value::from(local_path.as_str())
            }
            ("url", PythonDistributionLocation::Url { url, .. }) => Value::from(url.as_str()),
            ("local_path", _) | ("url", _) => Value::from(NoneType::None),
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
        Ok(matches!(attribute, "sha256" | "local_path" | "url"))
    }
}

fn invalid_argument(message: &str) -> ValueError {
    ValueError::from(RuntimeError {
        code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
        message: message.to_string(),
        label: message.to_string(),
    })
}

/// default_python_distribution(build_target=None)
fn starlark_default_python_distribution(
    type_values: &TypeValues,
    build_target: &Value,
) -> ValueResult {
    let build_target = match optional_str_arg("build_target", build_target)? {
        Some(v) => v,
        None => {
            let context_value = get_context_value(type_values)?;
            let context = context_value
                .downcast_ref::<OxipackContext>()
                .ok_or(ValueError::IncorrectParameterType)?;

            context.build_target_triple.clone()
        }
    };

    match default_distribution_location(&build_target) {
        Some(source) => Ok(Value::new(PythonDistributionValue { source })),
        None => Err(ValueError::from(RuntimeError {
            code: "OXIPACK",
            message: format!("could not find default Python distribution for {}", build_target),
            label: "build_target".to_string(),
        })),
    }
}

/// PythonDistribution(sha256, local_path=None, url=None)
fn starlark_python_distribution(
    type_values: &TypeValues,
    sha256: &Value,
    local_path: &Value,
    url: &Value,
) -> ValueResult {
    let sha256 = required_str_arg("sha256", sha256)?;
    let local_path = optional_str_arg("local_path", local_path)?;
    let url = optional_str_arg("url", url)?;

    let source = match (local_path, url) {
        (Some(_), Some(_)) => {
            return Err(invalid_argument("cannot define both local_path and url"));
        }
        (Some(local_path), None) => PythonDistributionLocation::Local {
            local_path: resolve_context_path(type_values, &local_path)?
                .display()
                .to_string(),
            sha256,
        },
        (None, Some(url)) => PythonDistributionLocation::Url { url, sha256 },
        (None, None) => {
            return Err(invalid_argument("one of local_path or url must be defined"));
        }
    };

    Ok(Value::new(PythonDistributionValue { source }))
}

starlark_module! { python_distribution_module =>
    default_python_distribution(env env, build_target = NoneType::None) {
        starlark_default_python_distribution(env, &build_target)
    }

    #[allow(non_snake_case)]
    PythonDistribution(
        env env,
        sha256,
        local_path = NoneType::None,
        url = NoneType::None
    ) {
        starlark_python_distribution(env, &sha256, &local_path, &url)
    }
}
