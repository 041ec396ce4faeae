// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        app_packaging::config::{Distribution, DistributionTarball},
        starlark::util::optional_str_arg,
    },
    starlark::{
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
pub struct TarballDistributionValue {
    pub distribution: DistributionTarball,
}

impl TypedValue for TarballDistributionValue {
    type Holder = Mutable<TarballDistributionValue>;
    const TYPE: &'static str = "TarballDistribution";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("TarballDistribution<{:#?}>", self.distribution)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }
}

/// Resolve the `distributions` argument of `Config()`.
///
/// `None` means no distributions.
pub fn distributions_arg(value: &Value) -> Result<Vec<Distribution>, ValueError> {
    match value.get_type() {
        "NoneType" => Ok(Vec::new()),
        "list" => {
            let mut res = Vec::new();

            for v in &value.iter()? {
                match v.downcast_ref::<TarballDistributionValue>() {
                    Some(x) => res.push(Distribution::Tarball(x.distribution.clone())),
                    None => {
                        return Err(ValueError::from(RuntimeError {
                            code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
                            message: format!("invalid distribution type: {}", v.get_type()),
                            label: "distributions".to_string(),
                        }))
                    }
                }
            }

            Ok(res)
        }
        _ => Err(ValueError::from(RuntimeError {
            code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
            message: "distributions must be a list or None".to_string(),
            label: "distributions".to_string(),
        })),
    }
}

starlark_module! { distribution_module =>
    #[allow(non_snake_case)]
    TarballDistribution(path_prefix = NoneType::None) {
        let path_prefix = optional_str_arg("path_prefix", &path_prefix)?;

        Ok(Value::new(TarballDistributionValue {
            distribution: DistributionTarball { path_prefix },
        }))
    }
}
