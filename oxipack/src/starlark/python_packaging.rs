// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        app_packaging::config::{
            resolve_install_location, InstallLocation, PackagingFilterInclude,
            PackagingPackageRoot, PackagingPipInstallSimple, PackagingPipRequirementsFile,
            PackagingStdlib, PackagingStdlibExtensionVariant,
            PackagingStdlibExtensionsExplicitExcludes, PackagingStdlibExtensionsExplicitIncludes,
            PackagingStdlibExtensionsPolicy, PackagingVirtualenv, PackagingWriteLicenseFiles,
            PythonPackaging,
        },
        py_packaging::distribution::ExtensionModuleFilter,
        starlark::util::{
            error_context, optimize_level_arg, optional_string_dict_arg, optional_string_list_arg,
            required_bool_arg, required_int_arg, required_list_arg, required_str_arg,
        },
    },
    starlark::{
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

/// A packaging rule produced by one of the rule functions.
#[derive(Debug, Clone)]
pub struct PythonPackagingValue {
    pub rule: PythonPackaging,
}

impl TypedValue for PythonPackagingValue {
    type Holder = Mutable<PythonPackagingValue>;
    const TYPE: &'static str = "PythonPackagingRule";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("{}<{:#?}>", self.rule.rule_type(), self.rule)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }

    fn get_attr(&self, attribute: &str) -> ValueResult {
        match attribute {
            "rule_type" => Ok(Value::from(self.rule.rule_type())),
            _ => Err(ValueError::OperationNotSupported {
                op: UnsupportedOperation::GetAttr(attribute.to_string()),
                left: Self::TYPE.to_string(),
                right: None,
            }),
        }
    }

    fn has_attr(&self, attribute: &str) -> Result<bool, ValueError> {
        Ok(attribute == "rule_type")
    }
}

fn rule_value(rule: PythonPackaging) -> ValueResult {
    Ok(Value::new(PythonPackagingValue { rule }))
}

fn install_location_arg(label: &str, value: &Value) -> Result<InstallLocation, ValueError> {
    let value = required_str_arg("install_location", value)?;

    error_context(label, || resolve_install_location(&value))
}

fn optimize_arg(value: &Value) -> Result<i64, ValueError> {
    optimize_level_arg("optimize_level", required_int_arg("optimize_level", value)?)
}

fn optional_extra_args(value: &Value) -> Result<Option<Vec<String>>, ValueError> {
    let args = optional_string_list_arg("extra_args", value)?;

    Ok(if value.get_type() == "NoneType" {
        None
    } else {
        Some(args)
    })
}

/// StdlibExtensionsPolicy(policy)
fn starlark_stdlib_extensions_policy(policy: String) -> ValueResult {
    let filter = ExtensionModuleFilter::try_from(policy.as_str()).map_err(|e| {
        ValueError::from(RuntimeError {
            code: INCORRECT_PARAMETER_TYPE_ERROR_CODE,
            message: e,
            label: "invalid policy value".to_string(),
        })
    })?;

    rule_value(PythonPackaging::StdlibExtensionsPolicy(
        PackagingStdlibExtensionsPolicy { filter },
    ))
}

/// Stdlib(...)
fn starlark_stdlib(
    optimize_level: &Value,
    exclude_test_modules: &Value,
    excludes: &Value,
    include_source: &Value,
    include_resources: &Value,
    install_location: &Value,
) -> ValueResult {
    let rule = PackagingStdlib {
        optimize_level: optimize_arg(optimize_level)?,
        exclude_test_modules: required_bool_arg("exclude_test_modules", exclude_test_modules)?,
        excludes: optional_string_list_arg("excludes", excludes)?,
        include_source: required_bool_arg("include_source", include_source)?,
        include_resources: required_bool_arg("include_resources", include_resources)?,
        install_location: install_location_arg("Stdlib()", install_location)?,
    };

    rule_value(PythonPackaging::Stdlib(rule))
}

/// PackageRoot(...)
fn starlark_package_root(
    path: String,
    packages: &Value,
    optimize_level: &Value,
    excludes: &Value,
    include_source: &Value,
    install_location: &Value,
) -> ValueResult {
    required_list_arg("packages", "string", packages)?;

    let rule = PackagingPackageRoot {
        path,
        packages: optional_string_list_arg("packages", packages)?,
        optimize_level: optimize_arg(optimize_level)?,
        excludes: optional_string_list_arg("excludes", excludes)?,
        include_source: required_bool_arg("include_source", include_source)?,
        install_location: install_location_arg("PackageRoot()", install_location)?,
    };

    rule_value(PythonPackaging::PackageRoot(rule))
}

/// Virtualenv(...)
fn starlark_virtualenv(
    path: String,
    optimize_level: &Value,
    excludes: &Value,
    include_source: &Value,
    install_location: &Value,
) -> ValueResult {
    let rule = PackagingVirtualenv {
        path,
        optimize_level: optimize_arg(optimize_level)?,
        excludes: optional_string_list_arg("excludes", excludes)?,
        include_source: required_bool_arg("include_source", include_source)?,
        install_location: install_location_arg("Virtualenv()", install_location)?,
    };

    rule_value(PythonPackaging::Virtualenv(rule))
}

/// PipInstallSimple(...)
#[allow(clippy::too_many_arguments)]
fn starlark_pip_install_simple(
    package: String,
    optimize_level: &Value,
    excludes: &Value,
    include_source: &Value,
    install_location: &Value,
    extra_env: &Value,
    extra_args: &Value,
) -> ValueResult {
    let rule = PackagingPipInstallSimple {
        package,
        optimize_level: optimize_arg(optimize_level)?,
        excludes: optional_string_list_arg("excludes", excludes)?,
        include_source: required_bool_arg("include_source", include_source)?,
        install_location: install_location_arg("PipInstallSimple()", install_location)?,
        extra_env: optional_string_dict_arg("extra_env", extra_env)?,
        extra_args: optional_extra_args(extra_args)?,
    };

    rule_value(PythonPackaging::PipInstallSimple(rule))
}

/// PipRequirementsFile(...)
fn starlark_pip_requirements_file(
    requirements_path: String,
    optimize_level: &Value,
    include_source: &Value,
    install_location: &Value,
    extra_env: &Value,
    extra_args: &Value,
) -> ValueResult {
    let rule = PackagingPipRequirementsFile {
        requirements_path,
        optimize_level: optimize_arg(optimize_level)?,
        include_source: required_bool_arg("include_source", include_source)?,
        install_location: install_location_arg("PipRequirementsFile()", install_location)?,
        extra_env: optional_string_dict_arg("extra_env", extra_env)?,
        extra_args: optional_extra_args(extra_args)?,
    };

    rule_value(PythonPackaging::PipRequirementsFile(rule))
}

starlark_module! { python_packaging_module =>
    #[allow(non_snake_case)]
    StdlibExtensionsPolicy(policy: String) {
        starlark_stdlib_extensions_policy(policy)
    }

    #[allow(non_snake_case)]
    StdlibExtensionsExplicitIncludes(includes = NoneType::None) {
        let includes = optional_string_list_arg("includes", &includes)?;

        rule_value(PythonPackaging::StdlibExtensionsExplicitIncludes(
            PackagingStdlibExtensionsExplicitIncludes { includes },
        ))
    }

    #[allow(non_snake_case)]
    StdlibExtensionsExplicitExcludes(excludes = NoneType::None) {
        let excludes = optional_string_list_arg("excludes", &excludes)?;

        rule_value(PythonPackaging::StdlibExtensionsExplicitExcludes(
            PackagingStdlibExtensionsExplicitExcludes { excludes },
        ))
    }

    #[allow(non_snake_case)]
    StdlibExtensionVariant(extension: String, variant: String) {
        rule_value(PythonPackaging::StdlibExtensionVariant(
            PackagingStdlibExtensionVariant { extension, variant },
        ))
    }

    #[allow(non_snake_case)]
    Stdlib(
        optimize_level = 0,
        exclude_test_modules = true,
        excludes = NoneType::None,
        include_source = true,
        include_resources = true,
        install_location = "embedded"
    ) {
        starlark_stdlib(
            &optimize_level,
            &exclude_test_modules,
            &excludes,
            &include_source,
            &include_resources,
            &install_location,
        )
    }

    #[allow(non_snake_case)]
    PackageRoot(
        path: String,
        packages,
        optimize_level = 0,
        excludes = NoneType::None,
        include_source = true,
        install_location = "embedded"
    ) {
        starlark_package_root(
            path,
            &packages,
            &optimize_level,
            &excludes,
            &include_source,
            &install_location,
        )
    }

    #[allow(non_snake_case)]
    Virtualenv(
        path: String,
        optimize_level = 0,
        excludes = NoneType::None,
        include_source = true,
        install_location = "embedded"
    ) {
        starlark_virtualenv(path, &optimize_level, &excludes, &include_source, &install_location)
    }

    #[allow(non_snake_case)]
    PipInstallSimple(
        package: String,
        optimize_level = 0,
        excludes = NoneType::None,
        include_source = true,
        install_location = "embedded",
        extra_env = NoneType::None,
        extra_args = NoneType::None
    ) {
        starlark_pip_install_simple(
            package,
            &optimize_level,
            &excludes,
            &include_source,
            &install_location,
            &extra_env,
            &extra_args,
        )
    }

    #[allow(non_snake_case)]
    PipRequirementsFile(
        requirements_path: String,
        optimize_level = 0,
        include_source = true,
        install_location = "embedded",
        extra_env = NoneType::None,
        extra_args = NoneType::None
    ) {
        starlark_pip_requirements_file(
            requirements_path,
            &optimize_level,
            &include_source,
            &install_location,
            &extra_env,
            &extra_args,
        )
    }

    #[allow(non_snake_case)]
    FilterInclude(files = NoneType::None, glob_files = NoneType::None) {
        let files = optional_string_list_arg("files", &files)?;
        let glob_files = optional_string_list_arg("glob_files", &glob_files)?;

        rule_value(PythonPackaging::FilterInclude(PackagingFilterInclude {
            files,
            glob_files,
        }))
    }

    #[allow(non_snake_case)]
    WriteLicenseFiles(path: String) {
        rule_value(PythonPackaging::WriteLicenseFiles(PackagingWriteLicenseFiles { path }))
    }
}
