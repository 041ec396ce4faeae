// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Evaluation of `oxipack.bzl` configuration files.
*/

pub mod config;
pub mod distribution;
pub mod embedded_python_config;
pub mod env;
pub mod eval;
pub mod python_distribution;
pub mod python_packaging;
pub mod python_run_mode;
#[cfg(test)]
mod testutil;
pub mod util;

use starlark::environment::{Environment, EnvironmentError, TypeValues};

/// Register the oxipack dialect into a Starlark environment.
pub fn register_starlark_dialect(
    env: &mut Environment,
    type_values: &mut TypeValues,
) -> Result<(), EnvironmentError> {
    env::global_module(env, type_values);
    config::config_module(env, type_values);
    distribution::distribution_module(env, type_values);
    embedded_python_config::embedded_python_config_module(env, type_values);
    python_distribution::python_distribution_module(env, type_values);
    python_packaging::python_packaging_module(env, type_values);
    python_run_mode::python_run_mode_env(env, type_values);

    Ok(())
}
