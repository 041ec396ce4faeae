// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        app_packaging::config::Config,
        starlark::{
            env::{get_context_value, populate_environment, OxipackContext},
            register_starlark_dialect,
        },
    },
    anyhow::{anyhow, Result},
    codemap::CodeMap,
    codemap_diagnostic::{Diagnostic, Emitter},
    log::error,
    starlark::{
        environment::{Environment, EnvironmentError, TypeValues},
        syntax::dialect::Dialect,
        values::Value,
    },
    std::{
        path::Path,
        sync::{Arc, Mutex},
    },
};

fn render_diagnostic(map: &Arc<Mutex<CodeMap>>, diagnostic: &Diagnostic) -> String {
    let mut buffer = vec![];

    match map.lock() {
        Ok(raw_map) => {
            Emitter::vec(&mut buffer, Some(&raw_map)).emit(&[diagnostic.clone()]);
        }
        Err(_) => {
            Emitter::vec(&mut buffer, None).emit(&[diagnostic.clone()]);
        }
    }

    String::from_utf8_lossy(&buffer).to_string()
}

/// Represents a running Starlark environment.
pub struct EvaluationContext {
    parent_env: Environment,
    child_env: Environment,
    type_values: TypeValues,
}

impl EvaluationContext {
    pub fn new(config_path: &Path, build_target_triple: &str) -> Result<Self> {
        let context = OxipackContext::new(config_path, build_target_triple)?;

        let (mut parent_env, mut type_values) = starlark::stdlib::global_environment();

        register_starlark_dialect(&mut parent_env, &mut type_values)
            .map_err(|e| anyhow!("error creating Starlark environment: {:?}", e))?;

        // Calling child() freezes the parent.
        let mut child_env = parent_env.child("oxipack");

        populate_environment(&mut child_env, &mut type_values, context)
            .map_err(|e| anyhow!("error populating Starlark environment: {:?}", e))?;

        Ok(Self {
            parent_env,
            child_env,
            type_values,
        })
    }

    /// Obtain a named variable from the Starlark environment.
    pub fn get_var(&self, name: &str) -> Result<Value, EnvironmentError> {
        self.child_env.get(name)
    }

    /// Evaluate a Starlark configuration file, returning a Diagnostic on error.
    pub fn evaluate_file_diagnostic(&mut self, config_path: &Path) -> Result<(), Diagnostic> {
        let map = Arc::new(Mutex::new(CodeMap::new()));
        let file_loader_env = self.parent_env.clone();

        starlark::eval::simple::eval_file(
            &map,
            &config_path.display().to_string(),
            Dialect::Bzl,
            &mut self.child_env,
            &self.type_values,
            file_loader_env,
        )
        .map_err(|e| {
            error!("{}", render_diagnostic(&map, &e));

            e
        })?;

        Ok(())
    }

    /// Evaluate a Starlark configuration file, returning an anyhow Result.
    pub fn evaluate_file(&mut self, config_path: &Path) -> Result<()> {
        self.evaluate_file_diagnostic(config_path)
            .map_err(|d| anyhow!(d.message))
    }

    /// Evaluate code, returning a `Diagnostic` on error.
    pub fn eval_diagnostic(
        &mut self,
        map: &Arc<Mutex<CodeMap>>,
        path: &str,
        code: &str,
    ) -> Result<Value, Diagnostic> {
        let file_loader_env = self.child_env.clone();

        starlark::eval::simple::eval(
            map,
            path,
            code,
            Dialect::Bzl,
            &mut self.child_env,
            &self.type_values,
            file_loader_env,
        )
    }

    pub fn eval(&mut self, path: &str, code: &str) -> Result<Value> {
        let map = Arc::new(Mutex::new(CodeMap::new()));

        self.eval_diagnostic(&map, path, code)
            .map_err(|diagnostic| {
                anyhow!(
                    "error running '{}': {}",
                    code,
                    render_diagnostic(&map, &diagnostic)
                )
            })
    }

    /// Obtain the configuration registered by `Config()`.
    pub fn config(&self) -> Result<Config> {
        let raw_context = get_context_value(&self.type_values)
            .map_err(|_| anyhow!("could not obtain evaluation context"))?;
        let context = raw_context
            .downcast_ref::<OxipackContext>()
            .ok_or_else(|| anyhow!("context has incorrect type"))?;

        context
            .config
            .clone()
            .ok_or_else(|| anyhow!("Config() was not called in {}", context.config_path.display()))
    }
}
