// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::starlark::{
        env::{populate_environment, OxipackContext},
        register_starlark_dialect,
    },
    anyhow::{anyhow, Result},
    codemap::CodeMap,
    codemap_diagnostic::{Diagnostic, Emitter},
    starlark::{
        environment::{Environment, TypeValues},
        syntax::dialect::Dialect,
        values::Value,
    },
    std::sync::{Arc, Mutex},
};

/// A Starlark execution environment.
///
/// The context's configuration file lives in a temporary directory.
pub struct StarlarkEnvironment {
    pub env: Environment,
    pub type_values: TypeValues,
    pub temp_dir: tempfile::TempDir,
}

impl StarlarkEnvironment {
    pub fn new() -> Result<Self> {
        Self::new_with_target(crate::environment::HOST)
    }

    pub fn new_with_target(target_triple: &str) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("oxipack-starlark")
            .tempdir()?;

        let context = OxipackContext::new(&temp_dir.path().join("oxipack.bzl"), target_triple)?;

        let (mut env, mut type_values) = starlark::stdlib::global_environment();
        register_starlark_dialect(&mut env, &mut type_values)
            .map_err(|e| anyhow!("error creating Starlark environment: {:?}", e))?;
        populate_environment(&mut env, &mut type_values, context)
            .map_err(|e| anyhow!("error populating Starlark environment: {:?}", e))?;

        Ok(Self {
            env,
            type_values,
            temp_dir,
        })
    }

    pub fn eval_raw(
        &mut self,
        map: &Arc<Mutex<CodeMap>>,
        file_loader_env: Environment,
        code: &str,
    ) -> Result<Value, Diagnostic> {
        starlark::eval::simple::eval(
            map,
            "<test>",
            code,
            Dialect::Bzl,
            &mut self.env,
            &self.type_values,
            file_loader_env,
        )
    }

    /// Evaluate code in the Starlark environment.
    pub fn eval(&mut self, code: &str) -> Result<Value> {
        let map = Arc::new(Mutex::new(CodeMap::new()));
        let file_loader_env = self.env.clone();

        self.eval_raw(&map, file_loader_env, code)
            .map_err(|diagnostic| {
                let cloned_map_lock = Arc::clone(&map);
                let unlocked_map = cloned_map_lock.lock().unwrap();

                let mut buffer = vec![];
                Emitter::vec(&mut buffer, Some(&unlocked_map)).emit(&[diagnostic]);

                anyhow!(
                    "error running '{}': {}",
                    code,
                    String::from_utf8_lossy(&buffer)
                )
            })
    }
}

pub fn starlark_ok(snippet: &str) -> Value {
    let mut env = StarlarkEnvironment::new().expect("error creating starlark environment");

    let res = env.eval(snippet);
    assert!(res.is_ok(), "{:?}", res.err());

    res.unwrap()
}

/// Evaluate a snippet that is expected to fail, returning the error message.
pub fn starlark_nok(snippet: &str) -> String {
    let mut env = StarlarkEnvironment::new().expect("error creating starlark environment");

    let res = env.eval(snippet);
    assert!(res.is_err());

    format!("{}", res.unwrap_err())
}
