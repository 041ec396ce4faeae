// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::py_packaging::config::RunMode,
    starlark::{
        values::{Mutable, TypedValue, Value, ValueResult},
        {
            starlark_fun, starlark_module, starlark_parse_param_type, starlark_signature,
            starlark_signature_extraction, starlark_signatures,
        },
    },
};

/// What the embedded interpreter does when the application starts.
#[derive(Debug, Clone)]
pub struct PythonRunModeValue {
    pub run_mode: RunMode,
}

impl TypedValue for PythonRunModeValue {
    type Holder = Mutable<PythonRunModeValue>;
    const TYPE: &'static str = "PythonRunMode";

    fn values_for_descendant_check_and_freeze(&self) -> Box<dyn Iterator<Item = Value>> {
        Box::new(std::iter::empty())
    }

    fn to_str(&self) -> String {
        format!("PythonRunMode<{:?}>", self.run_mode)
    }

    fn to_repr(&self) -> String {
        self.to_str()
    }
}

fn run_mode_value(run_mode: RunMode) -> ValueResult {
    Ok(Value::new(PythonRunModeValue { run_mode }))
}

starlark_module! { python_run_mode_env =>
    python_run_mode_noop() {
        run_mode_value(RunMode::Noop)
    }

    python_run_mode_repl() {
        run_mode_value(RunMode::Repl)
    }

    python_run_mode_module(module: String) {
        run_mode_value(RunMode::Module { module })
    }

    python_run_mode_eval(code: String) {
        run_mode_value(RunMode::Eval { code })
    }
}
