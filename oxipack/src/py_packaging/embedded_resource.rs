// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Resources embedded in the built executable.

These are persisted as JSON next to the generated Rust source and pulled
into the binary with `include_bytes!`.
*/

use {
    super::{
        distribution::ExtensionModule,
        resource::{BuiltExtensionModule, PackagedModuleBytecode, PackagedModuleSource},
    },
    anyhow::{Context, Result},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::Path,
    },
};

/// An extension module compiled into the interpreter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedExtensionModule {
    pub init_fn: Option<String>,
    pub variant: String,
    pub builtin_default: bool,
    pub required: bool,
}

impl From<&ExtensionModule> for EmbeddedExtensionModule {
    fn from(em: &ExtensionModule) -> Self {
        Self {
            init_fn: em.init_fn.clone(),
            variant: em.variant.clone(),
            builtin_default: em.builtin_default,
            required: em.required,
        }
    }
}

/// Represents resources to embed in the built executable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedPythonResources {
    pub module_sources: BTreeMap<String, PackagedModuleSource>,
    pub module_bytecodes: BTreeMap<String, PackagedModuleBytecode>,
    pub all_modules: BTreeSet<String>,
    pub all_packages: BTreeSet<String>,
    pub resources: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    pub extension_modules: BTreeMap<String, EmbeddedExtensionModule>,
    pub built_extension_modules: BTreeMap<String, BuiltExtensionModule>,
}

impl EmbeddedPythonResources {
    /// Write the resources as JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_slice(&data)?)
    }
}
