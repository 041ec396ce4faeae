// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Python resource types shared by packaging rules and packaging state. */

use {
    super::{
        distribution::ExtensionModule,
        fsscan::{is_package_from_path, PythonFileResource},
    },
    anyhow::{anyhow, Context, Result},
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
};

/// An optimization level for Python bytecode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BytecodeOptimizationLevel {
    Zero,
    One,
    Two,
}

impl TryFrom<i64> for BytecodeOptimizationLevel {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(anyhow!(
                "invalid bytecode optimization level {}; must be 0, 1, or 2",
                value
            )),
        }
    }
}

impl From<BytecodeOptimizationLevel> for i32 {
    fn from(level: BytecodeOptimizationLevel) -> Self {
        match level {
            BytecodeOptimizationLevel::Zero => 0,
            BytecodeOptimizationLevel::One => 1,
            BytecodeOptimizationLevel::Two => 2,
        }
    }
}

/// An extension module that was built or discovered outside the distribution.
///
/// The shared library content is carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltExtensionModule {
    pub name: String,
    pub init_fn: String,
    pub extension_file_suffix: String,
    pub data: Vec<u8>,
    pub is_package: bool,
}

/// Represents a resource to make available to the Python interpreter.
#[derive(Clone, Debug)]
pub enum PythonResource {
    ExtensionModule {
        name: String,
        module: ExtensionModule,
    },
    ModuleSource {
        name: String,
        source: Vec<u8>,
        is_package: bool,
    },
    ModuleBytecodeRequest {
        name: String,
        source: Vec<u8>,
        optimize_level: i32,
        is_package: bool,
    },
    Resource {
        package: String,
        name: String,
        data: Vec<u8>,
    },
    BuiltExtensionModule(BuiltExtensionModule),
}

impl PythonResource {
    /// The name this resource is filtered and logged by.
    pub fn name(&self) -> &str {
        match self {
            Self::ExtensionModule { name, .. } => name,
            Self::ModuleSource { name, .. } => name,
            Self::ModuleBytecodeRequest { name, .. } => name,
            Self::Resource { name, .. } => name,
            Self::BuiltExtensionModule(em) => &em.name,
        }
    }
}

impl TryFrom<&PythonFileResource> for PythonResource {
    type Error = anyhow::Error;

    fn try_from(resource: &PythonFileResource) -> Result<PythonResource> {
        match resource {
            PythonFileResource::Source {
                full_name, path, ..
            } => {
                let source =
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

                Ok(PythonResource::ModuleSource {
                    name: full_name.clone(),
                    source,
                    is_package: is_package_from_path(path),
                })
            }
            PythonFileResource::Resource(resource) => {
                let data = std::fs::read(&resource.path)
                    .with_context(|| format!("reading {}", resource.path.display()))?;

                Ok(PythonResource::Resource {
                    package: resource.package.clone(),
                    name: resource.stem.clone(),
                    data,
                })
            }
            PythonFileResource::ExtensionModule {
                stem,
                full_name,
                path,
                extension_file_suffix,
                ..
            } => {
                let data =
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

                // Package extensions (__init__.so) initialize via the package's last name.
                let init_name = full_name.rsplit('.').next().unwrap_or(full_name);

                Ok(PythonResource::BuiltExtensionModule(BuiltExtensionModule {
                    name: full_name.clone(),
                    init_fn: format!("PyInit_{}", init_name),
                    extension_file_suffix: extension_file_suffix.clone(),
                    data,
                    is_package: stem.is_empty(),
                }))
            }
            PythonFileResource::Other { path } => Err(anyhow!(
                "{} cannot be converted to a Python resource",
                path.display()
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedModuleSource {
    pub source: Vec<u8>,
    pub is_package: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedModuleBytecode {
    pub bytecode: Vec<u8>,
    pub is_package: bool,
}

/// Represents resources to install in an app-relative location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRelativeResources {
    pub module_sources: BTreeMap<String, PackagedModuleSource>,
    pub module_bytecodes: BTreeMap<String, PackagedModuleBytecode>,
    pub resources: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    #[serde(default)]
    pub extension_modules: BTreeMap<String, BuiltExtensionModule>,
}

impl AppRelativeResources {
    pub fn is_empty(&self) -> bool {
        self.module_sources.is_empty()
            && self.module_bytecodes.is_empty()
            && self.resources.is_empty()
            && self.extension_modules.is_empty()
    }
}

/// Resolve the set of packages present in a fully qualified module name.
pub fn packages_from_module_name(module: &str) -> BTreeSet<String> {
    let mut package_names = BTreeSet::new();

    let mut search = module;

    while let Some(idx) = search.rfind('.') {
        package_names.insert(search[0..idx].to_string());
        search = &search[0..idx];
    }

    package_names
}

/// Resolve the set of packages present in a series of fully qualified module names.
pub fn packages_from_module_names<I>(names: I) -> BTreeSet<String>
where
    I: Iterator<Item = String>,
{
    let mut package_names = BTreeSet::new();

    for name in names {
        package_names.extend(packages_from_module_name(&name));
    }

    package_names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packages_from_module_name() {
        assert!(packages_from_module_name("foo").is_empty());
        assert_eq!(
            packages_from_module_name("foo.bar"),
            BTreeSet::from(["foo".to_string()])
        );
        assert_eq!(
            packages_from_module_name("foo.bar.baz"),
            BTreeSet::from(["foo".to_string(), "foo.bar".to_string()])
        );
    }

    #[test]
    fn test_packages_from_module_names() {
        let names = vec!["a.b".to_string(), "c.d.e".to_string(), "f".to_string()];

        assert_eq!(
            packages_from_module_names(names.into_iter()),
            BTreeSet::from(["a".to_string(), "c".to_string(), "c.d".to_string()])
        );
    }

    #[test]
    fn test_from_file_resource() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let path = td.path().join("foo.cpython-37m-x86_64-linux-gnu.so");
        std::fs::write(&path, b"ELF")?;

        let resource = PythonResource::try_from(&PythonFileResource::ExtensionModule {
            package: "acme".to_string(),
            stem: "foo".to_string(),
            full_name: "acme.foo".to_string(),
            path: path.clone(),
            extension_file_suffix: ".cpython-37m-x86_64-linux-gnu.so".to_string(),
        })?;

        match resource {
            PythonResource::BuiltExtensionModule(em) => {
                assert_eq!(em.name, "acme.foo");
                assert_eq!(em.init_fn, "PyInit_foo");
                assert_eq!(em.data, b"ELF".to_vec());
                assert!(!em.is_package);
            }
            _ => panic!("expected built extension module"),
        }

        assert!(PythonResource::try_from(&PythonFileResource::Other { path }).is_err());

        Ok(())
    }

    #[test]
    fn test_optimization_level() {
        assert_eq!(
            BytecodeOptimizationLevel::try_from(2).unwrap(),
            BytecodeOptimizationLevel::Two
        );
        assert_eq!(i32::from(BytecodeOptimizationLevel::One), 1);
        assert!(BytecodeOptimizationLevel::try_from(3).is_err());
    }
}
