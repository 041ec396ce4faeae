// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Scanning the filesystem for Python resources.
*/

use {
    anyhow::{Context, Result},
    itertools::Itertools,
    std::{
        collections::HashSet,
        ffi::OsStr,
        path::{Path, PathBuf},
    },
};

const EXTENSION_SUFFIXES: &[&str] = &[".so", ".pyd"];

pub fn is_package_from_path(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with("__init__."))
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBasedResource {
    pub package: String,
    pub stem: String,
    pub full_name: String,
    pub path: PathBuf,
}

/// Represents a Python resource backed by the filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PythonFileResource {
    /// Python module source code.
    ///
    /// i.e. a .py file.
    Source {
        package: String,
        full_name: String,
        path: PathBuf,
    },

    /// A compiled extension module.
    ///
    /// i.e. a .so or .pyd file.
    ExtensionModule {
        package: String,
        stem: String,
        full_name: String,
        path: PathBuf,
        extension_file_suffix: String,
    },

    /// A non-module Python resource.
    Resource(FileBasedResource),

    /// Bytecode caches, eggs, and path files. Not packaged.
    Other { path: PathBuf },
}

pub struct PythonResourceIterator {
    root_path: PathBuf,
    walkdir_result: Box<dyn Iterator<Item = walkdir::Result<walkdir::DirEntry>>>,
    seen_packages: HashSet<String>,
    resources: Vec<FileBasedResource>,
}

impl PythonResourceIterator {
    fn new(path: &Path) -> PythonResourceIterator {
        let res = walkdir::WalkDir::new(path)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter(|entry| match entry {
                Ok(entry) => !entry.file_type().is_dir(),
                Err(_) => true,
            });

        PythonResourceIterator {
            root_path: path.to_path_buf(),
            walkdir_result: Box::new(res),
            seen_packages: HashSet::new(),
            resources: Vec::new(),
        }
    }

    fn resolve_dir_entry(&mut self, entry: walkdir::DirEntry) -> Result<Option<PythonFileResource>> {
        let path = entry.path();

        let mut rel_path = path
            .strip_prefix(&self.root_path)
            .with_context(|| format!("stripping prefix from {}", path.display()))?;

        let components_of = |p: &Path| {
            p.iter()
                .map(|c| c.to_string_lossy().to_string())
                .collect::<Vec<_>>()
        };
        let mut components = components_of(rel_path);

        if components.is_empty() {
            return Ok(None);
        }

        // Packaging metadata.
        if components[0].ends_with(".dist-info") || components[0].ends_with(".egg-info") {
            return Ok(None);
        }

        // site-packages is a package root within the package root.
        if components[0] == "site-packages" && components.len() > 1 {
            rel_path = path.strip_prefix(self.root_path.join("site-packages"))?;
            components = components_of(rel_path);

            if components[0].ends_with(".dist-info") || components[0].ends_with(".egg-info") {
                return Ok(None);
            }
        }

        let file_name = components[components.len() - 1].clone();
        let package_parts = &components[0..components.len() - 1];

        if package_parts.iter().any(|p| p == "__pycache__") {
            return Ok(Some(PythonFileResource::Other {
                path: path.to_path_buf(),
            }));
        }

        for ext_suffix in EXTENSION_SUFFIXES {
            if file_name.ends_with(ext_suffix) {
                // foo.cpython-37m-x86_64-linux-gnu.so -> foo
                let (module_name, suffix) = match file_name.find('.') {
                    Some(idx) => (&file_name[0..idx], &file_name[idx..]),
                    None => continue,
                };

                let mut full_module_name = package_parts.to_vec();

                let stem = if module_name == "__init__" {
                    "".to_string()
                } else {
                    full_module_name.push(module_name.to_string());
                    module_name.to_string()
                };

                let full_module_name = full_module_name.join(".");

                let mut package = package_parts.join(".");
                if package.is_empty() {
                    package = full_module_name.clone();
                }

                self.seen_packages.insert(package.clone());

                return Ok(Some(PythonFileResource::ExtensionModule {
                    package,
                    stem,
                    full_name: full_module_name,
                    path: path.to_path_buf(),
                    extension_file_suffix: suffix.to_string(),
                }));
            }
        }

        let resource = match rel_path.extension().and_then(OsStr::to_str) {
            Some("py") => {
                let module_name = rel_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();

                let mut full_module_name = package_parts.to_vec();

                if module_name != "__init__" {
                    full_module_name.push(module_name);
                }

                let full_module_name = full_module_name.join(".");

                let mut package = package_parts.join(".");
                if package.is_empty() {
                    package = full_module_name.clone();
                }

                self.seen_packages.insert(package.clone());

                PythonFileResource::Source {
                    package,
                    full_name: full_module_name,
                    path: path.to_path_buf(),
                }
            }
            Some("pyc") | Some("egg") | Some("pth") => PythonFileResource::Other {
                path: path.to_path_buf(),
            },
            _ => {
                // Files at the root don't belong to any package.
                if package_parts.is_empty() {
                    return Ok(None);
                }

                PythonFileResource::Resource(FileBasedResource {
                    package: package_parts.join("."),
                    stem: file_name.clone(),
                    full_name: components.join("."),
                    path: path.to_path_buf(),
                })
            }
        };

        Ok(Some(resource))
    }

    /// Re-parent a resource whose directory isn't a known package.
    fn resolve_resource(&self, resource: FileBasedResource) -> FileBasedResource {
        if self.seen_packages.contains(&resource.package) {
            return resource;
        }

        let mut components = resource.package.split('.').collect_vec();
        let mut shift_parts = Vec::new();

        while let Some(part) = components.pop() {
            shift_parts.push(part);
            let new_package = components.join(".");

            if !self.seen_packages.contains(&new_package) {
                continue;
            }

            shift_parts.reverse();

            // Use / instead of . because this emulates filesystem behavior.
            let stem = format!("{}/{}", shift_parts.join("/"), resource.stem);

            return FileBasedResource {
                package: new_package,
                stem,
                full_name: resource.full_name,
                path: resource.path,
            };
        }

        resource
    }
}

impl Iterator for PythonResourceIterator {
    type Item = Result<PythonFileResource>;

    fn next(&mut self) -> Option<Self::Item> {
        // Resource files are buffered until all modules have been seen, so
        // their package can be resolved against the set of known packages.
        while let Some(entry) = self.walkdir_result.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            match self.resolve_dir_entry(entry) {
                Ok(Some(PythonFileResource::Resource(resource))) => {
                    self.resources.push(resource);
                }
                Ok(Some(resource)) => return Some(Ok(resource)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }

        if self.resources.is_empty() {
            return None;
        }

        let resource = self.resources.remove(0);

        Some(Ok(PythonFileResource::Resource(
            self.resolve_resource(resource),
        )))
    }
}

/// Find Python resources in a directory.
///
/// A resource is a Python source file, extension module, or resource file
/// which can be addressed via the ``A.B.C`` naming convention.
pub fn find_python_resources(root_path: &Path) -> PythonResourceIterator {
    PythonResourceIterator::new(root_path)
}
