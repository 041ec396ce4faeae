// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::py_packaging::{
        bytecode::{CompileMode, PythonBytecodeCompiler},
        distribution::ParsedPythonDistribution,
        resource::BytecodeOptimizationLevel,
    },
    anyhow::Result,
    std::{
        fs::{create_dir_all, write},
        path::{Path, PathBuf},
    },
};

const PYTHON_JSON: &str = r#"{
    "arch": "x86_64",
    "os": "linux",
    "python_exe": "install/bin/python3.7",
    "python_flavor": "cpython",
    "python_stdlib": "lib/python3.7",
    "python_version": "3.7.7",
    "licenses": ["Python-2.0"],
    "license_path": "LICENSE.txt",
    "build_info": {
        "extensions": {
            "_io": [
                {"in_core": true, "init_fn": "PyInit__io", "required": false, "variant": "default"}
            ],
            "_sre": [
                {"in_core": false, "init_fn": "PyInit__sre", "required": true, "variant": "default"}
            ],
            "_ssl": [
                {
                    "in_core": false,
                    "init_fn": "PyInit__ssl",
                    "required": false,
                    "variant": "default",
                    "licenses": ["OpenSSL"],
                    "license_paths": ["licenses/LICENSE.openssl.txt"],
                    "links": [{"name": "ssl"}]
                }
            ],
            "nis": [
                {
                    "in_core": false,
                    "init_fn": "PyInit_nis",
                    "required": false,
                    "variant": "default",
                    "links": [{"name": "nsl", "system": true}]
                }
            ],
            "readline": [
                {
                    "in_core": false,
                    "init_fn": "PyInit_readline",
                    "required": false,
                    "variant": "default",
                    "licenses": ["GPL-3.0"],
                    "links": [{"name": "readline"}]
                },
                {
                    "in_core": false,
                    "init_fn": "PyInit_readline",
                    "required": false,
                    "variant": "libedit",
                    "licenses": ["BSD-3-Clause"],
                    "links": [{"name": "edit", "system": true}]
                }
            ]
        }
    }
}"#;

/// A minimal Python distribution written to disk.
///
/// It has no working interpreter. Bytecode is produced with [FakeCompiler].
pub struct FakeDistribution {
    pub root: PathBuf,
}

impl FakeDistribution {
    pub fn new(root: &Path) -> Result<Self> {
        let python = root.join("python");
        let stdlib = python.join("lib").join("python3.7");

        create_dir_all(stdlib.join("json"))?;
        create_dir_all(stdlib.join("test"))?;
        create_dir_all(stdlib.join("site-packages").join("six-1.0.dist-info"))?;
        create_dir_all(python.join("licenses"))?;

        write(python.join("PYTHON.json"), PYTHON_JSON)?;
        write(python.join("LICENSE.txt"), "Python license")?;
        write(
            python.join("licenses").join("LICENSE.openssl.txt"),
            "OpenSSL license",
        )?;

        write(stdlib.join("os.py"), "import sys\n")?;
        write(stdlib.join("json").join("__init__.py"), "from .decoder import *\n")?;
        write(stdlib.join("json").join("decoder.py"), "import re\n")?;
        write(stdlib.join("json").join("data.txt"), "data")?;
        write(stdlib.join("test").join("__init__.py"), "")?;
        write(stdlib.join("test").join("test_os.py"), "import os\n")?;

        // Packages installed into the distribution aren't stdlib.
        write(stdlib.join("site-packages").join("six.py"), "")?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn parse(&self) -> Result<ParsedPythonDistribution> {
        ParsedPythonDistribution::from_directory(&self.root)
    }

    /// Write the distribution as a zstd compressed tar archive.
    pub fn write_archive(&self, path: &Path) -> Result<PathBuf> {
        let fh = std::fs::File::create(path)?;
        let mut encoder = zstd::stream::write::Encoder::new(fh, 0)?;

        {
            let mut builder = tar::Builder::new(&mut encoder);
            builder.append_dir_all("python", self.root.join("python"))?;
            builder.finish()?;
        }

        encoder.finish()?;

        Ok(path.to_path_buf())
    }
}

/// A bytecode compiler that prefixes source with `bc:`.
#[derive(Default)]
pub struct FakeCompiler {
    pub compiled: Vec<(String, CompileMode)>,
}

impl PythonBytecodeCompiler for FakeCompiler {
    fn compile(
        &mut self,
        source: &[u8],
        filename: &str,
        _optimize: BytecodeOptimizationLevel,
        output_mode: CompileMode,
    ) -> Result<Vec<u8>> {
        self.compiled.push((filename.to_string(), output_mode));

        let mut res = b"bc:".to_vec();
        res.extend_from_slice(source);

        Ok(res)
    }
}
